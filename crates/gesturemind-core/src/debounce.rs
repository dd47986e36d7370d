use serde::Serialize;

/// Minimum gap between two classification requests.
pub const COOLDOWN_MS: i64 = 2_500;
/// How long the gate stays shut after the classifier reports quota exhaustion.
pub const RATE_LIMIT_MS: i64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDenied {
    InFlight,
    RateLimited { remaining_ms: i64 },
    Cooldown { remaining_ms: i64 },
}

impl std::fmt::Display for GateDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateDenied::InFlight => f.write_str("in_flight"),
            GateDenied::RateLimited { remaining_ms } => {
                write!(f, "rate_limited ({remaining_ms}ms left)")
            }
            GateDenied::Cooldown { remaining_ms } => write!(f, "cooldown ({remaining_ms}ms left)"),
        }
    }
}

/// Decides whether a new classification may be issued at a given instant.
///
/// Timestamps are milliseconds on a monotonic clock chosen by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DebounceState {
    last_processed_ms: Option<i64>,
    in_flight: bool,
    rate_limited_until_ms: Option<i64>,
}

impl DebounceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, now_ms: i64) -> Result<(), GateDenied> {
        if self.in_flight {
            return Err(GateDenied::InFlight);
        }
        if let Some(until) = self.rate_limited_until_ms {
            if now_ms < until {
                return Err(GateDenied::RateLimited {
                    remaining_ms: until - now_ms,
                });
            }
        }
        if let Some(last) = self.last_processed_ms {
            let elapsed = now_ms - last;
            if elapsed <= COOLDOWN_MS {
                return Err(GateDenied::Cooldown {
                    remaining_ms: COOLDOWN_MS - elapsed + 1,
                });
            }
        }
        Ok(())
    }

    pub fn may_classify(&self, now_ms: i64) -> bool {
        self.check(now_ms).is_ok()
    }

    /// Claims the gate. On success the request counts as issued at `now_ms`.
    pub fn begin(&mut self, now_ms: i64) -> Result<(), GateDenied> {
        self.check(now_ms)?;
        self.in_flight = true;
        self.last_processed_ms = Some(now_ms);
        Ok(())
    }

    pub fn settle(&mut self) {
        self.in_flight = false;
    }

    /// Returns the instant the limit lifts.
    pub fn mark_rate_limited(&mut self, now_ms: i64) -> i64 {
        let until = now_ms + RATE_LIMIT_MS;
        self.rate_limited_until_ms = Some(until);
        until
    }

    pub fn is_rate_limited(&self, now_ms: i64) -> bool {
        self.rate_limited_until_ms
            .map(|until| now_ms < until)
            .unwrap_or(false)
    }

    /// Drops an elapsed rate limit. Returns true when something was cleared.
    pub fn clear_expired(&mut self, now_ms: i64) -> bool {
        match self.rate_limited_until_ms {
            Some(until) if now_ms >= until => {
                self.rate_limited_until_ms = None;
                true
            }
            _ => false,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_processed_ms(&self) -> Option<i64> {
        self.last_processed_ms
    }

    pub fn rate_limited_until_ms(&self) -> Option<i64> {
        self.rate_limited_until_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_is_always_allowed() {
        let g = DebounceState::new();
        assert!(g.may_classify(0));
    }

    #[test]
    fn cooldown_is_strict() {
        let mut g = DebounceState::new();
        g.begin(1_000).unwrap();
        g.settle();
        assert_eq!(
            g.check(3_500),
            Err(GateDenied::Cooldown { remaining_ms: 1 })
        );
        assert!(g.may_classify(3_501));
    }

    #[test]
    fn in_flight_blocks_even_after_cooldown() {
        let mut g = DebounceState::new();
        g.begin(0).unwrap();
        assert_eq!(g.check(10_000), Err(GateDenied::InFlight));
        g.settle();
        assert!(g.may_classify(10_000));
    }

    #[test]
    fn rate_limit_lifts_after_window() {
        let mut g = DebounceState::new();
        g.begin(0).unwrap();
        g.settle();
        let until = g.mark_rate_limited(100);
        assert_eq!(until, 100 + RATE_LIMIT_MS);
        assert!(g.is_rate_limited(100));
        assert!(g.is_rate_limited(until - 1));
        assert!(!g.may_classify(until - 1));
        assert!(!g.is_rate_limited(until));
        assert!(g.may_classify(until));
        assert!(g.clear_expired(until));
        assert_eq!(g.rate_limited_until_ms(), None);
        assert!(!g.clear_expired(until));
    }

    #[test]
    fn granted_requests_are_never_closer_than_cooldown() {
        let mut g = DebounceState::new();
        let mut issued: Vec<i64> = Vec::new();
        // Frames at irregular intervals; every request settles immediately.
        let mut t = 0i64;
        let mut seed: u64 = 42;
        for _ in 0..2_000 {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            t += ((seed >> 33) % 400) as i64;
            if g.begin(t).is_ok() {
                issued.push(t);
                g.settle();
            }
        }
        assert!(issued.len() > 10);
        for w in issued.windows(2) {
            assert!(w[1] - w[0] > COOLDOWN_MS, "{} then {}", w[0], w[1]);
        }
    }
}

use crate::dispatch::LinkTarget;

pub const NOTICE_MS: i64 = 3_000;

/// Banner text shown while a link is being opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientNotice {
    pub message: String,
    pub expires_at_ms: i64,
}

impl TransientNotice {
    pub fn link_engaged(target: LinkTarget, now_ms: i64) -> Self {
        Self {
            message: format!("LINK ENGAGED: OPENING {}...", target.label()),
            expires_at_ms: now_ms + NOTICE_MS,
        }
    }

    /// Replaces the engaged banner; keeps its expiry.
    pub fn into_blocked(self, target: LinkTarget) -> Self {
        Self {
            message: format!("POP-UP BLOCKED! PLEASE ALLOW FOR {}", target.label()),
            expires_at_ms: self.expires_at_ms,
        }
    }

    pub fn is_active(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }
}

use crate::action::Action;
use crate::status::{AppContext, SystemStatus};

/// External sites an action may open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTarget {
    YouTube,
    Gmail,
    YouTubeMusic,
}

impl LinkTarget {
    pub fn url(self) -> &'static str {
        match self {
            LinkTarget::YouTube => "https://www.youtube.com",
            LinkTarget::Gmail => "https://mail.google.com",
            LinkTarget::YouTubeMusic => "https://music.youtube.com",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LinkTarget::YouTube => "YOUTUBE",
            LinkTarget::Gmail => "GMAIL",
            LinkTarget::YouTubeMusic => "YT MUSIC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub status: SystemStatus,
    pub link: Option<LinkTarget>,
}

pub fn apply_action(action: Action, status: &SystemStatus) -> Dispatch {
    let prev = *status;
    let (status, link) = match action {
        Action::OpenYoutube => (
            SystemStatus {
                current_app: AppContext::YouTube,
                ..prev
            },
            Some(LinkTarget::YouTube),
        ),
        Action::OpenGmail => (
            SystemStatus {
                current_app: AppContext::Gmail,
                ..prev
            },
            Some(LinkTarget::Gmail),
        ),
        Action::PlaySong => (
            SystemStatus {
                is_playing: true,
                current_app: AppContext::Music,
                ..prev
            },
            Some(LinkTarget::YouTubeMusic),
        ),
        Action::PauseSong => (
            SystemStatus {
                is_playing: false,
                ..prev
            },
            None,
        ),
        Action::VolumeUp => (prev.volume_up(), None),
        Action::VolumeDown => (prev.volume_down(), None),
        // There is no unlock action; the flag only ever goes one way.
        Action::LockSystem => (
            SystemStatus {
                is_locked: true,
                ..prev
            },
            None,
        ),
        Action::None => (prev, None),
    };
    Dispatch { status, link }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(actions: &[Action]) -> SystemStatus {
        actions
            .iter()
            .fold(SystemStatus::default(), |s, a| apply_action(*a, &s).status)
    }

    #[test]
    fn link_actions_switch_context_and_request_link() {
        let s = SystemStatus::default();

        let d = apply_action(Action::OpenYoutube, &s);
        assert_eq!(d.status.current_app, AppContext::YouTube);
        assert_eq!(d.link, Some(LinkTarget::YouTube));

        let d = apply_action(Action::OpenGmail, &s);
        assert_eq!(d.status.current_app, AppContext::Gmail);
        assert_eq!(d.link.map(LinkTarget::url), Some("https://mail.google.com"));

        let paused = SystemStatus {
            is_playing: false,
            ..s
        };
        let d = apply_action(Action::PlaySong, &paused);
        assert!(d.status.is_playing);
        assert_eq!(d.status.current_app, AppContext::Music);
        assert_eq!(d.link.map(LinkTarget::label), Some("YT MUSIC"));
    }

    #[test]
    fn pause_only_touches_playback() {
        let d = apply_action(Action::PauseSong, &SystemStatus::default());
        assert!(!d.status.is_playing);
        assert_eq!(d.status.current_app, AppContext::System);
        assert_eq!(d.link, None);
    }

    #[test]
    fn twenty_volume_ups_from_fifty_clamp_at_hundred() {
        let s = run(&[Action::VolumeUp; 20]);
        assert_eq!(s.volume(), 100);
    }

    #[test]
    fn volume_stays_in_range_for_mixed_sequences() {
        let mut s = SystemStatus::default();
        // Deterministic pseudo-random walk over up/down.
        let mut seed: u32 = 7;
        for _ in 0..500 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let a = if (seed >> 16) & 1 == 0 {
                Action::VolumeUp
            } else {
                Action::VolumeDown
            };
            s = apply_action(a, &s).status;
            assert!(s.volume() <= 100);
        }
        assert_eq!(run(&[Action::VolumeDown; 8]).volume(), 0);
    }

    #[test]
    fn lock_is_sticky_for_every_later_action() {
        let locked = apply_action(Action::LockSystem, &SystemStatus::default()).status;
        assert!(locked.is_locked);
        for a in Action::ALL {
            assert!(apply_action(a, &locked).status.is_locked, "{a} unlocked");
        }
    }

    #[test]
    fn none_is_a_no_op() {
        let s = SystemStatus::default().with_volume(30);
        let d = apply_action(Action::None, &s);
        assert_eq!(d.status, s);
        assert_eq!(d.link, None);
    }
}

use chrono::{Local, TimeZone};
use gesturemind_core::{Action, ActionLogEntry, AppContext, SystemStatus};

use crate::controller::AgentSnapshot;

pub const EMPTY_CONSOLE: &str = "Waiting for gestures...";
pub const PAUSED_MARKER: &str = "SIGNAL PAUSED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCard {
    pub label: &'static str,
    pub value: String,
}

pub fn status_cards(status: &SystemStatus) -> [StatusCard; 4] {
    [
        StatusCard {
            label: "Volume",
            value: format!("{}%", status.volume()),
        },
        StatusCard {
            label: "Playback",
            value: if status.is_playing { "Playing" } else { "Paused" }.to_string(),
        },
        StatusCard {
            label: "Context",
            value: status.current_app.as_str().to_string(),
        },
        StatusCard {
            label: "Security",
            value: if status.is_locked { "Locked" } else { "Active" }.to_string(),
        },
    ]
}

pub fn link_indicator(snap: &AgentSnapshot) -> &'static str {
    if !snap.camera_enabled {
        "OFFLINE"
    } else if snap.rate_limited {
        "QUOTA_HIT"
    } else if snap.in_flight {
        "INTERPRETING..."
    } else {
        "CONNECTED"
    }
}

/// 24h local wall-clock time.
pub fn clock_label(timestamp_ms: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms).single() {
        Some(t) => t.format("%H:%M:%S").to_string(),
        None => "--:--:--".to_string(),
    }
}

/// Newest first; `entries` is in insertion order.
pub fn console_lines(entries: &[ActionLogEntry]) -> Vec<String> {
    if entries.is_empty() {
        return vec![EMPTY_CONSOLE.to_string()];
    }
    entries
        .iter()
        .rev()
        .map(|e| {
            format!(
                "{}  {:<12} {}",
                clock_label(e.timestamp_ms),
                e.action.as_str(),
                e.reasoning
            )
        })
        .collect()
}

pub fn virtual_view_title(ctx: AppContext) -> Option<&'static str> {
    match ctx {
        AppContext::System => None,
        AppContext::YouTube => Some("NeuralTube"),
        AppContext::Music => Some("NeuralMusic"),
        AppContext::Gmail => Some("NeuralMail"),
    }
}

pub fn virtual_view(status: &SystemStatus) -> Option<String> {
    let title = virtual_view_title(status.current_app)?;
    if status.is_playing {
        Some(title.to_string())
    } else {
        Some(format!("{title} [{PAUSED_MARKER}]"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBinding {
    pub gesture: &'static str,
    pub command: &'static str,
    pub action: Action,
}

pub const COMMAND_SET: [CommandBinding; 7] = [
    CommandBinding {
        gesture: "OPEN PALM",
        command: "AUTO-OPEN YOUTUBE",
        action: Action::OpenYoutube,
    },
    CommandBinding {
        gesture: "MIDDLE FINGER",
        command: "YT MUSIC LINK",
        action: Action::PlaySong,
    },
    CommandBinding {
        gesture: "PINKY FINGER",
        command: "GMAIL LINK",
        action: Action::OpenGmail,
    },
    CommandBinding {
        gesture: "O-SIGN",
        command: "PAUSE SIGNAL",
        action: Action::PauseSong,
    },
    CommandBinding {
        gesture: "THUMB_UP",
        command: "VOLUME +",
        action: Action::VolumeUp,
    },
    CommandBinding {
        gesture: "THUMB_DN",
        command: "VOLUME -",
        action: Action::VolumeDown,
    },
    CommandBinding {
        gesture: "FIST",
        command: "LOCK SYSTEM",
        action: Action::LockSystem,
    },
];

pub fn keymap_lines() -> Vec<String> {
    COMMAND_SET
        .iter()
        .map(|b| format!("{:<14} {:<18} {}", b.gesture, b.command, b.action.as_str()))
        .collect()
}

pub fn render_dashboard(snap: &AgentSnapshot) -> String {
    let cards = status_cards(&snap.status)
        .iter()
        .map(|c| format!("{}: {}", c.label, c.value))
        .collect::<Vec<_>>()
        .join(" | ");
    let mut out = format!("[{}] {cards}\n", link_indicator(snap));
    if let Some(n) = &snap.notice {
        out.push_str(&format!(">> {n}\n"));
    }
    if let Some(v) = virtual_view(&snap.status) {
        out.push_str(&format!("View: {v}\n"));
    }
    if !snap.last_reasoning.is_empty() {
        out.push_str(&format!("Reasoning: {}\n", snap.last_reasoning));
    }
    out.push_str("System Logs\n");
    for line in console_lines(&snap.log) {
        out.push_str("  ");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gesturemind_core::ActionLog;

    fn snapshot() -> AgentSnapshot {
        AgentSnapshot {
            status: SystemStatus::default(),
            log: Vec::new(),
            notice: None,
            last_reasoning: String::new(),
            camera_enabled: true,
            rate_limited: false,
            in_flight: false,
        }
    }

    fn pair(c: &StatusCard) -> (&str, &str) {
        (c.label, c.value.as_str())
    }

    #[test]
    fn cards_follow_status() {
        let mut s = SystemStatus::default().with_volume(80);
        s.is_locked = true;
        s.is_playing = false;
        s.current_app = AppContext::Gmail;
        let cards = status_cards(&s);
        assert_eq!(pair(&cards[0]), ("Volume", "80%"));
        assert_eq!(pair(&cards[1]), ("Playback", "Paused"));
        assert_eq!(pair(&cards[2]), ("Context", "Gmail"));
        assert_eq!(pair(&cards[3]), ("Security", "Locked"));
    }

    #[test]
    fn indicator_priority() {
        let mut s = snapshot();
        assert_eq!(link_indicator(&s), "CONNECTED");
        s.in_flight = true;
        assert_eq!(link_indicator(&s), "INTERPRETING...");
        s.rate_limited = true;
        assert_eq!(link_indicator(&s), "QUOTA_HIT");
        s.camera_enabled = false;
        assert_eq!(link_indicator(&s), "OFFLINE");
    }

    #[test]
    fn console_is_newest_first() {
        assert_eq!(console_lines(&[]), vec![EMPTY_CONSOLE.to_string()]);

        let mut log = ActionLog::new();
        log.push(Action::VolumeUp, "thumb up", 1_700_000_000_000);
        log.push(Action::LockSystem, "fist", 1_700_000_001_000);
        let lines = console_lines(&log.to_vec());
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("LOCK_SYSTEM"));
        assert!(lines[0].ends_with("fist"));
        assert!(lines[1].contains("VOLUME_UP"));
    }

    #[test]
    fn clock_label_is_24h() {
        let l = clock_label(1_700_000_000_000);
        assert_eq!(l.len(), 8);
        assert_eq!(l.as_bytes()[2], b':');
        assert_eq!(l.as_bytes()[5], b':');
        let hour: u32 = l[..2].parse().expect("hour");
        assert!(hour < 24);
    }

    #[test]
    fn virtual_views_per_context() {
        assert_eq!(virtual_view(&SystemStatus::default()), None);
        let mut yt = SystemStatus::default();
        yt.current_app = AppContext::YouTube;
        assert_eq!(virtual_view(&yt).as_deref(), Some("NeuralTube"));
        let mut paused = SystemStatus::default();
        paused.is_playing = false;
        paused.current_app = AppContext::Music;
        assert_eq!(
            virtual_view(&paused).as_deref(),
            Some("NeuralMusic [SIGNAL PAUSED]")
        );
    }

    #[test]
    fn keymap_covers_every_command() {
        let mut actions: Vec<Action> = COMMAND_SET.iter().map(|b| b.action).collect();
        actions.push(Action::None);
        for a in Action::ALL {
            assert!(actions.contains(&a), "missing {a}");
        }
        assert_eq!(keymap_lines().len(), 7);
    }

    #[test]
    fn dashboard_shows_notice_and_waiting_console() {
        let mut s = snapshot();
        s.notice = Some("LINK ENGAGED: OPENING GMAIL...".to_string());
        s.last_reasoning = "pinky extended".to_string();
        let out = render_dashboard(&s);
        assert!(out.starts_with("[CONNECTED] Volume: 50% | Playback: Playing"));
        assert!(out.contains(">> LINK ENGAGED: OPENING GMAIL..."));
        assert!(out.contains("Reasoning: pinky extended"));
        assert!(out.contains(EMPTY_CONSOLE));
        assert!(!out.contains("View:"));
    }
}

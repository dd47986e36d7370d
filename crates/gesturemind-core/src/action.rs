use serde::{Deserialize, Deserializer, Serialize};

pub const QUOTA_EXCEEDED_MARKER: &str = "QUOTA_EXCEEDED";
pub const SIGNAL_ERROR_MARKER: &str = "SIGNAL_ERROR";

/// Closed set of commands the classifier may answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    PlaySong,
    PauseSong,
    VolumeUp,
    VolumeDown,
    OpenYoutube,
    OpenGmail,
    LockSystem,
    #[default]
    #[serde(other)]
    None,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::PlaySong,
        Action::PauseSong,
        Action::VolumeUp,
        Action::VolumeDown,
        Action::OpenYoutube,
        Action::OpenGmail,
        Action::LockSystem,
        Action::None,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::PlaySong => "PLAY_SONG",
            Action::PauseSong => "PAUSE_SONG",
            Action::VolumeUp => "VOLUME_UP",
            Action::VolumeDown => "VOLUME_DOWN",
            Action::OpenYoutube => "OPEN_YOUTUBE",
            Action::OpenGmail => "OPEN_GMAIL",
            Action::LockSystem => "LOCK_SYSTEM",
            Action::None => "NONE",
        }
    }

    /// Unknown labels (including ones outside the handled set) become `None`.
    pub fn parse_lenient(s: &str) -> Action {
        let t = s.trim();
        Action::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(t))
            .unwrap_or(Action::None)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn lenient_action<'de, D>(d: D) -> Result<Action, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<String> = Option::deserialize(d)?;
    Ok(v.as_deref().map(Action::parse_lenient).unwrap_or_default())
}

fn lenient_reasoning<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<String> = Option::deserialize(d)?;
    Ok(v.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(default, deserialize_with = "lenient_action")]
    pub action: Action,
    #[serde(default, deserialize_with = "lenient_reasoning")]
    pub reasoning: String,
}

impl ClassificationResult {
    pub fn new(action: Action, reasoning: impl Into<String>) -> Self {
        Self {
            action,
            reasoning: reasoning.into(),
        }
    }

    /// Synthetic verdict used when the classifier could not be reached.
    pub fn link_error(marker: &str) -> Self {
        Self::new(Action::None, format!("Neural Link Error: {marker}"))
    }

    pub fn is_quota_exceeded(&self) -> bool {
        self.reasoning.contains(QUOTA_EXCEEDED_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_labels() {
        let r: ClassificationResult =
            serde_json::from_str(r#"{"action":"OPEN_GMAIL","reasoning":"pinky up"}"#).unwrap();
        assert_eq!(r.action, Action::OpenGmail);
        assert_eq!(r.reasoning, "pinky up");
    }

    #[test]
    fn unknown_or_missing_action_becomes_none() {
        let r: ClassificationResult =
            serde_json::from_str(r#"{"action":"NEXT_TAB","reasoning":"x"}"#).unwrap();
        assert_eq!(r.action, Action::None);

        let r: ClassificationResult = serde_json::from_str(r#"{"reasoning":"x"}"#).unwrap();
        assert_eq!(r.action, Action::None);

        let r: ClassificationResult =
            serde_json::from_str(r#"{"action":null,"reasoning":null}"#).unwrap();
        assert_eq!(r.action, Action::None);
        assert_eq!(r.reasoning, "");
    }

    #[test]
    fn labels_roundtrip_through_as_str() {
        for a in Action::ALL {
            assert_eq!(Action::parse_lenient(a.as_str()), a);
            assert_eq!(serde_json::to_string(&a).unwrap(), format!("\"{a}\""));
        }
    }

    #[test]
    fn link_error_carries_marker() {
        let r = ClassificationResult::link_error(QUOTA_EXCEEDED_MARKER);
        assert_eq!(r.action, Action::None);
        assert_eq!(r.reasoning, "Neural Link Error: QUOTA_EXCEEDED");
        assert!(r.is_quota_exceeded());
        assert!(!ClassificationResult::link_error(SIGNAL_ERROR_MARKER).is_quota_exceeded());
    }
}

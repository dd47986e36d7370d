use std::collections::VecDeque;

use serde::Serialize;
use uuid::Uuid;

use crate::action::Action;

pub const ACTION_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionLogEntry {
    pub id: String,
    pub action: Action,
    pub reasoning: String,
    pub timestamp_ms: i64, // wall clock, unix epoch
}

/// Bounded history of executed actions, oldest evicted first.
#[derive(Debug, Clone)]
pub struct ActionLog {
    entries: VecDeque<ActionLogEntry>,
    capacity: usize,
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionLog {
    pub fn new() -> Self {
        Self::with_capacity(ACTION_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an entry and returns its id.
    pub fn push(&mut self, action: Action, reasoning: &str, timestamp_ms: i64) -> String {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        let id = Uuid::new_v4().to_string();
        self.entries.push_back(ActionLogEntry {
            id: id.clone(),
            action,
            reasoning: reasoning.to_string(),
            timestamp_ms,
        });
        id
    }

    /// Oldest first.
    pub fn to_vec(&self) -> Vec<ActionLogEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_capacity_and_keeps_order() {
        let mut log = ActionLog::new();
        for n in 1..=120i64 {
            log.push(Action::VolumeUp, &format!("entry {n}"), n);
            assert!(log.to_vec().len() <= ACTION_LOG_CAPACITY);
        }
        let entries = log.to_vec();
        assert_eq!(entries.len(), ACTION_LOG_CAPACITY);
        let stamps: Vec<i64> = entries.iter().map(|e| e.timestamp_ms).collect();
        let expected: Vec<i64> = (71..=120).collect();
        assert_eq!(stamps, expected);
        assert_eq!(entries.last().map(|e| e.reasoning.as_str()), Some("entry 120"));
    }

    #[test]
    fn small_ring_evicts_oldest() {
        let mut log = ActionLog::with_capacity(2);
        log.push(Action::OpenGmail, "a", 1);
        log.push(Action::PauseSong, "b", 2);
        log.push(Action::VolumeDown, "c", 3);
        let order: Vec<Action> = log.to_vec().iter().map(|e| e.action).collect();
        assert_eq!(order, vec![Action::PauseSong, Action::VolumeDown]);
    }

    #[test]
    fn push_returns_the_stored_entry_id() {
        let mut log = ActionLog::new();
        let a = log.push(Action::LockSystem, "fist", 1);
        let b = log.push(Action::LockSystem, "fist", 2);
        assert_ne!(a, b);
        assert!(!a.is_empty());
        let ids: Vec<String> = log.to_vec().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a, b]);
    }
}

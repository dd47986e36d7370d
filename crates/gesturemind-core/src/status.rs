use serde::Serialize;

pub const MIN_VOLUME: u8 = 0;
pub const MAX_VOLUME: u8 = 100;
pub const VOLUME_STEP: u8 = 10;
pub const DEFAULT_VOLUME: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AppContext {
    #[default]
    System,
    YouTube,
    Gmail,
    Music,
}

impl AppContext {
    pub fn as_str(self) -> &'static str {
        match self {
            AppContext::System => "System",
            AppContext::YouTube => "YouTube",
            AppContext::Gmail => "Gmail",
            AppContext::Music => "Music",
        }
    }
}

impl std::fmt::Display for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Simulated device state. Volume is kept within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub is_locked: bool,
    pub(crate) volume: u8,
    pub is_playing: bool,
    pub current_app: AppContext,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            is_locked: false,
            volume: DEFAULT_VOLUME,
            is_playing: true,
            current_app: AppContext::System,
        }
    }
}

impl SystemStatus {
    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn with_volume(mut self, volume: i32) -> Self {
        self.volume = volume.clamp(MIN_VOLUME as i32, MAX_VOLUME as i32) as u8;
        self
    }

    pub fn volume_up(self) -> Self {
        let v = self.volume as i32 + VOLUME_STEP as i32;
        self.with_volume(v)
    }

    pub fn volume_down(self) -> Self {
        let v = self.volume as i32 - VOLUME_STEP as i32;
        self.with_volume(v)
    }

    /// Leaves a virtual app view; nothing else changes.
    pub fn return_to_system(mut self) -> Self {
        self.current_app = AppContext::System;
        self
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    /// When false, link actions are recorded but no browser is launched.
    #[serde(default = "default_true")]
    pub open_links: bool,
    #[serde(default = "default_true")]
    pub camera_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_base_url: None,
            llm_model: None,
            open_links: true,
            camera_enabled: true,
        }
    }
}

/// Partial update; `Some("")` clears an optional string field.
#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub open_links: Option<bool>,
    pub camera_enabled: Option<bool>,
}

fn non_empty(v: String) -> Option<String> {
    let t = v.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

impl Settings {
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(v) = patch.llm_base_url {
            self.llm_base_url = non_empty(v);
        }
        if let Some(v) = patch.llm_model {
            self.llm_model = non_empty(v);
        }
        if let Some(v) = patch.open_links {
            self.open_links = v;
        }
        if let Some(v) = patch.camera_enabled {
            self.camera_enabled = v;
        }
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

pub fn load_settings(data_dir: &Path) -> Result<Settings> {
    let p = settings_path(data_dir);
    if !p.exists() {
        return Ok(Settings::default());
    }
    let s = fs::read_to_string(&p).context("read settings.json failed")?;
    let v: Settings = serde_json::from_str(&s).context("parse settings.json failed")?;
    Ok(v)
}

/// A corrupt settings file must not keep the agent from starting.
pub fn load_settings_or_recover(data_dir: &Path) -> Settings {
    match load_settings(data_dir) {
        Ok(s) => s,
        Err(e) => {
            crate::trace::event(
                data_dir,
                None,
                "Settings",
                "SETTINGS.recover_default",
                "err",
                Some(serde_json::json!({"error": format!("{e:#}")})),
            );
            Settings::default()
        }
    }
}

pub fn save_settings(data_dir: &Path, settings: &Settings) -> Result<()> {
    fs::create_dir_all(data_dir).context("create data dir failed")?;
    let p = settings_path(data_dir);
    let s = serde_json::to_string_pretty(settings).context("serialize settings failed")?;
    fs::write(&p, s).context("write settings.json failed")?;
    Ok(())
}

pub fn update_settings(data_dir: &Path, patch: SettingsPatch) -> Result<Settings> {
    let mut s = load_settings_or_recover(data_dir);
    s.apply(patch);
    save_settings(data_dir, &s)?;
    Ok(s)
}

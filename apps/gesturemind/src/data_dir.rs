use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

const DATA_DIR_ENV: &str = "GESTUREMIND_DATA_DIR";

/// Resolution order: explicit flag, `GESTUREMIND_DATA_DIR`, per-user default.
pub fn resolve(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    data_dir()
}

pub fn data_dir() -> Result<PathBuf> {
    if let Ok(p) = std::env::var(DATA_DIR_ENV) {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }
    if cfg!(windows) {
        if let Ok(p) = std::env::var("APPDATA") {
            return Ok(PathBuf::from(p).join("gesturemind"));
        }
    }
    let home = std::env::var("HOME").map_err(|_| anyhow!("failed to locate home directory"))?;
    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("gesturemind"))
}

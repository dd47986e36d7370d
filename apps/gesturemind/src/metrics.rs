use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;

pub fn metrics_path(data_dir: &Path) -> PathBuf {
    data_dir.join("metrics.jsonl")
}

/// One line per classifier round trip.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyMetric<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub session_id: &'a str,
    pub ts_ms: i64,
    pub classify_ms: u128,
    pub action: &'static str,
    pub outcome: &'a str, // ok|quota|error
    pub error_code: Option<&'a str>,
}

pub fn append_jsonl<T: Serialize>(data_dir: &Path, obj: &T) -> Result<()> {
    std::fs::create_dir_all(data_dir).context("create data dir failed")?;
    let p = metrics_path(data_dir);
    let mut line = serde_json::to_string(obj).context("serialize metrics json failed")?;
    line.push('\n');
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&p)
        .with_context(|| format!("open metrics jsonl failed: {}", p.display()))?;
    f.write_all(line.as_bytes())
        .context("write metrics line failed")?;
    Ok(())
}

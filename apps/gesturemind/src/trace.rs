use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::Error as AnyhowError;
use serde::Serialize;
use serde_json::Value;

const DEFAULT_TRACE_MAX_BYTES: u64 = 5_000_000; // 5MB
const DEFAULT_TRACE_MAX_FILES: usize = 3;
const BACKTRACE_MAX_CHARS: usize = 8_000;

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy)]
struct TraceConfig {
    enabled: bool,
    backtrace: bool,
    max_bytes: u64,
    max_files: usize,
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => {
            let t = v.trim().to_ascii_lowercase();
            !(t == "0" || t == "false" || t == "no" || t == "off")
        }
        Err(_) => default,
    }
}

fn env_num<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn config() -> TraceConfig {
    TraceConfig {
        enabled: env_flag("GESTUREMIND_TRACE_ENABLED", true),
        // Off by default; backtraces dominate the line size.
        backtrace: env_flag("GESTUREMIND_TRACE_BACKTRACE", false),
        max_bytes: env_num("GESTUREMIND_TRACE_MAX_BYTES", DEFAULT_TRACE_MAX_BYTES),
        max_files: env_num("GESTUREMIND_TRACE_MAX_FILES", DEFAULT_TRACE_MAX_FILES),
    }
}

pub fn trace_path(data_dir: &Path) -> PathBuf {
    data_dir.join("trace.jsonl")
}

fn rotated_path(data_dir: &Path, n: usize) -> PathBuf {
    data_dir.join(format!("trace.jsonl.{n}"))
}

fn rotate_if_needed(data_dir: &Path, cfg: &TraceConfig) {
    if cfg.max_files == 0 {
        return;
    }
    let p = trace_path(data_dir);
    let too_big = std::fs::metadata(&p)
        .map(|m| m.len() > cfg.max_bytes)
        .unwrap_or(false);
    if !too_big {
        return;
    }

    // trace.jsonl.N is dropped, every other file moves up one slot.
    let _ = std::fs::remove_file(rotated_path(data_dir, cfg.max_files));
    for i in (1..cfg.max_files).rev() {
        let src = rotated_path(data_dir, i);
        if src.exists() {
            let _ = std::fs::rename(&src, rotated_path(data_dir, i + 1));
        }
    }
    let _ = std::fs::rename(&p, rotated_path(data_dir, 1));
}

fn write_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceError {
    pub kind: String, // http|io|parse|gate|link|logic
    pub code: String, // E_* | HTTP_429
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub ts_ms: i64,
    pub session_id: Option<String>,
    pub stage: String,
    pub step_id: String,
    pub op: String,     // start|end|event
    pub status: String, // ok|err|skipped|aborted
    pub duration_ms: Option<u128>,
    pub error: Option<TraceError>,
    pub ctx: Option<Value>,
}

pub fn emit_best_effort(data_dir: &Path, ev: &TraceEvent) {
    let cfg = config();
    if !cfg.enabled {
        return;
    }
    let mut line = match serde_json::to_string(ev) {
        Ok(s) => s,
        Err(e) => {
            crate::safe_eprintln!("trace: serialize failed: {e}");
            return;
        }
    };
    line.push('\n');

    let _guard = write_lock().lock().unwrap_or_else(|e| e.into_inner());
    let _ = std::fs::create_dir_all(data_dir);
    rotate_if_needed(data_dir, &cfg);

    let p = trace_path(data_dir);
    match OpenOptions::new().create(true).append(true).open(&p) {
        Ok(mut f) => {
            if let Err(e) = f.write_all(line.as_bytes()) {
                crate::safe_eprintln!("trace: write failed: {e}");
            }
        }
        Err(e) => crate::safe_eprintln!("trace: open failed: {}: {e}", p.display()),
    }
}

fn backtrace_ctx(extra: Option<Value>) -> Option<Value> {
    if !config().backtrace {
        return extra;
    }
    let bt = format!("{:?}", std::backtrace::Backtrace::force_capture());
    let bt: String = bt.chars().take(BACKTRACE_MAX_CHARS).collect();
    let mut m = match extra {
        Some(Value::Object(m)) => m,
        Some(v) => {
            let mut m = serde_json::Map::new();
            m.insert("extra".to_string(), v);
            m
        }
        None => serde_json::Map::new(),
    };
    m.insert("backtrace".to_string(), Value::String(bt));
    Some(Value::Object(m))
}

pub fn event(
    data_dir: &Path,
    session_id: Option<&str>,
    stage: &str,
    step_id: &str,
    status: &str,
    ctx: Option<Value>,
) {
    emit_best_effort(
        data_dir,
        &TraceEvent {
            ts_ms: now_ms(),
            session_id: session_id.map(str::to_string),
            stage: stage.to_string(),
            step_id: step_id.to_string(),
            op: "event".to_string(),
            status: status.to_string(),
            duration_ms: None,
            error: None,
            ctx,
        },
    );
}

/// A timed step. Finish it with `ok`/`err`; dropping it unfinished records `aborted`.
pub struct Span {
    data_dir: PathBuf,
    session_id: Option<String>,
    stage: String,
    step_id: String,
    t0: Instant,
    finished: bool,
}

impl Span {
    pub fn start(
        data_dir: &Path,
        session_id: Option<&str>,
        stage: &str,
        step_id: &str,
        ctx: Option<Value>,
    ) -> Self {
        let span = Self {
            data_dir: data_dir.to_path_buf(),
            session_id: session_id.map(str::to_string),
            stage: stage.to_string(),
            step_id: step_id.to_string(),
            t0: Instant::now(),
            finished: false,
        };
        span.emit("start", "ok", None, None, ctx);
        span
    }

    fn emit(
        &self,
        op: &str,
        status: &str,
        duration_ms: Option<u128>,
        error: Option<TraceError>,
        ctx: Option<Value>,
    ) {
        emit_best_effort(
            &self.data_dir,
            &TraceEvent {
                ts_ms: now_ms(),
                session_id: self.session_id.clone(),
                stage: self.stage.clone(),
                step_id: self.step_id.clone(),
                op: op.to_string(),
                status: status.to_string(),
                duration_ms,
                error,
                ctx,
            },
        );
    }

    fn finish(&mut self, status: &str, error: Option<TraceError>, ctx: Option<Value>) {
        self.finished = true;
        let elapsed = self.t0.elapsed().as_millis();
        self.emit("end", status, Some(elapsed), error, ctx);
    }

    pub fn ok(mut self, ctx: Option<Value>) {
        self.finish("ok", None, ctx);
    }

    pub fn skipped(mut self, reason: &str, ctx: Option<Value>) {
        let error = TraceError {
            kind: "logic".to_string(),
            code: "SKIPPED".to_string(),
            message: reason.to_string(),
        };
        self.finish("skipped", Some(error), ctx);
    }

    pub fn err(mut self, kind: &str, code: &str, message: &str, ctx: Option<Value>) {
        let error = TraceError {
            kind: kind.to_string(),
            code: code.to_string(),
            message: message.to_string(),
        };
        self.finish("err", Some(error), backtrace_ctx(ctx));
    }

    pub fn err_anyhow(mut self, kind: &str, code: &str, err: &AnyhowError, ctx: Option<Value>) {
        let chain: Vec<String> = err.chain().map(|e| e.to_string()).collect();
        let mut m = serde_json::Map::new();
        m.insert("err_chain".to_string(), serde_json::json!(chain));
        if let Some(Value::Object(extra)) = ctx {
            m.extend(extra);
        }
        let error = TraceError {
            kind: kind.to_string(),
            code: code.to_string(),
            message: err.to_string(),
        };
        self.finish("err", Some(error), backtrace_ctx(Some(Value::Object(m))));
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let error = TraceError {
            kind: "logic".to_string(),
            code: "ABORTED".to_string(),
            message: "span dropped without explicit ok/err".to_string(),
        };
        self.finish("aborted", Some(error), backtrace_ctx(None));
    }
}

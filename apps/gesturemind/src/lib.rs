mod classifier;
mod controller;
mod data_dir;
mod link_opener;
mod metrics;
mod panic_log;
mod runtime;
mod safe_print;
mod settings;
mod trace;
mod views;

use std::{
    future::Future,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use gesturemind_core::HandFrame;
use serde_json::json;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use classifier::{GeminiClassifier, GestureClassifier};
use controller::{AgentSnapshot, Controller};
use link_opener::{DryRunOpener, LinkOpener, SystemOpener};
use runtime::{RunOptions, RunSummary};
use settings::SettingsPatch;
use trace::Span;

#[derive(Debug, Parser)]
#[command(
    name = "gesturemind",
    version,
    about = "Drive media, links and lock state with hand gestures"
)]
struct Cli {
    /// Overrides GESTUREMIND_DATA_DIR and the per-user default
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream JSONL hand frames through the controller
    Run(RunArgs),
    /// Classify a single frame and print the verdict
    Classify {
        /// File holding one JSON hand frame
        file: PathBuf,
    },
    /// Manage the classifier API key
    #[command(subcommand)]
    Key(KeyCommand),
    /// Show or change persisted settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Print the gesture keymap
    Commands,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// JSONL frame source; `-` reads stdin
    #[arg(long, default_value = "-")]
    frames: String,

    /// Pace input to this many frames per second
    #[arg(long)]
    fps: Option<f64>,

    /// Record link actions without launching a browser
    #[arg(long)]
    dry_run_links: bool,

    /// Start with the camera disabled (every frame is dropped)
    #[arg(long)]
    camera_off: bool,

    /// Emit snapshots as JSON lines instead of the text dashboard
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum KeyCommand {
    Set { key: String },
    Clear,
    Status,
}

#[derive(Debug, Subcommand)]
enum SettingsCommand {
    Show,
    Set {
        /// Empty string restores the default
        #[arg(long)]
        base_url: Option<String>,
        /// Empty string restores the default
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        open_links: Option<bool>,
        #[arg(long)]
        camera_enabled: Option<bool>,
    },
}

fn cmd_span(
    data_dir: &Path,
    session_id: Option<&str>,
    step_id: &str,
    ctx: Option<serde_json::Value>,
) -> Span {
    Span::start(data_dir, session_id, "Cmd", step_id, ctx)
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(v).context("serialize output failed")?;
    safe_println!("{s}");
    Ok(())
}

fn print_snapshot(snap: &AgentSnapshot, as_json: bool) {
    if as_json {
        match serde_json::to_string(snap) {
            Ok(s) => safe_println!("{s}"),
            Err(e) => safe_eprintln!("snapshot serialize failed: {e}"),
        }
    } else {
        safe_println!("{}", views::render_dashboard(snap));
    }
}

fn print_summary(s: &RunSummary, as_json: bool) {
    if as_json {
        safe_println!("{}", json!({"summary": s}));
        return;
    }
    safe_println!(
        "frames={} classified={} gated={} no_hand={} malformed={} controls={} dropped(locked={} camera={} backpressure={}){}",
        s.frames_read,
        s.classified,
        s.gated,
        s.no_hand,
        s.malformed,
        s.controls,
        s.dropped_locked,
        s.dropped_camera,
        s.dropped_backpressure,
        if s.cancelled { " cancelled" } else { "" }
    );
}

// Stdin reads sit on a blocking thread; do not wait for them on exit.
fn block_on<F: Future<Output = Result<()>>>(fut: F) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime failed")?;
    let out = rt.block_on(fut);
    rt.shutdown_background();
    out
}

async fn run_frames(data_dir: &Path, args: RunArgs) -> Result<()> {
    let settings = settings::load_settings_or_recover(data_dir);
    let session_id = Uuid::new_v4().to_string();
    let cfg = classifier::load_config(&settings);

    let key = classifier::api_key_status();
    if !key.configured {
        safe_eprintln!(
            "gesturemind: no API key configured; every frame will report SIGNAL_ERROR (see `gesturemind key set`)"
        );
    }

    let classifier = Arc::new(GeminiClassifier::new(data_dir, &session_id, cfg)?);
    let dry_run = (args.dry_run_links || !settings.open_links).then(|| Arc::new(DryRunOpener::new()));
    let opener: Arc<dyn LinkOpener> = match &dry_run {
        Some(d) => d.clone(),
        None => Arc::new(SystemOpener::new()),
    };
    let camera_enabled = settings.camera_enabled && !args.camera_off;
    let controller = Controller::new(data_dir, &session_id, classifier, opener, camera_enabled);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let as_json = args.json;
    print_snapshot(&controller.snapshot(), as_json);
    let observer_cancel = CancellationToken::new();
    let observer = runtime::spawn_observer(
        controller.subscribe(),
        observer_cancel.clone(),
        move |snap| print_snapshot(snap, as_json),
    );

    let opts = RunOptions { fps: args.fps };
    let summary = if args.frames == "-" {
        runtime::run_agent(&controller, BufReader::new(tokio::io::stdin()), opts, cancel).await
    } else {
        let f = tokio::fs::File::open(&args.frames)
            .await
            .with_context(|| format!("open frames file failed: {}", args.frames))?;
        runtime::run_agent(&controller, BufReader::new(f), opts, cancel).await
    };

    observer_cancel.cancel();
    let _ = observer.await;
    print_summary(&summary, as_json);
    if let Some(d) = dry_run {
        for url in d.opened() {
            safe_println!("dry-run link: {url}");
        }
    }
    Ok(())
}

async fn classify_file(data_dir: &Path, path: &Path) -> Result<()> {
    let session_id = Uuid::new_v4().to_string();
    let span = cmd_span(
        data_dir,
        Some(&session_id),
        "CMD.classify",
        Some(json!({"path": path.display().to_string()})),
    );
    let raw = match tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read frame file failed: {}", path.display()))
    {
        Ok(s) => s,
        Err(e) => {
            span.err_anyhow("io", "E_FRAME_READ", &e, None);
            return Err(e);
        }
    };
    // The first JSON value wins, so both single-frame files and JSONL work.
    let parsed = serde_json::Deserializer::from_str(&raw)
        .into_iter::<HandFrame>()
        .next();
    let frame = match parsed {
        Some(Ok(f)) => f,
        Some(Err(e)) => {
            let e = anyhow::Error::new(e).context("parse hand frame failed");
            span.err_anyhow("parse", "E_FRAME_PARSE", &e, None);
            return Err(e);
        }
        None => {
            let e = anyhow!("no frame found in {}", path.display());
            span.err_anyhow("parse", "E_FRAME_PARSE", &e, None);
            return Err(e);
        }
    };
    let Some(hand) = frame.first_hand() else {
        span.skipped("frame has no hand", None);
        safe_println!("no hand in frame; nothing to classify");
        return Ok(());
    };

    let settings = settings::load_settings_or_recover(data_dir);
    let classifier = GeminiClassifier::new(data_dir, &session_id, classifier::load_config(&settings))?;
    match classifier.classify(hand).await {
        Ok(r) => {
            span.ok(Some(json!({"action": r.action.as_str()})));
            print_json(&r)
        }
        Err(e) => {
            safe_eprintln!("gesturemind: {e}");
            span.err("http", &e.code, &e.message, None);
            print_json(&e.fallback_result())
        }
    }
}

fn key_command(data_dir: &Path, cmd: KeyCommand) -> Result<()> {
    match cmd {
        KeyCommand::Set { key } => {
            let span = cmd_span(data_dir, None, "CMD.key_set", None);
            let key = key.trim();
            if key.is_empty() {
                let e = anyhow!("api key must not be empty");
                span.err_anyhow("config", "E_API_KEY_EMPTY", &e, None);
                return Err(e);
            }
            match classifier::set_api_key(key) {
                Ok(()) => span.ok(None),
                Err(e) => {
                    span.err_anyhow("config", "E_KEYRING", &e, None);
                    return Err(e);
                }
            }
            print_json(&classifier::api_key_status())
        }
        KeyCommand::Clear => {
            let span = cmd_span(data_dir, None, "CMD.key_clear", None);
            match classifier::clear_api_key() {
                Ok(()) => span.ok(None),
                Err(e) => {
                    span.err_anyhow("config", "E_KEYRING", &e, None);
                    return Err(e);
                }
            }
            print_json(&classifier::api_key_status())
        }
        KeyCommand::Status => print_json(&classifier::api_key_status()),
    }
}

fn settings_command(data_dir: &Path, cmd: SettingsCommand) -> Result<()> {
    match cmd {
        SettingsCommand::Show => {
            let s = settings::load_settings(data_dir)?;
            print_json(&s)
        }
        SettingsCommand::Set {
            base_url,
            model,
            open_links,
            camera_enabled,
        } => {
            let span = cmd_span(data_dir, None, "CMD.settings_set", None);
            let patch = SettingsPatch {
                llm_base_url: base_url,
                llm_model: model,
                open_links,
                camera_enabled,
            };
            match settings::update_settings(data_dir, patch) {
                Ok(s) => {
                    span.ok(None);
                    print_json(&s)
                }
                Err(e) => {
                    span.err_anyhow("io", "E_SETTINGS_WRITE", &e, None);
                    Err(e)
                }
            }
        }
    }
}

fn dispatch(cmd: Command, data_dir: &Path) -> Result<()> {
    match cmd {
        Command::Run(args) => block_on(run_frames(data_dir, args)),
        Command::Classify { file } => block_on(classify_file(data_dir, &file)),
        Command::Key(k) => key_command(data_dir, k),
        Command::Settings(s) => settings_command(data_dir, s),
        Command::Commands => {
            for line in views::keymap_lines() {
                safe_println!("{line}");
            }
            Ok(())
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let data_dir = match data_dir::resolve(cli.data_dir.as_deref()) {
        Ok(d) => d,
        Err(e) => {
            safe_eprintln!("gesturemind: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    panic_log::install_best_effort(data_dir.clone());
    match dispatch(cli.command, &data_dir) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            safe_eprintln!("gesturemind: {e:#}");
            ExitCode::FAILURE
        }
    }
}

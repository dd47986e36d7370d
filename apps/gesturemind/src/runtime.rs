use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use gesturemind_core::HandFrame;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::controller::{AgentSnapshot, Controller, DropReason, FrameVerdict};
use crate::trace::{self, Span};

/// At most one frame waits behind the one being classified.
pub const FRAME_QUEUE_DEPTH: usize = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Paces input to a camera-like rate. `None` reads as fast as the source allows.
    pub fps: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub frames_read: usize,
    pub malformed: usize,
    pub dropped_locked: usize,
    pub dropped_camera: usize,
    pub dropped_backpressure: usize,
    pub no_hand: usize,
    pub gated: usize,
    pub classified: usize,
    pub controls: usize,
    pub cancelled: bool,
}

/// Out-of-band commands interleaved with frames, standing in for the
/// camera toggle and the Back buttons of the app views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    ReturnToSystem,
    CameraOn,
    CameraOff,
}

#[derive(Debug)]
enum InputLine {
    Control(ControlCommand),
    Frame(HandFrame),
}

const FRAME_KEYS: [&str; 2] = ["hands", "multiHandLandmarks"];

/// A line with a `control` key is a command; a frame must name its hands.
fn parse_line(line: &str) -> Result<InputLine> {
    let v: Value = serde_json::from_str(line).context("line is not json")?;
    let Some(obj) = v.as_object() else {
        return Err(anyhow!("line is not a json object"));
    };
    if let Some(c) = obj.get("control") {
        let cmd = ControlCommand::deserialize(c).context("unknown control command")?;
        return Ok(InputLine::Control(cmd));
    }
    if !FRAME_KEYS.iter().any(|k| obj.contains_key(*k)) {
        return Err(anyhow!("line has no `control`, `hands` or `multiHandLandmarks` key"));
    }
    let frame = HandFrame::deserialize(v).context("invalid hand frame")?;
    Ok(InputLine::Frame(frame))
}

pub fn apply_control(controller: &Controller, cmd: ControlCommand) {
    match cmd {
        ControlCommand::ReturnToSystem => controller.return_to_system(),
        ControlCommand::CameraOn => controller.set_camera_enabled(true),
        ControlCommand::CameraOff => controller.set_camera_enabled(false),
    }
}

impl RunSummary {
    fn count_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::Locked => self.dropped_locked += 1,
            DropReason::CameraDisabled => self.dropped_camera += 1,
            DropReason::Backpressure => self.dropped_backpressure += 1,
        }
    }

    fn count_verdict(&mut self, v: &FrameVerdict) {
        match v {
            FrameVerdict::Dropped(r) => self.count_drop(*r),
            FrameVerdict::NoHand => self.no_hand += 1,
            FrameVerdict::Gated(_) => self.gated += 1,
            FrameVerdict::Classified(_) => self.classified += 1,
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.frames_read += other.frames_read;
        self.malformed += other.malformed;
        self.dropped_locked += other.dropped_locked;
        self.dropped_camera += other.dropped_camera;
        self.dropped_backpressure += other.dropped_backpressure;
        self.no_hand += other.no_hand;
        self.gated += other.gated;
        self.classified += other.classified;
        self.controls += other.controls;
        self.cancelled |= other.cancelled;
    }
}

/// Producer side of the frame queue. Never blocks.
pub struct FrameSink {
    tx: mpsc::Sender<HandFrame>,
    controller: Controller,
}

impl FrameSink {
    pub fn offer(&self, frame: HandFrame) -> Result<(), DropReason> {
        self.controller.accepts_frames()?;
        self.tx
            .try_send(frame)
            .map_err(|_| DropReason::Backpressure)
    }
}

pub fn frame_queue(controller: &Controller) -> (FrameSink, mpsc::Receiver<HandFrame>) {
    let (tx, rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
    (
        FrameSink {
            tx,
            controller: controller.clone(),
        },
        rx,
    )
}

async fn produce<R>(
    reader: R,
    sink: FrameSink,
    opts: RunOptions,
    cancel: CancellationToken,
) -> RunSummary
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = RunSummary::default();
    let mut pacer = opts.fps.filter(|f| *f > 0.0).map(|fps| {
        let mut i = tokio::time::interval(Duration::from_secs_f64(1.0 / fps));
        i.set_missed_tick_behavior(MissedTickBehavior::Delay);
        i
    });
    let data_dir = sink.controller.data_dir().to_path_buf();
    let session_id = sink.controller.session_id().to_string();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    loop {
        if let Some(p) = pacer.as_mut() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => { stats.cancelled = true; break; }
                _ = p.tick() => {}
            }
        }
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => { stats.cancelled = true; break; }
            l = lines.next_line() => l,
        };
        let line = match next {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                trace::event(
                    &data_dir,
                    Some(&session_id),
                    "Frames",
                    "FRAMES.read",
                    "err",
                    Some(json!({"line": line_no, "error": e.to_string()})),
                );
                break;
            }
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let frame = match parse_line(&line) {
            Ok(InputLine::Control(control)) => {
                stats.controls += 1;
                apply_control(&sink.controller, control);
                continue;
            }
            Ok(InputLine::Frame(f)) => {
                stats.frames_read += 1;
                f
            }
            Err(e) => {
                stats.frames_read += 1;
                stats.malformed += 1;
                trace::event(
                    &data_dir,
                    Some(&session_id),
                    "Frames",
                    "FRAMES.parse",
                    "err",
                    Some(json!({"line": line_no, "error": format!("{e:#}")})),
                );
                continue;
            }
        };
        if let Err(reason) = sink.offer(frame) {
            stats.count_drop(reason);
        }
    }
    stats
}

async fn consume(
    controller: Controller,
    mut rx: mpsc::Receiver<HandFrame>,
    cancel: CancellationToken,
) -> RunSummary {
    let mut stats = RunSummary::default();
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => { stats.cancelled = true; break; }
            f = rx.recv() => f,
        };
        let Some(frame) = frame else { break };
        let verdict = tokio::select! {
            biased;
            _ = cancel.cancelled() => { stats.cancelled = true; break; }
            v = controller.process_frame(frame) => v,
        };
        stats.count_verdict(&verdict);
    }
    stats
}

/// Feeds JSONL hand frames from `reader` through the controller until the
/// input ends or `cancel` fires.
pub async fn run_agent<R>(
    controller: &Controller,
    reader: R,
    opts: RunOptions,
    cancel: CancellationToken,
) -> RunSummary
where
    R: AsyncBufRead + Unpin,
{
    let span = Span::start(
        controller.data_dir(),
        Some(controller.session_id()),
        "Run",
        "RUN.frames",
        Some(json!({"fps": opts.fps, "queue_depth": FRAME_QUEUE_DEPTH})),
    );
    let (sink, rx) = frame_queue(controller);
    let (produced, consumed) = tokio::join!(
        produce(reader, sink, opts, cancel.clone()),
        consume(controller.clone(), rx, cancel.clone()),
    );
    let mut summary = produced;
    summary.merge(consumed);
    span.ok(Some(json!(summary)));
    summary
}

/// Calls `render` for every published snapshot until `cancel` fires.
pub fn spawn_observer<F>(
    mut rx: watch::Receiver<AgentSnapshot>,
    cancel: CancellationToken,
    mut render: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut(&AgentSnapshot) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            // Pending snapshots are rendered before honoring cancellation.
            tokio::select! {
                biased;
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snap = rx.borrow_and_update().clone();
                    render(&snap);
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}

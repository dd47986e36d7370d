use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use gesturemind_core::{
    apply_action, Action, ActionLog, ActionLogEntry, ClassificationResult, DebounceState,
    GateDenied, HandFrame, LinkTarget, SystemStatus, TransientNotice, NOTICE_MS, RATE_LIMIT_MS,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;

use crate::classifier::GestureClassifier;
use crate::link_opener::LinkOpener;
use crate::{metrics, trace};

/// A hand-less frame clears the reasoning line once the last request is this old.
pub const REASONING_IDLE_MS: i64 = 4_000;

/// Monotonic milliseconds since the controller was created.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: tokio::time::Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSnapshot {
    pub status: SystemStatus,
    pub log: Vec<ActionLogEntry>,
    pub notice: Option<String>,
    pub last_reasoning: String,
    pub camera_enabled: bool,
    pub rate_limited: bool,
    pub in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Locked,
    CameraDisabled,
    Backpressure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameVerdict {
    Dropped(DropReason),
    NoHand,
    Gated(GateDenied),
    Classified(ClassificationResult),
}

struct ControllerState {
    status: SystemStatus,
    log: ActionLog,
    gate: DebounceState,
    notice: Option<TransientNotice>,
    last_reasoning: String,
    camera_enabled: bool,
}

impl ControllerState {
    fn snapshot(&self, now_ms: i64) -> AgentSnapshot {
        AgentSnapshot {
            status: self.status,
            log: self.log.to_vec(),
            notice: self
                .notice
                .as_ref()
                .filter(|n| n.is_active(now_ms))
                .map(|n| n.message.clone()),
            last_reasoning: self.last_reasoning.clone(),
            camera_enabled: self.camera_enabled,
            rate_limited: self.gate.is_rate_limited(now_ms),
            in_flight: self.gate.in_flight(),
        }
    }
}

/// Sole owner of the session state. Clones share the same state.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Mutex<ControllerState>>,
    classifier: Arc<dyn GestureClassifier>,
    opener: Arc<dyn LinkOpener>,
    snapshots: Arc<watch::Sender<AgentSnapshot>>,
    clock: Clock,
    data_dir: PathBuf,
    session_id: String,
}

/// Releases the gate however the classification ends.
struct InFlightGuard {
    controller: Controller,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.controller.state().gate.settle();
        self.controller.publish();
    }
}

impl Controller {
    pub fn new(
        data_dir: &Path,
        session_id: &str,
        classifier: Arc<dyn GestureClassifier>,
        opener: Arc<dyn LinkOpener>,
        camera_enabled: bool,
    ) -> Self {
        let clock = Clock::start();
        let state = ControllerState {
            status: SystemStatus::default(),
            log: ActionLog::new(),
            gate: DebounceState::new(),
            notice: None,
            last_reasoning: String::new(),
            camera_enabled,
        };
        let (tx, _rx) = watch::channel(state.snapshot(clock.now_ms()));
        Self {
            inner: Arc::new(Mutex::new(state)),
            classifier,
            opener,
            snapshots: Arc::new(tx),
            clock,
            data_dir: data_dir.to_path_buf(),
            session_id: session_id.to_string(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self) {
        let snap = self.snapshot();
        self.snapshots.send_replace(snap);
    }

    fn trace_event(&self, step_id: &str, status: &str, ctx: serde_json::Value) {
        trace::event(
            &self.data_dir,
            Some(&self.session_id),
            "Controller",
            step_id,
            status,
            Some(ctx),
        );
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let now = self.now_ms();
        self.state().snapshot(now)
    }

    pub fn status(&self) -> SystemStatus {
        self.state().status
    }

    /// Frames are not even queued while the camera is off or the system is locked.
    pub fn accepts_frames(&self) -> Result<(), DropReason> {
        let st = self.state();
        if !st.camera_enabled {
            return Err(DropReason::CameraDisabled);
        }
        if st.status.is_locked {
            return Err(DropReason::Locked);
        }
        Ok(())
    }

    pub fn set_camera_enabled(&self, enabled: bool) {
        self.state().camera_enabled = enabled;
        self.trace_event("CAMERA.toggle", "ok", json!({"enabled": enabled}));
        self.publish();
    }

    pub fn return_to_system(&self) {
        {
            let mut st = self.state();
            st.status = st.status.return_to_system();
        }
        self.publish();
    }

    fn try_begin(&self, now_ms: i64) -> Result<InFlightGuard, GateDenied> {
        self.state().gate.begin(now_ms)?;
        Ok(InFlightGuard {
            controller: self.clone(),
        })
    }

    pub async fn process_frame(&self, frame: HandFrame) -> FrameVerdict {
        if let Err(reason) = self.accepts_frames() {
            return FrameVerdict::Dropped(reason);
        }
        let now = self.now_ms();
        let Some(hand) = frame.first_hand() else {
            self.on_idle_frame(now);
            return FrameVerdict::NoHand;
        };
        let guard = match self.try_begin(now) {
            Ok(g) => g,
            Err(denied) => return FrameVerdict::Gated(denied),
        };
        self.publish();

        let t0 = Instant::now();
        let (result, error_code) = match self.classifier.classify(hand).await {
            Ok(r) => (r, None),
            Err(e) => {
                self.trace_event(
                    "CLASSIFY.fallback",
                    "err",
                    json!({"code": e.code, "message": e.message}),
                );
                (e.fallback_result(), Some(e.code))
            }
        };
        let classify_ms = t0.elapsed().as_millis();

        self.apply_result(&result).await;
        drop(guard);
        self.record_metric(classify_ms, &result, error_code.as_deref());
        FrameVerdict::Classified(result)
    }

    fn on_idle_frame(&self, now_ms: i64) {
        let cleared = {
            let mut st = self.state();
            let stale = st
                .gate
                .last_processed_ms()
                .map(|t| now_ms - t > REASONING_IDLE_MS)
                .unwrap_or(true);
            if stale && !st.last_reasoning.is_empty() {
                st.last_reasoning.clear();
                true
            } else {
                false
            }
        };
        if cleared {
            self.publish();
        }
    }

    /// Applies a verdict, including ones that arrive after the state moved on.
    pub async fn apply_result(&self, result: &ClassificationResult) {
        if result.is_quota_exceeded() {
            let now = self.now_ms();
            let until = self.state().gate.mark_rate_limited(now);
            self.trace_event(
                "GATE.rate_limited",
                "ok",
                json!({"now_ms": now, "until_ms": until}),
            );
            self.schedule_expiry(RATE_LIMIT_MS);
        }
        self.handle_action(result.action, &result.reasoning).await;
    }

    pub async fn handle_action(&self, action: Action, reasoning: &str) {
        let (entry_id, link) = {
            let mut st = self.state();
            st.last_reasoning = reasoning.to_string();
            if action == Action::None {
                (None, None)
            } else {
                let id = st.log.push(action, reasoning, trace::now_ms());
                let d = apply_action(action, &st.status);
                st.status = d.status;
                (Some(id), d.link)
            }
        };
        if let Some(entry_id) = entry_id {
            let status = self.status();
            self.trace_event(
                "ACTION.applied",
                "ok",
                json!({
                    "entry_id": entry_id,
                    "action": action.as_str(),
                    "volume": status.volume(),
                    "is_playing": status.is_playing,
                    "is_locked": status.is_locked,
                    "current_app": status.current_app.as_str(),
                }),
            );
        }
        if let Some(target) = link {
            self.open_link(target).await;
        }
        self.publish();
    }

    async fn open_link(&self, target: LinkTarget) {
        let engaged = TransientNotice::link_engaged(target, self.now_ms());
        let notice = match self.opener.open(target.url()).await {
            Ok(()) => {
                self.trace_event("LINK.open", "ok", json!({"url": target.url()}));
                engaged
            }
            Err(e) => {
                self.trace_event(
                    "LINK.open",
                    "err",
                    json!({"url": target.url(), "code": "E_LINK_BLOCKED", "error": format!("{e:#}")}),
                );
                engaged.into_blocked(target)
            }
        };
        self.state().notice = Some(notice);
        self.schedule_expiry(NOTICE_MS);
    }

    // Fire-once timer; outside a runtime the deadlines in the state still apply.
    fn schedule_expiry(&self, after_ms: i64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let this = self.clone();
        handle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(after_ms.max(0) as u64)).await;
            this.expire_timers();
        });
    }

    pub fn expire_timers(&self) {
        let now = self.now_ms();
        let changed = {
            let mut st = self.state();
            let mut changed = st.gate.clear_expired(now);
            if st.notice.as_ref().is_some_and(|n| !n.is_active(now)) {
                st.notice = None;
                changed = true;
            }
            changed
        };
        if changed {
            self.publish();
        }
    }

    fn record_metric(&self, classify_ms: u128, result: &ClassificationResult, error_code: Option<&str>) {
        let outcome = match error_code {
            None => "ok",
            Some(_) if result.is_quota_exceeded() => "quota",
            Some(_) => "error",
        };
        let m = metrics::ClassifyMetric {
            kind: "classify",
            session_id: &self.session_id,
            ts_ms: trace::now_ms(),
            classify_ms,
            action: result.action.as_str(),
            outcome,
            error_code,
        };
        if let Err(e) = metrics::append_jsonl(&self.data_dir, &m) {
            crate::safe_eprintln!("metrics append failed (classify): {e:#}");
        }
    }
}

//! Domain model for the gesture controller: landmarks in, device state out.
//!
//! Everything here is pure and clock-free. Callers pass timestamps in
//! explicitly so the gate and notice lifetimes can be driven by any clock.

pub mod action;
pub mod action_log;
pub mod debounce;
pub mod dispatch;
pub mod landmark;
pub mod notice;
pub mod status;

pub use action::{Action, ClassificationResult};
pub use action_log::{ActionLog, ActionLogEntry, ACTION_LOG_CAPACITY};
pub use debounce::{DebounceState, GateDenied, COOLDOWN_MS, RATE_LIMIT_MS};
pub use dispatch::{apply_action, Dispatch, LinkTarget};
pub use landmark::{Hand, HandError, HandFrame, IndexedPoint, Landmark, HAND_LANDMARK_COUNT};
pub use notice::{TransientNotice, NOTICE_MS};
pub use status::{AppContext, SystemStatus};

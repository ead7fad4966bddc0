//! Events emitted over the engine's broadcast channels.
//!
//! | Event | Channel |
//! |-------|---------|
//! | `DetectionEvent` | `GuardEngine::subscribe_detections` |
//! | `ActivityEvent` | `GuardEngine::subscribe_activity` |
//! | `EngineStatusEvent` | `GuardEngine::subscribe_status` |

use serde::{Deserialize, Serialize};

use crate::decision::Decision;

// ---------------------------------------------------------------------------
// Detection events
// ---------------------------------------------------------------------------

/// Emitted once per classified window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// The decision for this cycle.
    pub decision: Decision,
}

// ---------------------------------------------------------------------------
// Audio activity events
// ---------------------------------------------------------------------------

/// Emitted for every processed window, classified or not.
///
/// This is the degraded-mode signal: when no classifier is loaded, activity
/// events keep flowing so collaborators can still display input levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Root-mean-square level of the analysis window in [0.0, 1.0].
    pub rms: f32,
    /// True when the cycle ran without a classifier.
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the guard engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Loading the classifier (weights, dummy inference).
    WarmingUp,
    /// Actively capturing audio and classifying windows.
    Monitoring,
    /// Running without a classifier — activity events only.
    Degraded,
    /// Capture stopped; engine may be restarted.
    Stopped,
    /// Unrecoverable error — restart required.
    Error,
}

//! # ecoguard-core
//!
//! Reusable acoustic event detection engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → Pipeline(spawn_blocking)
//!                                                    │
//!                                            RollingWindow (2 s, 0.5 s step)
//!                                                    │
//!                                          FeatureExtractor (64×63 log-mel)
//!                                                    │
//!                                          EventClassifier::predict
//!                                                    │
//!                                         decide → broadcast::Sender<DetectionEvent>
//! ```
//!
//! The audio callback is zero-alloc. All heap work happens in the pipeline thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod classify;
pub mod decision;
pub mod engine;
pub mod error;
pub mod features;
pub mod ipc;

// Convenience re-exports for downstream crates
pub use classify::{ClassSet, ClassifierHandle, EventClassifier, StubClassifier};
pub use decision::{decide, AlertDebouncer, AlertTier, Decision, Tuning};
pub use engine::{EngineConfig, GuardEngine};
pub use error::GuardError;
pub use features::{FeatureExtractor, FeatureTensor, MelConfig};
pub use ipc::events::{ActivityEvent, DetectionEvent, EngineStatus, EngineStatusEvent};

#[cfg(feature = "onnx")]
pub use classify::{OnnxClassifier, OnnxClassifierConfig};

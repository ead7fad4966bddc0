//! `GuardEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! GuardEngine::new()
//!     └─► warm_up()          → classifier loaded, status = WarmingUp → Idle
//!         └─► start()        → audio open, pipeline spawned, status = Monitoring
//!             └─► stop()     → running=false, stream dropped, status = Stopped
//! ```
//!
//! `start()`/`stop()` are guarded: calling them in the wrong state returns
//! an error rather than panicking. An engine without a usable classifier
//! still starts — it runs degraded, reporting input levels only.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). `AudioCapture` is therefore created *inside* the
//! `spawn_blocking` closure so it never crosses a thread boundary. A bounded
//! crossbeam channel propagates any open-device errors back to the `start()`
//! caller.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    audio::AudioCapture,
    buffering::create_audio_ring,
    classify::{ClassSet, ClassifierHandle},
    decision::Tuning,
    error::{GuardError, Result},
    features::MelConfig,
    ipc::events::{ActivityEvent, DetectionEvent, EngineStatus, EngineStatusEvent},
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `GuardEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Analysis sample rate (Hz). Audio captured at other rates is resampled.
    /// Default: 16000.
    pub sample_rate: u32,
    /// Rolling window duration in seconds. Default: 2.0.
    pub window_secs: f32,
    /// Step between analysis cycles in seconds. Default: 0.5.
    pub step_secs: f32,
    /// Mel spectrogram parameters. Must match the deployed model.
    pub mel: MelConfig,
    /// Ordered class labels plus the concerning subset. Must match the
    /// deployed model's output order.
    pub classes: ClassSet,
    /// Initial tuning values; runtime-mutable via the engine setters.
    pub tuning: Tuning,
    /// Cycles between repeated alerts on a sustained detection.
    /// Default: 10 (≈ 5 s at a 0.5 s step).
    pub alert_cooldown_cycles: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            window_secs: 2.0,
            step_secs: 0.5,
            mel: MelConfig::default(),
            classes: ClassSet::forest_default(),
            tuning: Tuning::default(),
            alert_cooldown_cycles: 10,
        }
    }
}

impl EngineConfig {
    /// Rolling window length in samples.
    pub fn window_samples(&self) -> usize {
        (self.sample_rate as f32 * self.window_secs).round() as usize
    }

    /// Step block length in samples.
    pub fn step_samples(&self) -> usize {
        (self.sample_rate as f32 * self.step_secs).round() as usize
    }
}

/// The top-level engine handle.
///
/// `GuardEngine` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<GuardEngine>` to share between the host application and
/// event-forwarding async tasks.
pub struct GuardEngine {
    config: EngineConfig,
    classifier: Option<ClassifierHandle>,
    /// Set when warm-up failed — the pipeline then runs without a classifier.
    degraded: Arc<AtomicBool>,
    /// `true` while capture + pipeline are active.
    running: Arc<AtomicBool>,
    /// Canonical status (written atomically via Mutex, read from callers).
    status: Arc<Mutex<EngineStatus>>,
    /// Live tuning knobs, snapshotted by the pipeline each cycle.
    tuning: Arc<Mutex<Tuning>>,
    detection_tx: broadcast::Sender<DetectionEvent>,
    activity_tx: broadcast::Sender<ActivityEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    /// Monotonically increasing detection sequence counter.
    seq: Arc<AtomicU64>,
    /// Samples rejected by the capture callback on ring overflow.
    dropped: Arc<AtomicUsize>,
    /// Shared pipeline diagnostics counters.
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    /// Read-only copy of the current window, refreshed each cycle.
    window_mirror: Arc<Mutex<Vec<f32>>>,
}

impl GuardEngine {
    /// Create a new engine. Does not start capturing — call `warm_up()` then
    /// `start()`. Passing `None` for the classifier builds a degraded engine
    /// that reports input levels only.
    pub fn new(config: EngineConfig, classifier: Option<ClassifierHandle>) -> Self {
        let (detection_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let degraded = Arc::new(AtomicBool::new(classifier.is_none()));
        let tuning = Arc::new(Mutex::new(config.tuning.clone()));

        Self {
            config,
            classifier,
            degraded,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            tuning,
            detection_tx,
            activity_tx,
            status_tx,
            seq: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicUsize::new(0)),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
            window_mirror: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Warm up the classifier (load weights, run a dummy inference).
    ///
    /// Call once at application startup, before `start()`. A failed warm-up
    /// leaves the engine in degraded mode — `start()` still works, reporting
    /// input levels only — and the error is returned so callers can surface
    /// it.
    pub fn warm_up(&self) -> Result<()> {
        let Some(classifier) = &self.classifier else {
            self.set_status(
                EngineStatus::Degraded,
                Some("no classifier configured — monitoring levels only".into()),
            );
            return Ok(());
        };

        self.set_status(EngineStatus::WarmingUp, None);
        info!("warming up classifier");
        match classifier.0.lock().warm_up() {
            Ok(()) => {
                self.degraded.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Idle, None);
                info!("classifier ready");
                Ok(())
            }
            Err(e) => {
                warn!("classifier warm-up failed, running degraded: {e}");
                self.degraded.store(true, Ordering::SeqCst);
                self.set_status(EngineStatus::Degraded, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Start audio capture and the pipeline on the default input device.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then
    /// returns. The pipeline continues running in a background blocking
    /// thread.
    ///
    /// # Errors
    /// - `GuardError::AlreadyRunning` if already started.
    /// - `GuardError::NoDefaultInputDevice` / `GuardError::AudioStream` on
    ///   device error.
    pub fn start(&self) -> Result<()> {
        self.start_with_device(None)
    }

    /// Start the engine using a preferred input device name.
    ///
    /// If `preferred_input_device` is `None`, default input selection is used.
    pub fn start_with_device(&self, preferred_input_device: Option<String>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(GuardError::AlreadyRunning);
        }

        self.diagnostics.reset();
        self.dropped.store(0, Ordering::Relaxed);
        self.running.store(true, Ordering::SeqCst);

        let degraded = self.degraded.load(Ordering::SeqCst);
        if degraded {
            self.set_status(
                EngineStatus::Degraded,
                Some("monitoring without classifier — input levels only".into()),
            );
        } else {
            self.set_status(EngineStatus::Monitoring, None);
        }

        let (producer, consumer) = create_audio_ring();

        // Clone all Arc-wrapped state before moving into the closure.
        let config = self.config.clone();
        let classifier = if degraded {
            None
        } else {
            self.classifier.clone()
        };
        let running = Arc::clone(&self.running);
        let detection_tx = self.detection_tx.clone();
        let activity_tx = self.activity_tx.clone();
        let tuning = Arc::clone(&self.tuning);
        let window_mirror = Arc::clone(&self.window_mirror);
        let seq = Arc::clone(&self.seq);
        let dropped = Arc::clone(&self.dropped);
        let diagnostics = Arc::clone(&self.diagnostics);

        // Bounded handshake: pipeline thread signals open success/failure to
        // start(). Carries the actual capture sample rate on success.
        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<u32>>(1);

        tokio::task::spawn_blocking(move || {
            // ── Open audio device (must happen on THIS thread — cpal::Stream is !Send) ──
            let capture = match AudioCapture::open_with_preference(
                producer,
                Arc::clone(&running),
                Arc::clone(&dropped),
                preferred_input_device.as_deref(),
            ) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(c.sample_rate));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let capture_sample_rate = capture.sample_rate;

            // ── Run pipeline ──────────────────────────────────────────────
            pipeline::run(pipeline::PipelineContext {
                config,
                classifier,
                consumer,
                running,
                detection_tx,
                activity_tx,
                tuning,
                window_mirror,
                seq,
                capture_sample_rate,
                dropped,
                diagnostics,
            });

            // Stream drops here, releasing the audio device on this thread.
            drop(capture);
        });

        // Block start() until device open is confirmed.
        match open_rx.recv() {
            Ok(Ok(_rate)) => {
                info!("engine started — monitoring");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent — spawn_blocking panicked?
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some("pipeline failed to start".into()));
                Err(GuardError::Other(anyhow::anyhow!(
                    "pipeline task died unexpectedly"
                )))
            }
        }
    }

    /// Stop audio capture and the pipeline.
    ///
    /// Safe to call while a processing cycle is in flight: the flag flips,
    /// the capture callback no-ops, and the pipeline thread exits after the
    /// current cycle.
    ///
    /// # Errors
    /// - `GuardError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(GuardError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);
        self.set_status(EngineStatus::Stopped, None);
        info!("engine stop requested");
        Ok(())
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Current tuning values (snapshot).
    pub fn tuning(&self) -> Tuning {
        self.tuning.lock().clone()
    }

    /// Set the confidence threshold, clamped to [0, 1]. Takes effect on the
    /// next cycle.
    pub fn set_threshold(&self, threshold: f32) {
        self.tuning.lock().threshold = threshold.clamp(0.0, 1.0);
    }

    /// Set the input gain multiplier, clamped to (0, 16]. Takes effect on the
    /// next cycle.
    pub fn set_gain(&self, gain: f32) {
        self.tuning.lock().gain = gain.clamp(0.01, 16.0);
    }

    /// Set the alert confidence bound, clamped to [0, 1]. Takes effect on the
    /// next cycle.
    pub fn set_alert_confidence(&self, alert_confidence: f32) {
        self.tuning.lock().alert_confidence = alert_confidence.clamp(0.0, 1.0);
    }

    /// Subscribe to per-cycle detection events.
    pub fn subscribe_detections(&self) -> broadcast::Receiver<DetectionEvent> {
        self.detection_tx.subscribe()
    }

    /// Subscribe to per-cycle activity events (RMS level, degraded flag).
    pub fn subscribe_activity(&self) -> broadcast::Receiver<ActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Subscribe to engine status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Copy of the current rolling window for visualization.
    ///
    /// Empty until the first cycle has run. This is a snapshot, not a live
    /// reference — the pipeline remains the window's only writer.
    pub fn window_snapshot(&self) -> Vec<f32> {
        self.window_mirror.lock().clone()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

//! Blocking pipeline loop.
//!
//! ## Pipeline stages (per iteration)
//!
//! ```text
//! 1. Drain ring buffer → scratch (one chunk per iteration)
//! 2. Resample to the classifier rate (passthrough when rates match)
//! 3. Accumulate exact step-sized blocks; fold each into the rolling window
//!    in arrival order (backlog is caught up, never skipped)
//! 4. Per block: gain → window update → RMS → activity event
//! 5. When a classifier is loaded: features → predict → decide → detection event
//! ```
//!
//! This entire loop runs in `spawn_blocking`, keeping the Tokio async
//! executor free for subscribers. Per-cycle failures (classifier errors,
//! malformed output) are counted and logged; the loop always continues to
//! the next cycle.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{window::RollingWindow, AudioConsumer, Consumer},
    classify::ClassifierHandle,
    decision::{decide, AlertDebouncer, AlertTier, Tuning},
    engine::EngineConfig,
    features::FeatureExtractor,
    ipc::events::{ActivityEvent, DetectionEvent},
};

pub struct PipelineDiagnostics {
    pub samples_in: AtomicUsize,
    pub cycles: AtomicUsize,
    pub classifier_calls: AtomicUsize,
    pub classifier_errors: AtomicUsize,
    pub detections_emitted: AtomicUsize,
    pub alerts_fired: AtomicUsize,
    pub samples_dropped: AtomicUsize,
}

impl Default for PipelineDiagnostics {
    fn default() -> Self {
        Self {
            samples_in: AtomicUsize::new(0),
            cycles: AtomicUsize::new(0),
            classifier_calls: AtomicUsize::new(0),
            classifier_errors: AtomicUsize::new(0),
            detections_emitted: AtomicUsize::new(0),
            alerts_fired: AtomicUsize::new(0),
            samples_dropped: AtomicUsize::new(0),
        }
    }
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.cycles.store(0, Ordering::Relaxed);
        self.classifier_calls.store(0, Ordering::Relaxed);
        self.classifier_errors.store(0, Ordering::Relaxed);
        self.detections_emitted.store(0, Ordering::Relaxed);
        self.alerts_fired.store(0, Ordering::Relaxed);
        self.samples_dropped.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            classifier_calls: self.classifier_calls.load(Ordering::Relaxed),
            classifier_errors: self.classifier_errors.load(Ordering::Relaxed),
            detections_emitted: self.detections_emitted.load(Ordering::Relaxed),
            alerts_fired: self.alerts_fired.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub samples_in: usize,
    pub cycles: usize,
    pub classifier_calls: usize,
    pub classifier_errors: usize,
    pub detections_emitted: usize,
    pub alerts_fired: usize,
    pub samples_dropped: usize,
}

/// All context the pipeline needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    /// `None` runs the loop in degraded mode: activity events only.
    pub classifier: Option<ClassifierHandle>,
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub detection_tx: broadcast::Sender<DetectionEvent>,
    pub activity_tx: broadcast::Sender<ActivityEvent>,
    /// Live tuning knobs, snapshotted once per cycle.
    pub tuning: Arc<Mutex<Tuning>>,
    /// Read-only copy of the current window for visualization collaborators.
    pub window_mirror: Arc<Mutex<Vec<f32>>>,
    pub seq: Arc<AtomicU64>,
    pub capture_sample_rate: u32,
    /// Samples rejected by the capture callback on ring overflow.
    pub dropped: Arc<AtomicUsize>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Chunk size drained from the ring buffer per iteration.
/// 20 ms at 48 kHz = 960 samples; also the resampler's input block size.
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const SLEEP_EMPTY_MS: u64 = 5;

/// Run the blocking pipeline until `ctx.running` becomes false.
pub fn run(mut ctx: PipelineContext) {
    info!("pipeline started");

    // Initialise resampler (passthrough when rates match)
    let mut resampler = match RateConverter::new(
        ctx.capture_sample_rate,
        ctx.config.sample_rate,
        DRAIN_CHUNK,
    ) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to create resampler: {e}");
            return;
        }
    };

    if !resampler.is_passthrough() {
        info!(
            "resampling enabled from={} to={}",
            ctx.capture_sample_rate, ctx.config.sample_rate
        );
    }

    let extractor = FeatureExtractor::new(ctx.config.mel.clone());
    let step = ctx.config.step_samples();
    let mut window = RollingWindow::new(ctx.config.window_samples(), step);
    let mut debouncer = AlertDebouncer::new(ctx.config.alert_cooldown_cycles);

    // Scratch buffer, reused each iteration
    let mut raw = vec![0f32; DRAIN_CHUNK];
    // Samples accumulated toward the next step block
    let mut pending: Vec<f32> = Vec::with_capacity(step * 2);
    // Independent sequence for activity events
    let mut activity_seq = 0u64;

    loop {
        // ── 0. Check running flag ─────────────────────────────────────────
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        // ── 1. Drain ring buffer ──────────────────────────────────────────
        let n = ctx.consumer.pop_slice(&mut raw);

        // Mirror the capture-side overflow counter into diagnostics.
        ctx.diagnostics
            .samples_dropped
            .store(ctx.dropped.load(Ordering::Relaxed), Ordering::Relaxed);

        if n == 0 {
            // Nothing to process — yield to avoid burning 100 % CPU
            std::thread::sleep(Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }

        ctx.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);

        // ── 2. Resample to classifier rate ────────────────────────────────
        let resampled = resampler.process(&raw[..n]);
        if resampled.is_empty() {
            // Partial chunk — waiting for more data to fill rubato's input buffer
            continue;
        }

        // ── 3. Fold complete step blocks in arrival order ─────────────────
        // A backlog of queued blocks is processed block by block rather than
        // jumping to the newest one, keeping the window sample-accurate under
        // backpressure. The only loss point is ring overflow, which is counted.
        pending.extend_from_slice(&resampled);
        while pending.len() >= step {
            let block: Vec<f32> = pending.drain(..step).collect();
            process_cycle(
                &mut ctx,
                &extractor,
                &mut window,
                &mut debouncer,
                block,
                &mut activity_seq,
            );
        }
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        samples_in = snap.samples_in,
        cycles = snap.cycles,
        classifier_calls = snap.classifier_calls,
        classifier_errors = snap.classifier_errors,
        detections_emitted = snap.detections_emitted,
        alerts_fired = snap.alerts_fired,
        samples_dropped = snap.samples_dropped,
        "pipeline stopped — diagnostics"
    );
}

/// Process one step block: window update, RMS, classification, decision.
fn process_cycle(
    ctx: &mut PipelineContext,
    extractor: &FeatureExtractor,
    window: &mut RollingWindow,
    debouncer: &mut AlertDebouncer,
    mut block: Vec<f32>,
    activity_seq: &mut u64,
) {
    let tuning = ctx.tuning.lock().clone();

    // Gain shapes the samples themselves — RMS and features see it, the
    // probability vector is never rescaled after the fact.
    if (tuning.gain - 1.0).abs() > f32::EPSILON {
        for s in block.iter_mut() {
            *s *= tuning.gain;
        }
    }

    if let Err(e) = window.update(&block) {
        // Only reachable if the drain logic above is broken; the window is
        // untouched, so just skip this block and keep the loop alive.
        error!(error = %e, "window update rejected block");
        return;
    }
    ctx.diagnostics.cycles.fetch_add(1, Ordering::Relaxed);

    {
        let mut mirror = ctx.window_mirror.lock();
        mirror.clear();
        mirror.extend_from_slice(window.samples());
    }

    let rms = window.rms();
    let degraded = ctx.classifier.is_none();
    let _ = ctx.activity_tx.send(ActivityEvent {
        seq: *activity_seq,
        rms,
        degraded,
    });
    *activity_seq = activity_seq.saturating_add(1);

    // Log audio level periodically for diagnostics
    if *activity_seq % 50 == 0 {
        debug!(
            rms = format_args!("{:.4}", rms),
            degraded, "audio level check"
        );
    }

    let Some(classifier) = ctx.classifier.as_ref() else {
        return;
    };

    ctx.diagnostics
        .classifier_calls
        .fetch_add(1, Ordering::Relaxed);

    let features = extractor.extract(window.samples());
    let probabilities = {
        let mut backend = classifier.0.lock();
        match backend.predict(&features) {
            Ok(p) => p,
            Err(e) => {
                ctx.diagnostics
                    .classifier_errors
                    .fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "classifier error — skipping cycle");
                return;
            }
        }
    };

    if probabilities.len() != ctx.config.classes.len() {
        ctx.diagnostics
            .classifier_errors
            .fetch_add(1, Ordering::Relaxed);
        error!(
            got = probabilities.len(),
            expected = ctx.config.classes.len(),
            "probability vector length mismatch — skipping cycle"
        );
        return;
    }

    let mut decision = decide(&probabilities, rms, &ctx.config.classes, &tuning);
    let eligible =
        decision.tier == AlertTier::Danger && decision.confidence >= tuning.alert_confidence;
    decision.alert = debouncer.observe(eligible);

    if decision.alert {
        ctx.diagnostics.alerts_fired.fetch_add(1, Ordering::Relaxed);
        warn!(
            label = %decision.label,
            confidence = format_args!("{:.2}", decision.confidence),
            "concerning event detected — alert"
        );
    } else {
        debug!(
            label = %decision.label,
            tier = ?decision.tier,
            confidence = format_args!("{:.2}", decision.confidence),
            "cycle decision"
        );
    }

    let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
    let _ = ctx.detection_tx.send(DetectionEvent { seq, decision });
    ctx.diagnostics
        .detections_emitted
        .fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::Instant;

    use tokio::sync::broadcast::error::TryRecvError;

    use crate::buffering::{create_audio_ring, Producer};
    use crate::classify::{ClassSet, EventClassifier};
    use crate::error::{GuardError, Result};
    use crate::features::FeatureTensor;

    /// Returns a fixed probability vector, optionally failing the first
    /// `fail_first` calls.
    struct ScriptedClassifier {
        probabilities: Vec<f32>,
        fail_first: usize,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedClassifier {
        fn new(probabilities: Vec<f32>, calls: Arc<AtomicUsize>) -> Self {
            Self {
                probabilities,
                fail_first: 0,
                calls,
            }
        }
    }

    impl EventClassifier for ScriptedClassifier {
        fn warm_up(&mut self) -> Result<()> {
            Ok(())
        }

        fn predict(&mut self, _features: &FeatureTensor) -> Result<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed);
            if call < self.fail_first {
                return Err(GuardError::Classifier("intentional test failure".into()));
            }
            Ok(self.probabilities.clone())
        }
    }

    fn recv_detection_with_timeout(
        rx: &mut broadcast::Receiver<DetectionEvent>,
        timeout: Duration,
    ) -> DetectionEvent {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(ev) => return ev,
                Err(TryRecvError::Empty) => {
                    if start.elapsed() >= timeout {
                        panic!("timed out waiting for detection event");
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("detection channel closed unexpectedly"),
            }
        }
    }

    fn assert_no_detection_for(rx: &mut broadcast::Receiver<DetectionEvent>, timeout: Duration) {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(ev) => panic!("expected no detection, got seq={}", ev.seq),
                Err(TryRecvError::Empty) => {
                    if start.elapsed() >= timeout {
                        return;
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => return,
            }
        }
    }

    /// Small geometry so tests stay fast: 0.2 s window, 0.05 s step.
    fn base_config() -> EngineConfig {
        EngineConfig {
            window_secs: 0.2,
            step_secs: 0.05,
            classes: ClassSet::forest_default(),
            ..EngineConfig::default()
        }
    }

    fn make_context(
        config: EngineConfig,
        classifier: Option<ClassifierHandle>,
        consumer: AudioConsumer,
        running: Arc<AtomicBool>,
        detection_tx: broadcast::Sender<DetectionEvent>,
        activity_tx: broadcast::Sender<ActivityEvent>,
    ) -> PipelineContext {
        PipelineContext {
            tuning: Arc::new(Mutex::new(config.tuning.clone())),
            config,
            classifier,
            consumer,
            running,
            detection_tx,
            activity_tx,
            window_mirror: Arc::new(Mutex::new(Vec::new())),
            seq: Arc::new(AtomicU64::new(0)),
            capture_sample_rate: 16_000,
            dropped: Arc::new(AtomicUsize::new(0)),
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        }
    }

    #[test]
    fn danger_probabilities_emit_danger_detection() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.2f32; 800]);

        let calls = Arc::new(AtomicUsize::new(0));
        let classifier = ClassifierHandle::new(ScriptedClassifier::new(
            vec![0.05, 0.90, 0.05],
            Arc::clone(&calls),
        ));

        let (detection_tx, mut detection_rx) = broadcast::channel(16);
        let (activity_tx, _) = broadcast::channel(16);
        let running = Arc::new(AtomicBool::new(true));

        let ctx = make_context(
            base_config(),
            Some(classifier),
            consumer,
            Arc::clone(&running),
            detection_tx,
            activity_tx,
        );

        let handle = thread::spawn(move || run(ctx));
        let event = recv_detection_with_timeout(&mut detection_rx, Duration::from_secs(1));
        running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        assert_eq!(event.seq, 0);
        assert_eq!(event.decision.tier, AlertTier::Danger);
        assert_eq!(event.decision.label, "chainsaw");
        assert!(event.decision.alert, "0.90 exceeds the alert bound");
        assert!(event.decision.rms > 0.0);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn backlog_is_folded_block_by_block_in_order() {
        let (mut producer, consumer) = create_audio_ring();
        // Two full step blocks queued before the loop ever runs.
        producer.push_slice(&vec![0.1f32; 800]);
        producer.push_slice(&vec![0.3f32; 800]);

        let calls = Arc::new(AtomicUsize::new(0));
        let classifier = ClassifierHandle::new(ScriptedClassifier::new(
            vec![0.9, 0.05, 0.05],
            Arc::clone(&calls),
        ));

        let (detection_tx, mut detection_rx) = broadcast::channel(16);
        let (activity_tx, _) = broadcast::channel(16);
        let running = Arc::new(AtomicBool::new(true));

        let ctx = make_context(
            base_config(),
            Some(classifier),
            consumer,
            Arc::clone(&running),
            detection_tx,
            activity_tx,
        );

        let handle = thread::spawn(move || run(ctx));
        let first = recv_detection_with_timeout(&mut detection_rx, Duration::from_secs(1));
        let second = recv_detection_with_timeout(&mut detection_rx, Duration::from_secs(1));
        running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        // Both queued blocks produced a cycle — intermediate audio is not
        // discarded under backlog.
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        // The second window's RMS is higher: the louder block joined it.
        assert!(second.decision.rms > first.decision.rms);
    }

    #[test]
    fn classifier_error_skips_cycle_but_loop_continues() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.2f32; 1600]); // two step blocks

        let calls = Arc::new(AtomicUsize::new(0));
        let mut scripted = ScriptedClassifier::new(vec![0.9, 0.05, 0.05], Arc::clone(&calls));
        scripted.fail_first = 1;
        let classifier = ClassifierHandle::new(scripted);

        let (detection_tx, mut detection_rx) = broadcast::channel(16);
        let (activity_tx, _) = broadcast::channel(16);
        let running = Arc::new(AtomicBool::new(true));

        let ctx = make_context(
            base_config(),
            Some(classifier),
            consumer,
            Arc::clone(&running),
            detection_tx,
            activity_tx,
        );
        let diagnostics = Arc::clone(&ctx.diagnostics);

        let handle = thread::spawn(move || run(ctx));
        let event = recv_detection_with_timeout(&mut detection_rx, Duration::from_secs(1));
        running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        // First cycle errored, second succeeded.
        assert_eq!(event.seq, 0);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        let snap = diagnostics.snapshot();
        assert_eq!(snap.classifier_errors, 1);
        assert_eq!(snap.detections_emitted, 1);
        assert_eq!(snap.cycles, 2);
    }

    #[test]
    fn wrong_length_probability_vector_is_counted_not_fatal() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.2f32; 800]);

        let calls = Arc::new(AtomicUsize::new(0));
        // Two classes from a three-class config.
        let classifier =
            ClassifierHandle::new(ScriptedClassifier::new(vec![0.5, 0.5], Arc::clone(&calls)));

        let (detection_tx, mut detection_rx) = broadcast::channel(16);
        let (activity_tx, _) = broadcast::channel(16);
        let running = Arc::new(AtomicBool::new(true));

        let ctx = make_context(
            base_config(),
            Some(classifier),
            consumer,
            Arc::clone(&running),
            detection_tx,
            activity_tx,
        );
        let diagnostics = Arc::clone(&ctx.diagnostics);

        let handle = thread::spawn(move || run(ctx));
        assert_no_detection_for(&mut detection_rx, Duration::from_millis(150));
        running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        let snap = diagnostics.snapshot();
        assert_eq!(snap.classifier_errors, 1);
        assert_eq!(snap.detections_emitted, 0);
    }

    #[test]
    fn degraded_mode_reports_activity_without_detections() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.2f32; 800]);

        let (detection_tx, mut detection_rx) = broadcast::channel(16);
        let (activity_tx, mut activity_rx) = broadcast::channel(16);
        let running = Arc::new(AtomicBool::new(true));

        let ctx = make_context(
            base_config(),
            None,
            consumer,
            Arc::clone(&running),
            detection_tx,
            activity_tx,
        );

        let handle = thread::spawn(move || run(ctx));

        let start = Instant::now();
        let activity = loop {
            match activity_rx.try_recv() {
                Ok(ev) => break ev,
                Err(TryRecvError::Empty) => {
                    assert!(
                        start.elapsed() < Duration::from_secs(1),
                        "timed out waiting for activity event"
                    );
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("activity channel closed"),
            }
        };
        assert_no_detection_for(&mut detection_rx, Duration::from_millis(100));
        running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        assert!(activity.degraded);
        assert!(activity.rms > 0.0);
    }

    #[test]
    fn sustained_detection_alerts_once_per_cooldown() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.2f32; 2400]); // three step blocks

        let calls = Arc::new(AtomicUsize::new(0));
        let classifier = ClassifierHandle::new(ScriptedClassifier::new(
            vec![0.02, 0.95, 0.03],
            Arc::clone(&calls),
        ));

        let (detection_tx, mut detection_rx) = broadcast::channel(16);
        let (activity_tx, _) = broadcast::channel(16);
        let running = Arc::new(AtomicBool::new(true));

        let mut config = base_config();
        config.alert_cooldown_cycles = 1;

        let ctx = make_context(
            config,
            Some(classifier),
            consumer,
            Arc::clone(&running),
            detection_tx,
            activity_tx,
        );
        let diagnostics = Arc::clone(&ctx.diagnostics);

        let handle = thread::spawn(move || run(ctx));
        let first = recv_detection_with_timeout(&mut detection_rx, Duration::from_secs(1));
        let second = recv_detection_with_timeout(&mut detection_rx, Duration::from_secs(1));
        let third = recv_detection_with_timeout(&mut detection_rx, Duration::from_secs(1));
        running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        // Danger every cycle, alert only when the cooldown lapses.
        assert_eq!(first.decision.tier, AlertTier::Danger);
        assert_eq!(second.decision.tier, AlertTier::Danger);
        assert_eq!(third.decision.tier, AlertTier::Danger);
        assert!(first.decision.alert);
        assert!(!second.decision.alert);
        assert!(third.decision.alert);
        assert_eq!(diagnostics.snapshot().alerts_fired, 2);
    }

    #[test]
    fn low_confidence_is_uncertain_and_never_alerts() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.2f32; 800]);

        let calls = Arc::new(AtomicUsize::new(0));
        let classifier = ClassifierHandle::new(ScriptedClassifier::new(
            vec![0.34, 0.33, 0.33],
            Arc::clone(&calls),
        ));

        let (detection_tx, mut detection_rx) = broadcast::channel(16);
        let (activity_tx, _) = broadcast::channel(16);
        let running = Arc::new(AtomicBool::new(true));

        let ctx = make_context(
            base_config(),
            Some(classifier),
            consumer,
            Arc::clone(&running),
            detection_tx,
            activity_tx,
        );

        let handle = thread::spawn(move || run(ctx));
        let event = recv_detection_with_timeout(&mut detection_rx, Duration::from_secs(1));
        running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        assert_eq!(event.decision.tier, AlertTier::Uncertain);
        assert!(!event.decision.alert);
    }

    #[test]
    fn gain_scales_reported_rms() {
        let run_once = |gain: f32| -> f32 {
            let (mut producer, consumer) = create_audio_ring();
            producer.push_slice(&vec![0.1f32; 800]);

            let calls = Arc::new(AtomicUsize::new(0));
            let classifier = ClassifierHandle::new(ScriptedClassifier::new(
                vec![0.9, 0.05, 0.05],
                Arc::clone(&calls),
            ));

            let (detection_tx, mut detection_rx) = broadcast::channel(16);
            let (activity_tx, _) = broadcast::channel(16);
            let running = Arc::new(AtomicBool::new(true));

            let mut config = base_config();
            config.tuning.gain = gain;

            let ctx = make_context(
                config,
                Some(classifier),
                consumer,
                Arc::clone(&running),
                detection_tx,
                activity_tx,
            );

            let handle = thread::spawn(move || run(ctx));
            let event = recv_detection_with_timeout(&mut detection_rx, Duration::from_secs(1));
            running.store(false, Ordering::SeqCst);
            handle.join().expect("pipeline thread panicked");
            event.decision.rms
        };

        let base = run_once(1.0);
        let doubled = run_once(2.0);
        assert!(
            (doubled - base * 2.0).abs() < 1e-5,
            "rms {doubled} should be 2× {base}"
        );
    }
}

//! EcoGuard command-line monitor.
//!
//! Thin presentation collaborator over `ecoguard-core`: subscribes to the
//! engine's broadcast channels and renders decisions to the terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ecoguard_core::audio::device::list_input_devices;
use ecoguard_core::audio::resample::RateConverter;
use ecoguard_core::audio::wav;
use ecoguard_core::{
    decide, AlertTier, ClassifierHandle, DetectionEvent, EngineConfig, FeatureExtractor,
    GuardEngine, StubClassifier,
};

#[cfg(feature = "onnx")]
use ecoguard_core::{OnnxClassifier, OnnxClassifierConfig};

const RED: &str = "\x1b[91m";
const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const GRAY: &str = "\x1b[90m";
const RESET: &str = "\x1b[0m";

#[derive(Parser)]
#[command(name = "ecoguard", version, about = "Real-time acoustic event monitor")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor the microphone and print per-cycle decisions (default)
    Listen(ListenArgs),
    /// List audio input devices
    Devices,
    /// Classify a WAV recording offline
    Classify(ClassifyArgs),
}

#[derive(Args, Default)]
struct ListenArgs {
    /// Input device name (default: system default input)
    #[arg(long)]
    device: Option<String>,

    /// Confidence threshold in [0, 1]
    #[arg(long)]
    threshold: Option<f32>,

    /// Input gain multiplier
    #[arg(long)]
    gain: Option<f32>,

    /// Use the stub classifier instead of a model
    #[arg(long)]
    stub: bool,

    /// Path to the ONNX classifier model
    #[arg(long)]
    model: Option<PathBuf>,

    /// Print detections as JSON lines instead of colored text
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ClassifyArgs {
    /// WAV file to classify
    wav: PathBuf,

    /// Confidence threshold in [0, 1]
    #[arg(long)]
    threshold: Option<f32>,

    /// Use the stub classifier instead of a model
    #[arg(long)]
    stub: bool,

    /// Path to the ONNX classifier model
    #[arg(long)]
    model: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Listen(ListenArgs::default())) {
        Command::Listen(args) => listen(args).await,
        Command::Devices => {
            devices();
            Ok(())
        }
        Command::Classify(args) => classify(args),
    }
}

/// Pick a classifier backend from the CLI flags.
///
/// Without the `onnx` build, `--stub` is the only way to get detections;
/// omitting it runs the engine degraded (input levels only).
fn build_classifier(stub: bool, model: Option<PathBuf>) -> Option<ClassifierHandle> {
    if stub {
        return Some(ClassifierHandle::new(StubClassifier::default()));
    }
    model_classifier(model)
}

#[cfg(feature = "onnx")]
fn model_classifier(model: Option<PathBuf>) -> Option<ClassifierHandle> {
    let mut config = OnnxClassifierConfig::default();
    if let Some(path) = model {
        config.model_path = path;
    }
    Some(ClassifierHandle::new(OnnxClassifier::new(config)))
}

#[cfg(not(feature = "onnx"))]
fn model_classifier(model: Option<PathBuf>) -> Option<ClassifierHandle> {
    if model.is_some() {
        warn!("built without the onnx feature — ignoring --model");
    }
    None
}

fn engine_config(threshold: Option<f32>, gain: Option<f32>) -> EngineConfig {
    let mut config = EngineConfig::default();
    if let Some(threshold) = threshold {
        config.tuning.threshold = threshold.clamp(0.0, 1.0);
    }
    if let Some(gain) = gain {
        config.tuning.gain = gain.clamp(0.01, 16.0);
    }
    config
}

async fn listen(args: ListenArgs) -> anyhow::Result<()> {
    let classifier = build_classifier(args.stub, args.model.clone());
    let engine = Arc::new(GuardEngine::new(
        engine_config(args.threshold, args.gain),
        classifier,
    ));

    if let Err(e) = engine.warm_up() {
        warn!("classifier unavailable, monitoring input levels only: {e}");
    }

    let mut detections = engine.subscribe_detections();
    let mut activity = engine.subscribe_activity();
    let mut status = engine.subscribe_status();

    engine
        .start_with_device(args.device.clone())
        .context("failed to start monitoring")?;
    info!("monitoring — press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = detections.recv() => match event {
                Ok(event) => print_detection(&event, args.json)?,
                Err(RecvError::Lagged(n)) => warn!("skipped {n} detection events"),
                Err(RecvError::Closed) => break,
            },
            event = activity.recv() => if let Ok(event) = event {
                // Detections carry their own RMS; the level line matters in
                // degraded mode where no detections flow.
                if event.degraded && !args.json {
                    println!("{GRAY}[LEVEL] rms {:.4}{RESET}", event.rms);
                }
            },
            event = status.recv() => if let Ok(event) = event {
                match event.detail {
                    Some(detail) => info!(status = ?event.status, "{detail}"),
                    None => info!(status = ?event.status, "engine status changed"),
                }
            },
        }
    }

    engine.stop().ok();
    let snap = engine.diagnostics_snapshot();
    info!(
        cycles = snap.cycles,
        detections = snap.detections_emitted,
        alerts = snap.alerts_fired,
        classifier_errors = snap.classifier_errors,
        samples_dropped = snap.samples_dropped,
        "stopped"
    );
    Ok(())
}

fn print_detection(event: &DetectionEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let decision = &event.decision;
    let label = decision.label.to_uppercase();
    match decision.tier {
        AlertTier::Danger => {
            println!(
                "{RED}[DANGER] {label} ({:.2}){RESET}",
                decision.confidence
            );
            if decision.alert {
                println!("{YELLOW}>>> alert: {} detected — notify ranger station{RESET}", decision.label);
            }
        }
        AlertTier::Safe => {
            println!(
                "{GREEN}[SAFE] {label} ({:.2}){RESET}",
                decision.confidence
            );
        }
        AlertTier::Uncertain => {
            println!(
                "{GRAY}[UNCERTAIN] scanning… level {:.3}{RESET}",
                decision.rms
            );
        }
    }
    Ok(())
}

fn devices() {
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("no input devices found");
        return;
    }
    for device in devices {
        let mut markers = Vec::new();
        if device.is_default {
            markers.push("default");
        }
        if device.is_recommended {
            markers.push("recommended");
        }
        if markers.is_empty() {
            println!("  {}", device.name);
        } else {
            println!("  {} ({})", device.name, markers.join(", "));
        }
    }
}

fn classify(args: ClassifyArgs) -> anyhow::Result<()> {
    let classifier = build_classifier(args.stub, args.model.clone())
        .context("no classifier available — pass --stub or build with the onnx feature")?;
    classifier
        .0
        .lock()
        .warm_up()
        .context("classifier warm-up failed")?;

    let config = engine_config(args.threshold, None);
    let (samples, rate) = wav::read_mono_f32(&args.wav)?;
    info!(
        file = %args.wav.display(),
        samples = samples.len(),
        rate,
        "decoding complete"
    );

    // Resample to the analysis rate, flushing the converter's tail.
    let mut converter = RateConverter::new(rate, config.sample_rate, 960)?;
    let mut resampled = converter.process(&samples);
    resampled.extend(converter.process(&vec![0.0f32; 960]));

    // Analyse the most recent window; short recordings are front-padded
    // with silence, matching a half-filled live window.
    let window_len = config.window_samples();
    let mut window = vec![0.0f32; window_len];
    let take = resampled.len().min(window_len);
    window[window_len - take..].copy_from_slice(&resampled[resampled.len() - take..]);

    let rms = if window.is_empty() {
        0.0
    } else {
        (window.iter().map(|s| s * s).sum::<f32>() / window.len() as f32).sqrt()
    };

    let features = FeatureExtractor::new(config.mel.clone()).extract(&window);
    let probabilities = classifier.0.lock().predict(&features)?;
    let decision = decide(&probabilities, rms, &config.classes, &config.tuning);

    println!("file:        {}", args.wav.display());
    println!("label:       {}", decision.label);
    println!("confidence:  {:.3}", decision.confidence);
    println!("tier:        {:?}", decision.tier);
    println!("rms:         {:.4}", decision.rms);
    println!(
        "probs:       [{}]",
        decision
            .probabilities
            .iter()
            .map(|p| format!("{p:.3}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}

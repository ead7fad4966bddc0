//! ONNX classifier backend via the `ort` crate.
//!
//! Wraps an exported event-classification model with the fixed I/O contract:
//!
//! | Name     | Shape             | DType | Direction |
//! |----------|-------------------|-------|-----------|
//! | input    | `[1, 64, 63, 1]`  | f32   | in        |
//! | output   | `[1, n_classes]`  | f32   | out       |
//!
//! Tensor names are resolved from the graph at load time, so exports from
//! different converters (`serving_default_*`, `input_1`, …) all work. Models
//! exported with a trailing softmax return probabilities directly; for logit
//! exports a softmax is applied here so downstream always sees a probability
//! vector.

use std::path::{Path, PathBuf};

use ndarray::{Array4, Axis};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::info;

use crate::error::{GuardError, Result};
use crate::features::FeatureTensor;

use super::EventClassifier;

/// Platform default directory for deployed model files.
pub fn default_models_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(|p| PathBuf::from(p).join("EcoGuard").join("models"))
            .unwrap_or_else(|| PathBuf::from("models"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("ecoguard")
            .join("models")
    }
}

pub struct OnnxClassifierConfig {
    pub model_path: PathBuf,
    /// Mel bands in the input tensor. Must match the feature extractor.
    pub n_mels: usize,
    /// Time frames in the input tensor. Must match the feature extractor.
    pub n_frames: usize,
    /// Expected probability vector length. Must match the configured class set.
    pub num_classes: usize,
}

impl Default for OnnxClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: default_models_dir().join("eco_guard.onnx"),
            n_mels: 64,
            n_frames: 63,
            num_classes: 3,
        }
    }
}

pub struct OnnxClassifier {
    config: OnnxClassifierConfig,
    session: Option<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxClassifier {
    pub fn new(config: OnnxClassifierConfig) -> Self {
        Self {
            config,
            session: None,
            input_name: String::new(),
            output_name: String::new(),
        }
    }
}

fn create_session(model_path: &Path) -> Result<Session> {
    let logical_cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let intra_threads = logical_cores.clamp(2, 8);
    info!(intra_threads, logical_cores, "ONNX session threading configured");

    SessionBuilder::new()
        .map_err(|e| GuardError::OnnxSession(e.to_string()))?
        .with_intra_threads(intra_threads)
        .map_err(|e| GuardError::OnnxSession(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::All)
        .map_err(|e| GuardError::OnnxSession(e.to_string()))?
        .commit_from_file(model_path)
        .map_err(|e| GuardError::OnnxSession(e.to_string()))
}

fn softmax_in_place(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}

/// True when `values` already looks like a probability distribution.
fn is_probability_vector(values: &[f32]) -> bool {
    let sum: f32 = values.iter().sum();
    values.iter().all(|v| (0.0..=1.0).contains(v)) && (sum - 1.0).abs() < 1e-3
}

impl EventClassifier for OnnxClassifier {
    fn warm_up(&mut self) -> Result<()> {
        let path = &self.config.model_path;
        if !path.exists() {
            return Err(GuardError::ModelNotFound { path: path.clone() });
        }
        let size_mb = std::fs::metadata(path)
            .map(|m| m.len() as f64 / 1_048_576.0)
            .unwrap_or(0.0);

        info!("=== OnnxClassifier Startup Report ===");
        info!("  path: {:?}", path);
        info!("  size: {:.2} MB", size_mb);

        let session = create_session(path)?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        info!("  inputs: {:?}", input_names);
        info!("  outputs: {:?}", output_names);

        self.input_name = input_names
            .first()
            .cloned()
            .ok_or_else(|| GuardError::OnnxSession("classifier model has no inputs".into()))?;
        self.output_name = output_names
            .first()
            .cloned()
            .ok_or_else(|| GuardError::OnnxSession("classifier model has no outputs".into()))?;
        self.session = Some(session);

        // Dummy forward pass to populate CPU caches and fail fast on a
        // shape-incompatible export.
        let dummy = FeatureTensor::zeros((self.config.n_mels, self.config.n_frames));
        self.predict(&dummy)?;

        info!("=== OnnxClassifier warm-up complete ===");
        Ok(())
    }

    fn predict(&mut self, features: &FeatureTensor) -> Result<Vec<f32>> {
        let session = self.session.as_mut().ok_or(GuardError::ClassifierNotLoaded)?;

        let (n_mels, n_frames) = features.dim();
        if n_mels != self.config.n_mels || n_frames != self.config.n_frames {
            return Err(GuardError::Classifier(format!(
                "feature tensor shape {n_mels}×{n_frames} does not match model input {}×{}",
                self.config.n_mels, self.config.n_frames
            )));
        }

        // [n_mels, n_frames] → [1, n_mels, n_frames, 1]
        let input: Array4<f32> = features
            .clone()
            .insert_axis(Axis(0))
            .insert_axis(Axis(3));
        let input_val = Value::from_array(input)
            .map_err(|e: ort::Error| GuardError::OnnxSession(e.to_string()))?;

        let input_values: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), input_val.into())];
        let outputs = session
            .run(input_values)
            .map_err(|e| GuardError::OnnxSession(e.to_string()))?;

        let output = outputs
            .get(self.output_name.as_str())
            .unwrap_or(&outputs[0]);
        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| GuardError::OnnxSession(e.to_string()))?;

        if data.len() < self.config.num_classes {
            return Err(GuardError::Classifier(format!(
                "model produced {} scores, expected {}",
                data.len(),
                self.config.num_classes
            )));
        }

        let mut probabilities = data[..self.config.num_classes].to_vec();
        if !is_probability_vector(&probabilities) {
            softmax_in_place(&mut probabilities);
        }
        Ok(probabilities)
    }
}

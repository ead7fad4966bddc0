//! Event classifier abstraction.
//!
//! The `EventClassifier` trait decouples the pipeline from any specific
//! backend (stub, ONNX, or a future embedded model). The input tensor shape,
//! the class ordering, and the output vector length form a fixed contract
//! that must be versioned together with the model artifact.
//!
//! `&mut self` on `predict` intentionally expresses that backends may be
//! stateful (session scratch buffers, execution-provider caches). All
//! mutation is serialised through `ClassifierHandle`'s `parking_lot::Mutex`.

pub mod stub;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxClassifier, OnnxClassifierConfig};

pub use stub::StubClassifier;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::features::FeatureTensor;

/// Contract for classification backends.
pub trait EventClassifier: Send + 'static {
    /// One-time warm-up: load weights, run a dummy inference to populate
    /// caches. Called once at engine startup.
    ///
    /// # Errors
    /// Returns an error if model files are missing or corrupt.
    fn warm_up(&mut self) -> Result<()>;

    /// Score one feature tensor.
    ///
    /// # Returns
    /// A probability vector over the configured class set — values in
    /// [0, 1] summing to ≈ 1, indexed in class-list order.
    fn predict(&mut self, features: &FeatureTensor) -> Result<Vec<f32>>;
}

/// Thread-safe reference-counted handle to any `EventClassifier` implementor.
///
/// Uses `parking_lot::Mutex` for non-poisoning on panic and a faster
/// uncontended lock than `std::sync::Mutex`.
#[derive(Clone)]
pub struct ClassifierHandle(pub Arc<Mutex<dyn EventClassifier>>);

impl ClassifierHandle {
    /// Wrap any `EventClassifier` in a `ClassifierHandle`.
    pub fn new<C: EventClassifier>(classifier: C) -> Self {
        Self(Arc::new(Mutex::new(classifier)))
    }
}

impl std::fmt::Debug for ClassifierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierHandle").finish_non_exhaustive()
    }
}

/// Ordered class list plus the subset considered concerning.
///
/// Index order is the model output order — part of the classifier contract.
#[derive(Debug, Clone)]
pub struct ClassSet {
    labels: Vec<String>,
    concerning: Vec<bool>,
}

impl ClassSet {
    /// Build a class set from ordered labels and the names to escalate.
    ///
    /// Concerning names not present in `labels` are ignored.
    pub fn new<S: Into<String>>(labels: Vec<S>, concerning_labels: &[&str]) -> Self {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        let concerning = labels
            .iter()
            .map(|l| concerning_labels.contains(&l.as_str()))
            .collect();
        Self { labels, concerning }
    }

    /// The deployed forest-monitor class set.
    pub fn forest_default() -> Self {
        Self::new(
            vec!["background", "chainsaw", "gunshot"],
            &["chainsaw", "gunshot"],
        )
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label at `index`, or `"unknown"` for an out-of-range index.
    pub fn label(&self, index: usize) -> &str {
        self.labels.get(index).map(String::as_str).unwrap_or("unknown")
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn is_concerning(&self, index: usize) -> bool {
        self.concerning.get(index).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forest_default_marks_chainsaw_and_gunshot() {
        let classes = ClassSet::forest_default();
        assert_eq!(classes.len(), 3);
        assert_eq!(classes.label(0), "background");
        assert!(!classes.is_concerning(0));
        assert!(classes.is_concerning(1));
        assert!(classes.is_concerning(2));
    }

    #[test]
    fn out_of_range_index_is_harmless() {
        let classes = ClassSet::forest_default();
        assert_eq!(classes.label(9), "unknown");
        assert!(!classes.is_concerning(9));
    }

    #[test]
    fn unknown_concerning_names_are_ignored() {
        let classes = ClassSet::new(vec!["a", "b"], &["b", "nope"]);
        assert!(!classes.is_concerning(0));
        assert!(classes.is_concerning(1));
    }
}

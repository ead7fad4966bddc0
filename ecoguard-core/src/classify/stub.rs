//! `StubClassifier` — placeholder backend that scores everything as background.
//!
//! Used during development before a trained model is deployed, and in tests.
//! Produces a deterministic probability vector so the full capture → window →
//! feature → decision pipeline can be exercised end-to-end.

use tracing::debug;

use crate::error::Result;
use crate::features::FeatureTensor;

use super::EventClassifier;

/// Always reports the first class (background) with full confidence.
pub struct StubClassifier {
    num_classes: usize,
    calls: u64,
}

impl StubClassifier {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            calls: 0,
        }
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new(3)
    }
}

impl EventClassifier for StubClassifier {
    fn warm_up(&mut self) -> Result<()> {
        debug!("StubClassifier::warm_up — no-op");
        Ok(())
    }

    fn predict(&mut self, _features: &FeatureTensor) -> Result<Vec<f32>> {
        self.calls += 1;
        let mut probabilities = vec![0.0; self.num_classes];
        if let Some(first) = probabilities.first_mut() {
            *first = 1.0;
        }
        Ok(probabilities)
    }
}

//! Rolling analysis window over the live signal.
//!
//! A fixed-length buffer holding the most recent `window` seconds of audio.
//! Each update discards exactly the oldest step-slice and appends exactly one
//! new step-sized block, so the content is always the latest `len()` samples
//! in chronological order (oldest first).

use crate::error::{GuardError, Result};

/// Fixed-length sliding window of mono f32 samples.
///
/// Owned and mutated exclusively by the pipeline loop. Other components only
/// ever see read-only snapshots via [`RollingWindow::samples`].
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: Vec<f32>,
    step: usize,
}

impl RollingWindow {
    /// Create a window of `len` samples updated in `step`-sample blocks.
    ///
    /// Starts zero-filled, representing silence before the first real audio
    /// has arrived.
    ///
    /// # Panics
    /// Panics if `step == 0` or `step > len` — both are configuration bugs,
    /// not runtime conditions.
    pub fn new(len: usize, step: usize) -> Self {
        assert!(step > 0, "window step must be non-zero");
        assert!(step <= len, "window step must not exceed window length");
        Self {
            samples: vec![0.0; len],
            step,
        }
    }

    /// Shift the window left by one step and write `block` into the tail.
    ///
    /// # Errors
    /// Returns `GuardError::BlockLength` when `block.len()` differs from the
    /// configured step size. The window is left unchanged in that case — no
    /// partial update.
    pub fn update(&mut self, block: &[f32]) -> Result<()> {
        if block.len() != self.step {
            return Err(GuardError::BlockLength {
                expected: self.step,
                got: block.len(),
            });
        }
        let len = self.samples.len();
        self.samples.copy_within(self.step.., 0);
        self.samples[len - self.step..].copy_from_slice(block);
        Ok(())
    }

    /// Read-only snapshot of the window, oldest sample first.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Window length in samples. Constant for the lifetime of the window.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Step size in samples.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Root-mean-square amplitude of the current window.
    ///
    /// Computed directly from the raw samples, independent of classification,
    /// so the input level can be reported even when confidence is low.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }
}

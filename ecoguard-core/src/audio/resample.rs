//! Audio sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! `cpal` captures audio at the device's native rate (commonly 44.1/48 kHz).
//! The classifier contract is 16 kHz mono f32. `RateConverter` bridges that
//! gap on the non-RT pipeline thread, where allocation is allowed.
//!
//! When capture rate == target rate, `RateConverter` is a zero-copy
//! passthrough — no rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{GuardError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when capture rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    pending: Vec<f32>,
    /// How many input samples rubato expects per process call.
    frames_per_call: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Parameters
    /// - `capture_rate`: Sample rate of the incoming audio (Hz).
    /// - `target_rate`: Sample rate expected by the classifier (Hz).
    /// - `frames_per_call`: Input frame count per rubato call (e.g. `960`).
    ///
    /// # Errors
    /// Returns `GuardError::AudioDevice` if rubato fails to initialise.
    pub fn new(capture_rate: u32, target_rate: u32, frames_per_call: usize) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                frames_per_call,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            frames_per_call,
            1, // mono
        )
        .map_err(|e| GuardError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(
            capture_rate,
            target_rate,
            frames_per_call,
            max_out,
            "resampling enabled"
        );

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            frames_per_call,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated internally until a full `frames_per_call`
    /// block is available for rubato. Any remainder is kept for the next
    /// call. In passthrough mode (same rates), input is returned directly.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            // Zero-copy passthrough
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.pending.len() >= self.frames_per_call {
            let input_slice = &self.pending[..self.frames_per_call];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.pending.drain(..self.frames_per_call);
        }

        result
    }

    /// Returns `true` when capture rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

//! Log-power mel spectrogram frontend.
//!
//! Deterministic transform from a raw sample window to the fixed-shape
//! feature tensor the classifier expects. Same window in, bit-identical
//! tensor out — no hidden state between calls.
//!
//! ## Transform parameters (must match training)
//!
//! | Parameter       | Value          |
//! |-----------------|----------------|
//! | Hann window     | 1024 samples   |
//! | FFT size        | 1024           |
//! | Frequency bins  | 513 (1024/2+1) |
//! | Hop length      | 512 (32 ms)    |
//! | Mel bands       | 64             |
//! | Mel range       | 0–8 000 Hz     |
//! | Frames          | 63 (2 s)       |
//! | dB floor        | −80            |
//!
//! The dB scale is referenced to the window's own maximum power, so the
//! output is invariant to absolute input gain but keeps the dynamic range
//! within the window.

use std::sync::Arc;

use ndarray::Array2;
use rustfft::{num_complex::Complex, FftPlanner};

/// Power values at or below this are treated as silence.
const AMIN: f32 = 1e-10;

/// A `n_mels × n_frames` array of decibel-scaled mel energies.
pub type FeatureTensor = Array2<f32>;

/// Fixed transform parameters, set once at deployment.
#[derive(Debug, Clone)]
pub struct MelConfig {
    /// Sample rate of the analysis window (Hz).
    pub sample_rate: u32,
    /// FFT size == analysis window length per frame.
    pub n_fft: usize,
    /// Samples between consecutive frames.
    pub hop_length: usize,
    /// Number of mel bands.
    pub n_mels: usize,
    /// Frame count the classifier expects; shorter inputs are right-padded
    /// with `floor_db`, longer ones truncated on the right.
    pub n_frames: usize,
    /// Lower edge of the mel filterbank (Hz).
    pub fmin: f32,
    /// Upper edge of the mel filterbank (Hz).
    pub fmax: f32,
    /// Decibel floor. Also the pad value for short windows.
    pub floor_db: f32,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            n_fft: 1024,
            hop_length: 512,
            n_mels: 64,
            n_frames: 63,
            fmin: 0.0,
            fmax: 8_000.0,
            floor_db: -80.0,
        }
    }
}

/// Precomputed mel spectrogram extractor.
///
/// Construction builds the Hann window, the mel filterbank, and the FFT plan
/// once; `extract` then runs allocation-light per call.
pub struct FeatureExtractor {
    cfg: MelConfig,
    hann_window: Vec<f32>,
    mel_filters: Vec<Vec<f32>>,
    fft: Arc<dyn rustfft::Fft<f32>>,
}

impl FeatureExtractor {
    pub fn new(cfg: MelConfig) -> Self {
        let hann_window = build_hann_window(cfg.n_fft);
        let mel_filters =
            build_mel_filters(cfg.n_fft, cfg.sample_rate, cfg.n_mels, cfg.fmin, cfg.fmax);
        let fft = Arc::from(FftPlanner::<f32>::new().plan_fft_forward(cfg.n_fft));
        Self {
            cfg,
            hann_window,
            mel_filters,
            fft,
        }
    }

    pub fn config(&self) -> &MelConfig {
        &self.cfg
    }

    /// Transform a sample window into the fixed-shape feature tensor.
    ///
    /// Output shape is always `n_mels × n_frames` regardless of input content
    /// or length. A degenerate all-silence window yields a tensor filled with
    /// `floor_db` — finite, never NaN/Inf.
    pub fn extract(&self, window: &[f32]) -> FeatureTensor {
        let n_fft = self.cfg.n_fft;
        let hop = self.cfg.hop_length;
        let n_freqs = n_fft / 2 + 1;

        // Centered frames: pad by n_fft/2 on both sides so frame count is
        // 1 + len/hop for a hop-aligned window.
        let padded = reflect_pad(window, n_fft / 2);
        let raw_frames = if padded.len() >= n_fft {
            (padded.len() - n_fft) / hop + 1
        } else {
            0
        };
        // Truncate on the right up front — no point computing frames we drop.
        let frames = raw_frames.min(self.cfg.n_frames);

        let mut power = Array2::<f32>::zeros((self.cfg.n_mels, frames));
        let mut fft_buf = vec![Complex::new(0.0f32, 0.0); n_fft];

        for frame in 0..frames {
            let start = frame * hop;
            for i in 0..n_fft {
                fft_buf[i] = Complex::new(padded[start + i] * self.hann_window[i], 0.0);
            }
            self.fft.process(&mut fft_buf);

            for m in 0..self.cfg.n_mels {
                let mut energy = 0.0f32;
                for k in 0..n_freqs {
                    energy += self.mel_filters[m][k] * fft_buf[k].norm_sqr();
                }
                power[[m, frame]] = energy;
            }
        }

        // dB scale referenced to the window's own peak power. Tail frames
        // beyond `frames` stay at the floor — that is the right-pad value.
        let mut out =
            Array2::<f32>::from_elem((self.cfg.n_mels, self.cfg.n_frames), self.cfg.floor_db);
        let peak = power.iter().copied().fold(0.0f32, f32::max);
        if peak > AMIN {
            let ref_db = 10.0 * peak.log10();
            for m in 0..self.cfg.n_mels {
                for t in 0..frames {
                    let db = 10.0 * power[[m, t]].max(AMIN).log10() - ref_db;
                    out[[m, t]] = db.max(self.cfg.floor_db);
                }
            }
        }
        out
    }
}

fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

/// Slaney-style triangular mel filterbank, area-normalized.
fn build_mel_filters(
    fft_size: usize,
    sr: u32,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Vec<Vec<f32>> {
    let n_freqs = fft_size / 2 + 1;
    let mel_min = hz_to_mel_slaney(fmin);
    let mel_max = hz_to_mel_slaney(fmax);

    let mel_pts: Vec<f32> = (0..=(n_mels + 1))
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
        .collect();

    let hz_pts: Vec<f32> = mel_pts.iter().map(|&m| mel_to_hz_slaney(m)).collect();
    let fft_freqs: Vec<f32> = (0..n_freqs)
        .map(|k| k as f32 * sr as f32 / fft_size as f32)
        .collect();

    let mut filters = vec![vec![0f32; n_freqs]; n_mels];
    for m in 0..n_mels {
        let lower = hz_pts[m];
        let center = hz_pts[m + 1];
        let upper = hz_pts[m + 2];
        let down_denom = (center - lower).max(1e-10);
        let up_denom = (upper - center).max(1e-10);
        let enorm = 2.0 / (upper - lower).max(1e-10);

        for (k, &freq) in fft_freqs.iter().enumerate() {
            let w = if freq >= lower && freq <= center {
                (freq - lower) / down_denom
            } else if freq > center && freq <= upper {
                (upper - freq) / up_denom
            } else {
                0.0
            };
            filters[m][k] = (w * enorm).max(0.0);
        }
    }
    filters
}

fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    if pad == 0 {
        return samples.to_vec();
    }
    if samples.is_empty() {
        return vec![0.0; pad * 2];
    }
    if samples.len() == 1 {
        return vec![samples[0]; samples.len() + pad * 2];
    }

    let n = samples.len() as isize;
    let mut out = Vec::with_capacity(samples.len() + 2 * pad);
    for i in -(pad as isize)..(n + pad as isize) {
        let idx = reflect_index(i, samples.len());
        out.push(samples[idx]);
    }
    out
}

fn reflect_index(mut i: isize, len: usize) -> usize {
    let max = len as isize - 1;
    while i < 0 || i > max {
        if i < 0 {
            i = -i;
        } else {
            i = 2 * max - i;
        }
    }
    i as usize
}

fn hz_to_mel_slaney(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp; // 15
    let logstep = (6.4_f32).ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz_slaney(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp; // 15
    let logstep = (6.4_f32).ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(MelConfig::default())
    }

    fn sine(freq: f32, len: usize, sr: u32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    /// Cheap deterministic noise — keeps tests reproducible without a rand dep.
    fn noise(len: usize) -> Vec<f32> {
        let mut state = 0x2545_f491u32;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
            })
            .collect()
    }

    #[test]
    fn shape_is_invariant_to_content() {
        let ex = extractor();
        for window in [
            vec![0.0f32; 32_000],
            noise(32_000),
            sine(440.0, 32_000, 16_000),
        ] {
            let tensor = ex.extract(&window);
            assert_eq!(tensor.dim(), (64, 63));
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        let ex = extractor();
        let window = noise(32_000);
        let a = ex.extract(&window);
        let b = ex.extract(&window);
        assert_eq!(a, b);
    }

    #[test]
    fn silence_yields_finite_floor_tensor() {
        let ex = extractor();
        let tensor = ex.extract(&vec![0.0f32; 32_000]);
        for &v in tensor.iter() {
            assert!(v.is_finite());
            assert_eq!(v, -80.0);
        }
    }

    #[test]
    fn values_are_bounded_by_floor_and_reference() {
        let ex = extractor();
        let tensor = ex.extract(&sine(1_000.0, 32_000, 16_000));
        let max = tensor.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        for &v in tensor.iter() {
            assert!((-80.0..=0.0).contains(&v), "value out of range: {v}");
        }
        // Peak power is the dB reference, so the max lands at 0 dB.
        assert_relative_eq!(max, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn gain_does_not_change_the_tensor() {
        // The dB scale is referenced to the window's own maximum.
        let ex = extractor();
        let window = sine(440.0, 32_000, 16_000);
        let boosted: Vec<f32> = window.iter().map(|s| s * 3.0).collect();
        let a = ex.extract(&window);
        let b = ex.extract(&boosted);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-3);
        }
    }

    #[test]
    fn short_window_is_right_padded_with_floor() {
        let ex = extractor();
        // Half a window: 31 raw frames (< 63), tail must sit at the floor.
        let tensor = ex.extract(&sine(440.0, 16_000, 16_000));
        assert_eq!(tensor.dim(), (64, 63));
        for m in 0..64 {
            assert_eq!(tensor[[m, 62]], -80.0);
        }
    }

    #[test]
    fn long_window_is_truncated_to_expected_frames() {
        let ex = extractor();
        let tensor = ex.extract(&sine(440.0, 64_000, 16_000));
        assert_eq!(tensor.dim(), (64, 63));
    }

    #[test]
    fn tone_energy_lands_in_matching_mel_band() {
        let ex = extractor();
        let low = ex.extract(&sine(200.0, 32_000, 16_000));
        let high = ex.extract(&sine(4_000.0, 32_000, 16_000));

        // Compare the band holding the most energy in a mid-window frame.
        let peak_band = |t: &FeatureTensor| -> usize {
            (0..64)
                .max_by(|&a, &b| t[[a, 31]].partial_cmp(&t[[b, 31]]).unwrap())
                .unwrap()
        };
        assert!(peak_band(&low) < peak_band(&high));
    }
}

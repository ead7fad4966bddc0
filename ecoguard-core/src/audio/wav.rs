//! WAV decoding for offline classification and test fixtures.

use std::path::Path;

use crate::error::{GuardError, Result};

/// Decode a WAV file to mono f32 samples plus its sample rate.
///
/// Integer formats are scaled to [-1.0, 1.0]; multi-channel files are mixed
/// down by averaging.
pub fn read_mono_f32(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path).map_err(|e| GuardError::Wav(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| GuardError::Wav(e.to_string())))
            .collect::<Result<Vec<_>>>()?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample <= 16 {
                reader
                    .samples::<i16>()
                    .map(|s| {
                        s.map(|v| (v as f32) / (i16::MAX as f32))
                            .map_err(|e| GuardError::Wav(e.to_string()))
                    })
                    .collect::<Result<Vec<_>>>()?
            } else {
                let max = ((1_i64 << (spec.bits_per_sample - 1)) - 1) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| {
                        s.map(|v| (v as f32) / max)
                            .map_err(|e| GuardError::Wav(e.to_string()))
                    })
                    .collect::<Result<Vec<_>>>()?
            }
        }
    };

    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }

    let mut mono = Vec::with_capacity(interleaved.len() / channels);
    for frame in interleaved.chunks(channels) {
        let sum = frame.iter().copied().sum::<f32>();
        mono.push(sum / channels as f32);
    }
    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn temp_wav(name: &str, spec: hound::WavSpec, write: impl FnOnce(&mut hound::WavWriter<std::io::BufWriter<std::fs::File>>)) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("ecoguard-test-{name}-{}.wav", std::process::id()));
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        write(&mut writer);
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn decodes_mono_i16() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let path = temp_wav("mono-i16", spec, |w| {
            for i in 0..1600 {
                let v = (2.0 * PI * 440.0 * i as f32 / 16_000.0).sin();
                w.write_sample((v * i16::MAX as f32) as i16).unwrap();
            }
        });

        let (samples, rate) = read_mono_f32(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(rate, 16_000);
        assert_eq!(samples.len(), 1600);
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn mixes_stereo_to_mono() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let path = temp_wav("stereo-f32", spec, |w| {
            for _ in 0..100 {
                w.write_sample(0.5f32).unwrap();
                w.write_sample(-0.5f32).unwrap();
            }
        });

        let (samples, _) = read_mono_f32(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(samples.len(), 100);
        assert!(samples.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn missing_file_is_a_wav_error() {
        let err = read_mono_f32(Path::new("/nonexistent/audio.wav")).unwrap_err();
        assert!(matches!(err, GuardError::Wav(_)));
    }
}

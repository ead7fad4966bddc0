//! Audio input device enumeration.
//!
//! Field deployments usually have one USB microphone next to a handful of
//! virtual/system devices; the heuristics here pick the physical mic.

use serde::{Deserialize, Serialize};

/// Metadata about an audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
    /// Heuristic recommendation for the best capture microphone.
    pub is_recommended: bool,
}

/// Names that indicate a system-output/virtual capture rather than a mic.
const VIRTUAL_KEYWORDS: &[&str] = &[
    "stereo mix",
    "loopback",
    "monitor of",
    "virtual output",
    "speakers (",
    "headphones (",
];

const MIC_KEYWORDS: &[&str] = &["microphone", "mic", "array", "usb", "line in", "input"];

/// Score a device name for likely physical-microphone quality.
///
/// Higher is better; virtual/system-output devices score negative.
pub fn mic_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = 0;
    if VIRTUAL_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score -= 16;
    } else {
        score += 8;
    }
    if MIC_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    score
}

/// List all available audio input devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => {
            let mut list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    DeviceInfo {
                        name,
                        is_default,
                        is_recommended: false,
                    }
                })
                .collect::<Vec<_>>();

            if let Some((idx, _)) = list.iter().enumerate().max_by_key(|(_, d)| {
                mic_preference_score(&d.name) + if d.is_default { 2 } else { 0 }
            }) {
                if let Some(best) = list.get_mut(idx) {
                    best.is_recommended = true;
                }
            }

            list.sort_by_key(|d| {
                (
                    !d.is_recommended,
                    !d.is_default,
                    d.name.to_ascii_lowercase(),
                )
            });
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            if let Some(default) = host.default_input_device() {
                let name = default
                    .name()
                    .unwrap_or_else(|_| "Default Input Device".to_string());
                vec![DeviceInfo {
                    name,
                    is_default: true,
                    is_recommended: true,
                }]
            } else {
                vec![]
            }
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::mic_preference_score;

    #[test]
    fn scores_mic_higher_than_virtual_device() {
        let mic = mic_preference_score("Microphone Array (USB PnP Audio Device)");
        let virtual_dev = mic_preference_score("Monitor of Built-in Audio");
        assert!(mic > virtual_dev);
    }

    #[test]
    fn virtual_devices_score_negative() {
        assert!(mic_preference_score("Stereo Mix (Realtek Audio)") < 0);
        assert!(mic_preference_score("Speakers (High Definition Audio)") < 0);
    }
}

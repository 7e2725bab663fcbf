//! Audio device enumeration for host UIs (`parley --list-devices`).

use serde::{Deserialize, Serialize};

/// Which side of the audio graph a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default for its direction.
    pub is_default: bool,
    /// Heuristic flag for inputs that likely capture system output. Such
    /// devices would feed agent playback straight back into the channel.
    pub is_loopback_like: bool,
    /// Best candidate for a conversation microphone (inputs only).
    pub is_recommended: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "virtual output",
    "monitor of",
    "speakers (",
    "headphones (",
];

const MIC_POSITIVE_KEYWORDS: &[&str] = &[
    "microphone",
    "mic",
    "array",
    "headset",
    "input",
    "usb",
    "webcam",
];

pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Higher is better. Loopback-like inputs are heavily penalised.
pub fn mic_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = if is_loopback_like_name(&lowered) { -16 } else { 8 };
    if MIC_POSITIVE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    score
}

/// Flag the best microphone and sort recommended/default devices first.
pub fn rank_inputs(list: &mut [DeviceInfo]) {
    if let Some(best) = list
        .iter_mut()
        .filter(|d| d.direction == DeviceDirection::Input)
        .max_by_key(|d| mic_preference_score(&d.name) + if d.is_default { 2 } else { 0 })
    {
        best.is_recommended = true;
    }
    list.sort_by_key(|d| {
        (
            !d.is_recommended,
            d.is_loopback_like,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
}

/// List input and output devices on the default host.
///
/// Returns an empty `Vec` when cpal is unavailable or enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_in = host.default_input_device().and_then(|d| d.name().ok());
    let default_out = host.default_output_device().and_then(|d| d.name().ok());

    let mut inputs: Vec<DeviceInfo> = match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                DeviceInfo {
                    is_default: default_in.as_deref() == Some(name.as_str()),
                    is_loopback_like: is_loopback_like_name(&name),
                    name,
                    direction: DeviceDirection::Input,
                    is_recommended: false,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    };
    rank_inputs(&mut inputs);

    let outputs = match host.output_devices() {
        Ok(devices) => devices
            .filter_map(|device| device.name().ok())
            .map(|name| DeviceInfo {
                is_default: default_out.as_deref() == Some(name.as_str()),
                name,
                direction: DeviceDirection::Output,
                is_loopback_like: false,
                is_recommended: false,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            Vec::new()
        }
    };

    inputs.extend(outputs);
    inputs
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices() -> Vec<DeviceInfo> {
    vec![]
}

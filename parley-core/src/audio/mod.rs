//! Audio capture, encoding, decoding and playback.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory (beyond the one-time downmix buffer resize)
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! Capture therefore writes mono f32 straight into an SPSC ring buffer
//! producer whose `push_slice` is lock-free and allocation-free. The frame
//! pump in [`crate::buffering::frame`] does everything else.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on macOS).
//! `AudioCapture` and `CpalPlayback` must be created and dropped on the same
//! thread. [`crate::host::CpalHost`] keeps both on a dedicated audio thread.

pub mod decode;
pub mod device;
pub mod encode;
pub mod playback;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    BuildStreamError, SampleFormat, Stream, StreamConfig,
};

use crate::{
    buffering::AudioProducer,
    error::{ParleyError, Result},
};
#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Handle to an active microphone stream.
///
/// **Not `Send`**: `cpal::Stream` is bound to its creation thread on Windows/macOS.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag, set to `false` to make the callback no-op.
    running: Arc<AtomicBool>,
    /// Native capture rate reported by the device (Hz).
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
fn map_build_error(err: BuildStreamError) -> ParleyError {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            ParleyError::CapturePermission("input device not available".into())
        }
        BuildStreamError::BackendSpecific { err } => {
            let text = err.to_string();
            let lowered = text.to_ascii_lowercase();
            if lowered.contains("permission") || lowered.contains("denied") {
                ParleyError::CapturePermission(text)
            } else {
                ParleyError::AudioStream(text)
            }
        }
        other => ParleyError::AudioStream(other.to_string()),
    }
}

/// Mix interleaved frames down to mono, converting each sample with `to_f32`.
#[cfg(feature = "audio-cpal")]
#[inline]
fn downmix_into<T: Copy>(data: &[T], channels: usize, out: &mut Vec<f32>, to_f32: impl Fn(T) -> f32) {
    let frames = data.len() / channels;
    out.resize(frames, 0.0);
    for (f, slot) in out.iter_mut().enumerate() {
        let base = f * channels;
        let mut sum = 0f32;
        for c in 0..channels {
            sum += to_f32(data[base + c]);
        }
        *slot = sum / channels as f32;
    }
}

/// Named device if it exists, else the system default, else the first input.
#[cfg(feature = "audio-cpal")]
fn resolve_input_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
    use cpal::traits::HostTrait;

    if let Some(wanted) = preferred {
        let found = host
            .input_devices()
            .map_err(|e| ParleyError::AudioDevice(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == wanted));
        match found {
            Some(device) => return Ok(device),
            None => warn!(wanted, "input device not found, using default"),
        }
    }

    if let Some(device) = host.default_input_device() {
        return Ok(device);
    }
    warn!("no default input device, taking the first one listed");
    host.input_devices()
        .map_err(|e| ParleyError::AudioDevice(e.to_string()))?
        .next()
        .ok_or(ParleyError::NoDefaultInputDevice)
}

impl AudioCapture {
    /// Start capturing from `preferred` (or the default microphone) at the
    /// device's own rate and channel layout.
    ///
    /// # Errors
    /// - `ParleyError::NoDefaultInputDevice` when no microphone exists.
    /// - `ParleyError::CapturePermission` when the OS refuses access.
    /// - `ParleyError::AudioStream` if cpal fails to build the stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred: Option<&str>,
    ) -> Result<Self> {
        let device = resolve_input_device(&cpal::default_host(), preferred)?;
        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| ParleyError::CapturePermission(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config: StreamConfig = supported.config();

        info!(sample_rate, channels, "capture config selected");

        let flag = Arc::clone(&running);
        let mut mono: Vec<f32> = Vec::new();

        macro_rules! input_stream {
            ($ty:ty, $conv:expr) => {
                device.build_input_stream(
                    &config,
                    move |data: &[$ty], _info| {
                        if !flag.load(Ordering::Relaxed) {
                            return;
                        }
                        downmix_into(data, channels, &mut mono, $conv);
                        let written = producer.push_slice(&mono);
                        if written < mono.len() {
                            warn!("capture ring full: dropped {} samples", mono.len() - written);
                        }
                    },
                    |err| error!("audio input stream error: {err}"),
                    None,
                )
            };
        }

        let stream = match supported.sample_format() {
            SampleFormat::F32 => input_stream!(f32, |s: f32| s),
            SampleFormat::I16 => input_stream!(i16, |s: i16| s as f32 / 32768.0),
            SampleFormat::U8 => input_stream!(u8, |s: u8| (s as f32 - 128.0) / 128.0),
            fmt => {
                return Err(ParleyError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(map_build_error)?;

        stream.play().map_err(|e| ParleyError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Stop: signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred: Option<&str>,
    ) -> Result<Self> {
        Err(ParleyError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

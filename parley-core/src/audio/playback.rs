//! Sample-accurate scheduled playback on a cpal output stream.
//!
//! ## Design
//!
//! The output callback owns a [`PlaybackMixer`]. Buffers scheduled from the
//! session actor arrive over a bounded `crossbeam-channel` (non-blocking
//! `try_recv` in the callback) tagged with an absolute start frame. The
//! callback sums every active buffer into the output and advances an atomic
//! frame counter. That counter *is* the playback clock: [`PlaybackHandle::now`]
//! reads it, so scheduling decisions and audible output share one timebase.
//!
//! A buffer whose start frame has already passed when the callback first sees
//! it is started immediately rather than truncated.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::warn;

use super::decode::PlayableBuffer;

/// Buffers that may wait in the hand-off queue before the callback drains them.
const SCHEDULE_QUEUE_CAP: usize = 256;

/// A mono buffer at the device rate, pinned to an absolute output frame.
#[derive(Debug, Clone)]
pub struct ScheduledBuffer {
    pub start_frame: u64,
    pub samples: Vec<f32>,
}

impl ScheduledBuffer {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Callback-side state: pending buffers plus the frame clock.
pub struct PlaybackMixer {
    incoming: Receiver<ScheduledBuffer>,
    active: VecDeque<ScheduledBuffer>,
    clock: Arc<AtomicU64>,
}

/// Send-able scheduling handle for the non-RT side.
#[derive(Clone)]
pub struct PlaybackHandle {
    outgoing: Sender<ScheduledBuffer>,
    clock: Arc<AtomicU64>,
    device_rate: u32,
}

impl PlaybackMixer {
    /// Create a mixer and its matching handle for an output running at `device_rate`.
    pub fn new(device_rate: u32) -> (Self, PlaybackHandle) {
        let (tx, rx) = crossbeam_channel::bounded(SCHEDULE_QUEUE_CAP);
        let clock = Arc::new(AtomicU64::new(0));
        let mixer = Self {
            incoming: rx,
            active: VecDeque::with_capacity(SCHEDULE_QUEUE_CAP),
            clock: Arc::clone(&clock),
        };
        let handle = PlaybackHandle {
            outgoing: tx,
            clock,
            device_rate: device_rate.max(1),
        };
        (mixer, handle)
    }

    /// Fill `out` (interleaved, `channels` wide) and advance the clock.
    ///
    /// Mono content is copied to every channel. Silence is written when
    /// nothing is scheduled.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let start = self.clock.load(Ordering::Acquire);

        while let Ok(mut buf) = self.incoming.try_recv() {
            if buf.start_frame < start {
                buf.start_frame = start;
            }
            self.active.push_back(buf);
        }

        let frames = out.len() / channels;
        for f in 0..frames {
            let index = start + f as u64;
            let mut acc = 0f32;
            for buf in &self.active {
                if index >= buf.start_frame {
                    if let Some(s) = buf.samples.get((index - buf.start_frame) as usize) {
                        acc += *s;
                    }
                }
            }
            let v = acc.clamp(-1.0, 1.0);
            for sample in &mut out[f * channels..(f + 1) * channels] {
                *sample = v;
            }
        }

        let end = start + frames as u64;
        self.active.retain(|b| b.end_frame() > end);
        self.clock.store(end, Ordering::Release);
    }
}

impl PlaybackHandle {
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Seconds of output rendered so far.
    pub fn now(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    /// Queue `buffer` to start at `at` seconds on the output clock.
    ///
    /// Returns `false` if the hand-off queue is full or the stream is gone.
    pub fn schedule(&self, buffer: &PlayableBuffer, at: f64) -> bool {
        let start_frame = (at.max(0.0) * self.device_rate as f64).round() as u64;
        let samples = resample_linear(&buffer.samples, buffer.sample_rate, self.device_rate);
        match self.outgoing.try_send(ScheduledBuffer {
            start_frame,
            samples,
        }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("playback queue full, dropping scheduled buffer");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Linear-interpolation rate conversion for playback buffers.
pub fn resample_linear(input: &[f32], in_rate: u32, out_rate: u32) -> Vec<f32> {
    if in_rate == out_rate || input.is_empty() || in_rate == 0 {
        return input.to_vec();
    }
    let ratio = out_rate as f64 / in_rate as f64;
    let out_len = ((input.len() as f64) * ratio).round().max(1.0) as usize;
    let last = input.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let idx0 = (pos.floor() as usize).min(last);
            let idx1 = (idx0 + 1).min(last);
            let t = (pos - idx0 as f64) as f32;
            input[idx0] + (input[idx1] - input[idx0]) * t
        })
        .collect()
}

#[cfg(feature = "audio-cpal")]
pub use cpal_output::CpalPlayback;

#[cfg(feature = "audio-cpal")]
mod cpal_output {
    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
    };
    use tracing::{error, info};

    use super::{PlaybackHandle, PlaybackMixer};
    use crate::error::{ParleyError, Result};

    /// Owns the cpal output stream.
    ///
    /// **Not `Send`**, create and drop on the same OS thread.
    pub struct CpalPlayback {
        _stream: Stream,
    }

    impl CpalPlayback {
        /// Open the default output device and start rendering silence.
        pub fn open_default() -> Result<(Self, PlaybackHandle)> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or(ParleyError::NoDefaultOutputDevice)?;

            info!(
                device = device.name().unwrap_or_default().as_str(),
                "opening output device"
            );

            let supported = device
                .default_output_config()
                .map_err(|e| ParleyError::AudioDevice(e.to_string()))?;
            let sample_rate = supported.sample_rate().0;
            let channels = supported.channels() as usize;
            let config: StreamConfig = supported.config();

            info!(sample_rate, channels, "output config selected");

            let (mixer, handle) = PlaybackMixer::new(sample_rate);
            let stream = match supported.sample_format() {
                SampleFormat::F32 => build::<f32>(&device, &config, mixer, channels),
                SampleFormat::I16 => build::<i16>(&device, &config, mixer, channels),
                SampleFormat::U16 => build::<u16>(&device, &config, mixer, channels),
                fmt => {
                    return Err(ParleyError::AudioStream(format!(
                        "unsupported output sample format: {fmt:?}"
                    )))
                }
            }?;

            stream
                .play()
                .map_err(|e| ParleyError::AudioStream(e.to_string()))?;

            Ok((Self { _stream: stream }, handle))
        }
    }

    fn build<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut mixer: PlaybackMixer,
        channels: usize,
    ) -> Result<Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let mut scratch: Vec<f32> = Vec::new();
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _info| {
                    scratch.resize(data.len(), 0.0);
                    mixer.render_interleaved(&mut scratch, channels);
                    for (out, s) in data.iter_mut().zip(scratch.iter()) {
                        *out = T::from_sample(*s);
                    }
                },
                |err| error!("audio output stream error: {err}"),
                None,
            )
            .map_err(|e| ParleyError::AudioStream(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_advances_with_rendered_frames() {
        let (mut mixer, handle) = PlaybackMixer::new(100);
        let mut out = vec![1.0f32; 50 * 2];
        mixer.render_interleaved(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));
        approx::assert_relative_eq!(handle.now(), 0.5);
    }

    #[test]
    fn scheduled_buffer_starts_at_its_frame() {
        let (mut mixer, handle) = PlaybackMixer::new(10);
        assert!(handle.schedule(&PlayableBuffer::new(vec![0.5; 3], 10), 0.2));

        let mut out = vec![0f32; 6];
        mixer.render_interleaved(&mut out, 1);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.0]);
    }

    #[test]
    fn back_to_back_buffers_leave_no_gap() {
        let (mut mixer, handle) = PlaybackMixer::new(10);
        handle.schedule(&PlayableBuffer::new(vec![0.1; 2], 10), 0.0);
        handle.schedule(&PlayableBuffer::new(vec![0.2; 2], 10), 0.2);

        let mut out = vec![0f32; 5];
        mixer.render_interleaved(&mut out, 1);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.0]);
    }

    #[test]
    fn late_buffer_starts_immediately() {
        let (mut mixer, handle) = PlaybackMixer::new(10);
        let mut out = vec![0f32; 4];
        mixer.render_interleaved(&mut out, 1);

        handle.schedule(&PlayableBuffer::new(vec![0.3; 2], 10), 0.1);
        mixer.render_interleaved(&mut out, 1);
        assert_eq!(out, vec![0.3, 0.3, 0.0, 0.0]);
    }

    #[test]
    fn linear_resample_doubles_length() {
        let out = resample_linear(&[0.0, 1.0], 8_000, 16_000);
        assert_eq!(out.len(), 4);
        approx::assert_relative_eq!(out[1], 0.5);
    }
}

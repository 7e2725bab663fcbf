//! Native-rate f32 frames → 16 kHz signed 16-bit PCM.
//!
//! ## Design
//!
//! Resampling and quantization are separate stages. The [`Resampler`] trait
//! is the seam for swapping the cheap nearest-sample decimator for the
//! band-limited [`RubatoResampler`](super::resample::RubatoResampler)
//! without touching [`quantize_pcm16`].
//!
//! The default [`NearestDecimator`] picks `input[floor(i * ratio)]` for
//! output index `i`, where `ratio = native_rate / target_rate`. It aliases,
//! but costs nothing and emits exactly `floor(len / ratio)` samples per frame.

use serde::{Deserialize, Serialize};

use crate::buffering::frame::{AudioFrame, Pcm16Chunk};
use crate::error::Result;

use super::resample::RubatoResampler;

/// Sample-rate conversion stage of the encoder.
pub trait Resampler: Send {
    /// Input samples consumed per output sample (`native_rate / target_rate`).
    fn ratio(&self) -> f64;

    /// Convert one block of samples. May return fewer samples than expected
    /// (or none) for implementations that buffer internally.
    fn process(&mut self, input: &[f32]) -> Vec<f32>;
}

/// Which [`Resampler`] the encoder should build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplerKind {
    /// Nearest-sample decimation. Zero latency, no filtering.
    #[default]
    Nearest,
    /// rubato polynomial resampler. Higher quality, buffers one block.
    Rubato,
}

/// Nearest-sample decimation at a fixed ratio.
#[derive(Debug, Clone)]
pub struct NearestDecimator {
    ratio: f64,
}

impl NearestDecimator {
    pub fn new(native_rate: u32, target_rate: u32) -> Self {
        Self {
            ratio: native_rate as f64 / target_rate.max(1) as f64,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.ratio == 1.0
    }
}

impl Resampler for NearestDecimator {
    fn ratio(&self) -> f64 {
        self.ratio
    }

    fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() || input.is_empty() {
            return input.to_vec();
        }
        let out_len = (input.len() as f64 / self.ratio).floor() as usize;
        let last = input.len() - 1;
        (0..out_len)
            .map(|i| input[((i as f64 * self.ratio).floor() as usize).min(last)])
            .collect()
    }
}

/// Clamp to [-1, 1] and map to signed 16-bit little-endian bytes.
///
/// Negative values scale by 32768 and non-negative by 32767, so +1.0 lands on
/// `i16::MAX` instead of overflowing.
pub fn quantize_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&quantize_sample(sample).to_le_bytes());
    }
    out
}

#[inline]
fn quantize_sample(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Resample + quantize, one frame at a time.
pub struct FrameEncoder {
    native_rate: u32,
    target_rate: u32,
    resampler: Box<dyn Resampler>,
}

impl FrameEncoder {
    /// Build an encoder with the requested resampler.
    ///
    /// # Errors
    /// Returns `ParleyError::AudioDevice` if the rubato resampler fails to initialise.
    pub fn new(native_rate: u32, target_rate: u32, kind: ResamplerKind) -> Result<Self> {
        let resampler: Box<dyn Resampler> = match kind {
            ResamplerKind::Nearest => Box::new(NearestDecimator::new(native_rate, target_rate)),
            ResamplerKind::Rubato if native_rate == target_rate => {
                Box::new(NearestDecimator::new(native_rate, target_rate))
            }
            ResamplerKind::Rubato => Box::new(RubatoResampler::new(native_rate, target_rate)?),
        };
        Ok(Self::with_resampler(native_rate, target_rate, resampler))
    }

    /// Build an encoder around a caller-supplied resampler.
    pub fn with_resampler(
        native_rate: u32,
        target_rate: u32,
        resampler: Box<dyn Resampler>,
    ) -> Self {
        Self {
            native_rate,
            target_rate,
            resampler,
        }
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn ratio(&self) -> f64 {
        self.resampler.ratio()
    }

    pub fn encode(&mut self, frame: &AudioFrame) -> Pcm16Chunk {
        let resampled = self.resampler.process(&frame.samples);
        Pcm16Chunk {
            bytes: quantize_pcm16(&resampled),
            sample_rate: self.target_rate,
        }
    }
}

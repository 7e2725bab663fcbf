//! Band-limited capture resampling using a rubato `FastFixedIn` resampler.
//!
//! The default encoder path decimates by nearest sample. This is the drop-in
//! alternative behind the same [`Resampler`] seam for hosts that would rather
//! pay a block of latency than ship aliased audio upstream.
//!
//! rubato wants fixed input blocks, so samples accumulate internally and any
//! remainder carries over to the next frame. Output per frame is therefore
//! only approximately `len / ratio`.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use tracing::error;

use super::encode::Resampler;
use crate::error::{ParleyError, Result};

/// Input frames per rubato call. 1024 divides the default 4096 capture frame.
pub const RUBATO_CHUNK: usize = 1024;

/// Fixed-ratio rubato resampler for mono f32 audio.
pub struct RubatoResampler {
    inner: FastFixedIn<f32>,
    ratio: f64,
    /// Accumulation buffer, holds partial input blocks between calls.
    input_buf: Vec<f32>,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RubatoResampler {
    /// # Errors
    /// Returns `ParleyError::AudioDevice` if rubato fails to initialise.
    pub fn new(native_rate: u32, target_rate: u32) -> Result<Self> {
        let out_over_in = target_rate as f64 / native_rate.max(1) as f64;

        let inner = FastFixedIn::<f32>::new(
            out_over_in,
            1.0, // fixed ratio, no dynamic adjustment
            PolynomialDegree::Cubic,
            RUBATO_CHUNK,
            1, // mono
        )
        .map_err(|e| ParleyError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = inner.output_frames_max();
        tracing::info!(native_rate, target_rate, max_out, "rubato capture resampler enabled");

        Ok(Self {
            inner,
            ratio: native_rate as f64 / target_rate.max(1) as f64,
            input_buf: Vec::with_capacity(RUBATO_CHUNK * 2),
            output_buf: vec![vec![0f32; max_out]; 1],
        })
    }
}

impl Resampler for RubatoResampler {
    fn ratio(&self) -> f64 {
        self.ratio
    }

    fn process(&mut self, input: &[f32]) -> Vec<f32> {
        self.input_buf.extend_from_slice(input);

        let mut result = Vec::new();
        while self.input_buf.len() >= RUBATO_CHUNK {
            let block = &self.input_buf[..RUBATO_CHUNK];
            match self
                .inner
                .process_into_buffer(&[block], &mut self.output_buf, None)
            {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.drain(..RUBATO_CHUNK);
        }
        result
    }
}

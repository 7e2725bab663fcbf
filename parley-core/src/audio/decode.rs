//! Inbound agent audio: opaque channel bytes → playable mono buffer.
//!
//! The remote side sends each synthesized chunk as a self-contained RIFF/WAV
//! file. [`WavDecoder`] handles that; anything else plugs in through
//! [`ChunkDecoder`].

use std::io::Cursor;

use hound::{SampleFormat, WavReader};

use crate::error::{ParleyError, Result};

/// Decoded audio ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl PlayableBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Turns one inbound binary chunk into a [`PlayableBuffer`].
pub trait ChunkDecoder: Send {
    /// # Errors
    /// Returns `ParleyError::Decode` when the payload is not a usable container.
    fn decode(&self, bytes: &[u8]) -> Result<PlayableBuffer>;
}

/// RIFF/WAV decoder backed by `hound`. Multi-channel input is downmixed.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavDecoder;

impl ChunkDecoder for WavDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<PlayableBuffer> {
        let mut reader =
            WavReader::new(Cursor::new(bytes)).map_err(|e| ParleyError::Decode(e.to_string()))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| ParleyError::Decode(e.to_string()))?,
            SampleFormat::Int => {
                if !(8..=32).contains(&spec.bits_per_sample) {
                    return Err(ParleyError::Decode(format!(
                        "unsupported bit depth: {}",
                        spec.bits_per_sample
                    )));
                }
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| ParleyError::Decode(e.to_string()))?
            }
        };

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        if samples.is_empty() {
            return Err(ParleyError::Decode("chunk contains no samples".into()));
        }

        Ok(PlayableBuffer::new(samples, spec.sample_rate))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    pub(crate) fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_pcm16_wav_with_known_duration() {
        let bytes = wav_bytes(&vec![0i16; 24_000], 24_000, 1);
        let buf = WavDecoder.decode(&bytes).unwrap();
        assert_eq!(buf.sample_rate, 24_000);
        assert_eq!(buf.samples.len(), 24_000);
        approx::assert_relative_eq!(buf.duration_secs(), 1.0);
    }

    #[test]
    fn scales_int_samples_into_unit_range() {
        let bytes = wav_bytes(&[i16::MIN, 0, 16_384], 16_000, 1);
        let buf = WavDecoder.decode(&bytes).unwrap();
        approx::assert_relative_eq!(buf.samples[0], -1.0);
        approx::assert_relative_eq!(buf.samples[1], 0.0);
        approx::assert_relative_eq!(buf.samples[2], 0.5);
    }

    #[test]
    fn downmixes_stereo_to_mono() {
        let bytes = wav_bytes(&[16_384, 0, 16_384, 16_384], 8_000, 2);
        let buf = WavDecoder.decode(&bytes).unwrap();
        assert_eq!(buf.samples.len(), 2);
        approx::assert_relative_eq!(buf.samples[0], 0.25);
        approx::assert_relative_eq!(buf.samples[1], 0.5);
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        let err = WavDecoder.decode(b"not a wav file at all").unwrap_err();
        assert!(matches!(err, ParleyError::Decode(_)));
    }

    #[test]
    fn empty_wav_is_rejected() {
        let bytes = wav_bytes(&[], 16_000, 1);
        assert!(matches!(
            WavDecoder.decode(&bytes),
            Err(ParleyError::Decode(_))
        ));
    }
}

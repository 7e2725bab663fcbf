//! Fixed-size capture frames and the pump that assembles them.
//!
//! ```text
//! cpal callback ─► SPSC ring ─► pump_frames (own thread) ─► FrameAssembler ─► mpsc ─► session actor
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use super::{AudioConsumer, Consumer};

/// Default capture frame length in samples.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Samples popped from the ring per pump iteration.
const DRAIN_CHUNK: usize = 1024;

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const PUMP_IDLE_SLEEP_MS: u64 = 5;

/// One fixed-length block of mono capture samples at the device's native rate.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples, nominally in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Native capture rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Signed 16-bit little-endian mono PCM, ready to go out on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcm16Chunk {
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
}

impl Pcm16Chunk {
    /// Number of 16-bit samples in the chunk.
    pub fn sample_count(&self) -> usize {
        self.bytes.len() / 2
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Re-blocks an arbitrary sample stream into frames of exactly `frame_size`.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and return every frame that became complete, in order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let room = self.frame_size - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                frames.push(AudioFrame::new(full, self.sample_rate));
            }
        }
        frames
    }

    /// Samples held back waiting for a full frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Drain the capture ring into fixed frames until `running` is cleared or the
/// receiving side goes away. Runs on its own OS thread.
///
/// A full actor queue drops the frame rather than blocking the pump.
pub fn pump_frames(
    mut consumer: AudioConsumer,
    running: Arc<AtomicBool>,
    mut assembler: FrameAssembler,
    frames_tx: mpsc::Sender<AudioFrame>,
) {
    info!(frame_size = assembler.frame_size, "frame pump started");
    let mut scratch = vec![0f32; DRAIN_CHUNK];
    let mut dropped = 0usize;

    'pump: loop {
        if !running.load(Ordering::Acquire) {
            break;
        }

        let n = consumer.pop_slice(&mut scratch);
        if n == 0 {
            std::thread::sleep(Duration::from_millis(PUMP_IDLE_SLEEP_MS));
            continue;
        }

        for frame in assembler.push(&scratch[..n]) {
            match frames_tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    warn!(dropped, "session queue full, dropping capture frame");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("frame receiver closed, stopping pump");
                    break 'pump;
                }
            }
        }
    }

    info!(dropped, "frame pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_audio_ring, Producer};

    #[test]
    fn assembler_emits_only_full_frames() {
        let mut asm = FrameAssembler::new(4, 16_000);
        assert!(asm.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(asm.pending_len(), 3);

        let frames = asm.push(&[0.4, 0.5]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frames[0].sample_rate, 16_000);
        assert_eq!(asm.pending_len(), 1);
    }

    #[test]
    fn assembler_splits_large_pushes_in_capture_order() {
        let mut asm = FrameAssembler::new(3, 48_000);
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let frames = asm.push(&input);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].samples, vec![0.0, 1.0, 2.0]);
        assert_eq!(frames[2].samples, vec![6.0, 7.0, 8.0]);
        assert_eq!(asm.pending_len(), 1);
    }

    #[test]
    fn frame_duration_uses_native_rate() {
        let frame = AudioFrame::new(vec![0.0; 4800], 48_000);
        assert!((frame.duration_secs() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn pump_delivers_frames_and_exits_when_receiver_closes() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.25f32; 10]);

        let running = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc::channel(8);
        let pump_running = Arc::clone(&running);
        let handle = std::thread::spawn(move || {
            pump_frames(consumer, pump_running, FrameAssembler::new(4, 16_000), tx)
        });

        let first = rx.blocking_recv().expect("first frame");
        let second = rx.blocking_recv().expect("second frame");
        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 4);

        running.store(false, Ordering::Release);
        handle.join().expect("pump thread panicked");
    }
}

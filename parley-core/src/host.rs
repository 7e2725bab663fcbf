//! Host capability interface.
//!
//! The engine never touches an audio API directly. Everything it needs from
//! the platform is behind [`AudioHost`]:
//!
//! | Capability        | Method                 |
//! |-------------------|------------------------|
//! | capture frames    | `start_capture`        |
//! | schedule playback | `schedule_playback`    |
//! | playback clock    | `now`                  |
//! | teardown          | `stop_capture`, `release` |
//!
//! [`CpalHost`] is the production implementation. [`ManualHost`] runs on a
//! hand-driven clock for headless use and tests.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{
    audio::decode::PlayableBuffer,
    buffering::frame::AudioFrame,
    engine::EngineConfig,
    error::{ParleyError, Result},
};

/// Platform audio graph used by one session.
pub trait AudioHost: Send + 'static {
    /// Start delivering fixed `frame_size` frames into `frames`.
    /// Returns the native capture rate in Hz.
    ///
    /// # Errors
    /// `ParleyError::CapturePermission` if the microphone is refused.
    fn start_capture(&mut self, frames: mpsc::Sender<AudioFrame>, frame_size: usize)
        -> Result<u32>;

    /// Stop pulling frames. Safe to call more than once.
    fn stop_capture(&mut self);

    /// Play `buffer` starting at `at` seconds on the [`now`](Self::now) clock.
    fn schedule_playback(&mut self, buffer: PlayableBuffer, at: f64);

    /// Current playback clock in seconds.
    fn now(&self) -> f64;

    /// Release the whole audio graph. Called once per session by the engine.
    fn release(&mut self) -> Result<()>;
}

/// Builds a fresh host for each session.
pub type HostFactory = Arc<dyn Fn(&EngineConfig) -> Result<Box<dyn AudioHost>> + Send + Sync>;

#[cfg(feature = "audio-cpal")]
pub use cpal_host::{cpal_host_factory, CpalHost};

#[cfg(feature = "audio-cpal")]
mod cpal_host {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use std::thread::JoinHandle;

    use crossbeam_channel::{bounded, Sender};
    use tokio::sync::mpsc;
    use tracing::{info, warn};

    use super::{AudioHost, HostFactory};
    use crate::{
        audio::{
            decode::PlayableBuffer,
            playback::{CpalPlayback, PlaybackHandle},
            AudioCapture,
        },
        buffering::{
            create_audio_ring,
            frame::{pump_frames, AudioFrame, FrameAssembler},
            AudioProducer,
        },
        engine::EngineConfig,
        error::{ParleyError, Result},
    };

    enum HostCommand {
        OpenCapture {
            producer: AudioProducer,
            running: Arc<AtomicBool>,
            preferred: Option<String>,
            reply: Sender<Result<u32>>,
        },
        Release,
    }

    /// cpal-backed host. All streams live on one dedicated audio thread
    /// (`cpal::Stream` is `!Send`); this handle talks to it over a channel.
    pub struct CpalHost {
        commands: Option<Sender<HostCommand>>,
        thread: Option<JoinHandle<()>>,
        playback: PlaybackHandle,
        capture_running: Arc<AtomicBool>,
        pump: Option<JoinHandle<()>>,
        preferred_input: Option<String>,
    }

    impl CpalHost {
        /// Spawn the audio thread and open the default output device.
        pub fn open(preferred_input: Option<String>) -> Result<Self> {
            let (cmd_tx, cmd_rx) = bounded::<HostCommand>(4);
            let (ready_tx, ready_rx) = bounded::<Result<PlaybackHandle>>(1);

            let thread = std::thread::Builder::new()
                .name("parley-audio".into())
                .spawn(move || {
                    let playback = match CpalPlayback::open_default() {
                        Ok((playback, handle)) => {
                            let _ = ready_tx.send(Ok(handle));
                            playback
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    let mut capture: Option<AudioCapture> = None;
                    while let Ok(cmd) = cmd_rx.recv() {
                        match cmd {
                            HostCommand::OpenCapture {
                                producer,
                                running,
                                preferred,
                                reply,
                            } => {
                                let result = AudioCapture::open(
                                    producer,
                                    running,
                                    preferred.as_deref(),
                                )
                                .map(|c| {
                                    let rate = c.sample_rate;
                                    capture = Some(c);
                                    rate
                                });
                                let _ = reply.send(result);
                            }
                            HostCommand::Release => {
                                if let Some(c) = capture.take() {
                                    c.stop();
                                }
                                break;
                            }
                        }
                    }

                    // Streams drop here, on the thread that created them.
                    drop(capture);
                    drop(playback);
                    info!("audio graph released");
                })
                .map_err(ParleyError::Io)?;

            let playback = ready_rx
                .recv()
                .map_err(|_| ParleyError::AudioStream("audio thread died during open".into()))??;

            Ok(Self {
                commands: Some(cmd_tx),
                thread: Some(thread),
                playback,
                capture_running: Arc::new(AtomicBool::new(false)),
                pump: None,
                preferred_input,
            })
        }
    }

    impl AudioHost for CpalHost {
        fn start_capture(
            &mut self,
            frames: mpsc::Sender<AudioFrame>,
            frame_size: usize,
        ) -> Result<u32> {
            let commands = self
                .commands
                .as_ref()
                .ok_or_else(|| ParleyError::AudioStream("host already released".into()))?;

            let (producer, consumer) = create_audio_ring();
            let running = Arc::new(AtomicBool::new(true));
            let (reply_tx, reply_rx) = bounded(1);

            commands
                .send(HostCommand::OpenCapture {
                    producer,
                    running: Arc::clone(&running),
                    preferred: self.preferred_input.clone(),
                    reply: reply_tx,
                })
                .map_err(|_| ParleyError::AudioStream("audio thread is gone".into()))?;

            let rate = reply_rx
                .recv()
                .map_err(|_| ParleyError::AudioStream("audio thread died during capture open".into()))??;

            let pump_running = Arc::clone(&running);
            let pump = std::thread::Builder::new()
                .name("parley-frame-pump".into())
                .spawn(move || {
                    pump_frames(consumer, pump_running, FrameAssembler::new(frame_size, rate), frames)
                })
                .map_err(ParleyError::Io)?;

            self.capture_running = running;
            self.pump = Some(pump);
            Ok(rate)
        }

        fn stop_capture(&mut self) {
            self.capture_running.store(false, Ordering::Release);
            if let Some(pump) = self.pump.take() {
                if pump.join().is_err() {
                    warn!("frame pump thread panicked");
                }
            }
        }

        fn schedule_playback(&mut self, buffer: PlayableBuffer, at: f64) {
            self.playback.schedule(&buffer, at);
        }

        fn now(&self) -> f64 {
            self.playback.now()
        }

        fn release(&mut self) -> Result<()> {
            self.stop_capture();
            let Some(commands) = self.commands.take() else {
                return Ok(());
            };
            let _ = commands.send(HostCommand::Release);
            drop(commands);
            if let Some(thread) = self.thread.take() {
                thread
                    .join()
                    .map_err(|_| ParleyError::AudioStream("audio thread panicked on release".into()))?;
            }
            Ok(())
        }
    }

    impl Drop for CpalHost {
        fn drop(&mut self) {
            if let Err(e) = self.release() {
                warn!("audio graph release failed: {e}");
            }
        }
    }

    /// Factory for [`crate::ParleyEngine`] that opens a [`CpalHost`] per session.
    pub fn cpal_host_factory() -> HostFactory {
        Arc::new(|config: &EngineConfig| {
            let host = CpalHost::open(config.preferred_input_device.clone())?;
            Ok(Box::new(host) as Box<dyn super::AudioHost>)
        })
    }
}

/// Observable state of a [`ManualHost`].
#[derive(Debug, Default)]
pub struct ManualHostState {
    pub now: f64,
    pub capture_rate: u32,
    pub deny_capture: Option<String>,
    pub frames: Option<mpsc::Sender<AudioFrame>>,
    pub frame_size: usize,
    pub scheduled: Vec<(f64, PlayableBuffer)>,
    pub capture_stops: usize,
    pub releases: usize,
}

/// Host with a hand-driven clock and no real audio.
///
/// Clones share state, so a test can keep one clone while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualHost {
    state: Arc<Mutex<ManualHostState>>,
}

impl ManualHost {
    pub fn new(capture_rate: u32) -> Self {
        let host = Self::default();
        host.state.lock().capture_rate = capture_rate;
        host
    }

    /// Make the next `start_capture` fail as if the microphone were refused.
    pub fn deny_capture(&self, reason: impl Into<String>) {
        self.state.lock().deny_capture = Some(reason.into());
    }

    pub fn set_now(&self, now: f64) {
        self.state.lock().now = now;
    }

    /// Deliver one captured frame. Returns `false` when capture is not running.
    pub fn push_frame(&self, samples: Vec<f32>) -> bool {
        let state = self.state.lock();
        let Some(tx) = state.frames.as_ref() else {
            return false;
        };
        tx.try_send(AudioFrame::new(samples, state.capture_rate)).is_ok()
    }

    /// Start times of every scheduled buffer, in scheduling order.
    pub fn scheduled_starts(&self) -> Vec<f64> {
        self.state.lock().scheduled.iter().map(|(at, _)| *at).collect()
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().releases
    }

    pub fn capture_stop_count(&self) -> usize {
        self.state.lock().capture_stops
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().frames.is_some()
    }

    /// Factory handing out clones of this host.
    pub fn factory(&self) -> HostFactory {
        let host = self.clone();
        Arc::new(move |_config: &EngineConfig| Ok(Box::new(host.clone()) as Box<dyn AudioHost>))
    }
}

impl AudioHost for ManualHost {
    fn start_capture(
        &mut self,
        frames: mpsc::Sender<AudioFrame>,
        frame_size: usize,
    ) -> Result<u32> {
        let mut state = self.state.lock();
        if let Some(reason) = state.deny_capture.take() {
            return Err(ParleyError::CapturePermission(reason));
        }
        state.frames = Some(frames);
        state.frame_size = frame_size;
        Ok(state.capture_rate)
    }

    fn stop_capture(&mut self) {
        let mut state = self.state.lock();
        state.frames = None;
        state.capture_stops += 1;
    }

    fn schedule_playback(&mut self, buffer: PlayableBuffer, at: f64) {
        self.state.lock().scheduled.push((at, buffer));
    }

    fn now(&self) -> f64 {
        self.state.lock().now
    }

    fn release(&mut self) -> Result<()> {
        self.state.lock().releases += 1;
        Ok(())
    }
}

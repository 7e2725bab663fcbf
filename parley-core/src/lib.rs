//! # parley-core
//!
//! Half-duplex voice conversation engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → frame pump (thread)
//!                                                    │
//!                                        mpsc<AudioFrame>
//!                                                    ▼
//!   ChannelEvent ──────────────────────────► session actor (task)
//!   (ws reader)                               │  TurnGate ─► FrameEncoder ─► ChannelWriter
//!                                             │  WavDecoder ─► PlaybackScheduler ─► AudioHost
//!                                             │  TurnCompletionDetector
//!                                             │  CaptionSynchronizer
//!                                             ▼
//!                              broadcast::Sender<TurnStateEvent | TranscriptEvent | ...>
//! ```
//!
//! The audio callbacks are zero-alloc. All conversation state lives in the
//! session actor; hosts observe it through [`ParleyEngine`].

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod channel;
pub mod engine;
pub mod error;
pub mod host;
pub mod ipc;
pub mod notify;

// Convenience re-exports for downstream crates
pub use audio::encode::ResamplerKind;
pub use channel::{ChannelEvent, ChannelWriter};
pub use engine::{
    captions::{Speaker, Transcript, TranscriptEntry},
    gate::TurnState,
    session::DiagnosticsSnapshot,
    EngineConfig, ParleyEngine, SessionView,
};
pub use error::{ParleyError, Result};
pub use host::{AudioHost, HostFactory, ManualHost};
pub use ipc::events::{
    CaptionEvent, EndReason, EngineStatus, EngineStatusEvent, TranscriptEvent, TurnStateEvent,
};

#[cfg(feature = "audio-cpal")]
pub use host::{cpal_host_factory, CpalHost};

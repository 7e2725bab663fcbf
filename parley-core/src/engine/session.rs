//! Session actor.
//!
//! One Tokio task owns every piece of mutable conversation state: the turn
//! gate, the playback scheduler, the completion detector and the caption
//! synchronizer. It selects over four inputs:
//!
//! ```text
//!  frame pump ──► frames ──┐
//!  channel reader ► events ─┼─► SessionCore ──► ChannelWriter / AudioHost
//!  interval ─────► tick ────┤         │
//!  engine ───────► stop ────┘         └──► EngineShared (view + broadcasts)
//! ```
//!
//! Nothing else mutates that state, so none of it is locked. The engine only
//! sees the snapshot and events published through [`EngineShared`].

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, oneshot},
    time::MissedTickBehavior,
};
use tracing::{debug, info, trace, warn};

use super::{
    captions::CaptionSynchronizer,
    completion::{Completion, TurnCompletionDetector},
    gate::TurnGate,
    scheduler::PlaybackScheduler,
    EngineConfig, EngineShared,
};
use crate::{
    audio::{decode::ChunkDecoder, encode::FrameEncoder},
    buffering::frame::AudioFrame,
    channel::{
        events::{classify_inbound, InboundEvent, Rejected},
        ChannelEvent, ChannelWriter,
    },
    host::AudioHost,
    ipc::events::EndReason,
};

/// Per-session counters, reset on every start.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub frames_captured: AtomicUsize,
    pub frames_sent: AtomicUsize,
    pub frames_gated: AtomicUsize,
    pub chunks_scheduled: AtomicUsize,
    pub decode_failures: AtomicUsize,
    pub malformed_messages: AtomicUsize,
    pub ignored_messages: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.frames_captured.store(0, Ordering::Relaxed);
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_gated.store(0, Ordering::Relaxed);
        self.chunks_scheduled.store(0, Ordering::Relaxed);
        self.decode_failures.store(0, Ordering::Relaxed);
        self.malformed_messages.store(0, Ordering::Relaxed);
        self.ignored_messages.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_gated: self.frames_gated.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
            ignored_messages: self.ignored_messages.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_captured: usize,
    pub frames_sent: usize,
    pub frames_gated: usize,
    pub chunks_scheduled: usize,
    pub decode_failures: usize,
    pub malformed_messages: usize,
    /// Well-formed events outside the known set (e.g. `audio_meta`).
    pub ignored_messages: usize,
}

/// Everything one session owns.
pub(crate) struct SessionCore {
    session_id: String,
    host: Box<dyn AudioHost>,
    encoder: FrameEncoder,
    decoder: Box<dyn ChunkDecoder>,
    writer: ChannelWriter,
    gate: TurnGate,
    scheduler: PlaybackScheduler,
    completion: TurnCompletionDetector,
    captions: CaptionSynchronizer,
    shared: Arc<EngineShared>,
    failure: Option<String>,
    stopped: bool,
}

impl SessionCore {
    pub(crate) fn new(
        session_id: String,
        config: &EngineConfig,
        host: Box<dyn AudioHost>,
        encoder: FrameEncoder,
        decoder: Box<dyn ChunkDecoder>,
        writer: ChannelWriter,
        shared: Arc<EngineShared>,
    ) -> Self {
        Self {
            session_id,
            host,
            encoder,
            decoder,
            writer,
            gate: TurnGate::new(),
            scheduler: PlaybackScheduler::new(),
            completion: TurnCompletionDetector::new(
                config.turn_release_margin,
                config.final_turn_grace,
            ),
            captions: CaptionSynchronizer::new(),
            shared,
            failure: None,
            stopped: false,
        }
    }

    /// Align the cursor with the host clock and hand the floor to the agent.
    pub(crate) fn open(&mut self) {
        self.scheduler.reset(self.host.now());
        if self.gate.open_session() {
            self.shared.set_turn(self.gate.state());
        }
    }

    pub(crate) fn on_frame(&mut self, frame: AudioFrame) {
        let diagnostics = &self.shared.diagnostics;
        SessionDiagnostics::bump(&diagnostics.frames_captured);

        if !self.gate.permits_transmit() {
            SessionDiagnostics::bump(&diagnostics.frames_gated);
            trace!(state = ?self.gate.state(), "frame gated");
            return;
        }
        if !self.writer.is_open() {
            trace!("channel not open, frame dropped");
            return;
        }

        let chunk = self.encoder.encode(&frame);
        self.writer.send(chunk.into_bytes());
        SessionDiagnostics::bump(&diagnostics.frames_sent);
    }

    /// Returns the end reason when the event terminates the session.
    pub(crate) fn on_channel_event(&mut self, event: ChannelEvent) -> Option<EndReason> {
        match event {
            ChannelEvent::Binary(bytes) => {
                self.on_binary(&bytes);
                None
            }
            ChannelEvent::Text(text) => {
                self.on_text(&text);
                None
            }
            ChannelEvent::Closed => {
                info!("channel closed by remote");
                Some(EndReason::ChannelClosed)
            }
            ChannelEvent::Error(e) => {
                warn!(error = e.as_str(), "channel failed");
                self.failure = Some(e);
                Some(EndReason::ChannelFailed)
            }
        }
    }

    pub(crate) fn on_binary(&mut self, bytes: &[u8]) {
        let buffer = match self.decoder.decode(bytes) {
            Ok(buffer) => buffer,
            Err(e) => {
                SessionDiagnostics::bump(&self.shared.diagnostics.decode_failures);
                warn!(error = %e, bytes = bytes.len(), "dropping undecodable chunk");
                // The lost audio still counts as the agent's turn ending.
                self.completion.arm();
                return;
            }
        };

        let now = self.host.now();
        let slot = self.scheduler.schedule(buffer.duration_secs(), now);
        debug!(start = slot.start, end = slot.end, now, "chunk scheduled");
        self.host.schedule_playback(buffer, slot.start);
        SessionDiagnostics::bump(&self.shared.diagnostics.chunks_scheduled);

        if self.gate.agent_started() {
            self.shared.set_turn(self.gate.state());
        }
        self.completion.arm();
        for update in self.captions.on_chunk_scheduled(slot.start, now) {
            self.shared.apply_caption(update);
        }
    }

    pub(crate) fn on_text(&mut self, text: &str) {
        let event = match classify_inbound(text) {
            Ok(event) => event,
            Err(Rejected::UnknownKind(kind)) => {
                SessionDiagnostics::bump(&self.shared.diagnostics.ignored_messages);
                debug!(kind = kind.as_str(), "ignoring unknown event");
                return;
            }
            Err(Rejected::Malformed(reason)) => {
                SessionDiagnostics::bump(&self.shared.diagnostics.malformed_messages);
                debug!(reason = reason.as_str(), "ignoring malformed message");
                return;
            }
        };

        let final_turn = event.is_final_turn();
        match event {
            InboundEvent::AgentUtterance { text, .. } => {
                self.captions.on_agent_utterance(text);
                self.completion.disarm();
                if self.gate.agent_started() {
                    self.shared.set_turn(self.gate.state());
                }
                if final_turn {
                    self.completion.mark_final_turn(self.host.now());
                }
            }
            InboundEvent::TranscriptPartial { text } => {
                for update in self.captions.on_partial(text) {
                    self.shared.apply_caption(update);
                }
            }
            InboundEvent::TranscriptFinal { text } => {
                for update in self.captions.on_final(text) {
                    self.shared.apply_caption(update);
                }
            }
            InboundEvent::AgentAudioCancelled => {
                debug!("agent audio cancelled");
                self.captions.drop_pending();
                self.completion.arm();
            }
        }
    }

    /// Periodic check. Returns an end reason when the session is over.
    pub(crate) fn on_tick(&mut self) -> Option<EndReason> {
        let now = self.host.now();
        for update in self.captions.poll(now) {
            self.shared.apply_caption(update);
        }

        match self.completion.poll(now, self.scheduler.cursor())? {
            Completion::TurnEnded => {
                if self.gate.release() {
                    self.shared.set_turn(self.gate.state());
                    for update in self.captions.on_turn_released() {
                        self.shared.apply_caption(update);
                    }
                }
                None
            }
            Completion::SessionEnded => {
                info!("final turn played out");
                Some(EndReason::Completed)
            }
        }
    }

    /// Tear down in a fixed order. Only the first call does anything.
    pub(crate) fn shutdown(&mut self, reason: EndReason) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.host.stop_capture();
        self.writer.close();
        if let Err(e) = self.host.release() {
            warn!(error = %e, "audio graph release failed");
        }
        if self.gate.reset() {
            self.shared.set_turn(self.gate.state());
        }
        self.shared
            .set_status(reason.status(), Some(reason), self.failure.take());
        info!(session_id = self.session_id.as_str(), ?reason, "session ended");
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        self.shutdown(EndReason::UserStopped);
    }
}

/// Drive `core` until the channel ends, the final turn completes, or a stop
/// arrives. A dropped stop sender counts as a stop. Teardown runs on the
/// blocking pool.
pub(crate) async fn run(
    mut core: SessionCore,
    mut frames: mpsc::Receiver<AudioFrame>,
    mut events: mpsc::Receiver<ChannelEvent>,
    mut stop: oneshot::Receiver<()>,
    poll_interval: Duration,
) {
    let mut tick = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;
            _ = &mut stop => break EndReason::UserStopped,
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(reason) = core.on_channel_event(event) {
                        break reason;
                    }
                }
                None => break EndReason::ChannelClosed,
            },
            Some(frame) = frames.recv() => core.on_frame(frame),
            _ = tick.tick() => {
                if let Some(reason) = core.on_tick() {
                    break reason;
                }
            }
        }
    };

    // Releasing a real audio graph joins OS threads; keep that off the
    // runtime's worker threads.
    let span = tracing::Span::current();
    let teardown = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        core.shutdown(reason);
    });
    if let Err(e) = teardown.await {
        warn!(error = %e, "session teardown task failed");
    }
}

//! `ParleyEngine`, the top-level session lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! ParleyEngine::new()
//!     └─► start(id)      → channel open, audio graph open, actor spawned,
//!         │                status = Connecting → Active, turn = AgentSpeaking
//!         └─► stop()     → capture stopped, channel closed, graph released,
//!                          turn = Idle, status = Stopped
//! ```
//!
//! A session also ends on its own when the remote closes the channel, the
//! channel fails, or the agent's final turn has played out. `stop()` is
//! idempotent and safe in every one of those states.
//!
//! ## Threading
//!
//! Opening the audio graph blocks (cpal streams are created on the host's
//! audio thread), so it runs under `spawn_blocking` and reports back before
//! `start()` returns. Everything after that belongs to the session actor in
//! [`session`].

pub mod captions;
pub mod completion;
pub mod gate;
pub mod scheduler;
pub mod session;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

use crate::{
    audio::{
        decode::WavDecoder,
        encode::{FrameEncoder, ResamplerKind},
    },
    buffering::frame::{AudioFrame, DEFAULT_FRAME_SIZE},
    channel::{session_url, ws, ChannelEvent, ChannelWriter},
    error::{ParleyError, Result},
    host::{AudioHost, HostFactory},
    ipc::events::{
        CaptionEvent, EndReason, EngineStatus, EngineStatusEvent, TranscriptEvent,
        TurnStateEvent,
    },
    notify::TerminationNotifier,
};

use self::{
    captions::{CaptionUpdate, Transcript},
    completion::{DEFAULT_FINAL_TURN_GRACE, DEFAULT_TURN_RELEASE_MARGIN},
    gate::TurnState,
    session::{DiagnosticsSnapshot, SessionCore, SessionDiagnostics},
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `ParleyEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Channel endpoint (`ws://` or `wss://`). The session id is appended
    /// as `?session=<id>`.
    pub endpoint: String,
    /// HTTP base for the session-finish beacon.
    pub api_base: String,
    /// Outbound sample rate (Hz). Default: 16000.
    pub target_sample_rate: u32,
    /// Samples per captured frame at the native rate. Default: 4096.
    pub frame_size: usize,
    /// Default: nearest-sample decimation.
    pub resampler: ResamplerKind,
    /// Silence after the last scheduled chunk before the user's turn. Default: 800 ms.
    pub turn_release_margin: Duration,
    /// Play-out allowance for the agent's final turn. Default: 5 s.
    pub final_turn_grace: Duration,
    /// Completion check interval. Default: 100 ms. The turn release lands up
    /// to one interval after `turn_release_margin`.
    pub completion_poll_interval: Duration,
    /// Frames buffered between the pump and the actor before dropping. Default: 64.
    pub frame_queue_capacity: usize,
    /// Input device name; `None` uses the system default.
    pub preferred_input_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8000/ws/interview".into(),
            api_base: "http://localhost:8000".into(),
            target_sample_rate: 16_000,
            frame_size: DEFAULT_FRAME_SIZE,
            resampler: ResamplerKind::Nearest,
            turn_release_margin: DEFAULT_TURN_RELEASE_MARGIN,
            final_turn_grace: DEFAULT_FINAL_TURN_GRACE,
            completion_poll_interval: Duration::from_millis(100),
            frame_queue_capacity: 64,
            preferred_input_device: None,
        }
    }
}

/// Snapshot of the current (or last) session for host UIs.
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    pub session_id: Option<String>,
    pub status: EngineStatus,
    pub turn_state: TurnState,
    pub transcript: Transcript,
    pub live_caption: Option<String>,
}

/// State published by the session actor and read by the engine.
pub(crate) struct EngineShared {
    view: Mutex<SessionView>,
    turn_tx: broadcast::Sender<TurnStateEvent>,
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    caption_tx: broadcast::Sender<CaptionEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    seq: AtomicU64,
    pub(crate) diagnostics: SessionDiagnostics,
}

impl EngineShared {
    pub(crate) fn new() -> Self {
        let (turn_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (caption_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            view: Mutex::new(SessionView::default()),
            turn_tx,
            transcript_tx,
            caption_tx,
            status_tx,
            seq: AtomicU64::new(0),
            diagnostics: SessionDiagnostics::default(),
        }
    }

    pub(crate) fn view(&self) -> SessionView {
        self.view.lock().clone()
    }

    pub(crate) fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Fresh view and counters for a new session. Subscribers are kept.
    fn begin(&self, session_id: &str) {
        self.diagnostics.reset();
        *self.view.lock() = SessionView {
            session_id: Some(session_id.to_string()),
            ..SessionView::default()
        };
    }

    pub(crate) fn set_turn(&self, state: TurnState) {
        self.view.lock().turn_state = state;
        let _ = self.turn_tx.send(TurnStateEvent { state });
    }

    pub(crate) fn apply_caption(&self, update: CaptionUpdate) {
        match update {
            CaptionUpdate::Entry {
                index,
                entry,
                replaced,
            } => {
                self.view.lock().transcript.apply(index, entry.clone());
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                let _ = self.transcript_tx.send(TranscriptEvent {
                    seq,
                    index,
                    entry,
                    replaced,
                });
            }
            CaptionUpdate::Live(text) => {
                self.view.lock().live_caption.clone_from(&text);
                let _ = self.caption_tx.send(CaptionEvent { text });
            }
        }
    }

    pub(crate) fn set_status(
        &self,
        status: EngineStatus,
        reason: Option<EndReason>,
        detail: Option<String>,
    ) {
        self.view.lock().status = status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status,
            reason,
            detail,
        });
    }
}

struct ActiveSession {
    session_id: String,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// The top-level engine handle.
///
/// `ParleyEngine` is `Send + Sync`. Wrap in `Arc<ParleyEngine>` to share it
/// between a UI and event-forwarding tasks. At most one session runs at a time.
pub struct ParleyEngine {
    config: EngineConfig,
    host_factory: HostFactory,
    shared: Arc<EngineShared>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    notifier: TerminationNotifier,
    pending_notify: Mutex<Option<JoinHandle<()>>>,
}

impl ParleyEngine {
    /// Create an engine. Nothing is opened until `start()`.
    pub fn new(config: EngineConfig, host_factory: HostFactory) -> Self {
        let notifier = TerminationNotifier::new(config.api_base.clone());
        Self {
            config,
            host_factory,
            shared: Arc::new(EngineShared::new()),
            active: tokio::sync::Mutex::new(None),
            notifier,
            pending_notify: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Connect to `config.endpoint` for `session_id` and start the conversation.
    ///
    /// Returns once the channel and the audio graph are both open.
    ///
    /// # Errors
    /// - `ParleyError::AlreadyRunning` if a session is active.
    /// - `ParleyError::InvalidEndpoint` / `ParleyError::Channel` if the channel can't open.
    /// - `ParleyError::CapturePermission` if the microphone is refused.
    pub async fn start(&self, session_id: &str) -> Result<()> {
        let mut active = self.active.lock().await;
        ensure_idle(&active)?;
        self.shared.begin(session_id);
        self.shared.set_status(EngineStatus::Connecting, None, None);

        let connected = match session_url(&self.config.endpoint, session_id) {
            Ok(url) => ws::connect(&url).await,
            Err(e) => Err(e),
        };
        let (writer, events) = match connected {
            Ok(channel) => channel,
            Err(e) => {
                self.shared
                    .set_status(EngineStatus::Error, None, Some(e.to_string()));
                return Err(e);
            }
        };

        self.launch(&mut active, session_id, writer, events).await
    }

    /// Start a session over an already-open channel.
    ///
    /// Used by hosts that bring their own transport. The engine takes
    /// ownership of `writer` and closes it when the session ends.
    ///
    /// # Errors
    /// Same as [`start`](Self::start) minus the channel errors.
    pub async fn start_with_channel(
        &self,
        session_id: &str,
        writer: ChannelWriter,
        events: mpsc::Receiver<ChannelEvent>,
    ) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Err(e) = ensure_idle(&active) {
            writer.close();
            return Err(e);
        }
        self.shared.begin(session_id);
        self.shared.set_status(EngineStatus::Connecting, None, None);
        self.launch(&mut active, session_id, writer, events).await
    }

    async fn launch(
        &self,
        active: &mut Option<ActiveSession>,
        session_id: &str,
        writer: ChannelWriter,
        events: mpsc::Receiver<ChannelEvent>,
    ) -> Result<()> {
        let (frames_tx, frames_rx) = mpsc::channel(self.config.frame_queue_capacity.max(1));
        let config = self.config.clone();
        let factory = Arc::clone(&self.host_factory);

        let opened = tokio::task::spawn_blocking(move || open_audio(&factory, &config, frames_tx))
            .await
            .map_err(|e| ParleyError::Other(anyhow::anyhow!("audio open task died: {e}")))
            .and_then(|opened| opened);

        let (host, encoder) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                writer.close();
                if e.is_permission_denied() {
                    warn!(error = %e, "microphone refused");
                }
                self.shared
                    .set_status(EngineStatus::Error, None, Some(e.to_string()));
                return Err(e);
            }
        };
        let capture_rate = encoder.native_rate();

        let mut core = SessionCore::new(
            session_id.to_string(),
            &self.config,
            host,
            encoder,
            Box::new(WavDecoder),
            writer,
            Arc::clone(&self.shared),
        );
        core.open();
        self.shared.set_status(EngineStatus::Active, None, None);

        let (stop_tx, stop_rx) = oneshot::channel();
        let span = info_span!("session", session_id);
        let task = tokio::spawn(
            session::run(
                core,
                frames_rx,
                events,
                stop_rx,
                self.config.completion_poll_interval,
            )
            .instrument(span),
        );

        *active = Some(ActiveSession {
            session_id: session_id.to_string(),
            stop_tx: Some(stop_tx),
            task,
        });
        info!(session_id, capture_rate, "session started");
        Ok(())
    }

    /// Stop the current session and wait for teardown to finish.
    ///
    /// Idempotent: returns `Ok(())` when nothing is running.
    pub async fn stop(&self) -> Result<()> {
        let session = self.active.lock().await.take();
        let Some(mut session) = session else {
            return Ok(());
        };
        if let Some(stop_tx) = session.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Err(e) = session.task.await {
            warn!(error = %e, "session task ended abnormally");
        }
        Ok(())
    }

    /// User-initiated end: stop, then tell the backend the session is finished.
    ///
    /// The notification only goes out if the session was still running.
    pub async fn end_by_user(&self) -> Result<()> {
        let live_session = {
            let active = self.active.lock().await;
            active
                .as_ref()
                .filter(|s| !s.task.is_finished())
                .map(|s| s.session_id.clone())
        };
        self.stop().await?;
        if let Some(session_id) = live_session {
            *self.pending_notify.lock() = Some(self.notifier.notify(&session_id));
        }
        Ok(())
    }

    /// Wait for an in-flight session-finish notification, if any. Hosts that
    /// exit right after [`end_by_user`](Self::end_by_user) call this first.
    pub async fn flush_notifications(&self) {
        let pending = self.pending_notify.lock().take();
        if let Some(handle) = pending {
            let _ = handle.await;
        }
    }

    /// Whether a session is connecting or active.
    pub fn is_running(&self) -> bool {
        matches!(
            self.shared.view.lock().status,
            EngineStatus::Connecting | EngineStatus::Active
        )
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.view.lock().status
    }

    pub fn turn_state(&self) -> TurnState {
        self.shared.view.lock().turn_state
    }

    pub fn transcript(&self) -> Transcript {
        self.shared.view.lock().transcript.clone()
    }

    pub fn live_caption(&self) -> Option<String> {
        self.shared.view.lock().live_caption.clone()
    }

    /// Full snapshot of the current (or last) session.
    pub fn view(&self) -> SessionView {
        self.shared.view()
    }

    pub fn subscribe_turns(&self) -> broadcast::Receiver<TurnStateEvent> {
        self.shared.turn_tx.subscribe()
    }

    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.shared.transcript_tx.subscribe()
    }

    pub fn subscribe_captions(&self) -> broadcast::Receiver<CaptionEvent> {
        self.shared.caption_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.shared.subscribe_status()
    }

    /// Counters for the current (or last) session.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }
}

fn ensure_idle(active: &Option<ActiveSession>) -> Result<()> {
    match active {
        Some(session) if !session.task.is_finished() => Err(ParleyError::AlreadyRunning),
        _ => Ok(()),
    }
}

/// Build the host, start capture and size the encoder to the capture rate.
/// On failure the host is already released.
fn open_audio(
    factory: &HostFactory,
    config: &EngineConfig,
    frames: mpsc::Sender<AudioFrame>,
) -> Result<(Box<dyn AudioHost>, FrameEncoder)> {
    let mut host = factory(config)?;
    let encoder = host
        .start_capture(frames, config.frame_size)
        .and_then(|rate| FrameEncoder::new(rate, config.target_sample_rate, config.resampler));
    match encoder {
        Ok(encoder) => Ok((host, encoder)),
        Err(e) => {
            host.stop_capture();
            if let Err(release) = host.release() {
                warn!(error = %release, "audio graph release failed");
            }
            Err(e)
        }
    }
}

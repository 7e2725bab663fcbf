use thiserror::Error;

/// All errors produced by parley-core.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("microphone access denied: {0}")]
    CapturePermission(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("audio decode error: {0}")]
    Decode(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("invalid channel endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("a session is already running")]
    AlreadyRunning,

    #[error("session-end notification failed: {0}")]
    Notify(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ParleyError {
    /// Whether this error means the user (or OS policy) refused microphone access.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ParleyError::CapturePermission(_))
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;

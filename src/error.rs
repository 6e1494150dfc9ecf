use thiserror::Error;

/// All errors produced by confab.
#[derive(Debug, Error)]
pub enum ConfabError {
    #[error("no audio input device available")]
    NoInputDeviceAvailable,

    #[error("audio capture error: {0}")]
    Capture(String),

    #[error("a session is already recording")]
    AlreadyRecording,

    #[error("session is not recording")]
    NotRecording,

    #[error("handle does not belong to the active session")]
    UnknownSession,

    #[error("session failed: {0}")]
    SessionFailed(String),

    #[error("recognition backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ConfabError>;

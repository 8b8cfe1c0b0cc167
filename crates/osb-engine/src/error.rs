//! Sentinel errors shared by the local engine and the remote client.
//!
//! The HTTP layer translates these into the wire taxonomy; raw runtime
//! messages only escape through the `Runtime`/`Store` variants, which map to
//! 500s.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    BadRequest(String),
    #[error("sandbox not found")]
    NotFound,
    #[error("command not found")]
    CommandNotFound,
    #[error("image not found")]
    ImageNotFoundById,
    #[error("image not found locally: {0} (pull it first via POST /v1/images/pull)")]
    ImageNotFound(String),
    #[error("sandbox is already running")]
    AlreadyRunning,
    #[error("sandbox is already stopped")]
    AlreadyStopped,
    #[error("sandbox is already paused")]
    AlreadyPaused,
    #[error("sandbox is not paused")]
    NotPaused,
    #[error("sandbox is not running")]
    NotRunning,
    #[error("command already finished")]
    CommandFinished,
    #[error("{0}")]
    Conflict(String),
    #[error("no workers registered")]
    NoWorkers,
    #[error("operation timed out")]
    Timeout,
    #[error(transparent)]
    Runtime(anyhow::Error),
    #[error(transparent)]
    Store(anyhow::Error),
}

impl EngineError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        EngineError::BadRequest(message.into())
    }

    /// True for the conflict family (invalid lifecycle transitions and
    /// already-finished commands).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::AlreadyRunning
                | EngineError::AlreadyStopped
                | EngineError::AlreadyPaused
                | EngineError::NotPaused
                | EngineError::NotRunning
                | EngineError::CommandFinished
                | EngineError::Conflict(_)
        )
    }
}

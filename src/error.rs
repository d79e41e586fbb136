use crate::model::{JobKind, JobState};
use thiserror::Error;

/// Errors raised inside the job monitor. None of them escape the controller.
#[derive(Debug, Error, PartialEq)]
pub enum MonitorError {
    #[error("a job is already in progress ({active})")]
    AlreadyRunning { active: JobKind },

    #[error("failed to start {kind}: {message}")]
    LaunchFailure { kind: JobKind, message: String },

    #[error("failed to poll {kind}: {message}")]
    PollFailure { kind: JobKind, message: String },

    #[error("invalid transition for {kind}: {from:?} -> {to:?}")]
    InvalidTransition {
        kind: JobKind,
        from: JobState,
        to: JobState,
    },
}

/// Failures talking to the job backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    /// The backend answered but reported the operation as failed.
    #[error("{0}")]
    Application(String),
}

impl BackendError {
    /// Message supplied by the server, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            BackendError::Application(msg) => Some(msg),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            BackendError::Status(status.as_u16())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

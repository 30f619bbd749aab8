use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::result::RunStatus;

/// Failures the test host can run into between argument parsing and the
/// final verdict.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("device not found: {}", .0.display())]
    DeviceNotFound(PathBuf),

    #[error("failed to start {backend} backend: {reason}")]
    BackendStart {
        backend: &'static str,
        reason: String,
    },

    #[error("failed to stop {backend} backend: {reason}")]
    BackendStop {
        backend: &'static str,
        reason: String,
    },

    #[error("failed to read guest output: {0}")]
    BackendRead(#[source] io::Error),

    #[error("guest output ended before a terminal marker")]
    StreamClosed,

    #[error("no terminal marker within {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl HostError {
    pub fn start(backend: &'static str, reason: impl ToString) -> Self {
        HostError::BackendStart {
            backend,
            reason: reason.to_string(),
        }
    }

    /// The run status this error terminates a run with.
    ///
    /// `InvalidArgument` never reaches a run; it is reported as a backend
    /// error if it does.
    pub fn status(&self) -> RunStatus {
        match self {
            HostError::TimedOut(_) => RunStatus::TimedOut,
            _ => RunStatus::BackendError,
        }
    }
}

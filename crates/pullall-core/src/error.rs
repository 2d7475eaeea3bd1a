use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::cancel::CancelCause;

/// Errors that abort a whole batch before any refresh is scheduled.
#[derive(Debug, Error)]
pub enum PullError {
    #[error("cannot read directory {}", .root.display())]
    Enumeration {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read an entry of {}", .root.display())]
    ReadEntry {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PullError>;

/// Why a single target failed to refresh.
///
/// Recovered into an [`Outcome`](crate::refresh::Outcome) by the executor;
/// never propagated with `?` past the task boundary.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("cannot check for a checkout: {source}")]
    Probe {
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} {}", describe_exit(.status))]
    Exit { program: String, status: ExitStatus },

    #[error("{}", describe_cancel(.cause))]
    Cancelled { cause: CancelCause },

    #[error("failed to write output: {source}")]
    Output {
        #[source]
        source: std::io::Error,
    },

    #[error("refresh worker panicked: {0}")]
    Panicked(String),

    #[error("refresh worker was aborted before finishing")]
    Aborted,
}

/// Coarse classification of a [`RefreshError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Probe,
    /// The refresh command could not be launched or reported failure.
    Invocation,
    /// The target was aborted by batch-wide cancellation.
    Cancellation,
    Output,
    /// The worker panicked or never ran to completion.
    Panic,
}

impl RefreshError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RefreshError::Probe { .. } => FailureKind::Probe,
            RefreshError::Launch { .. } | RefreshError::Io { .. } | RefreshError::Exit { .. } => {
                FailureKind::Invocation
            }
            RefreshError::Cancelled { .. } => FailureKind::Cancellation,
            RefreshError::Output { .. } => FailureKind::Output,
            RefreshError::Panicked(_) | RefreshError::Aborted => FailureKind::Panic,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind() == FailureKind::Cancellation
    }
}

fn describe_exit(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with code {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn describe_cancel(cause: &CancelCause) -> String {
    match cause {
        CancelCause::Interrupted => "cancelled: interrupted".to_string(),
        CancelCause::PeerFailed => "cancelled: aborted because another target failed".to_string(),
    }
}

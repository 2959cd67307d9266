//! Error types for guestprobe-core.

use crate::reporter::TestState;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Problems with the parameter blob handed to a test case.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The parameter string was empty or whitespace only.
    #[error("parameter string is empty")]
    Empty,

    /// One or more required keys were absent.
    #[error("missing required parameters: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    /// A key was present but its value could not be used.
    #[error("invalid value {value:?} for parameter {key}: {reason}")]
    InvalidValue {
        /// Parameter name
        key: String,
        /// Raw value as supplied
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Errors that end a test run.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Missing or invalid parameters.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A required external entity is absent or unreachable.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// A dependency started but its guest services never reported in.
    #[error("guest not ready: {0}")]
    GuestNotReady(String),

    /// An observed value violated the scenario's expectation.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// A poll did not observe the expected condition within its budget.
    #[error("timed out after {elapsed:?} waiting for {what}")]
    Timeout {
        /// What was being waited for
        what: String,
        /// Time spent polling
        elapsed: Duration,
    },

    /// The executable could not be spawned at all.
    #[error("command not found: {program}")]
    CommandNotFound {
        /// Program that failed to spawn
        program: String,
    },

    /// The executable ran longer than the runner allows.
    #[error("command {program} did not finish within {after:?}")]
    CommandTimeout {
        /// Program that was killed
        program: String,
        /// Configured limit
        after: Duration,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Terminal state this error drives the run into.
    ///
    /// Assertion failures and expired polls mark the run `Failed`; anything
    /// that prevented the scenario from being exercised marks it `Aborted`.
    pub fn verdict(&self) -> TestState {
        match self {
            HarnessError::Assertion(_) | HarnessError::Timeout { .. } => TestState::Failed,
            _ => TestState::Aborted,
        }
    }

    /// True if the tool chain itself is broken, so retrying cannot help.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            HarnessError::Config(_)
                | HarnessError::CommandNotFound { .. }
                | HarnessError::CommandTimeout { .. }
        )
    }
}

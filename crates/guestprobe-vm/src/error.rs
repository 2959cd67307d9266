//! Error types for guestprobe-vm.

use guestprobe_core::HarnessError;
use thiserror::Error;

/// Result type alias for guestprobe-vm operations.
pub type Result<T> = std::result::Result<T, VmError>;

/// Errors from the management and guest adapters.
#[derive(Debug, Error)]
pub enum VmError {
    /// The management API does not know the VM.
    #[error("VM not found: {vm}")]
    NotFound {
        /// VM name
        vm: String,
    },

    /// A management or guest command ran and reported failure.
    #[error("{operation} failed for {target} (exit {exit_code}): {message}")]
    Command {
        /// Operation name, e.g. `Start-VM`
        operation: &'static str,
        /// VM name or guest address
        target: String,
        /// Exit code of the command
        exit_code: i32,
        /// Trimmed stderr
        message: String,
    },

    /// The command succeeded but its output was not in the expected shape.
    #[error("unexpected output from {operation}: {message}")]
    Output {
        /// Operation name
        operation: &'static str,
        /// What was wrong
        message: String,
    },

    /// The guest could not be reached over its shell transport.
    #[error("guest {0} unreachable")]
    Unreachable(String),

    /// Runner-level failure (program missing, timeout, I/O).
    #[error(transparent)]
    Harness(#[from] HarnessError),
}

impl From<serde_json::Error> for VmError {
    fn from(e: serde_json::Error) -> Self {
        VmError::Harness(HarnessError::Json(e))
    }
}

impl From<VmError> for HarnessError {
    fn from(e: VmError) -> Self {
        match e {
            VmError::Harness(inner) => inner,
            other => HarnessError::DependencyUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guestprobe_core::TestState;

    #[test]
    fn test_adapter_errors_abort() {
        let err: HarnessError = VmError::NotFound { vm: "vm2".into() }.into();
        assert!(matches!(err, HarnessError::DependencyUnavailable(ref m) if m.contains("vm2")));
        assert_eq!(err.verdict(), TestState::Aborted);
    }

    #[test]
    fn test_harness_errors_pass_through() {
        let err: HarnessError = VmError::Harness(HarnessError::CommandNotFound {
            program: "powershell".into(),
        })
        .into();
        assert!(matches!(err, HarnessError::CommandNotFound { .. }));
    }
}

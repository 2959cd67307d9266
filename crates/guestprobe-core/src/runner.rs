//! External command execution.
//!
//! Every interaction with the platform under test goes through a
//! [`CommandRunner`]. A runner only distinguishes "could not run at all"
//! (an error) from "ran and exited" (a [`CommandOutput`]); whether a non-zero
//! exit or a missing pattern matters is the caller's decision.

use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Maximum captured size per stream (1 MB).
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Truncate a string to max bytes, preserving UTF-8 boundaries.
fn truncate_output(s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_string();
    truncated.push_str("\n... [output truncated]");
    truncated
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code (-1 if terminated by a signal).
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Wall-clock run time.
    #[serde(default)]
    pub duration: Duration,
}

impl CommandOutput {
    /// Build an output record, mostly useful for fakes.
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
        }
    }

    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Check if stdout contains a pattern.
    pub fn stdout_contains(&self, pattern: &str) -> bool {
        self.stdout.contains(pattern)
    }

    /// Classify this output against what the caller expected.
    pub fn check(&self, expectation: &Expectation) -> Outcome {
        if !self.success() {
            return Outcome::SoftFailure(format!(
                "exit code {}: {}",
                self.exit_code,
                self.stderr.trim()
            ));
        }
        match expectation {
            Expectation::ExitZero => Outcome::Success,
            Expectation::StdoutContains(pattern) if self.stdout_contains(pattern) => {
                Outcome::Success
            }
            Expectation::StdoutContains(pattern) => {
                Outcome::SoftFailure(format!("output does not contain {pattern:?}"))
            }
            Expectation::StdoutLacks(pattern) if self.stdout_contains(pattern) => {
                Outcome::SoftFailure(format!("output unexpectedly contains {pattern:?}"))
            }
            Expectation::StdoutLacks(_) => Outcome::Success,
        }
    }
}

/// What a caller requires of a command's output beyond exit code 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Exit code 0 is enough.
    ExitZero,
    /// Exit code 0 and stdout contains the pattern.
    StdoutContains(String),
    /// Exit code 0 and stdout does not contain the pattern.
    StdoutLacks(String),
}

/// Classification of a completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Exit code and output matched the expectation.
    Success,
    /// The command ran but did not meet the expectation.
    SoftFailure(String),
}

/// Invokes external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion.
    ///
    /// # Errors
    ///
    /// [`HarnessError::CommandNotFound`] if the program cannot be spawned;
    /// a non-zero exit is *not* an error.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

#[async_trait]
impl<R: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<R> {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        (**self).run(program, args).await
    }
}

/// Runs commands as local child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    /// Create a runner with no time limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        tracing::debug!(program = %program, args = ?args, "Running command");
        let start = Instant::now();

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    tracing::error!(program = %program, error = %e, "Command could not be spawned");
                    HarnessError::CommandNotFound {
                        program: program.to_string(),
                    }
                }
                _ => HarnessError::Io(e),
            })?;

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(program = %program, timeout_secs = limit.as_secs(), "Command timed out");
                    return Err(HarnessError::CommandTimeout {
                        program: program.to_string(),
                        after: limit,
                    });
                }
            },
            None => child.wait_with_output().await?,
        };

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: truncate_output(
                String::from_utf8_lossy(&output.stdout).into_owned(),
                MAX_OUTPUT_SIZE,
            ),
            stderr: truncate_output(
                String::from_utf8_lossy(&output.stderr).into_owned(),
                MAX_OUTPUT_SIZE,
            ),
            duration: start.elapsed(),
        };
        tracing::debug!(
            program = %program,
            exit_code = result.exit_code,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            elapsed_ms = result.duration.as_millis() as u64,
            "Command completed"
        );
        tracing::trace!(stdout = %result.stdout, stderr = %result.stderr, "Command output");
        Ok(result)
    }
}

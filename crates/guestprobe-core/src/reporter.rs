//! Test lifecycle state marker and summary log.
//!
//! The marker is a single token overwritten on every transition; the summary
//! log is an append-only, human-readable record reset at the start of a run.

use crate::error::Result;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Lifecycle state of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    /// The scenario is executing.
    Running,
    /// Every assertion held.
    Completed,
    /// The scenario could not be exercised (configuration, missing dependency).
    Aborted,
    /// An assertion did not hold.
    Failed,
}

impl TestState {
    /// Token written to the state marker file.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Running => "TestRunning",
            Self::Completed => "TestCompleted",
            Self::Aborted => "TestAborted",
            Self::Failed => "TestFailed",
        }
    }

    /// Parse a marker token back into a state.
    pub fn from_marker(token: &str) -> Option<Self> {
        match token.trim() {
            "TestRunning" => Some(Self::Running),
            "TestCompleted" => Some(Self::Completed),
            "TestAborted" => Some(Self::Aborted),
            "TestFailed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// True for `Completed`, `Aborted` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Writes the state marker and summary log for one run.
#[derive(Debug)]
pub struct StateReporter {
    state_path: PathBuf,
    summary_path: PathBuf,
    /// `None` until `report_running` is first called.
    state: Option<TestState>,
}

impl StateReporter {
    /// Create a reporter, resetting the summary log.
    ///
    /// Parent directories of both paths are created if needed. The marker
    /// file is left untouched until the first transition.
    pub fn create(state_path: impl Into<PathBuf>, summary_path: impl Into<PathBuf>) -> Result<Self> {
        let state_path = state_path.into();
        let summary_path = summary_path.into();

        for path in [&state_path, &summary_path] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }
        File::create(&summary_path)?;

        tracing::debug!(
            state = %state_path.display(),
            summary = %summary_path.display(),
            "State reporter created"
        );

        Ok(Self {
            state_path,
            summary_path,
            state: None,
        })
    }

    /// Path of the state marker file.
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Path of the summary log.
    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    /// Current state, if the run has started.
    pub fn state(&self) -> Option<TestState> {
        self.state
    }

    /// True once a terminal state has been recorded.
    pub fn is_terminal(&self) -> bool {
        self.state.is_some_and(|s| s.is_terminal())
    }

    /// Append one line to the summary log.
    pub fn summary(&self, line: impl AsRef<str>) -> Result<()> {
        let line = line.as_ref();
        tracing::info!(summary = %line);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.summary_path)?;
        writeln!(
            file,
            "[{}] {}",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            line
        )?;
        file.sync_data()?;
        Ok(())
    }

    /// Record that the run has started.
    pub fn report_running(&mut self) -> Result<()> {
        if self.is_terminal() {
            tracing::warn!(state = ?self.state, "Ignoring running report after terminal state");
            return Ok(());
        }
        self.transition(TestState::Running)
    }

    /// Record a passing run.
    pub fn report_completed(&mut self) -> Result<()> {
        self.terminal(TestState::Completed, "Test completed")
    }

    /// Record a run that could not be exercised.
    pub fn report_aborted(&mut self, reason: impl AsRef<str>) -> Result<()> {
        self.terminal(TestState::Aborted, reason.as_ref())
    }

    /// Record a run whose assertions did not hold.
    pub fn report_failed(&mut self, reason: impl AsRef<str>) -> Result<()> {
        self.terminal(TestState::Failed, reason.as_ref())
    }

    fn terminal(&mut self, state: TestState, reason: &str) -> Result<()> {
        if let Some(current) = self.state.filter(|s| s.is_terminal()) {
            tracing::warn!(
                current = %current,
                requested = %state,
                reason = %reason,
                "Ignoring second terminal state report"
            );
            return Ok(());
        }
        let logged = match state {
            TestState::Completed => self.summary(reason),
            _ => self.summary(format!("Test {state}: {reason}")),
        };
        if let Err(e) = &logged {
            tracing::warn!(error = %e, state = %state, "Failed to append terminal summary line");
        }

        // The marker is written even when the summary log is unwritable
        self.transition(state)?;
        logged
    }

    /// Overwrite the marker file and flush it to disk.
    fn transition(&mut self, state: TestState) -> Result<()> {
        let tmp = self.state_path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(state.marker().as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.state_path)?;
        self.state = Some(state);
        tracing::debug!(state = %state, "Test state updated");
        Ok(())
    }
}

//! Test case composition.
//!
//! A run moves `Init -> Running -> (Completed | Aborted | Failed)`. Init
//! parses and validates parameters before anything external is touched;
//! `cleanup` runs after `run` on every path; the terminal state collapses to
//! the boolean the CI system sees.

use crate::error::{ConfigError, HarnessError, Result};
use crate::params::TestParameters;
use crate::reporter::{StateReporter, TestState};
use async_trait::async_trait;
use tracing::Instrument;
use uuid::Uuid;

/// One verification scenario.
#[async_trait]
pub trait TestCase: Send {
    /// Short scenario name for logs.
    fn name(&self) -> &str;

    /// Test case identifier this run covers (`TC_COVERED`), if any.
    fn covers(&self) -> Option<&str> {
        None
    }

    /// Execute the scenario steps.
    ///
    /// Return `Err` with [`HarnessError::Assertion`] for a failed check and
    /// any other variant for conditions that prevent the check.
    async fn run(&mut self, reporter: &StateReporter) -> Result<()>;

    /// Release anything `run` acquired. Called exactly once per run,
    /// whatever `run` returned.
    async fn cleanup(&mut self, _reporter: &StateReporter) -> Result<()> {
        Ok(())
    }
}

/// Append a summary line, logging rather than failing if the log is unwritable.
pub fn note(reporter: &StateReporter, line: impl AsRef<str>) {
    if let Err(e) = reporter.summary(line.as_ref()) {
        tracing::warn!(error = %e, "Failed to append to summary log");
    }
}

/// Run a constructed test case to a terminal state.
///
/// Returns `true` only if the case completed.
pub async fn execute<C>(case: &mut C, reporter: &mut StateReporter) -> bool
where
    C: TestCase + ?Sized,
{
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("test_case", case = %case.name(), %run_id);

    async move {
        if let Err(e) = reporter.report_running() {
            tracing::error!(error = %e, "Failed to write state marker");
            abort(reporter, &format!("cannot write state marker: {e}"));
            return false;
        }

        if let Some(id) = case.covers() {
            note(reporter, format!("Covers {id}"));
        }
        note(reporter, format!("Running {} (run {run_id})", case.name()));

        let start = std::time::Instant::now();
        let result = case.run(reporter).await;

        if let Err(e) = case.cleanup(reporter).await {
            tracing::warn!(error = %e, "Cleanup failed");
            note(reporter, format!("Cleanup failed: {e}"));
        }

        finish(reporter, result);
        if !reporter.is_terminal() {
            abort(reporter, "run ended without a verdict");
        }

        let passed = reporter.state() == Some(TestState::Completed);
        tracing::info!(
            passed,
            state = ?reporter.state(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Test case finished"
        );
        passed
    }
    .instrument(span)
    .await
}

/// Parse `raw` parameters, build the case with `build`, and execute it.
///
/// Any configuration problem aborts the run before `build` can hand out a
/// case, so no external command is issued for a bad blob.
pub async fn run_with_params<C, F>(
    raw: &str,
    required: &[&str],
    reporter: &mut StateReporter,
    build: F,
) -> bool
where
    C: TestCase,
    F: FnOnce(&TestParameters) -> std::result::Result<C, ConfigError>,
{
    let case = TestParameters::parse(raw, required).and_then(|params| build(&params));
    match case {
        Ok(mut case) => execute(&mut case, reporter).await,
        Err(e) => {
            tracing::error!(error = %e, "Invalid test parameters");
            abort(reporter, &HarnessError::from(e).to_string());
            false
        }
    }
}

fn finish(reporter: &mut StateReporter, result: Result<()>) {
    let written = match result {
        Ok(()) => reporter.report_completed(),
        Err(e) => match e.verdict() {
            TestState::Failed => reporter.report_failed(e.to_string()),
            _ => reporter.report_aborted(e.to_string()),
        },
    };
    if let Err(e) = written {
        tracing::error!(error = %e, "Failed to record terminal state");
    }
}

fn abort(reporter: &mut StateReporter, reason: &str) {
    if let Err(e) = reporter.report_aborted(reason) {
        tracing::error!(error = %e, "Failed to record aborted state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FakeCase {
        outcome: Option<HarnessError>,
        cleanups: Arc<AtomicU32>,
    }

    impl FakeCase {
        fn new(outcome: Option<HarnessError>) -> Self {
            Self {
                outcome,
                cleanups: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl TestCase for FakeCase {
        fn name(&self) -> &str {
            "fake"
        }

        fn covers(&self) -> Option<&str> {
            Some("FAKE-01")
        }

        async fn run(&mut self, reporter: &StateReporter) -> Result<()> {
            assert_eq!(reporter.state(), Some(TestState::Running));
            match self.outcome.take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        async fn cleanup(&mut self, _reporter: &StateReporter) -> Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn reporter(dir: &tempfile::TempDir) -> StateReporter {
        StateReporter::create(dir.path().join("state.txt"), dir.path().join("summary.log")).unwrap()
    }

    fn marker(dir: &tempfile::TempDir) -> Option<TestState> {
        TestState::from_marker(&fs::read_to_string(dir.path().join("state.txt")).unwrap())
    }

    #[tokio::test]
    async fn test_execute_completed() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = reporter(&dir);
        let mut case = FakeCase::new(None);

        assert!(execute(&mut case, &mut reporter).await);
        assert_eq!(marker(&dir), Some(TestState::Completed));
        assert_eq!(case.cleanups.load(Ordering::SeqCst), 1);

        let summary = fs::read_to_string(dir.path().join("summary.log")).unwrap();
        assert!(summary.contains("Covers FAKE-01"));
    }

    #[tokio::test]
    async fn test_execute_assertion_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = reporter(&dir);
        let mut case = FakeCase::new(Some(HarnessError::Assertion("demand is 0".into())));

        assert!(!execute(&mut case, &mut reporter).await);
        assert_eq!(marker(&dir), Some(TestState::Failed));
        assert_eq!(case.cleanups.load(Ordering::SeqCst), 1);

        let summary = fs::read_to_string(dir.path().join("summary.log")).unwrap();
        assert!(summary.contains("demand is 0"));
    }

    #[tokio::test]
    async fn test_execute_dependency_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = reporter(&dir);
        let mut case =
            FakeCase::new(Some(HarnessError::DependencyUnavailable("vm2 missing".into())));

        assert!(!execute(&mut case, &mut reporter).await);
        assert_eq!(marker(&dir), Some(TestState::Aborted));
        assert_eq!(case.cleanups.load(Ordering::SeqCst), 1);
    }

    /// Replaces the summary log with a directory so every later append fails.
    struct LogVanishes;

    #[async_trait]
    impl TestCase for LogVanishes {
        fn name(&self) -> &str {
            "log-vanishes"
        }

        async fn run(&mut self, reporter: &StateReporter) -> Result<()> {
            fs::remove_file(reporter.summary_path())?;
            fs::create_dir(reporter.summary_path())?;
            Err(HarnessError::Assertion("demand is 0".into()))
        }
    }

    #[tokio::test]
    async fn test_unwritable_summary_still_reaches_terminal_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = reporter(&dir);

        assert!(!execute(&mut LogVanishes, &mut reporter).await);
        assert_eq!(marker(&dir), Some(TestState::Failed));
        assert_eq!(reporter.state(), Some(TestState::Failed));
    }

    #[tokio::test]
    async fn test_config_error_never_builds_case() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = reporter(&dir);
        let built = AtomicU32::new(0);

        let passed = run_with_params("vmName=a", &["vmName", "hvServer"], &mut reporter, |_| {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(FakeCase::new(None))
        })
        .await;

        assert!(!passed);
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert_eq!(marker(&dir), Some(TestState::Aborted));
        let summary = fs::read_to_string(dir.path().join("summary.log")).unwrap();
        assert!(summary.contains("hvServer"));
    }

    #[tokio::test]
    async fn test_build_error_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = reporter(&dir);

        let passed = run_with_params("tries=x", &[], &mut reporter, |params| {
            params.get_or::<u32>("tries", 3)?;
            Ok(FakeCase::new(None))
        })
        .await;

        assert!(!passed);
        assert_eq!(marker(&dir), Some(TestState::Aborted));
    }

    #[tokio::test]
    async fn test_run_with_params_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = reporter(&dir);

        let passed = run_with_params("vmName=a;hvServer=b", &["vmName", "hvServer"], &mut reporter, |_| {
            Ok(FakeCase::new(None))
        })
        .await;

        assert!(passed);
        assert_eq!(marker(&dir), Some(TestState::Completed));
    }
}

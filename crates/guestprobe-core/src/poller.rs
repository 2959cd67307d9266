//! Bounded polling of external numeric properties.
//!
//! The platforms under test expose no events, so every wait is a sample/sleep
//! loop with a hard time budget. Only one poll runs at a time.

use crate::error::{HarnessError, Result};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Spacing and budget for a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay between samples.
    pub interval: Duration,
    /// Total time budget.
    pub timeout: Duration,
}

impl PollSettings {
    /// Create settings from whole seconds.
    pub fn from_secs(interval: u64, timeout: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval),
            timeout: Duration::from_secs(timeout),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_secs(1, 30)
    }
}

/// Outcome of a single poll invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollResult<T = i64> {
    /// Last sampled value.
    pub value: T,
    /// Time from the first sample to the last.
    pub elapsed: Duration,
    /// True if the predicate never held within the budget.
    pub timed_out: bool,
    /// Number of samples taken.
    pub samples: u32,
}

impl<T> PollResult<T> {
    /// Convert a timed-out poll into [`HarnessError::Timeout`].
    pub fn require(self, what: impl Into<String>) -> Result<T> {
        if self.timed_out {
            return Err(HarnessError::Timeout {
                what: what.into(),
                elapsed: self.elapsed,
            });
        }
        Ok(self.value)
    }
}

/// Sample until `predicate` holds or `settings.timeout` elapses.
///
/// At least one sample is always taken, even with a zero budget. The final
/// sleep is shortened so the last sample lands on the deadline. Errors from
/// `sample` are returned immediately.
pub async fn poll<T, S, Fut, P>(
    mut sample: S,
    mut predicate: P,
    settings: PollSettings,
) -> Result<PollResult<T>>
where
    T: fmt::Debug,
    S: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: FnMut(&T) -> bool,
{
    let start = Instant::now();
    let mut samples = 0u32;

    loop {
        let value = sample().await?;
        samples += 1;
        let elapsed = start.elapsed();

        if predicate(&value) {
            tracing::debug!(
                value = ?value,
                samples,
                elapsed_ms = elapsed.as_millis() as u64,
                "Poll condition met"
            );
            return Ok(PollResult {
                value,
                elapsed,
                timed_out: false,
                samples,
            });
        }

        if elapsed >= settings.timeout {
            tracing::debug!(
                value = ?value,
                samples,
                elapsed_ms = elapsed.as_millis() as u64,
                "Poll timed out"
            );
            return Ok(PollResult {
                value,
                elapsed,
                timed_out: true,
                samples,
            });
        }

        tracing::trace!(value = ?value, samples, "Poll condition not met, sleeping");
        let remaining = settings.timeout - elapsed;
        tokio::time::sleep(settings.interval.min(remaining)).await;
    }
}

/// Run `op` up to `tries` times with a fixed `delay` between attempts.
///
/// `op` receives the 1-based attempt number. The last error is returned if
/// every attempt fails. `tries` below 1 is treated as 1. A hard failure
/// (see [`HarnessError::is_hard_failure`]) is returned without retrying.
pub async fn retry<T, F, Fut>(tries: u32, delay: Duration, what: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let tries = tries.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                tracing::debug!(what = %what, attempt, "Attempt succeeded");
                return Ok(value);
            }
            Err(e) if e.is_hard_failure() => {
                tracing::warn!(what = %what, attempt, error = %e, "Hard failure, not retrying");
                return Err(e);
            }
            Err(e) if attempt < tries => {
                tracing::warn!(what = %what, attempt, tries, error = %e, "Attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(what = %what, attempt, error = %e, "Giving up");
                return Err(e);
            }
        }
    }
}

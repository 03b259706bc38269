//! Test execution runner
//!
//! Runs one test case to completion, failure or timeout, retrying failed
//! attempts with linear backoff.
//!
//! Each attempt runs on its own task with a child cancellation token. When
//! the timer or the parent token wins the race the token is cancelled and
//! the task aborted. An in-process operation that never reaches an await
//! point cannot be interrupted this way; only command tests, which run in a
//! child process, are hard-killed.

use std::any::Any;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ExecutionConfig;
use crate::models::{FailureKind, TestCase, TestContext, TestOutcome, TestResult};

/// Retry and backoff policy
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Retry n waits n x this
    pub backoff_unit: Duration,
    /// Retry attempts that timed out
    pub retry_timeouts: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_unit: Duration::from_millis(100),
            retry_timeouts: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn from_config(max_retries: u32, config: &ExecutionConfig) -> Self {
        Self {
            max_retries,
            backoff_unit: config.backoff_unit(),
            retry_timeouts: config.retry_timeouts,
        }
    }

    pub fn with_backoff(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn retry_timeouts(mut self, retry: bool) -> Self {
        self.retry_timeouts = retry;
        self
    }

    /// Delay before attempt `attempt + 1`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }

    /// Whether a failure of `kind` on `attempt` (1-based) earns another attempt
    pub fn should_retry(&self, kind: FailureKind, attempt: u32) -> bool {
        if attempt > self.max_retries {
            return false;
        }
        match kind {
            FailureKind::Failure | FailureKind::Panic => true,
            FailureKind::Timeout => self.retry_timeouts,
            FailureKind::Cancelled => false,
        }
    }
}

/// Timeout-guarded, retrying runner for single tests
#[derive(Clone, Debug)]
pub struct TestRunner {
    timeout: Duration,
    policy: RetryPolicy,
}

impl TestRunner {
    pub fn new(timeout: Duration, policy: RetryPolicy) -> Self {
        Self { timeout, policy }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run a test, retrying per policy; only the final attempt is returned
    pub async fn run(&self, test: &TestCase, cancel: &CancellationToken) -> TestResult {
        let timeout = test.timeout().unwrap_or(self.timeout);
        let mut previous_errors = Vec::new();
        let mut attempt = 1;

        loop {
            let result = run_attempt(test, attempt, timeout, cancel).await;

            let kind = match result.failure_kind {
                Some(kind) => kind,
                None => return result.with_attempts(attempt, previous_errors),
            };

            if cancel.is_cancelled() || !self.policy.should_retry(kind, attempt) {
                if attempt > 1 {
                    info!(
                        "{} failed after {} attempts: {}",
                        test.name(),
                        attempt,
                        result.error.as_deref().unwrap_or("")
                    );
                }
                return result.with_attempts(attempt, previous_errors);
            }

            let delay = self.policy.delay_for(attempt);
            debug!(
                "{} attempt {} failed ({}), retrying in {:?}",
                test.name(),
                attempt,
                kind,
                delay
            );
            previous_errors.push(result.error.unwrap_or_default());

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return TestResult::fail(test.name(), 0, FailureKind::Cancelled, "cancelled during backoff")
                        .with_attempts(attempt, previous_errors);
                }
            }
            attempt += 1;
        }
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum AttemptEnd {
    Joined(Result<anyhow::Result<TestOutcome>, tokio::task::JoinError>),
    TimedOut,
    Cancelled,
}

/// Run exactly one attempt
pub async fn run_attempt(
    test: &TestCase,
    attempt: u32,
    timeout: Duration,
    parent: &CancellationToken,
) -> TestResult {
    let token = parent.child_token();
    let ctx = TestContext::new(test.name(), attempt, token.clone());
    let start = Instant::now();

    let case = test.clone();
    let mut task = AbortOnDrop(tokio::spawn(async move { case.invoke(ctx).await }));

    let end = tokio::select! {
        biased;
        joined = &mut task.0 => AttemptEnd::Joined(joined),
        _ = parent.cancelled() => AttemptEnd::Cancelled,
        _ = tokio::time::sleep(timeout) => AttemptEnd::TimedOut,
    };
    token.cancel();
    drop(task);

    let duration_ms = start.elapsed().as_millis() as u64;
    match end {
        AttemptEnd::Joined(Ok(Ok(outcome))) => TestResult::pass(test.name(), duration_ms, outcome),
        // an operation that errors out because its execution was cancelled
        AttemptEnd::Joined(Ok(Err(e))) if parent.is_cancelled() => TestResult::fail(
            test.name(),
            duration_ms,
            FailureKind::Cancelled,
            format!("cancelled: {e:#}"),
        ),
        AttemptEnd::Joined(Ok(Err(e))) => {
            TestResult::fail(test.name(), duration_ms, FailureKind::Failure, format!("{e:#}"))
        }
        AttemptEnd::Joined(Err(e)) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            warn!("{} panicked: {}", test.name(), message);
            TestResult::fail(
                test.name(),
                duration_ms,
                FailureKind::Panic,
                format!("panicked: {message}"),
            )
        }
        AttemptEnd::Joined(Err(_)) => TestResult::fail(
            test.name(),
            duration_ms,
            FailureKind::Cancelled,
            "test task was aborted",
        ),
        AttemptEnd::TimedOut => {
            warn!("{} timed out after {:?}", test.name(), timeout);
            TestResult::fail(
                test.name(),
                duration_ms,
                FailureKind::Timeout,
                format!("timed out after {timeout:?}"),
            )
        }
        AttemptEnd::Cancelled => TestResult::fail(
            test.name(),
            duration_ms,
            FailureKind::Cancelled,
            "execution cancelled",
        ),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

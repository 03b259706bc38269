//! Parallel test execution
//!
//! Bounded fan-out of a suite's tests. At most `max_concurrent` tests hold a
//! permit at once; tests still waiting for a permit when the execution is
//! cancelled are recorded as skipped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::runner::TestRunner;
use crate::models::{FailureKind, TestCase, TestResult};

/// Parallel test executor
#[derive(Clone, Debug)]
pub struct ParallelExecutor {
    max_concurrent: usize,
}

impl ParallelExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run tests concurrently; results come back in declaration order
    pub async fn run_tests_parallel(
        &self,
        tests: &[TestCase],
        runner: &TestRunner,
        cancel: &CancellationToken,
    ) -> Vec<TestResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut set = JoinSet::new();
        let mut names = HashMap::new();

        for (index, test) in tests.iter().enumerate() {
            let semaphore = semaphore.clone();
            let runner = runner.clone();
            let cancel = cancel.clone();
            let test = test.clone();
            let test_name = test.name().to_string();

            let handle = set.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = cancel.cancelled() => None,
                };
                let result = match permit {
                    Some(_permit) if !cancel.is_cancelled() => {
                        debug!("Starting parallel execution of {}", test);
                        runner.run(&test, &cancel).await
                    }
                    _ => TestResult::skip(test.name(), "execution cancelled"),
                };
                (index, result)
            });
            names.insert(handle.id(), (index, test_name));
        }

        let mut results: Vec<(usize, TestResult)> = Vec::with_capacity(tests.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(indexed) => results.push(indexed),
                Err(e) => {
                    // the runner isolates test panics, so this is the wrapper itself
                    let Some((index, name)) = names.get(&e.id()).cloned() else {
                        warn!("Lost track of a parallel test task: {}", e);
                        continue;
                    };
                    warn!("Parallel task for {} ended abnormally: {}", name, e);
                    results.push((
                        index,
                        TestResult::fail(name, 0, FailureKind::Panic, e.to_string()),
                    ));
                }
            }
        }

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, r)| r).collect()
    }
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::runner::RetryPolicy;
    use crate::models::{TestOutcome, TestStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn runner() -> TestRunner {
        TestRunner::new(Duration::from_secs(5), RetryPolicy::new(0))
    }

    /// Test that records the highest number of concurrently running tests
    fn tracked(name: String, running: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> TestCase {
        TestCase::new(name, move |_| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                anyhow::Ok(TestOutcome::default())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tests: Vec<_> = (0..10)
            .map(|i| tracked(format!("t{i}"), running.clone(), peak.clone()))
            .collect();

        let results = ParallelExecutor::new(3)
            .run_tests_parallel(&tests, &runner(), &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.status == TestStatus::Passed));
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_results_keep_declaration_order() {
        let tests = vec![
            TestCase::passing("a", 1.0),
            TestCase::failing("b", "nope"),
            TestCase::passing("c", 1.0),
        ];

        let results = ParallelExecutor::new(8)
            .run_tests_parallel(&tests, &runner(), &CancellationToken::new())
            .await;

        let names: Vec<_> = results.iter().map(|r| r.test_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(results[1].status, TestStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_all() {
        let token = CancellationToken::new();
        token.cancel();
        let tests = vec![TestCase::passing("a", 1.0), TestCase::passing("b", 1.0)];

        let results = ParallelExecutor::new(1)
            .run_tests_parallel(&tests, &runner(), &token)
            .await;

        assert!(results.iter().all(|r| r.status == TestStatus::Skipped));
    }
}

//! Test orchestration engine
//!
//! Holds the registered suites and runs them either sequentially in
//! declaration order or through the bounded parallel executor. Every suite
//! run is tracked in the active-execution registry so it can be cancelled
//! from outside.

use std::collections::BTreeMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::parallel::ParallelExecutor;
use super::registry::ExecutionRegistry;
use super::runner::{RetryPolicy, TestRunner};
use crate::config::{EngineConfig, ExecutionConfig};
use crate::error::ExecutionError;
use crate::models::{
    ExecutionKind, ExecutionStatus, SuiteType, TestExecution, TestResult, TestStatus, TestSuite,
    TestSuiteResult,
};
use crate::utils::timer::Timer;

/// Registers suites and executes them
pub struct TestOrchestrator {
    suites: RwLock<BTreeMap<String, TestSuite>>,
    config: ExecutionConfig,
    allow_parallel: bool,
    registry: ExecutionRegistry,
}

impl TestOrchestrator {
    /// Create an orchestrator; must be called inside a tokio runtime
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            suites: RwLock::new(BTreeMap::new()),
            config,
            allow_parallel: true,
            registry: ExecutionRegistry::spawn(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.execution.clone()).allow_parallel(config.pipeline.parallel_execution)
    }

    /// Global switch; a suite runs in parallel only if both allow it
    pub fn allow_parallel(mut self, allow: bool) -> Self {
        self.allow_parallel = allow;
        self
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    /// Register a suite, replacing any suite with the same name
    pub async fn add_test_suite(&self, suite: TestSuite) -> Option<TestSuite> {
        info!(
            "Registering suite {} ({}, {} tests)",
            suite.name,
            suite.suite_type,
            suite.len()
        );
        self.suites.write().await.insert(suite.name.clone(), suite)
    }

    pub async fn remove_test_suite(&self, name: &str) -> Option<TestSuite> {
        let removed = self.suites.write().await.remove(name);
        if removed.is_some() {
            info!("Removed suite {}", name);
        }
        removed
    }

    pub async fn suite(&self, name: &str) -> Option<TestSuite> {
        self.suites.read().await.get(name).cloned()
    }

    pub async fn suite_names(&self) -> Vec<String> {
        self.suites.read().await.keys().cloned().collect()
    }

    /// Registered suites of one type, ordered by name
    pub async fn suites_of_type(&self, suite_type: SuiteType) -> Vec<TestSuite> {
        self.suites
            .read()
            .await
            .values()
            .filter(|s| s.suite_type == suite_type)
            .cloned()
            .collect()
    }

    /// Execute a registered suite by name
    pub async fn execute_registered(&self, name: &str) -> Result<TestSuiteResult, ExecutionError> {
        let suite = self
            .suite(name)
            .await
            .ok_or_else(|| ExecutionError::NotFound(name.to_string()))?;
        Ok(self.execute_test_suite(&suite).await)
    }

    pub async fn execute_test_suite(&self, suite: &TestSuite) -> TestSuiteResult {
        self.execute_test_suite_with(suite, &CancellationToken::new())
            .await
    }

    /// Execute a suite whose cancellation also follows `parent`
    pub async fn execute_test_suite_with(
        &self,
        suite: &TestSuite,
        parent: &CancellationToken,
    ) -> TestSuiteResult {
        let execution = TestExecution::new(ExecutionKind::Suite, &suite.name);
        let execution_id = execution.id.clone();
        let token = parent.child_token();

        if let Err(e) = self.registry.register(execution, token.clone()).await {
            warn!("Suite {} runs untracked: {}", suite.name, e);
        }

        let parallel = suite.configuration.parallel_execution && self.allow_parallel;
        info!(
            "Executing suite {} ({} tests, {})",
            suite.name,
            suite.len(),
            if parallel { "parallel" } else { "sequential" }
        );

        let started_at = Utc::now();
        let timer = Timer::start(format!("suite {}", suite.name));
        let runner = self.runner_for(suite);

        let results = if parallel {
            let limit = suite
                .configuration
                .max_concurrency
                .unwrap_or(self.config.max_concurrency);
            ParallelExecutor::new(limit)
                .run_tests_parallel(&suite.tests, &runner, &token)
                .await
        } else {
            self.run_sequential(suite, &runner, &token).await
        };

        let cancelled = token.is_cancelled();
        let mut summary = TestSuiteResult::new(
            &execution_id,
            &suite.name,
            suite.suite_type,
            results,
            timer.stop().as_millis() as u64,
            started_at,
        );
        if cancelled {
            summary = summary.mark_cancelled();
        }

        let status = if cancelled {
            ExecutionStatus::Cancelled
        } else if summary.success {
            ExecutionStatus::Passed
        } else {
            ExecutionStatus::Failed
        };
        if let Err(e) = self.registry.complete(&execution_id, status).await {
            debug!("Could not complete execution {}: {}", execution_id, e);
        }

        info!(
            "Suite {} {}: {}/{} passed, {} failed, {} skipped in {}ms",
            summary.suite_name,
            status,
            summary.passed,
            summary.total,
            summary.failed,
            summary.skipped,
            summary.duration_ms
        );

        summary
    }

    /// Cancel an active suite or pipeline execution
    pub async fn cancel_execution(&self, id: &str) -> Result<(), ExecutionError> {
        self.registry.cancel(id).await
    }

    pub async fn active_executions(&self) -> Vec<TestExecution> {
        self.registry.active().await.unwrap_or_default()
    }

    fn runner_for(&self, suite: &TestSuite) -> TestRunner {
        TestRunner::new(
            suite.configuration.timeout,
            RetryPolicy::from_config(suite.configuration.max_retries, &self.config),
        )
    }

    async fn run_sequential(
        &self,
        suite: &TestSuite,
        runner: &TestRunner,
        cancel: &CancellationToken,
    ) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(suite.len());
        let mut tests = suite.tests.iter();

        while let Some(test) = tests.next() {
            if cancel.is_cancelled() {
                results.push(TestResult::skip(test.name(), "execution cancelled"));
                results.extend(
                    tests
                        .by_ref()
                        .map(|t| TestResult::skip(t.name(), "execution cancelled")),
                );
                break;
            }

            debug!("Running {}", test);
            let result = runner.run(test, cancel).await;
            debug!("  {}", result);

            let critical_stop = result.status == TestStatus::Failed
                && test.is_critical()
                && suite.configuration.stop_on_critical_failure
                && !cancel.is_cancelled();
            results.push(result);

            if critical_stop {
                let reason = format!("skipped after critical test '{}' failed", test.name());
                warn!("Suite {}: {}", suite.name, reason);
                results.extend(tests.by_ref().map(|t| TestResult::skip(t.name(), reason.clone())));
                break;
            }
        }

        results
    }
}

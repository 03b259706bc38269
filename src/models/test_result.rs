//! Test result models
//!
//! Defines statuses, per-test results and suite aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::suite::SuiteType;

/// Test execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::Skipped => "○",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "PASS"),
            TestStatus::Failed => write!(f, "FAIL"),
            TestStatus::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Why a test failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The operation returned an error
    Failure,
    /// The per-test timer fired first
    Timeout,
    /// The owning execution was cancelled mid-attempt
    Cancelled,
    /// The operation panicked
    Panic,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Failure => write!(f, "failure"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Panic => write!(f, "panic"),
        }
    }
}

/// Performance figures reported by a test
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Mean response time in milliseconds
    pub response_time_ms: f64,
    /// Memory usage as a fraction of the budget (0.0 - 1.0)
    pub memory_usage: f64,
    /// CPU usage as a fraction (0.0 - 1.0)
    pub cpu_usage: f64,
    /// Operations per second
    pub throughput: f64,
    /// Bytes moved over the network per operation
    #[serde(default)]
    pub network_bytes_per_op: f64,
}

/// What a successful operation reports back
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub coverage: f64,
    pub metrics: Option<PerformanceMetrics>,
}

impl TestOutcome {
    pub fn with_coverage(mut self, coverage: f64) -> Self {
        self.coverage = coverage.clamp(0.0, 1.0);
        self
    }

    pub fn with_metrics(mut self, metrics: PerformanceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Result of a single test execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub coverage: f64,
    pub performance: Option<PerformanceMetrics>,
    pub timestamp: DateTime<Utc>,
    /// Attempts made, including the final one
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Errors from discarded attempts, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_errors: Vec<String>,
}

fn default_attempts() -> u32 {
    1
}

impl TestResult {
    pub fn pass(test_name: impl Into<String>, duration_ms: u64, outcome: TestOutcome) -> Self {
        Self {
            test_name: test_name.into(),
            status: TestStatus::Passed,
            duration_ms,
            error: None,
            failure_kind: None,
            coverage: outcome.coverage,
            performance: outcome.metrics,
            timestamp: Utc::now(),
            attempts: 1,
            previous_errors: Vec::new(),
        }
    }

    pub fn fail(
        test_name: impl Into<String>,
        duration_ms: u64,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            status: TestStatus::Failed,
            duration_ms,
            error: Some(message.into()),
            failure_kind: Some(kind),
            coverage: 0.0,
            performance: None,
            timestamp: Utc::now(),
            attempts: 1,
            previous_errors: Vec::new(),
        }
    }

    pub fn skip(test_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            status: TestStatus::Skipped,
            duration_ms: 0,
            error: Some(reason.into()),
            failure_kind: None,
            coverage: 0.0,
            performance: None,
            timestamp: Utc::now(),
            attempts: 0,
            previous_errors: Vec::new(),
        }
    }

    pub fn with_attempts(mut self, attempts: u32, previous_errors: Vec<String>) -> Self {
        self.attempts = attempts;
        self.previous_errors = previous_errors;
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.failure_kind == Some(FailureKind::Timeout)
    }

    pub fn executed(&self) -> bool {
        self.status != TestStatus::Skipped
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.test_name,
            self.duration_ms
        )?;
        if self.attempts > 1 {
            write!(f, " ({} attempts)", self.attempts)?;
        }
        if let Some(msg) = &self.error {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Aggregate of one suite execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub execution_id: String,
    pub suite_name: String,
    pub suite_type: SuiteType,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    /// Mean coverage over executed tests
    pub coverage: f64,
    /// True when no result failed
    pub success: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn new(
        execution_id: impl Into<String>,
        suite_name: impl Into<String>,
        suite_type: SuiteType,
        results: Vec<TestResult>,
        duration_ms: u64,
        started_at: DateTime<Utc>,
    ) -> Self {
        let total = results.len();
        let passed = results
            .iter()
            .filter(|r| r.status == TestStatus::Passed)
            .count();
        let failed = results
            .iter()
            .filter(|r| r.status == TestStatus::Failed)
            .count();
        let skipped = results
            .iter()
            .filter(|r| r.status == TestStatus::Skipped)
            .count();

        let executed: Vec<f64> = results
            .iter()
            .filter(|r| r.executed())
            .map(|r| r.coverage)
            .collect();
        let coverage = if executed.is_empty() {
            0.0
        } else {
            executed.iter().sum::<f64>() / executed.len() as f64
        };

        Self {
            execution_id: execution_id.into(),
            suite_name: suite_name.into(),
            suite_type,
            total,
            passed,
            failed,
            skipped,
            duration_ms,
            coverage,
            success: failed == 0,
            cancelled: false,
            started_at,
            completed_at: Utc::now(),
            results,
        }
    }

    pub fn mark_cancelled(mut self) -> Self {
        self.cancelled = true;
        self
    }

    /// Fraction of executed tests that passed (0.0 - 1.0)
    pub fn pass_rate(&self) -> f64 {
        let executed = self.passed + self.failed;
        if executed == 0 {
            1.0
        } else {
            self.passed as f64 / executed as f64
        }
    }

    pub fn failed_tests(&self) -> impl Iterator<Item = &TestResult> {
        self.results
            .iter()
            .filter(|r| r.status == TestStatus::Failed)
    }

    pub fn result(&self, test_name: &str) -> Option<&TestResult> {
        self.results.iter().find(|r| r.test_name == test_name)
    }
}

impl fmt::Display for TestSuiteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Suite {} ({})", self.suite_name, self.suite_type)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {}",
            self.total, self.passed, self.failed, self.skipped
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Coverage: {:.1}% | Duration: {}ms",
            self.pass_rate() * 100.0,
            self.coverage * 100.0,
            self.duration_ms
        )
    }
}

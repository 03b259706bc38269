//! Capability interfaces for stage sub-engines
//!
//! Environment checks, load drivers, vulnerability scanners and quality
//! analyzers are traits so real backends can be plugged in. The default
//! implementations here are deterministic: they run registered suites,
//! check commands and paths, or read findings from a file.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use super::stages::StageContext;
use crate::executor::run_attempt;
use crate::models::{
    CommandSpec, PerformanceMetrics, Priority, SuiteType, TestCase, TestStatus, TestSuiteResult,
};

/// Tag marking a security test as an access-control check
pub const ACCESS_CONTROL_TAG: &str = "access-control";

// ============================================================================
// Environment checks
// ============================================================================

/// Precondition verified before tests run
#[async_trait]
pub trait EnvironmentCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, ctx: &StageContext) -> Result<()>;
}

/// Runs a command; exit status 0 passes
pub struct CommandCheck {
    name: String,
    spec: CommandSpec,
    timeout: Duration,
}

impl CommandCheck {
    pub fn new(name: impl Into<String>, spec: CommandSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl EnvironmentCheck for CommandCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &StageContext) -> Result<()> {
        let test = TestCase::command(&self.name, self.spec.clone());
        let result = run_attempt(&test, 1, self.timeout, &ctx.cancel).await;
        match result.status {
            TestStatus::Passed => Ok(()),
            _ => bail!(
                "{}",
                result.error.unwrap_or_else(|| "command failed".to_string())
            ),
        }
    }
}

/// Requires a file or directory to exist
pub struct PathCheck {
    path: PathBuf,
}

impl PathCheck {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EnvironmentCheck for PathCheck {
    fn name(&self) -> &str {
        "path"
    }

    async fn check(&self, _ctx: &StageContext) -> Result<()> {
        tokio::fs::metadata(&self.path)
            .await
            .with_context(|| format!("{} is not accessible", self.path.display()))?;
        Ok(())
    }
}

/// Requires at least one registered suite
pub struct SuitesRegistered;

#[async_trait]
impl EnvironmentCheck for SuitesRegistered {
    fn name(&self) -> &str {
        "suites-registered"
    }

    async fn check(&self, ctx: &StageContext) -> Result<()> {
        if ctx.orchestrator.suite_names().await.is_empty() {
            bail!("no test suites are registered");
        }
        Ok(())
    }
}

// ============================================================================
// Load drivers
// ============================================================================

/// Aggregated load measurements
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub samples: usize,
    pub mean_response_time_ms: f64,
    pub peak_memory_usage: f64,
    pub mean_cpu_usage: f64,
    pub throughput: f64,
    pub mean_network_bytes_per_op: f64,
    /// Suites the driver executed, if any
    #[serde(skip)]
    pub suite_results: Vec<TestSuiteResult>,
}

impl LoadReport {
    pub fn from_metrics<'a>(metrics: impl IntoIterator<Item = &'a PerformanceMetrics>) -> Self {
        let metrics: Vec<&PerformanceMetrics> = metrics.into_iter().collect();
        if metrics.is_empty() {
            return Self::default();
        }
        let n = metrics.len() as f64;
        Self {
            samples: metrics.len(),
            mean_response_time_ms: metrics.iter().map(|m| m.response_time_ms).sum::<f64>() / n,
            peak_memory_usage: metrics.iter().map(|m| m.memory_usage).fold(0.0, f64::max),
            mean_cpu_usage: metrics.iter().map(|m| m.cpu_usage).sum::<f64>() / n,
            throughput: metrics.iter().map(|m| m.throughput).sum::<f64>(),
            mean_network_bytes_per_op: metrics.iter().map(|m| m.network_bytes_per_op).sum::<f64>()
                / n,
            suite_results: Vec::new(),
        }
    }

    /// Fold another report in, weighting means by sample count
    pub fn merge(mut self, other: LoadReport) -> Self {
        let total = self.samples + other.samples;
        if total > 0 {
            let (a, b) = (self.samples as f64, other.samples as f64);
            let mean = |x: f64, y: f64| (x * a + y * b) / total as f64;
            self.mean_response_time_ms =
                mean(self.mean_response_time_ms, other.mean_response_time_ms);
            self.mean_cpu_usage = mean(self.mean_cpu_usage, other.mean_cpu_usage);
            self.mean_network_bytes_per_op =
                mean(self.mean_network_bytes_per_op, other.mean_network_bytes_per_op);
        }
        self.samples = total;
        self.peak_memory_usage = self.peak_memory_usage.max(other.peak_memory_usage);
        self.throughput += other.throughput;
        self.suite_results.extend(other.suite_results);
        self
    }
}

/// Produces load measurements for the performance stage
#[async_trait]
pub trait LoadDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn drive(&self, ctx: &StageContext) -> Result<LoadReport>;
}

/// Runs the registered performance suites and aggregates their metrics
pub struct SuiteLoadDriver;

#[async_trait]
impl LoadDriver for SuiteLoadDriver {
    fn name(&self) -> &str {
        "performance-suites"
    }

    async fn drive(&self, ctx: &StageContext) -> Result<LoadReport> {
        let suite_results = ctx.run_suites(&[SuiteType::Performance]).await;
        let mut report = LoadReport::from_metrics(
            suite_results
                .iter()
                .flat_map(|s| s.results.iter())
                .filter_map(|r| r.performance.as_ref()),
        );
        report.suite_results = suite_results;
        Ok(report)
    }
}

// ============================================================================
// Vulnerability scanners
// ============================================================================

/// Finding severity; the numeric weight is 1 to 4
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Severity {
    pub fn weight(&self) -> u32 {
        *self as u32
    }

    /// High and critical findings fail the security stage
    pub fn is_blocking(&self) -> bool {
        *self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingCategory {
    Injection,
    AccessControl,
    Cryptography,
    Configuration,
    Dependency,
    DataExposure,
    FailingTest,
    #[default]
    Other,
}

/// One security finding
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: FindingCategory,
    pub severity: Severity,
}

/// Severity-weighted security sub-report
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SecurityReport {
    pub findings: Vec<Finding>,
    pub suite_results: Vec<TestSuiteResult>,
}

impl SecurityReport {
    pub fn merge(mut self, other: SecurityReport) -> Self {
        self.findings.extend(other.findings);
        self.suite_results.extend(other.suite_results);
        self
    }

    /// Sum of severity weights over the maximum possible, in [0, 1]
    pub fn weighted_risk(&self) -> f64 {
        if self.findings.is_empty() {
            return 0.0;
        }
        let total: u32 = self.findings.iter().map(|f| f.severity.weight()).sum();
        total as f64 / (Severity::Critical.weight() as f64 * self.findings.len() as f64)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn count_category(&self, category: FindingCategory) -> usize {
        self.findings.iter().filter(|f| f.category == category).count()
    }

    pub fn blocking(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity.is_blocking())
    }
}

/// Produces findings for the security stage
#[async_trait]
pub trait VulnerabilityScanner: Send + Sync {
    fn name(&self) -> &str;

    async fn scan(&self, ctx: &StageContext) -> Result<SecurityReport>;
}

/// Runs the registered security suites; each failed test is a finding
pub struct SuiteScanner;

#[async_trait]
impl VulnerabilityScanner for SuiteScanner {
    fn name(&self) -> &str {
        "security-suites"
    }

    async fn scan(&self, ctx: &StageContext) -> Result<SecurityReport> {
        let suites = ctx.orchestrator.suites_of_type(SuiteType::Security).await;
        let mut report = SecurityReport::default();

        for suite in suites {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let cases: HashMap<&str, &TestCase> =
                suite.tests.iter().map(|t| (t.name(), t)).collect();
            let result = ctx
                .orchestrator
                .execute_test_suite_with(&suite, &ctx.cancel)
                .await;

            for failed in result.failed_tests() {
                let case = cases.get(failed.test_name.as_str());
                let severity = match case.map(|c| c.priority()) {
                    Some(Priority::Critical) => Severity::Critical,
                    _ => Severity::High,
                };
                let category = if case.map(|c| c.has_tag(ACCESS_CONTROL_TAG)).unwrap_or(false) {
                    FindingCategory::AccessControl
                } else {
                    FindingCategory::FailingTest
                };
                report.findings.push(Finding {
                    id: format!("{}::{}", suite.name, failed.test_name),
                    title: failed
                        .error
                        .clone()
                        .unwrap_or_else(|| "security test failed".to_string()),
                    category,
                    severity,
                });
            }
            report.suite_results.push(result);
        }

        Ok(report)
    }
}

/// Reads findings from a JSON file produced by an external scanner
pub struct FileScanner {
    path: PathBuf,
}

impl FileScanner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl VulnerabilityScanner for FileScanner {
    fn name(&self) -> &str {
        "findings-file"
    }

    async fn scan(&self, _ctx: &StageContext) -> Result<SecurityReport> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read findings: {}", self.path.display()))?;
        let findings: Vec<Finding> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse findings: {}", self.path.display()))?;
        debug!("Loaded {} findings from {}", findings.len(), self.path.display());
        Ok(SecurityReport {
            findings,
            suite_results: Vec::new(),
        })
    }
}

// ============================================================================
// Quality analyzers
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QualityReport {
    /// Overall score in [0, 1]
    pub score: f64,
    pub metrics: BTreeMap<String, f64>,
}

/// Scores the code under test for the quality stage
#[async_trait]
pub trait QualityAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, ctx: &StageContext) -> Result<QualityReport>;
}

/// Blends unit-test coverage with the pass rate of everything run so far
pub struct CoverageQualityAnalyzer {
    coverage_weight: f64,
}

impl CoverageQualityAnalyzer {
    pub fn new(coverage_weight: f64) -> Self {
        Self {
            coverage_weight: coverage_weight.clamp(0.0, 1.0),
        }
    }
}

impl Default for CoverageQualityAnalyzer {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[async_trait]
impl QualityAnalyzer for CoverageQualityAnalyzer {
    fn name(&self) -> &str {
        "coverage"
    }

    async fn analyze(&self, ctx: &StageContext) -> Result<QualityReport> {
        let suites = &ctx.suite_results;
        let mut metrics = BTreeMap::new();
        metrics.insert("suites".to_string(), suites.len() as f64);
        if suites.is_empty() {
            return Ok(QualityReport {
                score: 0.0,
                metrics,
            });
        }

        // unit coverage weighted by executed tests
        let (covered, executed) = suites
            .iter()
            .filter(|s| s.suite_type == SuiteType::Unit)
            .fold((0.0, 0usize), |(c, n), s| {
                let ran = s.passed + s.failed;
                (c + s.coverage * ran as f64, n + ran)
            });
        let coverage = if executed == 0 {
            0.0
        } else {
            covered / executed as f64
        };

        let passed: usize = suites.iter().map(|s| s.passed).sum();
        let failed: usize = suites.iter().map(|s| s.failed).sum();
        let pass_rate = if passed + failed == 0 {
            1.0
        } else {
            passed as f64 / (passed + failed) as f64
        };

        metrics.insert("coverage".to_string(), coverage);
        metrics.insert("pass_rate".to_string(), pass_rate);

        Ok(QualityReport {
            score: self.coverage_weight * coverage + (1.0 - self.coverage_weight) * pass_rate,
            metrics,
        })
    }
}

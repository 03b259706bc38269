//! Stage executors
//!
//! Each pipeline stage is a `StageExecutor`. Test-shaped stages run the
//! registered suites of their types through the orchestrator; diagnostic
//! stages delegate to the capability traits and compare the reports against
//! the pipeline thresholds.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::capabilities::{
    EnvironmentCheck, FindingCategory, LoadDriver, LoadReport, QualityAnalyzer, SecurityReport,
    Severity, VulnerabilityScanner,
};
use super::stage::{PipelineStage, StageOutcome, StageResult};
use crate::config::PipelineConfig;
use crate::executor::TestOrchestrator;
use crate::models::{SuiteType, TestSuiteResult};

/// Everything a stage can see while it runs
pub struct StageContext {
    pub execution_id: String,
    pub orchestrator: Arc<TestOrchestrator>,
    pub config: PipelineConfig,
    /// Cancelled when the pipeline times out or is cancelled
    pub cancel: CancellationToken,
    /// Results of the stages recorded so far
    pub stage_results: Vec<StageResult>,
    /// Suite results gathered so far
    pub suite_results: Vec<TestSuiteResult>,
}

impl StageContext {
    pub fn new(
        execution_id: impl Into<String>,
        orchestrator: Arc<TestOrchestrator>,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            orchestrator,
            config,
            cancel,
            stage_results: Vec::new(),
            suite_results: Vec::new(),
        }
    }

    /// Run every registered suite of the given types, one after another
    pub async fn run_suites(&self, types: &[SuiteType]) -> Vec<TestSuiteResult> {
        let mut results = Vec::new();
        for suite_type in types {
            for suite in self.orchestrator.suites_of_type(*suite_type).await {
                if self.cancel.is_cancelled() {
                    debug!("Not starting suite {}: pipeline cancelled", suite.name);
                    return results;
                }
                results.push(
                    self.orchestrator
                        .execute_test_suite_with(&suite, &self.cancel)
                        .await,
                );
            }
        }
        results
    }

    /// Whether a gating stage has already failed in this run
    pub fn gating_failed(&self) -> bool {
        self.stage_results
            .iter()
            .any(|r| r.stage.is_gating() && !r.success)
    }
}

/// One stage of the pipeline
///
/// An `Err` is an infrastructure failure; the runner records it as a failed
/// stage carrying the error text.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> PipelineStage;

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutcome>;
}

/// Run environment checks, collecting every failure
async fn run_checks(checks: &[Box<dyn EnvironmentCheck>], ctx: &StageContext) -> Vec<String> {
    let mut failures = Vec::new();
    for check in checks {
        match check.check(ctx).await {
            Ok(()) => debug!("Check {} passed", check.name()),
            Err(e) => {
                warn!("Check {} failed: {:#}", check.name(), e);
                failures.push(format!("{}: {:#}", check.name(), e));
            }
        }
    }
    failures
}

// ============================================================================
// Preparation
// ============================================================================

/// Verifies the environment before any test runs
#[derive(Default)]
pub struct PreparationStage {
    checks: Vec<Box<dyn EnvironmentCheck>>,
}

impl PreparationStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check(mut self, check: impl EnvironmentCheck + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }
}

#[async_trait]
impl StageExecutor for PreparationStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Preparation
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutcome> {
        let failures = run_checks(&self.checks, ctx).await;
        let outcome = if failures.is_empty() {
            StageOutcome::passed()
        } else {
            StageOutcome::failed(failures.join("; "))
        };
        Ok(outcome
            .with_detail("checks", self.checks.len())
            .with_detail("failed_checks", failures.len()))
    }
}

// ============================================================================
// Unit and integration testing
// ============================================================================

/// Runs registered suites and gates on pass rate (and coverage for unit)
pub struct SuiteStage {
    stage: PipelineStage,
    suite_types: Vec<SuiteType>,
    enforce_coverage: bool,
}

impl SuiteStage {
    pub fn new(stage: PipelineStage, suite_types: Vec<SuiteType>) -> Self {
        Self {
            stage,
            suite_types,
            enforce_coverage: false,
        }
    }

    pub fn unit() -> Self {
        Self::new(PipelineStage::UnitTesting, vec![SuiteType::Unit]).enforce_coverage(true)
    }

    pub fn integration() -> Self {
        Self::new(
            PipelineStage::IntegrationTesting,
            vec![SuiteType::Integration, SuiteType::Ui],
        )
    }

    pub fn enforce_coverage(mut self, enforce: bool) -> Self {
        self.enforce_coverage = enforce;
        self
    }
}

#[async_trait]
impl StageExecutor for SuiteStage {
    fn stage(&self) -> PipelineStage {
        self.stage
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutcome> {
        let results = ctx.run_suites(&self.suite_types).await;

        let passed: usize = results.iter().map(|s| s.passed).sum();
        let failed: usize = results.iter().map(|s| s.failed).sum();
        let skipped: usize = results.iter().map(|s| s.skipped).sum();
        let executed = passed + failed;
        let pass_rate = if executed == 0 {
            1.0
        } else {
            passed as f64 / executed as f64
        };
        let coverage = if executed == 0 {
            0.0
        } else {
            results
                .iter()
                .map(|s| s.coverage * (s.passed + s.failed) as f64)
                .sum::<f64>()
                / executed as f64
        };
        let failed_suites: Vec<&str> = results
            .iter()
            .filter(|s| !s.success)
            .map(|s| s.suite_name.as_str())
            .collect();

        info!(
            "{}: {} suites, {} passed, {} failed, {} skipped",
            self.stage.title(),
            results.len(),
            passed,
            failed,
            skipped
        );

        let error = if results.iter().any(|s| s.cancelled) {
            Some("test execution was cancelled".to_string())
        } else if pass_rate < ctx.config.min_pass_rate {
            Some(format!(
                "pass rate {:.1}% is below {:.1}% (failed suites: {})",
                pass_rate * 100.0,
                ctx.config.min_pass_rate * 100.0,
                failed_suites.join(", ")
            ))
        } else if self.enforce_coverage && executed > 0 && coverage < ctx.config.coverage_threshold
        {
            Some(format!(
                "coverage {:.1}% is below {:.1}%",
                coverage * 100.0,
                ctx.config.coverage_threshold * 100.0
            ))
        } else {
            None
        };

        let outcome = StageOutcome::from_error(error)
            .with_detail("suites", results.len())
            .with_detail("passed", passed)
            .with_detail("failed", failed)
            .with_detail("skipped", skipped)
            .with_detail("pass_rate", pass_rate)
            .with_detail("coverage", coverage)
            .with_detail("failed_suites", failed_suites);
        ctx.suite_results.extend(results);
        Ok(outcome)
    }
}

// ============================================================================
// Performance testing
// ============================================================================

/// Drives load and checks response time and memory against the thresholds
pub struct PerformanceStage {
    drivers: Vec<Box<dyn LoadDriver>>,
}

impl PerformanceStage {
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    pub fn with_driver(mut self, driver: impl LoadDriver + 'static) -> Self {
        self.drivers.push(Box::new(driver));
        self
    }
}

impl Default for PerformanceStage {
    fn default() -> Self {
        Self::new().with_driver(super::capabilities::SuiteLoadDriver)
    }
}

#[async_trait]
impl StageExecutor for PerformanceStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::PerformanceTesting
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutcome> {
        let mut report = LoadReport::default();
        for driver in &self.drivers {
            debug!("Running load driver {}", driver.name());
            report = report.merge(driver.drive(ctx).await?);
        }

        let max_response = ctx.config.max_response_time_ms as f64;
        let mut problems = Vec::new();
        if report.samples > 0 && report.mean_response_time_ms > max_response {
            problems.push(format!(
                "mean response time {:.0}ms exceeds {:.0}ms",
                report.mean_response_time_ms, max_response
            ));
        }
        if report.peak_memory_usage > ctx.config.max_memory_usage {
            problems.push(format!(
                "memory usage {:.0}% exceeds {:.0}%",
                report.peak_memory_usage * 100.0,
                ctx.config.max_memory_usage * 100.0
            ));
        }
        let failed_suites = report.suite_results.iter().filter(|s| !s.success).count();
        if failed_suites > 0 {
            problems.push(format!("{failed_suites} performance suites failed"));
        }

        let outcome = if problems.is_empty() {
            StageOutcome::passed()
        } else {
            StageOutcome::failed(problems.join("; "))
        };
        let outcome = outcome
            .with_detail("samples", report.samples)
            .with_detail("mean_response_time_ms", report.mean_response_time_ms)
            .with_detail("peak_memory_usage", report.peak_memory_usage)
            .with_detail("mean_cpu_usage", report.mean_cpu_usage)
            .with_detail("throughput", report.throughput)
            .with_detail("mean_network_bytes_per_op", report.mean_network_bytes_per_op);
        ctx.suite_results.extend(report.suite_results);
        Ok(outcome)
    }
}

// ============================================================================
// Security testing
// ============================================================================

/// Runs scanners; any high or critical finding fails the stage
pub struct SecurityStage {
    scanners: Vec<Box<dyn VulnerabilityScanner>>,
}

impl SecurityStage {
    pub fn new() -> Self {
        Self {
            scanners: Vec::new(),
        }
    }

    pub fn with_scanner(mut self, scanner: impl VulnerabilityScanner + 'static) -> Self {
        self.scanners.push(Box::new(scanner));
        self
    }
}

impl Default for SecurityStage {
    fn default() -> Self {
        Self::new().with_scanner(super::capabilities::SuiteScanner)
    }
}

#[async_trait]
impl StageExecutor for SecurityStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::SecurityTesting
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutcome> {
        let mut report = SecurityReport::default();
        for scanner in &self.scanners {
            debug!("Running scanner {}", scanner.name());
            report = report.merge(scanner.scan(ctx).await?);
        }

        let blocking: Vec<String> = report
            .blocking()
            .map(|f| format!("[{}] {}", f.severity, f.id))
            .collect();
        if !report.findings.is_empty() {
            info!(
                "Security scan: {} findings ({} blocking)",
                report.findings.len(),
                blocking.len()
            );
        }

        let outcome = if blocking.is_empty() {
            StageOutcome::passed()
        } else {
            StageOutcome::failed(format!("blocking findings: {}", blocking.join(", ")))
        };
        let outcome = outcome
            .with_detail("findings", report.findings.len())
            .with_detail("critical", report.count(Severity::Critical))
            .with_detail("high", report.count(Severity::High))
            .with_detail("medium", report.count(Severity::Medium))
            .with_detail("low", report.count(Severity::Low))
            .with_detail("weighted_risk", report.weighted_risk())
            .with_detail(
                "access_control_findings",
                report.count_category(FindingCategory::AccessControl),
            );
        ctx.suite_results.extend(report.suite_results);
        Ok(outcome)
    }
}

// ============================================================================
// Code quality
// ============================================================================

pub struct QualityStage {
    analyzer: Box<dyn QualityAnalyzer>,
}

impl QualityStage {
    pub fn new(analyzer: impl QualityAnalyzer + 'static) -> Self {
        Self {
            analyzer: Box::new(analyzer),
        }
    }
}

impl Default for QualityStage {
    fn default() -> Self {
        Self::new(super::capabilities::CoverageQualityAnalyzer::default())
    }
}

#[async_trait]
impl StageExecutor for QualityStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::CodeQuality
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutcome> {
        let report = self.analyzer.analyze(ctx).await?;
        let minimum = ctx.config.min_code_quality_score;

        let outcome = if report.score >= minimum {
            StageOutcome::passed()
        } else {
            StageOutcome::failed(format!(
                "quality score {:.2} is below {:.2}",
                report.score, minimum
            ))
        };
        let mut outcome = outcome
            .with_detail("score", report.score)
            .with_detail("analyzer", self.analyzer.name());
        for (name, value) in report.metrics {
            outcome = outcome.with_detail(name, value);
        }
        Ok(outcome)
    }
}

// ============================================================================
// Deployment validation
// ============================================================================

/// Final gate: environment checks plus every earlier gating stage passed
#[derive(Default)]
pub struct DeploymentValidationStage {
    checks: Vec<Box<dyn EnvironmentCheck>>,
}

impl DeploymentValidationStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check(mut self, check: impl EnvironmentCheck + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }
}

#[async_trait]
impl StageExecutor for DeploymentValidationStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::DeploymentValidation
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<StageOutcome> {
        let mut failures = run_checks(&self.checks, ctx).await;
        if ctx.gating_failed() {
            failures.insert(0, "an earlier gating stage failed".to_string());
        }
        let outcome = if failures.is_empty() {
            StageOutcome::passed()
        } else {
            StageOutcome::failed(failures.join("; "))
        };
        Ok(outcome.with_detail("checks", self.checks.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::models::{PerformanceMetrics, Priority, TestCase, TestSuite};
    use crate::pipeline::capabilities::{PathCheck, SuitesRegistered, ACCESS_CONTROL_TAG};

    fn context(config: PipelineConfig) -> StageContext {
        let orchestrator = Arc::new(TestOrchestrator::new(ExecutionConfig {
            backoff_ms: 1,
            ..Default::default()
        }));
        StageContext::new("pipe-test", orchestrator, config, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_preparation_collects_check_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(PipelineConfig::default());

        let stage = PreparationStage::new()
            .with_check(PathCheck::new(dir.path()))
            .with_check(SuitesRegistered);
        let outcome = stage.execute(&mut ctx).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("no test suites"));

        ctx.orchestrator
            .add_test_suite(TestSuite::new("core", SuiteType::Unit))
            .await;
        let outcome = stage.execute(&mut ctx).await.unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_unit_stage_gates_on_coverage() {
        let mut ctx = context(PipelineConfig {
            coverage_threshold: 0.8,
            ..Default::default()
        });
        ctx.orchestrator
            .add_test_suite(
                TestSuite::new("core", SuiteType::Unit)
                    .with_test(TestCase::passing("a", 0.5))
                    .with_test(TestCase::passing("b", 0.7)),
            )
            .await;

        let outcome = SuiteStage::unit().execute(&mut ctx).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("coverage"));
        assert_eq!(ctx.suite_results.len(), 1);

        // integration does not gate on coverage and finds no suites
        let outcome = SuiteStage::integration().execute(&mut ctx).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.details["suites"], 0);
    }

    #[tokio::test]
    async fn test_suite_stage_pass_rate() {
        let mut ctx = context(PipelineConfig {
            min_pass_rate: 0.5,
            ..Default::default()
        });
        ctx.orchestrator
            .add_test_suite(
                TestSuite::new("api", SuiteType::Integration)
                    .with_test(TestCase::passing("a", 1.0))
                    .with_test(TestCase::passing("b", 1.0))
                    .with_test(TestCase::failing("c", "500")),
            )
            .await;

        let outcome = SuiteStage::integration().execute(&mut ctx).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.details["failed"], 1);
    }

    #[tokio::test]
    async fn test_performance_thresholds() {
        let mut ctx = context(PipelineConfig {
            max_response_time_ms: 200,
            ..Default::default()
        });
        ctx.orchestrator
            .add_test_suite(TestSuite::new("load", SuiteType::Performance).with_test(
                TestCase::measured(
                    "checkout",
                    PerformanceMetrics {
                        response_time_ms: 350.0,
                        memory_usage: 0.3,
                        ..Default::default()
                    },
                ),
            ))
            .await;

        let outcome = PerformanceStage::default().execute(&mut ctx).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("response time"));
        assert_eq!(outcome.details["samples"], 1);
    }

    #[tokio::test]
    async fn test_security_findings_from_failing_tests() {
        let mut ctx = context(PipelineConfig::default());
        ctx.orchestrator
            .add_test_suite(
                TestSuite::new("sec", SuiteType::Security)
                    .with_test(TestCase::passing("headers", 1.0))
                    .with_test(
                        TestCase::failing("admin-route", "reachable without login")
                            .with_tag(ACCESS_CONTROL_TAG)
                            .with_priority(Priority::Critical),
                    ),
            )
            .await;

        let outcome = SecurityStage::default().execute(&mut ctx).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.details["critical"], 1);
        assert_eq!(outcome.details["access_control_findings"], 1);
        assert_eq!(ctx.suite_results.len(), 1);
    }

    #[tokio::test]
    async fn test_quality_from_run_so_far() {
        let mut ctx = context(PipelineConfig {
            min_code_quality_score: 0.7,
            coverage_threshold: 0.0,
            ..Default::default()
        });
        ctx.orchestrator
            .add_test_suite(TestSuite::new("core", SuiteType::Unit).with_test(TestCase::passing("a", 0.6)))
            .await;

        // nothing has run yet
        let outcome = QualityStage::default().execute(&mut ctx).await.unwrap();
        assert!(!outcome.success);

        SuiteStage::unit().execute(&mut ctx).await.unwrap();
        let outcome = QualityStage::default().execute(&mut ctx).await.unwrap();
        // 0.5 * 0.6 + 0.5 * 1.0
        assert!(outcome.success);
        assert!((outcome.details["score"].as_f64().unwrap() - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_deployment_validation_sees_earlier_failures() {
        let mut ctx = context(PipelineConfig::default());
        let stage = DeploymentValidationStage::new();
        assert!(stage.execute(&mut ctx).await.unwrap().success);

        ctx.stage_results.push(StageResult::failed(
            PipelineStage::UnitTesting,
            3,
            "pass rate too low",
        ));
        let outcome = stage.execute(&mut ctx).await.unwrap();
        assert!(!outcome.success);
    }
}

//! Prioritized recommendations over the analysis window

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::flaky::{FlakySeverity, FlakyTest};
use super::trends::{Trend, TrendDirection};
use crate::config::AnalyticsConfig;
use crate::models::{PerformanceMetrics, SuiteType};
use crate::pipeline::{PipelineResult, PipelineStage};

/// Ordered most urgent first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for RecommendationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendationPriority::Critical => write!(f, "CRITICAL"),
            RecommendationPriority::High => write!(f, "HIGH"),
            RecommendationPriority::Medium => write!(f, "MEDIUM"),
            RecommendationPriority::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationCategory {
    Security,
    Performance,
    Reliability,
    Coverage,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: RecommendationPriority,
    pub category: RecommendationCategory,
    pub title: String,
    pub description: String,
    /// Tests or metrics the recommendation is about
    #[serde(default)]
    pub affected: Vec<String>,
}

impl Recommendation {
    fn new(
        priority: RecommendationPriority,
        category: RecommendationCategory,
        title: impl Into<String>,
        description: impl Into<String>,
        affected: Vec<String>,
    ) -> Self {
        Self {
            priority,
            category,
            title: title.into(),
            description: description.into(),
            affected,
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.priority, self.title, self.description)
    }
}

/// Everything the rules look at
pub struct RecommendationInput<'a> {
    /// Oldest first
    pub history: &'a [PipelineResult],
    pub flaky_tests: &'a [FlakyTest],
    pub trends: &'a [Trend],
    pub config: &'a AnalyticsConfig,
    pub coverage_threshold: f64,
    /// Mean coverage over the window
    pub average_coverage: Option<f64>,
}

pub fn generate_recommendations(input: &RecommendationInput<'_>) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();
    let latest = input.history.last();

    if let Some(latest) = latest {
        failing_security_tests(latest, &mut recommendations);
        broken_access_control(latest, &mut recommendations);
        resource_inefficiency(latest, input.config, &mut recommendations);
    }
    memory_leaks(input.history, input.config, &mut recommendations);
    stability(input.trends, input.flaky_tests, &mut recommendations);
    coverage(input, &mut recommendations);

    // stable, so rules keep their order within a priority
    recommendations.sort_by_key(|r| r.priority);
    recommendations
}

fn failing_security_tests(latest: &PipelineResult, out: &mut Vec<Recommendation>) {
    let failing: Vec<String> = latest
        .suite_results
        .iter()
        .filter(|s| s.suite_type == SuiteType::Security)
        .flat_map(|s| {
            s.failed_tests()
                .map(move |t| format!("{}::{}", s.suite_name, t.test_name))
        })
        .collect();
    let critical = latest
        .stage(PipelineStage::SecurityTesting)
        .and_then(|s| s.detail("critical"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    if critical > 0 {
        out.push(Recommendation::new(
            RecommendationPriority::Critical,
            RecommendationCategory::Security,
            "Critical vulnerabilities",
            format!("{critical} critical findings in the latest scan; remediate before release."),
            Vec::new(),
        ));
    }
    if !failing.is_empty() {
        out.push(Recommendation::new(
            RecommendationPriority::Critical,
            RecommendationCategory::Security,
            "Failing security tests",
            format!(
                "{} security tests failed in the latest run; block deployment until they pass.",
                failing.len()
            ),
            failing,
        ));
    }
}

fn broken_access_control(latest: &PipelineResult, out: &mut Vec<Recommendation>) {
    let findings = latest
        .stage(PipelineStage::SecurityTesting)
        .and_then(|s| s.detail("access_control_findings"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    if findings > 0 {
        out.push(Recommendation::new(
            RecommendationPriority::High,
            RecommendationCategory::Security,
            "Broken access control",
            format!("{findings} access-control checks failed; review authorization rules."),
            Vec::new(),
        ));
    }
}

/// Performance samples per `suite::test`, oldest first
fn performance_series(history: &[PipelineResult]) -> BTreeMap<String, Vec<PerformanceMetrics>> {
    let mut series: BTreeMap<String, Vec<PerformanceMetrics>> = BTreeMap::new();
    for run in history {
        for suite in &run.suite_results {
            for result in &suite.results {
                if let Some(metrics) = result.performance {
                    series
                        .entry(format!("{}::{}", suite.suite_name, result.test_name))
                        .or_default()
                        .push(metrics);
                }
            }
        }
    }
    series
}

fn memory_leaks(history: &[PipelineResult], config: &AnalyticsConfig, out: &mut Vec<Recommendation>) {
    let leaking: Vec<String> = performance_series(history)
        .into_iter()
        .filter(|(_, samples)| {
            let memory: Vec<f64> = samples.iter().map(|m| m.memory_usage).collect();
            is_leaking(&memory, config.memory_growth_threshold)
        })
        .map(|(name, _)| name)
        .collect();
    if !leaking.is_empty() {
        out.push(Recommendation::new(
            RecommendationPriority::Critical,
            RecommendationCategory::Performance,
            "Possible memory leak",
            "Memory usage grows run over run without recovering; profile allocations.",
            leaking,
        ));
    }
}

/// At least three samples that never decrease and grow by more than `threshold`
fn is_leaking(memory: &[f64], threshold: f64) -> bool {
    if memory.len() < 3 {
        return false;
    }
    let (first, last) = (memory[0], memory[memory.len() - 1]);
    let monotonic = memory.windows(2).all(|w| w[1] >= w[0]);
    let growth = if first > 0.0 {
        (last - first) / first
    } else {
        last
    };
    monotonic && growth > threshold
}

fn resource_inefficiency(
    latest: &PipelineResult,
    config: &AnalyticsConfig,
    out: &mut Vec<Recommendation>,
) {
    let mut cpu = Vec::new();
    let mut network = Vec::new();
    for suite in &latest.suite_results {
        for result in &suite.results {
            let Some(metrics) = result.performance else {
                continue;
            };
            let name = format!("{}::{}", suite.suite_name, result.test_name);
            if metrics.cpu_usage > config.cpu_threshold {
                cpu.push(name.clone());
            }
            if metrics.network_bytes_per_op > config.network_bytes_threshold {
                network.push(name);
            }
        }
    }

    if !cpu.is_empty() {
        out.push(Recommendation::new(
            RecommendationPriority::Medium,
            RecommendationCategory::Performance,
            "High CPU usage",
            format!(
                "CPU usage above {:.0}%; look for hot loops or redundant work.",
                config.cpu_threshold * 100.0
            ),
            cpu,
        ));
    }
    if !network.is_empty() {
        out.push(Recommendation::new(
            RecommendationPriority::Medium,
            RecommendationCategory::Performance,
            "Network inefficiency",
            format!(
                "More than {:.0} bytes per operation; batch or compress requests.",
                config.network_bytes_threshold
            ),
            network,
        ));
    }
}

fn stability(trends: &[Trend], flaky: &[FlakyTest], out: &mut Vec<Recommendation>) {
    let regressions: Vec<String> = trends
        .iter()
        .filter(|t| t.direction == TrendDirection::Degrading)
        .map(|t| t.metric.clone())
        .collect();
    if regressions.iter().any(|m| m == "success_rate") {
        out.push(Recommendation::new(
            RecommendationPriority::High,
            RecommendationCategory::Reliability,
            "Stability regression",
            "Success rate is degrading across recent runs; bisect recent changes.",
            regressions.clone(),
        ));
    }
    if regressions.iter().any(|m| m == "average_duration") {
        out.push(Recommendation::new(
            RecommendationPriority::Medium,
            RecommendationCategory::Performance,
            "Slower pipelines",
            "Pipeline duration is trending up.",
            vec!["average_duration".to_string()],
        ));
    }

    let names = |severity| {
        flaky
            .iter()
            .filter(|t| t.severity == severity)
            .map(|t| t.name.clone())
            .collect::<Vec<_>>()
    };
    let high = names(FlakySeverity::High);
    if !high.is_empty() {
        out.push(Recommendation::new(
            RecommendationPriority::High,
            RecommendationCategory::Reliability,
            "Highly flaky tests",
            "These tests fail in most runs; quarantine or fix them.",
            high,
        ));
    }
    let medium = names(FlakySeverity::Medium);
    if !medium.is_empty() {
        out.push(Recommendation::new(
            RecommendationPriority::Medium,
            RecommendationCategory::Reliability,
            "Flaky tests",
            "These tests fail intermittently; look for timing or ordering dependencies.",
            medium,
        ));
    }
}

fn coverage(input: &RecommendationInput<'_>, out: &mut Vec<Recommendation>) {
    let Some(coverage) = input.average_coverage else {
        return;
    };
    if coverage >= input.coverage_threshold {
        return;
    }
    let priority = if coverage < input.coverage_threshold * 0.75 {
        RecommendationPriority::Medium
    } else {
        RecommendationPriority::Low
    };
    out.push(Recommendation::new(
        priority,
        RecommendationCategory::Coverage,
        "Coverage below threshold",
        format!(
            "Average coverage {:.1}% is below {:.1}%.",
            coverage * 100.0,
            input.coverage_threshold * 100.0
        ),
        Vec::new(),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureKind, TestOutcome, TestResult, TestSuiteResult};
    use crate::pipeline::{StageOutcome, StageResult, Trigger};
    use chrono::Utc;

    fn run(suites: Vec<TestSuiteResult>, stages: Vec<StageResult>) -> PipelineResult {
        PipelineResult {
            id: "pipeline_1".into(),
            timestamp: Utc::now(),
            trigger: Trigger::Scheduled,
            duration_ms: 100,
            success: true,
            stage_results: stages,
            score: 1.0,
            recommendations: Vec::new(),
            planned_stages: Vec::new(),
            suite_results: suites,
        }
    }

    fn perf_run(memory: f64, cpu: f64) -> PipelineResult {
        let metrics = PerformanceMetrics {
            response_time_ms: 100.0,
            memory_usage: memory,
            cpu_usage: cpu,
            throughput: 10.0,
            network_bytes_per_op: 512.0,
        };
        let result = TestResult::pass("checkout", 5, TestOutcome::default().with_metrics(metrics));
        let suite = TestSuiteResult::new("s", "load", SuiteType::Performance, vec![result], 5, Utc::now());
        run(vec![suite], Vec::new())
    }

    fn recommend(history: &[PipelineResult]) -> Vec<Recommendation> {
        generate_recommendations(&RecommendationInput {
            history,
            flaky_tests: &[],
            trends: &[],
            config: &AnalyticsConfig::default(),
            coverage_threshold: 0.8,
            average_coverage: None,
        })
    }

    #[test]
    fn test_failing_security_tests_are_critical() {
        let suite = TestSuiteResult::new(
            "s",
            "auth",
            SuiteType::Security,
            vec![TestResult::fail("sql-injection", 5, FailureKind::Failure, "payload accepted")],
            5,
            Utc::now(),
        );
        let stage = StageResult::new(
            PipelineStage::SecurityTesting,
            5,
            StageOutcome::failed("blocking").with_detail("access_control_findings", 2),
        );

        let recommendations = recommend(&[run(vec![suite], vec![stage])]);
        assert_eq!(recommendations[0].priority, RecommendationPriority::Critical);
        assert_eq!(recommendations[0].affected, vec!["auth::sql-injection".to_string()]);
        assert_eq!(recommendations[1].priority, RecommendationPriority::High);
        assert_eq!(recommendations[1].title, "Broken access control");
    }

    #[test]
    fn test_memory_leak_is_critical() {
        let history: Vec<_> = [0.30, 0.34, 0.41, 0.48].iter().map(|m| perf_run(*m, 0.2)).collect();
        let recommendations = recommend(&history);
        assert_eq!(recommendations.len(), 1);
        assert_eq!(recommendations[0].priority, RecommendationPriority::Critical);
        assert_eq!(recommendations[0].affected, vec!["load::checkout".to_string()]);

        // a dip means memory was reclaimed
        let history: Vec<_> = [0.30, 0.45, 0.31, 0.48].iter().map(|m| perf_run(*m, 0.2)).collect();
        assert!(recommend(&history).is_empty());
    }

    #[test]
    fn test_cpu_inefficiency_is_medium() {
        let recommendations = recommend(&[perf_run(0.3, 0.95)]);
        assert_eq!(recommendations.len(), 1);
        assert_eq!(recommendations[0].priority, RecommendationPriority::Medium);
        assert_eq!(recommendations[0].title, "High CPU usage");
    }

    #[test]
    fn test_ordering_and_stability() {
        let trends = [Trend {
            metric: "success_rate".into(),
            direction: TrendDirection::Degrading,
            baseline: 0.95,
            recent: 0.7,
            delta: -0.25,
        }];
        let flaky = [FlakyTest {
            name: "core::login".into(),
            failure_rate: 0.3,
            runs: 10,
            failures: 3,
            severity: FlakySeverity::Medium,
        }];
        let history = [perf_run(0.3, 0.95)];

        let recommendations = generate_recommendations(&RecommendationInput {
            history: &history,
            flaky_tests: &flaky,
            trends: &trends,
            config: &AnalyticsConfig::default(),
            coverage_threshold: 0.8,
            average_coverage: Some(0.7),
        });

        let priorities: Vec<_> = recommendations.iter().map(|r| r.priority).collect();
        assert_eq!(
            priorities,
            vec![
                RecommendationPriority::High,
                RecommendationPriority::Medium,
                RecommendationPriority::Medium,
                RecommendationPriority::Low,
            ]
        );
        assert_eq!(recommendations[0].title, "Stability regression");
        assert_eq!(recommendations[3].category, RecommendationCategory::Coverage);
    }
}

//! Flaky test detection

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::AnalyticsConfig;
use crate::models::TestStatus;
use crate::pipeline::PipelineResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlakySeverity {
    Medium,
    High,
}

impl fmt::Display for FlakySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlakySeverity::Medium => write!(f, "medium"),
            FlakySeverity::High => write!(f, "high"),
        }
    }
}

/// A test that fails intermittently; recomputed on every analysis
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlakyTest {
    /// `suite::test`
    pub name: String,
    pub failure_rate: f64,
    pub runs: usize,
    pub failures: usize,
    pub severity: FlakySeverity,
}

/// Classify one test from its run and failure counts
pub fn classify(
    name: &str,
    runs: usize,
    failures: usize,
    config: &AnalyticsConfig,
) -> Option<FlakyTest> {
    if runs < config.flaky_min_runs || runs == 0 {
        return None;
    }
    let failure_rate = failures as f64 / runs as f64;
    if failure_rate <= config.flaky_lower_bound || failure_rate >= config.flaky_upper_bound {
        return None;
    }
    let severity = if failure_rate > config.flaky_high_severity {
        FlakySeverity::High
    } else {
        FlakySeverity::Medium
    };
    Some(FlakyTest {
        name: name.to_string(),
        failure_rate,
        runs,
        failures,
        severity,
    })
}

/// Flaky tests across the window, worst first
///
/// Only executed results count as runs; skipped results are ignored.
pub fn detect_flaky_tests(history: &[PipelineResult], config: &AnalyticsConfig) -> Vec<FlakyTest> {
    let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for run in history {
        for suite in &run.suite_results {
            for result in suite.results.iter().filter(|r| r.executed()) {
                let entry = counts
                    .entry(format!("{}::{}", suite.suite_name, result.test_name))
                    .or_default();
                entry.0 += 1;
                if result.status == TestStatus::Failed {
                    entry.1 += 1;
                }
            }
        }
    }

    let mut flaky: Vec<FlakyTest> = counts
        .iter()
        .filter_map(|(name, (runs, failures))| classify(name, *runs, *failures, config))
        .collect();
    flaky.sort_by(|a, b| {
        b.failure_rate
            .partial_cmp(&a.failure_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    flaky
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureKind, SuiteType, TestOutcome, TestResult, TestSuiteResult};
    use crate::pipeline::Trigger;
    use chrono::Utc;

    fn run(results: Vec<TestResult>) -> PipelineResult {
        let suite = TestSuiteResult::new("suite_1", "core", SuiteType::Unit, results, 10, Utc::now());
        PipelineResult {
            id: "pipeline_1".into(),
            timestamp: Utc::now(),
            trigger: Trigger::Commit,
            duration_ms: 10,
            success: true,
            stage_results: Vec::new(),
            score: 1.0,
            recommendations: Vec::new(),
            planned_stages: Vec::new(),
            suite_results: vec![suite],
        }
    }

    /// Ten runs where `name` fails in the first `failures`
    fn history(name: &str, failures: usize) -> Vec<PipelineResult> {
        (0..10)
            .map(|i| {
                let result = if i < failures {
                    TestResult::fail(name, 5, FailureKind::Failure, "boom")
                } else {
                    TestResult::pass(name, 5, TestOutcome::default())
                };
                run(vec![result])
            })
            .collect()
    }

    #[test]
    fn test_three_of_ten_is_medium() {
        let flaky = detect_flaky_tests(&history("login", 3), &AnalyticsConfig::default());
        assert_eq!(flaky.len(), 1);
        assert_eq!(flaky[0].name, "core::login");
        assert_eq!(flaky[0].severity, FlakySeverity::Medium);
        assert!((flaky[0].failure_rate - 0.3).abs() < 1e-9);
        assert_eq!(flaky[0].runs, 10);
    }

    #[test]
    fn test_six_of_ten_is_high() {
        let flaky = detect_flaky_tests(&history("login", 6), &AnalyticsConfig::default());
        assert_eq!(flaky[0].severity, FlakySeverity::High);
    }

    #[test]
    fn test_bounds_are_exclusive() {
        let config = AnalyticsConfig::default();
        assert!(detect_flaky_tests(&history("login", 1), &config).is_empty());
        assert!(detect_flaky_tests(&history("login", 2), &config).is_empty());
        assert!(detect_flaky_tests(&history("login", 8), &config).is_empty());
        assert!(detect_flaky_tests(&history("login", 10), &config).is_empty());
    }

    #[test]
    fn test_minimum_runs() {
        let config = AnalyticsConfig::default();
        assert!(classify("t", 4, 2, &config).is_none());
        assert!(classify("t", 5, 2, &config).is_some());

        let strict = AnalyticsConfig {
            flaky_min_runs: 20,
            ..Default::default()
        };
        assert!(detect_flaky_tests(&history("login", 3), &strict).is_empty());
    }

    #[test]
    fn test_skipped_results_are_not_runs() {
        let mut runs = history("login", 3);
        runs.extend((0..5).map(|_| run(vec![TestResult::skip("login", "critical failure")])));
        let flaky = detect_flaky_tests(&runs, &AnalyticsConfig::default());
        assert_eq!(flaky[0].runs, 10);
    }
}

//! History analytics
//!
//! Reads stored pipeline results and derives success rates, trends,
//! flaky tests and prioritized recommendations. Nothing here is persisted;
//! every report is recomputed from the window it was given.

mod flaky;
mod recommend;
mod trends;

pub use flaky::{detect_flaky_tests, FlakySeverity, FlakyTest};
pub use recommend::{
    generate_recommendations, Recommendation, RecommendationCategory, RecommendationInput,
    RecommendationPriority,
};
pub use trends::{classify as classify_trend, DeltaMode, Trend, TrendDirection};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{AnalyticsConfig, EngineConfig};
use crate::models::TestStatus;
use crate::pipeline::PipelineResult;
use crate::results::ResultStore;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub generated_at: DateTime<Utc>,
    pub runs_analyzed: usize,
    /// Fraction of runs that passed
    pub success_rate: f64,
    pub average_duration_ms: f64,
    /// Mean over runs that executed at least one suite
    pub average_coverage: Option<f64>,
    pub average_score: f64,
    pub trends: Vec<Trend>,
    pub flaky_tests: Vec<FlakyTest>,
    pub recommendations: Vec<Recommendation>,
}

impl AnalyticsReport {
    pub fn trend(&self, metric: &str) -> Option<&Trend> {
        self.trends.iter().find(|t| t.metric == metric)
    }
}

pub struct AnalyticsEngine {
    config: AnalyticsConfig,
    coverage_threshold: f64,
}

impl AnalyticsEngine {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            coverage_threshold: 0.8,
        }
    }

    pub fn with_coverage_threshold(mut self, threshold: f64) -> Self {
        self.coverage_threshold = threshold;
        self
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.analytics.clone())
            .with_coverage_threshold(config.pipeline.coverage_threshold)
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Analyse the most recent `window_size` runs of `history` (oldest first)
    pub fn analyze(&self, history: &[PipelineResult]) -> AnalyticsReport {
        let start = history.len().saturating_sub(self.config.window_size);
        let window = &history[start..];
        debug!("Analysing {} of {} runs", window.len(), history.len());

        let runs = window.len();
        let mean = |xs: &[f64]| {
            if xs.is_empty() {
                0.0
            } else {
                xs.iter().sum::<f64>() / xs.len() as f64
            }
        };

        let outcomes: Vec<f64> = window.iter().map(run_pass_rate).collect();
        let durations: Vec<f64> = window.iter().map(|r| r.duration_ms as f64).collect();
        let scores: Vec<f64> = window.iter().map(|r| r.score).collect();
        let coverages: Vec<f64> = window.iter().filter_map(run_coverage).collect();

        let success_rate = if runs == 0 {
            0.0
        } else {
            window.iter().filter(|r| r.success).count() as f64 / runs as f64
        };
        let average_coverage = (!coverages.is_empty()).then(|| mean(&coverages));

        let sample = self.config.trend_sample_size;
        let threshold = self.config.trend_threshold;
        let trends = vec![
            trends::classify("success_rate", &outcomes, sample, threshold, DeltaMode::Absolute, true),
            trends::classify("coverage", &coverages, sample, threshold, DeltaMode::Absolute, true),
            trends::classify("score", &scores, sample, threshold, DeltaMode::Absolute, true),
            trends::classify(
                "average_duration",
                &durations,
                sample,
                threshold,
                DeltaMode::Relative,
                false,
            ),
        ];

        let flaky_tests = detect_flaky_tests(window, &self.config);
        let recommendations = generate_recommendations(&RecommendationInput {
            history: window,
            flaky_tests: &flaky_tests,
            trends: &trends,
            config: &self.config,
            coverage_threshold: self.coverage_threshold,
            average_coverage,
        });

        info!(
            "Analysed {} runs: {} flaky tests, {} recommendations",
            runs,
            flaky_tests.len(),
            recommendations.len()
        );

        AnalyticsReport {
            generated_at: Utc::now(),
            runs_analyzed: runs,
            success_rate,
            average_duration_ms: mean(&durations),
            average_coverage,
            average_score: mean(&scores),
            trends,
            flaky_tests,
            recommendations,
        }
    }

    pub fn analyze_store(&self, store: &dyn ResultStore) -> Result<AnalyticsReport> {
        let history = store
            .load_recent(self.config.window_size)
            .context("Failed to load pipeline history")?;
        Ok(self.analyze(&history))
    }
}

/// Passed over executed tests; the run verdict when nothing executed
fn run_pass_rate(run: &PipelineResult) -> f64 {
    let (executed, passed) = run
        .suite_results
        .iter()
        .flat_map(|s| &s.results)
        .filter(|r| r.executed())
        .fold((0usize, 0usize), |(e, p), r| {
            (e + 1, p + usize::from(r.status == TestStatus::Passed))
        });
    if executed == 0 {
        if run.success {
            1.0
        } else {
            0.0
        }
    } else {
        passed as f64 / executed as f64
    }
}

fn run_coverage(run: &PipelineResult) -> Option<f64> {
    let covered: Vec<f64> = run
        .suite_results
        .iter()
        .filter(|s| s.results.iter().any(|r| r.executed()))
        .map(|s| s.coverage)
        .collect();
    (!covered.is_empty()).then(|| covered.iter().sum::<f64>() / covered.len() as f64)
}

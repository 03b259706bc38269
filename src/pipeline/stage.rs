//! Pipeline stages and results
//!
//! Stage identities, their fixed order, per-stage results and the
//! top-level pipeline result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::PipelineError;
use crate::models::TestSuiteResult;

/// Pipeline stage; declaration order is execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    Preparation,
    UnitTesting,
    IntegrationTesting,
    PerformanceTesting,
    SecurityTesting,
    CodeQuality,
    DeploymentValidation,
    Completed,
}

impl PipelineStage {
    /// Executable stages in order (excludes `Completed`)
    pub fn all() -> Vec<PipelineStage> {
        vec![
            PipelineStage::Preparation,
            PipelineStage::UnitTesting,
            PipelineStage::IntegrationTesting,
            PipelineStage::PerformanceTesting,
            PipelineStage::SecurityTesting,
            PipelineStage::CodeQuality,
            PipelineStage::DeploymentValidation,
        ]
    }

    /// Gating stages stop the pipeline under fail-fast
    pub fn is_gating(&self) -> bool {
        matches!(
            self,
            PipelineStage::Preparation
                | PipelineStage::UnitTesting
                | PipelineStage::IntegrationTesting
                | PipelineStage::DeploymentValidation
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Preparation => "preparation",
            PipelineStage::UnitTesting => "unit-testing",
            PipelineStage::IntegrationTesting => "integration-testing",
            PipelineStage::PerformanceTesting => "performance-testing",
            PipelineStage::SecurityTesting => "security-testing",
            PipelineStage::CodeQuality => "code-quality",
            PipelineStage::DeploymentValidation => "deployment-validation",
            PipelineStage::Completed => "completed",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            PipelineStage::Preparation => "Preparation",
            PipelineStage::UnitTesting => "Unit Testing",
            PipelineStage::IntegrationTesting => "Integration Testing",
            PipelineStage::PerformanceTesting => "Performance Testing",
            PipelineStage::SecurityTesting => "Security Testing",
            PipelineStage::CodeQuality => "Code Quality",
            PipelineStage::DeploymentValidation => "Deployment Validation",
            PipelineStage::Completed => "Completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "preparation" => Some(PipelineStage::Preparation),
            "unit-testing" | "unit" => Some(PipelineStage::UnitTesting),
            "integration-testing" | "integration" => Some(PipelineStage::IntegrationTesting),
            "performance-testing" | "performance" => Some(PipelineStage::PerformanceTesting),
            "security-testing" | "security" => Some(PipelineStage::SecurityTesting),
            "code-quality" | "quality" => Some(PipelineStage::CodeQuality),
            "deployment-validation" | "deployment" => Some(PipelineStage::DeploymentValidation),
            "completed" => Some(PipelineStage::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What started a pipeline run; used for reporting only
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    Manual,
    Commit,
    PullRequest,
    Scheduled,
    Deployment,
}

impl Trigger {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "manual" => Some(Trigger::Manual),
            "commit" | "push" => Some(Trigger::Commit),
            "pull_request" | "pr" => Some(Trigger::PullRequest),
            "scheduled" | "schedule" => Some(Trigger::Scheduled),
            "deployment" => Some(Trigger::Deployment),
            _ => None,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Manual => write!(f, "manual"),
            Trigger::Commit => write!(f, "commit"),
            Trigger::PullRequest => write!(f, "pull_request"),
            Trigger::Scheduled => write!(f, "scheduled"),
            Trigger::Deployment => write!(f, "deployment"),
        }
    }
}

/// What a stage executor reports before timing is attached
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StageOutcome {
    pub success: bool,
    pub details: BTreeMap<String, Value>,
    pub error: Option<String>,
}

impl StageOutcome {
    pub fn passed() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Passed unless `error` is set
    pub fn from_error(error: Option<String>) -> Self {
        match error {
            Some(e) => Self::failed(e),
            None => Self::passed(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Recorded outcome of one stage; immutable once pushed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: PipelineStage,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    pub fn new(stage: PipelineStage, duration_ms: u64, outcome: StageOutcome) -> Self {
        Self {
            stage,
            success: outcome.success,
            duration_ms,
            details: outcome.details,
            error: outcome.error,
            completed_at: Utc::now(),
        }
    }

    pub fn passed(stage: PipelineStage, duration_ms: u64) -> Self {
        Self::new(stage, duration_ms, StageOutcome::passed())
    }

    pub fn failed(stage: PipelineStage, duration_ms: u64, error: impl Into<String>) -> Self {
        Self::new(stage, duration_ms, StageOutcome::failed(error))
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

impl fmt::Display for StageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = if self.success { "✓" } else { "✗" };
        write!(
            f,
            "{} {:<24} [{}ms]",
            symbol,
            self.stage.title(),
            self.duration_ms
        )?;
        if let Some(error) = &self.error {
            write!(f, " - {error}")?;
        }
        Ok(())
    }
}

/// Top-level aggregate of one pipeline run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub trigger: Trigger,
    pub duration_ms: u64,
    pub success: bool,
    pub stage_results: Vec<StageResult>,
    /// Successful stages over attempted stages
    pub score: f64,
    pub recommendations: Vec<String>,
    /// Stages the run intended to execute, in order
    #[serde(default)]
    pub planned_stages: Vec<PipelineStage>,
    /// Suite results gathered by test-shaped stages
    #[serde(default)]
    pub suite_results: Vec<TestSuiteResult>,
}

impl PipelineResult {
    pub fn stage(&self, stage: PipelineStage) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| r.stage == stage)
    }

    pub fn failed_stages(&self) -> impl Iterator<Item = &StageResult> {
        self.stage_results.iter().filter(|r| !r.success)
    }

    /// Planned stages that never ran
    pub fn not_attempted(&self) -> Vec<PipelineStage> {
        not_attempted(&self.stage_results, &self.planned_stages)
    }

    /// Error for the first failed stage that has a dedicated error kind
    pub fn error(&self) -> Option<PipelineError> {
        self.failed_stages().find_map(|r| match r.stage {
            PipelineStage::Preparation => Some(PipelineError::PreparationFailed(
                r.error.clone().unwrap_or_else(|| "preparation failed".to_string()),
            )),
            PipelineStage::UnitTesting => Some(PipelineError::UnitTestsFailed),
            PipelineStage::IntegrationTesting => Some(PipelineError::IntegrationTestsFailed),
            _ => None,
        })
    }

    /// Total tests across all gathered suites
    pub fn total_tests(&self) -> usize {
        self.suite_results.iter().map(|s| s.total).sum()
    }
}

impl fmt::Display for PipelineResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline {} ({})", self.id, self.trigger)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for stage in &self.stage_results {
            writeln!(f, "  {stage}")?;
        }
        for stage in self.not_attempted() {
            writeln!(f, "  ○ {:<24} [not attempted]", stage.title())?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Result: {} | Score: {:.2} | Duration: {}ms",
            if self.success { "PASSED" } else { "FAILED" },
            self.score,
            self.duration_ms
        )
    }
}

/// Successful stages over attempted stages; 0 when nothing ran
pub fn compute_score(stage_results: &[StageResult]) -> f64 {
    if stage_results.is_empty() {
        return 0.0;
    }
    let successful = stage_results.iter().filter(|r| r.success).count();
    successful as f64 / stage_results.len() as f64
}

pub(crate) fn not_attempted(
    stage_results: &[StageResult],
    planned: &[PipelineStage],
) -> Vec<PipelineStage> {
    planned
        .iter()
        .copied()
        .filter(|p| !stage_results.iter().any(|r| r.stage == *p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_is_fixed() {
        let mut stages = vec![
            PipelineStage::CodeQuality,
            PipelineStage::Preparation,
            PipelineStage::DeploymentValidation,
            PipelineStage::UnitTesting,
        ];
        stages.sort();
        assert_eq!(
            stages,
            vec![
                PipelineStage::Preparation,
                PipelineStage::UnitTesting,
                PipelineStage::CodeQuality,
                PipelineStage::DeploymentValidation,
            ]
        );
        assert!(PipelineStage::Completed > PipelineStage::DeploymentValidation);
    }

    #[test]
    fn test_gating_stages() {
        let gating: Vec<_> = PipelineStage::all()
            .into_iter()
            .filter(|s| s.is_gating())
            .collect();
        assert_eq!(gating.len(), 4);
        assert!(!PipelineStage::SecurityTesting.is_gating());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            PipelineStage::from_str("unit_testing"),
            Some(PipelineStage::UnitTesting)
        );
        assert_eq!(Trigger::from_str("pull-request"), Some(Trigger::PullRequest));
        assert_eq!(Trigger::from_str("nightly"), None);
        assert_eq!(
            serde_json::to_string(&PipelineStage::CodeQuality).unwrap(),
            "\"code-quality\""
        );
    }

    #[test]
    fn test_score_is_ratio() {
        let results = vec![
            StageResult::passed(PipelineStage::Preparation, 1),
            StageResult::failed(PipelineStage::UnitTesting, 1, "2 failed"),
            StageResult::passed(PipelineStage::IntegrationTesting, 1),
            StageResult::passed(PipelineStage::CodeQuality, 1),
        ];
        assert_eq!(compute_score(&results), 0.75);
        assert_eq!(compute_score(&[]), 0.0);
    }

    #[test]
    fn test_error_maps_first_failed_gating_stage() {
        let result = PipelineResult {
            id: "pipeline_1".into(),
            timestamp: Utc::now(),
            trigger: Trigger::Commit,
            duration_ms: 10,
            success: false,
            stage_results: vec![
                StageResult::passed(PipelineStage::Preparation, 1),
                StageResult::failed(PipelineStage::UnitTesting, 1, "1 failed"),
            ],
            score: 0.5,
            recommendations: Vec::new(),
            planned_stages: vec![
                PipelineStage::Preparation,
                PipelineStage::UnitTesting,
                PipelineStage::IntegrationTesting,
            ],
            suite_results: Vec::new(),
        };

        assert_eq!(result.error(), Some(PipelineError::UnitTestsFailed));
        assert_eq!(
            result.not_attempted(),
            vec![PipelineStage::IntegrationTesting]
        );
        assert!(result.to_string().contains("not attempted"));
    }
}

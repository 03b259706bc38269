//! Pipeline stage machine

pub mod capabilities;
mod events;
mod recommend;
mod runner;
mod stage;
mod stages;

pub use capabilities::{
    CommandCheck, CoverageQualityAnalyzer, EnvironmentCheck, FileScanner, Finding,
    FindingCategory, LoadDriver, LoadReport, PathCheck, QualityAnalyzer, QualityReport,
    SecurityReport, Severity, SuiteLoadDriver, SuiteScanner, SuitesRegistered,
    VulnerabilityScanner, ACCESS_CONTROL_TAG,
};
pub use events::{PipelineEvent, PipelineState};
pub use recommend::{generate_recommendations, READY_FOR_DEPLOYMENT};
pub use runner::PipelineRunner;
pub use stage::{
    compute_score, PipelineResult, PipelineStage, StageOutcome, StageResult, Trigger,
};
pub use stages::{
    DeploymentValidationStage, PerformanceStage, PreparationStage, QualityStage, SecurityStage,
    StageContext, StageExecutor, SuiteStage,
};

//! Pipeline state snapshots and events

use serde::Serialize;

use super::stage::{PipelineResult, PipelineStage, StageResult, Trigger};
use crate::error::PipelineError;

/// Read-only snapshot of the runner, published on a watch channel
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PipelineState {
    pub execution_id: Option<String>,
    pub trigger: Option<Trigger>,
    pub current_stage: Option<PipelineStage>,
    /// Fraction of planned stages finished; never decreases within a run
    pub progress: f64,
    pub running: bool,
    pub completed_stages: usize,
}

/// Events broadcast to subscribers
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started {
        id: String,
        trigger: Trigger,
        planned: Vec<PipelineStage>,
    },
    StageStarted {
        id: String,
        stage: PipelineStage,
    },
    StageCompleted {
        id: String,
        result: StageResult,
        progress: f64,
    },
    /// The pipeline completed and produced a result
    Completed(Box<PipelineResult>),
    /// The pipeline ended with an error and no result
    Aborted { id: String, error: String },
}

impl PipelineEvent {
    pub fn aborted(id: &str, error: &PipelineError) -> Self {
        PipelineEvent::Aborted {
            id: id.to_string(),
            error: error.to_string(),
        }
    }

    pub fn execution_id(&self) -> &str {
        match self {
            PipelineEvent::Started { id, .. }
            | PipelineEvent::StageStarted { id, .. }
            | PipelineEvent::StageCompleted { id, .. }
            | PipelineEvent::Aborted { id, .. } => id,
            PipelineEvent::Completed(result) => &result.id,
        }
    }
}

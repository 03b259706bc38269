//! In-flight execution handles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ExecutionError;

/// Lifecycle of a suite or pipeline run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Passed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Passed => write!(f, "passed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What an execution is running
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    Suite,
    Pipeline,
}

/// Run-time handle for one suite or pipeline run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestExecution {
    pub id: String,
    pub kind: ExecutionKind,
    pub name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TestExecution {
    pub fn new(kind: ExecutionKind, name: impl Into<String>) -> Self {
        let prefix = match kind {
            ExecutionKind::Suite => "suite",
            ExecutionKind::Pipeline => "pipeline",
        };
        Self {
            id: generate_id(prefix),
            kind,
            name: name.into(),
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn start(&mut self) {
        if self.status == ExecutionStatus::Pending {
            self.status = ExecutionStatus::Running;
            self.started_at = Utc::now();
        }
    }

    /// Move to a terminal status; allowed exactly once
    pub fn finish(&mut self, status: ExecutionStatus) -> Result<(), ExecutionError> {
        if self.status.is_terminal() {
            return Err(ExecutionError::AlreadyTerminal {
                id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        Ok(())
    }
}

/// Unique id of the form `<prefix>_<timestamp>_<random>`
pub fn generate_id(prefix: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 1_000_000;
    format!("{prefix}_{timestamp}_{random:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id() {
        let id1 = generate_id("suite");
        let id2 = generate_id("suite");
        assert!(id1.starts_with("suite_"));
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_single_terminal_transition() {
        let mut execution = TestExecution::new(ExecutionKind::Suite, "core");
        assert_eq!(execution.status, ExecutionStatus::Pending);

        execution.start();
        assert_eq!(execution.status, ExecutionStatus::Running);

        execution.finish(ExecutionStatus::Passed).unwrap();
        assert!(execution.ended_at.is_some());

        let err = execution.finish(ExecutionStatus::Cancelled).unwrap_err();
        assert!(matches!(err, ExecutionError::AlreadyTerminal { .. }));
        assert_eq!(execution.status, ExecutionStatus::Passed);
    }
}

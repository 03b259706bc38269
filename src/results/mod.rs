//! Results storage and reporting module
//!
//! Provides append-only persistence and report generation for pipeline runs.

mod report;
mod storage;

pub use report::{ReportFormat, ReportGenerator};
pub use storage::{ExportFormat, InMemoryStore, ResultStore, ResultsStorage, RunInfo};

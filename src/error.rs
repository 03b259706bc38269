//! Error taxonomy
//!
//! Specification errors fail before any work starts, test failures are
//! carried as data in results, and only the pipeline-level conditions below
//! are surfaced as `Err` to the caller.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by a pipeline run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Preparation failed: {0}")]
    PreparationFailed(String),

    #[error("Unit tests failed")]
    UnitTestsFailed,

    #[error("Integration tests failed")]
    IntegrationTestsFailed,

    #[error("Pipeline timed out after {0:?}")]
    Timeout(Duration),

    #[error("Pipeline was cancelled")]
    Cancelled,

    #[error("Invalid pipeline configuration: {0}")]
    Configuration(#[from] ConfigError),
}

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(String),

    #[error("Duplicate suite name: {0}")]
    DuplicateSuite(String),

    #[error("Suite '{suite}' has an invalid test: {reason}")]
    InvalidTest { suite: String, reason: String },
}

/// Test data specification and generation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Record count must be positive")]
    InvalidRecordCount,

    #[error("Specification '{0}' declares no fields")]
    NoFields(String),

    #[error("Field '{field}' has an inconsistent constraint: {reason}")]
    InvalidConstraint { field: String, reason: String },

    #[error("Duplicate field name: {0}")]
    DuplicateField(String),

    #[error("Unknown field '{0}' referenced")]
    UnknownField(String),

    #[error("Template not registered: {0}")]
    UnknownTemplate(String),

    #[error("Template '{0}' has no records")]
    EmptyTemplate(String),

    #[error("Unique field '{field}' cannot hold {requested} distinct values")]
    UniqueExhausted { field: String, requested: usize },

    #[error("Generated data failed validation: {0}")]
    ValidationFailed(String),

    #[error("No data set for specification '{0}'")]
    NotFound(String),

    #[error("Batch generation failed: {0}")]
    Batch(String),
}

/// Errors from the active-execution registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("No active execution with id {0}")]
    NotFound(String),

    #[error("Execution {id} already finished as {status}")]
    AlreadyTerminal { id: String, status: String },

    #[error("Execution registry is shut down")]
    RegistryClosed,
}

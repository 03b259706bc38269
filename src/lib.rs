//! ci-gate - CI test execution engine
//!
//! Registers test suites and runs them with per-test timeouts, retries and
//! cooperative cancellation, drives a fixed sequence of pipeline stages to a
//! deployment verdict, generates and versions test data, and analyses stored
//! pipeline history for trends, flaky tests and recommendations.
//!
//! ## Layout
//!
//! - [`executor`] - test runner, parallel executor, orchestrator and the
//!   active-execution registry
//! - [`pipeline`] - stage machine, stage executors and their capabilities
//! - [`data`] - test data specifications, generation and lifecycle
//! - [`analytics`] - trends, flaky tests and recommendations
//! - [`results`] - append-only run storage and report rendering

pub mod analytics;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod executor;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod results;
pub mod utils;

pub use error::{ConfigError, DataError, ExecutionError, PipelineError};

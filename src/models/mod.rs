//! Data models for test execution
//!
//! Test cases, suites, results and execution handles shared by the
//! orchestrator, the pipeline and analytics.

mod execution;
mod suite;
mod test_case;
mod test_result;

pub use execution::{generate_id, ExecutionKind, ExecutionStatus, TestExecution};
pub use suite::{SuiteConfiguration, SuiteType, TestSuite};
pub use test_case::{CommandSpec, Priority, TestCase, TestContext, TestFn, COVERAGE_MARKER};
pub use test_result::{
    FailureKind, PerformanceMetrics, TestOutcome, TestResult, TestStatus, TestSuiteResult,
};

//! Test execution engine
//!
//! Provides single-test execution, bounded parallel execution, the
//! active-execution registry and the suite orchestrator.

mod orchestrator;
mod parallel;
mod registry;
mod runner;

pub use orchestrator::TestOrchestrator;
pub use parallel::ParallelExecutor;
pub use registry::ExecutionRegistry;
pub use runner::{run_attempt, RetryPolicy, TestRunner};

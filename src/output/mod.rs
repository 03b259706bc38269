//! Output formatting module
//!
//! Console rendering of pipeline runs, suite results and analytics.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter};

//! Test suites and their configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::test_case::TestCase;

/// Kind of suite; pipeline stages select suites by type
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteType {
    Unit,
    Integration,
    Performance,
    Security,
    Ui,
}

impl SuiteType {
    pub fn all() -> Vec<SuiteType> {
        vec![
            SuiteType::Unit,
            SuiteType::Integration,
            SuiteType::Performance,
            SuiteType::Security,
            SuiteType::Ui,
        ]
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unit" => Some(SuiteType::Unit),
            "integration" => Some(SuiteType::Integration),
            "performance" | "perf" => Some(SuiteType::Performance),
            "security" => Some(SuiteType::Security),
            "ui" => Some(SuiteType::Ui),
            _ => None,
        }
    }
}

impl fmt::Display for SuiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuiteType::Unit => write!(f, "unit"),
            SuiteType::Integration => write!(f, "integration"),
            SuiteType::Performance => write!(f, "performance"),
            SuiteType::Security => write!(f, "security"),
            SuiteType::Ui => write!(f, "ui"),
        }
    }
}

/// Execution settings for one suite
#[derive(Clone, Debug, PartialEq)]
pub struct SuiteConfiguration {
    /// Per-test timeout
    pub timeout: Duration,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    pub parallel_execution: bool,
    /// Skip the rest of a sequential suite after a critical test fails
    pub stop_on_critical_failure: bool,
    /// Concurrency cap for parallel runs; falls back to the engine limit
    pub max_concurrency: Option<usize>,
}

impl Default for SuiteConfiguration {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 0,
            parallel_execution: false,
            stop_on_critical_failure: true,
            max_concurrency: None,
        }
    }
}

impl SuiteConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel_execution = parallel;
        self
    }

    pub fn stop_on_critical_failure(mut self, stop: bool) -> Self {
        self.stop_on_critical_failure = stop;
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }
}

/// Named, typed, ordered collection of tests
#[derive(Clone, Debug)]
pub struct TestSuite {
    pub name: String,
    pub suite_type: SuiteType,
    pub tests: Vec<TestCase>,
    pub configuration: SuiteConfiguration,
}

impl TestSuite {
    pub fn new(name: impl Into<String>, suite_type: SuiteType) -> Self {
        Self {
            name: name.into(),
            suite_type,
            tests: Vec::new(),
            configuration: SuiteConfiguration::default(),
        }
    }

    pub fn with_config(mut self, configuration: SuiteConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_test(mut self, test: TestCase) -> Self {
        self.tests.push(test);
        self
    }

    pub fn with_tests(mut self, tests: impl IntoIterator<Item = TestCase>) -> Self {
        self.tests.extend(tests);
        self
    }

    /// Register an additional test
    pub fn add_test(&mut self, test: TestCase) {
        self.tests.push(test);
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Copy of this suite restricted to tests carrying `tag`
    pub fn filter_by_tag(&self, tag: &str) -> TestSuite {
        TestSuite {
            name: self.name.clone(),
            suite_type: self.suite_type,
            tests: self.tests.iter().filter(|t| t.has_tag(tag)).cloned().collect(),
            configuration: self.configuration.clone(),
        }
    }
}

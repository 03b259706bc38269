//! Configuration module
//!
//! Handles loading, validating and overriding engine configuration.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::{ConfigFile, SuiteDefinition, TestDefinition};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::results::ReportFormat;

/// Engine configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pipeline gates and policies
    pub pipeline: PipelineConfig,

    /// Test execution limits
    pub execution: ExecutionConfig,

    /// History analytics thresholds
    pub analytics: AnalyticsConfig,

    /// Test data management
    pub data: DataConfig,

    /// Result persistence
    pub storage: StorageConfig,
}

impl EngineConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;
        self.execution.validate()?;
        self.analytics.validate()?;
        self.data.validate()
    }
}

/// Pipeline options; field names follow the external configuration surface
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Stop after the first failing gating stage
    pub fail_fast: bool,

    /// Minimum pass rate for a test stage (0.0 - 1.0)
    pub min_pass_rate: f64,

    /// Maximum acceptable mean response time in the performance stage
    pub max_response_time_ms: u64,

    /// Maximum memory usage fraction in the performance stage
    pub max_memory_usage: f64,

    /// Minimum score for the code-quality stage
    pub min_code_quality_score: f64,

    /// Run the deployment-validation stage
    pub include_deployment_validation: bool,

    /// Allow suites to run their tests concurrently
    pub parallel_execution: bool,

    /// Ceiling for the whole pipeline
    pub timeout_minutes: u64,

    /// Default retry count for suites that do not set one
    pub max_retries: u32,

    /// Minimum mean coverage for the unit stage
    pub coverage_threshold: f64,

    /// Format of the rendered pipeline report
    pub report_format: ReportFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fail_fast: true,
            min_pass_rate: 0.95,
            max_response_time_ms: 500,
            max_memory_usage: 0.8,
            min_code_quality_score: 0.7,
            include_deployment_validation: false,
            parallel_execution: true,
            timeout_minutes: 30,
            max_retries: 2,
            coverage_threshold: 0.8,
            report_format: ReportFormat::Json,
        }
    }
}

impl PipelineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }

    pub fn max_response_time(&self) -> Duration {
        Duration::from_millis(self.max_response_time_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_fraction("minPassRate", self.min_pass_rate)?;
        check_fraction("maxMemoryUsage", self.max_memory_usage)?;
        check_fraction("minCodeQualityScore", self.min_code_quality_score)?;
        check_fraction("coverageThreshold", self.coverage_threshold)?;
        if self.timeout_minutes == 0 {
            return Err(ConfigError::Zero("timeoutMinutes"));
        }
        Ok(())
    }
}

/// Test execution limits
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Upper bound on concurrently running tests in a parallel suite
    pub max_concurrency: usize,

    /// Backoff base unit; retry n waits n x this
    pub backoff_ms: u64,

    /// Retry attempts that timed out
    pub retry_timeouts: bool,

    /// Per-test timeout for suites declared in config files
    pub default_timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            backoff_ms: 100,
            retry_timeouts: false,
            default_timeout_secs: 30,
        }
    }
}

impl ExecutionConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Zero("execution.max_concurrency"));
        }
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::Zero("execution.default_timeout_secs"));
        }
        Ok(())
    }
}

/// History analytics thresholds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Number of most recent runs analysed
    pub window_size: usize,

    /// Runs compared at each end of the window for trends
    pub trend_sample_size: usize,

    /// Delta beyond which a trend is improving or degrading
    pub trend_threshold: f64,

    /// Minimum observations before a test can be called flaky
    pub flaky_min_runs: usize,

    /// Failure rate must be above this to be flaky
    pub flaky_lower_bound: f64,

    /// Failure rate must be below this to be flaky
    pub flaky_upper_bound: f64,

    /// Failure rate above which a flaky test is high severity
    pub flaky_high_severity: f64,

    /// CPU fraction considered inefficient
    pub cpu_threshold: f64,

    /// Network bytes per operation considered inefficient
    pub network_bytes_threshold: f64,

    /// Memory growth across the window that suggests a leak
    pub memory_growth_threshold: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            trend_sample_size: 5,
            trend_threshold: 0.1,
            flaky_min_runs: 5,
            flaky_lower_bound: 0.2,
            flaky_upper_bound: 0.8,
            flaky_high_severity: 0.5,
            cpu_threshold: 0.8,
            network_bytes_threshold: 1_048_576.0,
            memory_growth_threshold: 0.1,
        }
    }
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::Zero("analytics.window_size"));
        }
        if self.trend_sample_size == 0 {
            return Err(ConfigError::Zero("analytics.trend_sample_size"));
        }
        check_fraction("analytics.flaky_lower_bound", self.flaky_lower_bound)?;
        check_fraction("analytics.flaky_upper_bound", self.flaky_upper_bound)?;
        check_fraction("analytics.flaky_high_severity", self.flaky_high_severity)?;
        check_fraction("analytics.cpu_threshold", self.cpu_threshold)?;
        if self.flaky_lower_bound >= self.flaky_upper_bound {
            return Err(ConfigError::OutOfRange {
                field: "analytics.flaky_lower_bound",
                value: self.flaky_lower_bound,
            });
        }
        Ok(())
    }
}

/// Test data management settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Return the cached data set for a known specification id
    pub allow_reuse: bool,

    /// Memory available to performance-scale generation
    pub available_memory_mb: u64,

    /// Upper bound on concurrently generated batches
    pub max_batch_concurrency: usize,

    /// Active data sets older than this are archived
    pub archive_after_days: i64,

    /// Archived data sets older than this are purged
    pub purge_after_days: i64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            allow_reuse: true,
            available_memory_mb: 1024,
            max_batch_concurrency: 8,
            archive_after_days: 30,
            purge_after_days: 90,
        }
    }
}

impl DataConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.available_memory_mb == 0 {
            return Err(ConfigError::Zero("data.available_memory_mb"));
        }
        if self.max_batch_concurrency == 0 {
            return Err(ConfigError::Zero("data.max_batch_concurrency"));
        }
        Ok(())
    }
}

/// Result persistence settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for stored pipeline runs; platform data dir when unset
    pub results_dir: Option<PathBuf>,
}

fn check_fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value })
    }
}

/// Check if file is YAML based on extension
pub(crate) fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.pipeline.fail_fast);
        assert_eq!(config.pipeline.timeout_minutes, 30);
        assert_eq!(config.analytics.trend_sample_size, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_config_rejects_bad_fraction() {
        let config = PipelineConfig {
            min_pass_rate: 1.5,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "minPassRate",
                value: 1.5
            })
        );
    }

    #[test]
    fn test_pipeline_config_rejects_zero_timeout() {
        let config = PipelineConfig {
            timeout_minutes: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("timeoutMinutes")));
    }

    #[test]
    fn test_camel_case_surface() {
        let json = r#"{"failFast": false, "minPassRate": 0.9, "reportFormat": "junit"}"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert!(!config.fail_fast);
        assert_eq!(config.min_pass_rate, 0.9);
        assert_eq!(config.report_format, ReportFormat::Junit);
        // unspecified options keep their defaults
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn test_save_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.yaml");

        let mut config = EngineConfig::default();
        config.pipeline.fail_fast = false;
        config.execution.max_concurrency = 2;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_flaky_bounds_must_be_ordered() {
        let mut config = AnalyticsConfig::default();
        config.flaky_lower_bound = 0.9;
        assert!(config.validate().is_err());
    }
}

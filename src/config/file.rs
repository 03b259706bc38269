//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files, including
//! declarative suite definitions made of command-based tests.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{is_yaml_file, EngineConfig};
use crate::error::ConfigError;
use crate::models::{CommandSpec, Priority, SuiteConfiguration, SuiteType, TestCase, TestSuite};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./ci-gate.yaml",
    "./ci-gate.yml",
    "./.ci-gate.yaml",
    "./.ci-gate/config.yaml",
    "~/.config/ci-gate/config.yaml",
];

const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

/// Full configuration file structure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Registered suites
    #[serde(default)]
    pub suites: Vec<SuiteDefinition>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            engine: EngineConfig::default(),
            suites: Vec::new(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        match Self::find() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
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

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            return Err(ConfigError::UnsupportedVersion(self.version.clone()));
        }

        self.engine.validate()?;

        let mut names = HashSet::new();
        for suite in &self.suites {
            if !names.insert(suite.name.as_str()) {
                return Err(ConfigError::DuplicateSuite(suite.name.clone()));
            }
            suite.validate()?;
        }

        Ok(())
    }

    /// Build runnable suites from the declared definitions
    pub fn build_suites(&self) -> Vec<TestSuite> {
        self.suites
            .iter()
            .map(|s| s.to_suite(&self.engine))
            .collect()
    }

    /// Generate example configuration
    pub fn example() -> Self {
        Self {
            version: default_version(),
            engine: EngineConfig::default(),
            suites: vec![
                SuiteDefinition {
                    name: "unit".to_string(),
                    suite_type: SuiteType::Unit,
                    timeout_secs: Some(600),
                    max_retries: Some(0),
                    parallel: Some(false),
                    stop_on_critical_failure: true,
                    max_concurrency: None,
                    tests: vec![TestDefinition {
                        name: "lib".to_string(),
                        command: CommandSpec::new("cargo").args(["test", "--lib"]),
                        priority: Priority::Critical,
                        tags: vec!["fast".to_string()],
                        timeout_secs: None,
                    }],
                },
                SuiteDefinition {
                    name: "integration".to_string(),
                    suite_type: SuiteType::Integration,
                    timeout_secs: Some(900),
                    max_retries: Some(1),
                    parallel: Some(true),
                    stop_on_critical_failure: false,
                    max_concurrency: Some(2),
                    tests: vec![TestDefinition {
                        name: "api".to_string(),
                        command: CommandSpec::new("cargo").args(["test", "--test", "api"]),
                        priority: Priority::High,
                        tags: Vec::new(),
                        timeout_secs: Some(300),
                    }],
                },
            ],
        }
    }

    /// Suite definition by name
    pub fn suite(&self, name: &str) -> Option<&SuiteDefinition> {
        self.suites.iter().find(|s| s.name == name)
    }
}

/// Declarative suite made of command tests
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuiteDefinition {
    pub name: String,

    #[serde(rename = "type")]
    pub suite_type: SuiteType,

    /// Per-test timeout; engine default when unset
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Retries; pipeline `maxRetries` when unset
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Parallel execution; pipeline `parallelExecution` when unset
    #[serde(default)]
    pub parallel: Option<bool>,

    #[serde(default = "default_true")]
    pub stop_on_critical_failure: bool,

    #[serde(default)]
    pub max_concurrency: Option<usize>,

    #[serde(default)]
    pub tests: Vec<TestDefinition>,
}

fn default_true() -> bool {
    true
}

/// One command test inside a suite definition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    pub name: String,
    pub command: CommandSpec,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SuiteDefinition {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidTest {
                suite: self.name.clone(),
                reason: "suite timeout must be greater than zero".to_string(),
            });
        }

        let mut names = HashSet::new();
        for test in &self.tests {
            let reason = if test.name.trim().is_empty() {
                Some("test name is empty".to_string())
            } else if test.command.program.trim().is_empty() {
                Some(format!("test '{}' has no program", test.name))
            } else if !names.insert(test.name.as_str()) {
                Some(format!("test '{}' is declared twice", test.name))
            } else if test.timeout_secs == Some(0) {
                Some(format!("test '{}' has a zero timeout", test.name))
            } else {
                None
            };

            if let Some(reason) = reason {
                return Err(ConfigError::InvalidTest {
                    suite: self.name.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Build a runnable suite, filling unset options from the engine config
    pub fn to_suite(&self, engine: &EngineConfig) -> TestSuite {
        let mut configuration = SuiteConfiguration::new()
            .timeout(Duration::from_secs(
                self.timeout_secs
                    .unwrap_or(engine.execution.default_timeout_secs),
            ))
            .retries(self.max_retries.unwrap_or(engine.pipeline.max_retries))
            .parallel(self.parallel.unwrap_or(engine.pipeline.parallel_execution))
            .stop_on_critical_failure(self.stop_on_critical_failure);
        if let Some(limit) = self.max_concurrency {
            configuration = configuration.max_concurrency(limit);
        }

        let tests = self.tests.iter().map(|t| {
            let mut test = TestCase::command(&t.name, t.command.clone())
                .with_priority(t.priority)
                .with_tags(t.tags.iter().cloned());
            if let Some(secs) = t.timeout_secs {
                test = test.with_timeout(Duration::from_secs(secs));
            }
            test
        });

        TestSuite::new(&self.name, self.suite_type)
            .with_config(configuration)
            .with_tests(tests)
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_default() {
        let config = ConfigFile::default();
        assert_eq!(config.version, "1.0");
        assert!(config.suites.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("ci-gate.yaml");

        let config = ConfigFile::example();
        config.save(&path).unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_parse_yaml_suites() {
        let yaml = r#"
version: "1.0"
engine:
  pipeline:
    failFast: false
    maxRetries: 3
suites:
  - name: smoke
    type: unit
    tests:
      - name: version
        priority: critical
        command:
          program: cargo
          args: ["--version"]
"#;
        let config: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert!(!config.engine.pipeline.fail_fast);

        let suites = config.build_suites();
        assert_eq!(suites.len(), 1);
        let suite = &suites[0];
        assert_eq!(suite.suite_type, SuiteType::Unit);
        assert_eq!(suite.configuration.max_retries, 3);
        assert!(suite.tests[0].is_critical());
        assert!(suite.tests[0].is_command());
    }

    #[test]
    fn test_validate_rejects_duplicate_suite() {
        let mut config = ConfigFile::example();
        let copy = config.suites[0].clone();
        config.suites.push(copy);
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateSuite("unit".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_empty_program() {
        let mut config = ConfigFile::example();
        config.suites[0].tests[0].command.program = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTest { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_version() {
        let config = ConfigFile {
            version: "9.9".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("./test.yaml");
        assert_eq!(path, PathBuf::from("./test.yaml"));
    }
}

//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use super::EngineConfig;
use crate::results::ReportFormat;

/// Environment variable prefix
const ENV_PREFIX: &str = "CI_GATE";

/// Overrides read from `CI_GATE_*` variables
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    /// Fail fast from CI_GATE_FAIL_FAST
    pub fail_fast: Option<bool>,
    /// Parallel from CI_GATE_PARALLEL
    pub parallel: Option<bool>,
    /// Pipeline ceiling from CI_GATE_TIMEOUT_MINUTES
    pub timeout_minutes: Option<u64>,
    /// Retries from CI_GATE_MAX_RETRIES
    pub max_retries: Option<u32>,
    /// Concurrency from CI_GATE_MAX_CONCURRENCY
    pub max_concurrency: Option<usize>,
    /// Report format from CI_GATE_REPORT_FORMAT
    pub report_format: Option<String>,
    /// Results directory from CI_GATE_RESULTS_DIR
    pub results_dir: Option<PathBuf>,
    /// Config file from CI_GATE_CONFIG
    pub config_file: Option<String>,
    /// Log level from CI_GATE_LOG
    pub log_level: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self::from_vars(env::vars())
    }

    /// Load from an explicit variable set
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        let get = |name: &str| vars.get(&format!("{ENV_PREFIX}_{name}")).cloned();

        Self {
            fail_fast: get("FAIL_FAST").map(|v| parse_bool(&v)),
            parallel: get("PARALLEL").map(|v| parse_bool(&v)),
            timeout_minutes: get("TIMEOUT_MINUTES").and_then(|v| v.parse().ok()),
            max_retries: get("MAX_RETRIES").and_then(|v| v.parse().ok()),
            max_concurrency: get("MAX_CONCURRENCY").and_then(|v| v.parse().ok()),
            report_format: get("REPORT_FORMAT"),
            results_dir: get("RESULTS_DIR").map(PathBuf::from),
            config_file: get("CONFIG"),
            log_level: get("LOG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        *self != Self::default()
    }

    /// Apply overrides on top of a loaded configuration
    pub fn apply(&self, config: &mut EngineConfig) {
        if let Some(fail_fast) = self.fail_fast {
            config.pipeline.fail_fast = fail_fast;
        }
        if let Some(parallel) = self.parallel {
            config.pipeline.parallel_execution = parallel;
        }
        if let Some(minutes) = self.timeout_minutes {
            config.pipeline.timeout_minutes = minutes;
        }
        if let Some(retries) = self.max_retries {
            config.pipeline.max_retries = retries;
        }
        if let Some(limit) = self.max_concurrency {
            config.execution.max_concurrency = limit;
        }
        if let Some(format) = self.report_format.as_deref().and_then(ReportFormat::from_str) {
            config.pipeline.report_format = format;
        }
        if let Some(dir) = &self.results_dir {
            config.storage.results_dir = Some(dir.clone());
        }
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_FAIL_FAST:        {:?}", ENV_PREFIX, self.fail_fast);
        println!("  {}_PARALLEL:         {:?}", ENV_PREFIX, self.parallel);
        println!("  {}_TIMEOUT_MINUTES:  {:?}", ENV_PREFIX, self.timeout_minutes);
        println!("  {}_MAX_RETRIES:      {:?}", ENV_PREFIX, self.max_retries);
        println!("  {}_MAX_CONCURRENCY:  {:?}", ENV_PREFIX, self.max_concurrency);
        println!("  {}_REPORT_FORMAT:    {:?}", ENV_PREFIX, self.report_format);
        println!("  {}_RESULTS_DIR:      {:?}", ENV_PREFIX, self.results_dir);
        println!("  {}_CONFIG:           {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_LOG:              {:?}", ENV_PREFIX, self.log_level);
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

/// Print all CI_GATE environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_FAIL_FAST        Stop after the first failing gating stage (true/false)");
    println!("  {ENV_PREFIX}_PARALLEL         Allow parallel suites (true/false)");
    println!("  {ENV_PREFIX}_TIMEOUT_MINUTES  Pipeline timeout in minutes");
    println!("  {ENV_PREFIX}_MAX_RETRIES      Default retries per test");
    println!("  {ENV_PREFIX}_MAX_CONCURRENCY  Concurrent tests in a parallel suite");
    println!("  {ENV_PREFIX}_REPORT_FORMAT    Report format (html, json, xml, junit)");
    println!("  {ENV_PREFIX}_RESULTS_DIR      Directory for stored pipeline runs");
    println!("  {ENV_PREFIX}_CONFIG           Path to configuration file");
    println!("  {ENV_PREFIX}_LOG              Log level (trace, debug, info, warn, error)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_FAIL_FAST=false");
    println!("  ci-gate run --trigger commit");
}

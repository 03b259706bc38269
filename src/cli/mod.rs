//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CI test execution and deployment gate
#[derive(Parser, Debug)]
#[command(name = "ci-gate")]
#[command(version)]
#[command(about = "Run staged test pipelines and analyse their history")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full pipeline over the configured suites
    Run(RunArgs),

    /// Execute a single configured suite
    Suite(SuiteArgs),

    /// Analyse stored pipeline history
    Analyze(AnalyzeArgs),

    /// Generate or plan test data
    Data(DataArgs),

    /// View stored pipeline runs
    Results(ResultsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// What started the run (manual, commit, pull_request, scheduled, deployment)
    #[arg(short, long, default_value = "manual")]
    pub trigger: String,

    /// Keep going after a gating stage fails
    #[arg(long)]
    pub no_fail_fast: bool,

    /// Include the deployment validation stage
    #[arg(long)]
    pub deployment: bool,

    /// Write a report to this file
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Report format (html, json, xml, junit); configured format when unset
    #[arg(long)]
    pub report_format: Option<String>,

    /// Console format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Do not persist the run
    #[arg(long)]
    pub no_save: bool,
}

/// Arguments for suite command
#[derive(Parser, Debug)]
pub struct SuiteArgs {
    /// Suite name from the configuration
    pub name: String,

    /// Only run tests with this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Console format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for analyze command
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// Number of most recent runs to analyse
    #[arg(short, long)]
    pub window: Option<usize>,

    /// Results directory (defaults to the configured one)
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Console format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for data command
#[derive(Parser, Debug)]
pub struct DataArgs {
    #[command(subcommand)]
    pub action: DataAction,
}

#[derive(Subcommand, Debug)]
pub enum DataAction {
    /// Generate a data set from a specification file
    Generate {
        /// Specification file (YAML or JSON)
        spec: PathBuf,

        /// Template records (JSON array) registered under the template name it declares
        #[arg(long)]
        template: Option<PathBuf>,

        /// Use batched performance-scale generation
        #[arg(long)]
        performance: bool,

        /// Sort records by this field (performance mode)
        #[arg(long)]
        access_key: Option<String>,

        /// Drop null entries (performance mode)
        #[arg(long)]
        optimize_memory: bool,

        /// Write records here (.json or .csv); summary only when unset
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show how a specification would be split into batches
    Plan {
        /// Specification file (YAML or JSON)
        spec: PathBuf,
    },
}

/// Arguments for results command
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    #[command(subcommand)]
    pub action: ResultsAction,

    /// Results directory (defaults to the configured one)
    #[arg(long, global = true)]
    pub results_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum ResultsAction {
    /// List stored runs, newest first
    List {
        /// Show at most this many runs
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show one run (latest when no id is given)
    Show {
        id: Option<String>,

        /// Console format (table, json, json-pretty, csv, summary)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Export one run to JSON or CSV
    Export {
        id: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// json or csv; inferred from the extension when unset
        #[arg(short, long)]
        format: Option<String>,
    },
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        #[arg(short, long, default_value = "./ci-gate.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show {
        /// yaml or json
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        file: Option<PathBuf>,
    },

    /// Show environment overrides
    Env,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "ci-gate",
            "run",
            "--trigger",
            "commit",
            "--no-fail-fast",
            "--report",
            "out.html",
        ]);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.trigger, "commit");
                assert!(run.no_fail_fast);
                assert_eq!(run.report, Some(PathBuf::from("out.html")));
                assert!(!run.no_save);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = Args::parse_from(["ci-gate", "analyze", "-v", "--config", "ci.yaml"]);
        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("ci.yaml")));
        assert!(matches!(args.command, Command::Analyze(_)));
    }

    #[test]
    fn test_data_generate() {
        let args = Args::parse_from([
            "ci-gate",
            "data",
            "generate",
            "users.yaml",
            "--performance",
            "--access-key",
            "id",
        ]);
        match args.command {
            Command::Data(DataArgs {
                action:
                    DataAction::Generate {
                        spec,
                        performance,
                        access_key,
                        ..
                    },
            }) => {
                assert_eq!(spec, PathBuf::from("users.yaml"));
                assert!(performance);
                assert_eq!(access_key.as_deref(), Some("id"));
            }
            _ => panic!("Expected data generate"),
        }
    }

    #[test]
    fn test_results_show_defaults_to_latest() {
        let args = Args::parse_from(["ci-gate", "results", "show"]);
        match args.command {
            Command::Results(ResultsArgs {
                action: ResultsAction::Show { id, .. },
                ..
            }) => assert!(id.is_none()),
            _ => panic!("Expected results show"),
        }
    }
}

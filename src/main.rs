//! ci-gate - run staged test pipelines and analyse their history
//!
//! ## Usage
//!
//! ```bash
//! # Run the full pipeline over the suites in ./ci-gate.yaml
//! ci-gate run --trigger commit --report report.html
//!
//! # Run one suite
//! ci-gate suite api-smoke
//!
//! # Analyse stored runs
//! ci-gate analyze --window 30
//!
//! # Generate test data from a specification
//! ci-gate data generate users.yaml --output users.csv
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ci_gate::analytics::AnalyticsEngine;
use ci_gate::cli::{self, Args};
use ci_gate::config::{print_env_help, ConfigFile, EnvConfig};
use ci_gate::data::{PerformanceOptions, TestDataManager, TestDataSpecification};
use ci_gate::executor::TestOrchestrator;
use ci_gate::output::{OutputFormat, ResultFormatter};
use ci_gate::pipeline::{PipelineEvent, PipelineRunner, Trigger};
use ci_gate::results::{ExportFormat, ReportFormat, ReportGenerator, ResultsStorage};
use ci_gate::utils::logger::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(LogLevel::from_flags(args.log_level.as_deref(), args.verbose));

    let config = load_config(args.config.as_deref())?;

    match args.command {
        cli::Command::Run(run_args) => {
            let passed = run_pipeline(config, run_args).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        cli::Command::Suite(suite_args) => {
            run_suite(config, suite_args).await?;
        }
        cli::Command::Analyze(analyze_args) => {
            analyze(config, analyze_args)?;
        }
        cli::Command::Data(data_args) => {
            manage_data(config, data_args).await?;
        }
        cli::Command::Results(results_args) => {
            show_results(config, results_args)?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config, args.config.as_deref(), config_args)?;
        }
    }

    Ok(())
}

/// Explicit path, then `CI_GATE_CONFIG`, then the standard locations; env overrides on top
fn load_config(path: Option<&Path>) -> Result<ConfigFile> {
    let env = EnvConfig::load();
    let mut config = match path {
        Some(path) => ConfigFile::load(path)?,
        None => match &env.config_file {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::load_default()?,
        },
    };
    env.apply(&mut config.engine);
    config
        .engine
        .validate()
        .context("Invalid configuration after environment overrides")?;
    Ok(config)
}

fn formatter(format: &str) -> ResultFormatter {
    ResultFormatter::new(OutputFormat::from_str(format).unwrap_or(OutputFormat::Table))
}

async fn build_orchestrator(config: &ConfigFile) -> Arc<TestOrchestrator> {
    let orchestrator = TestOrchestrator::from_config(&config.engine);
    for suite in config.build_suites() {
        orchestrator.add_test_suite(suite).await;
    }
    Arc::new(orchestrator)
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

async fn run_pipeline(config: ConfigFile, args: cli::RunArgs) -> Result<bool> {
    let trigger = Trigger::from_str(&args.trigger)
        .with_context(|| format!("Unknown trigger: {}", args.trigger))?;

    let mut pipeline_config = config.engine.pipeline.clone();
    if args.no_fail_fast {
        pipeline_config.fail_fast = false;
    }
    if args.deployment {
        pipeline_config.include_deployment_validation = true;
    }
    let report_format = match &args.report_format {
        Some(format) => ReportFormat::from_str(format)
            .with_context(|| format!("Unknown report format: {format}"))?,
        None => pipeline_config.report_format,
    };

    let orchestrator = build_orchestrator(&config).await;
    let runner = PipelineRunner::standard(pipeline_config, orchestrator);

    let mut events = runner.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let PipelineEvent::StageCompleted { result, progress, .. } = event {
                info!("[{:3.0}%] {}", progress * 100.0, result);
            }
        }
    });

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);
    let result = runner.run_pipeline_with(trigger, &cancel).await?;

    println!("{}", formatter(&args.format).format_pipeline(&result));

    if !args.no_save {
        let storage = ResultsStorage::from_config(config.engine.storage.results_dir.as_deref());
        let path = storage.save(&result)?;
        info!("Saved run to {}", path.display());
    }
    if let Some(path) = &args.report {
        ReportGenerator::new().write(&result, report_format, path)?;
        println!("Report written to {}", path.display());
    }

    Ok(result.success)
}

async fn run_suite(config: ConfigFile, args: cli::SuiteArgs) -> Result<()> {
    let orchestrator = build_orchestrator(&config).await;
    let Some(mut suite) = orchestrator.suite(&args.name).await else {
        let names = orchestrator.suite_names().await;
        bail!(
            "Unknown suite: {} (configured: {})",
            args.name,
            if names.is_empty() {
                "none".to_string()
            } else {
                names.join(", ")
            }
        );
    };
    if let Some(tag) = &args.tag {
        suite = suite.filter_by_tag(tag);
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);
    let result = orchestrator.execute_test_suite_with(&suite, &cancel).await;
    println!("{}", formatter(&args.format).format_suite(&result));
    Ok(())
}

fn analyze(config: ConfigFile, args: cli::AnalyzeArgs) -> Result<()> {
    let mut engine_config = config.engine;
    if let Some(window) = args.window {
        engine_config.analytics.window_size = window;
    }
    engine_config.analytics.validate()?;

    let dir = args
        .results_dir
        .as_deref()
        .or(engine_config.storage.results_dir.as_deref());
    let storage = ResultsStorage::from_config(dir);
    let report = AnalyticsEngine::from_config(&engine_config).analyze_store(&storage)?;

    if report.runs_analyzed == 0 {
        println!("\nNo stored runs found in {}", storage.base_dir().display());
        println!("   Run a pipeline with: ci-gate run");
        return Ok(());
    }
    println!("{}", formatter(&args.format).format_analytics(&report));
    Ok(())
}

async fn manage_data(config: ConfigFile, args: cli::DataArgs) -> Result<()> {
    let mut manager = TestDataManager::new(config.engine.data.clone());

    match args.action {
        cli::DataAction::Generate {
            spec,
            template,
            performance,
            access_key,
            optimize_memory,
            output,
        } => {
            let spec = TestDataSpecification::load(&spec)?;
            if let Some(path) = template {
                let name = spec
                    .template
                    .clone()
                    .context("--template given but the specification names no template")?;
                manager.load_template(name, path)?;
            }

            let data_set = if performance {
                let options = PerformanceOptions {
                    optimize_memory,
                    access_key,
                };
                let generated = manager.generate_performance_data(&spec, &options).await?;
                println!(
                    "Generated in {} batches of up to {} ({} concurrent)",
                    generated.plan.batch_count, generated.plan.batch_size, generated.plan.concurrency
                );
                for optimization in &generated.optimizations {
                    println!("  - {optimization}");
                }
                generated.data_set
            } else {
                manager.generate_test_data(&spec)?
            };

            println!(
                "✓ {} v{}: {} records ({} strategy) in {}ms, checksum {}",
                spec.id,
                data_set.version,
                data_set.len(),
                data_set.metadata.strategy,
                data_set.metadata.generation_ms,
                data_set.metadata.checksum
            );
            if let Some(path) = output {
                data_set.export(&path)?;
                println!("Records written to {}", path.display());
            }
        }

        cli::DataAction::Plan { spec } => {
            let spec = TestDataSpecification::load(&spec)?;
            let plan = manager.plan_generation(&spec);
            println!("Generation plan for {} ({} records):", spec.id, spec.record_count);
            println!("  Batch size:        {}", plan.batch_size);
            println!("  Batches:           {}", plan.batch_count);
            println!("  Concurrency:       {}", plan.concurrency);
            println!("  Record estimate:   {} bytes", plan.estimated_record_bytes);
            println!(
                "  Total estimate:    {:.1} MiB",
                plan.estimated_total_bytes as f64 / (1024.0 * 1024.0)
            );
        }
    }

    Ok(())
}

fn show_results(config: ConfigFile, args: cli::ResultsArgs) -> Result<()> {
    let dir = args
        .results_dir
        .as_deref()
        .or(config.engine.storage.results_dir.as_deref());
    let storage = ResultsStorage::from_config(dir);

    match args.action {
        cli::ResultsAction::List { limit } => {
            let runs = storage.list_runs()?;
            if runs.is_empty() {
                println!("\n📭 No stored runs found.");
                println!("   Run a pipeline with: ci-gate run");
                return Ok(());
            }
            let shown = &runs[..runs.len().min(limit)];
            println!("{}", ResultFormatter::default().format_runs(shown));
            if runs.len() > shown.len() {
                println!("{} older runs not shown.", runs.len() - shown.len());
            }
        }

        cli::ResultsAction::Show { id, format } => {
            let run = match id {
                Some(id) => storage.load(&id)?,
                None => storage.latest()?.context("No stored runs found")?,
            };
            println!("{}", formatter(&format).format_pipeline(&run));
        }

        cli::ResultsAction::Export { id, output, format } => {
            let format = match format {
                Some(format) => ExportFormat::from_str(&format)
                    .with_context(|| format!("Unknown export format: {format}"))?,
                None => ExportFormat::from_extension(&output).unwrap_or(ExportFormat::Json),
            };
            let run = storage.load(&id)?;
            storage.export(&run, &output, format)?;
            println!("✓ Exported {} to {}", id, output.display());
        }
    }

    Ok(())
}

fn manage_config(config: ConfigFile, path: Option<&Path>, args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }
            ConfigFile::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { format } => {
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Validate { file } => {
            let Some(file) = file
                .or_else(|| path.map(Path::to_path_buf))
                .or_else(ConfigFile::find)
            else {
                bail!("No configuration file found; create one with: ci-gate config init");
            };

            match ConfigFile::load(&file) {
                Ok(loaded) => {
                    println!("✓ Configuration file is valid: {}", file.display());
                    println!("  {} suites defined", loaded.suites.len());
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", file.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }

        cli::ConfigAction::Env => {
            let env = EnvConfig::load();
            if env.has_any() {
                env.print_summary();
            } else {
                print_env_help();
            }
        }
    }

    Ok(())
}

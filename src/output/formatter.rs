//! Console formatters for pipeline runs, suites and analytics
//!
//! Provides table, JSON, CSV and one-line summary output.

use serde::Serialize;

use crate::analytics::{AnalyticsReport, RecommendationPriority, TrendDirection};
use crate::models::{TestResult, TestStatus, TestSuiteResult};
use crate::pipeline::{PipelineResult, StageResult};
use crate::results::RunInfo;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn json<T: Serialize>(&self, value: &T) -> String {
        let rendered = if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_default()
    }

    fn paint(&self, text: &str, color: &str) -> String {
        if self.colorize {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    fn rate_color(rate: f64) -> &'static str {
        if rate >= 0.9 {
            GREEN
        } else if rate >= 0.5 {
            YELLOW
        } else {
            RED
        }
    }

    fn status_label(&self, status: TestStatus) -> String {
        match status {
            TestStatus::Passed => self.paint("✓ PASS", GREEN),
            TestStatus::Failed => self.paint("✗ FAIL", RED),
            TestStatus::Skipped => self.paint("○ SKIP", YELLOW),
        }
    }

    /// Format a single test result
    pub fn format_result(&self, result: &TestResult) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(result),
            OutputFormat::Csv => format!(
                "{},{},{},{},\"{}\"",
                result.test_name,
                result.status,
                result.duration_ms,
                result.attempts,
                result.error.as_deref().unwrap_or("").replace('"', "\"\"")
            ),
            OutputFormat::Summary => result.to_string(),
            OutputFormat::Table => {
                let mut line = format!(
                    "{:28} {} [{:>6}ms]",
                    result.test_name,
                    self.status_label(result.status),
                    result.duration_ms
                );
                if result.attempts > 1 {
                    line.push_str(&format!(" ({} attempts)", result.attempts));
                }
                if let Some(error) = &result.error {
                    line.push_str(&format!(" - {error}"));
                }
                line
            }
        }
    }

    /// Format one suite execution
    pub fn format_suite(&self, suite: &TestSuiteResult) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(suite),
            OutputFormat::Csv => {
                let mut output = String::from("suite,test,status,duration_ms,attempts,message\n");
                for result in &suite.results {
                    output.push_str(&suite.suite_name);
                    output.push(',');
                    output.push_str(&self.format_result(result));
                    output.push('\n');
                }
                output
            }
            OutputFormat::Summary => format!(
                "{} ({}): {}/{} passed, {} skipped ({:.1}%) in {}ms",
                suite.suite_name,
                suite.suite_type,
                suite.passed,
                suite.total,
                suite.skipped,
                suite.pass_rate() * 100.0,
                suite.duration_ms
            ),
            OutputFormat::Table => self.format_suite_table(suite),
        }
    }

    fn format_suite_table(&self, suite: &TestSuiteResult) -> String {
        let mut output = String::new();
        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  {:58}  ║\n",
            format!("{} ({})", suite.suite_name, suite.suite_type)
        ));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        for result in &suite.results {
            output.push_str(&format!("║  {}\n", self.format_result(result)));
        }
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        let rate = suite.pass_rate();
        output.push_str(&format!(
            "║  Total: {:3} | Pass: {} | Fail: {} | Skip: {:3}\n",
            suite.total,
            self.paint(&suite.passed.to_string(), GREEN),
            self.paint(
                &suite.failed.to_string(),
                if suite.failed > 0 { RED } else { GREEN }
            ),
            suite.skipped
        ));
        output.push_str(&format!(
            "║  Pass Rate: {} | Coverage: {:5.1}% | Duration: {}ms{}\n",
            self.paint(&format!("{:5.1}%", rate * 100.0), Self::rate_color(rate)),
            suite.coverage * 100.0,
            suite.duration_ms,
            if suite.cancelled { " | CANCELLED" } else { "" }
        ));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");
        output
    }

    fn format_stage(&self, stage: &StageResult) -> String {
        let status = if stage.success {
            self.paint("✓", GREEN)
        } else {
            self.paint("✗", RED)
        };
        let mut line = format!(
            "│ {} {:26} {:>8}ms",
            status,
            stage.stage.title(),
            stage.duration_ms
        );
        if let Some(error) = &stage.error {
            line.push_str(&format!("  {error}"));
        }
        line
    }

    /// Format a full pipeline run
    pub fn format_pipeline(&self, run: &PipelineResult) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(run),
            OutputFormat::Csv => {
                let mut output = String::from("stage,success,duration_ms,error\n");
                for stage in &run.stage_results {
                    output.push_str(&format!(
                        "{},{},{},\"{}\"\n",
                        stage.stage,
                        stage.success,
                        stage.duration_ms,
                        stage.error.as_deref().unwrap_or("").replace('"', "\"\"")
                    ));
                }
                output
            }
            OutputFormat::Summary => format!(
                "Pipeline {} ({}): {} | score {:.2} | {} stages | {}ms",
                run.id,
                run.trigger,
                if run.success { "PASSED" } else { "FAILED" },
                run.score,
                run.stage_results.len(),
                run.duration_ms
            ),
            OutputFormat::Table => self.format_pipeline_table(run),
        }
    }

    fn format_pipeline_table(&self, run: &PipelineResult) -> String {
        let mut output = String::new();
        output.push_str("\n┌─────────────────────────────────────────────────────────────┐\n");
        output.push_str(&format!("│ Pipeline {} ({})\n", run.id, run.trigger));
        output.push_str("├─────────────────────────────────────────────────────────────┤\n");
        for stage in &run.stage_results {
            output.push_str(&self.format_stage(stage));
            output.push('\n');
        }
        for stage in run.not_attempted() {
            output.push_str(&format!(
                "│ {} {:26} {:>10}\n",
                self.paint("○", YELLOW),
                stage.title(),
                "-"
            ));
        }
        output.push_str("├─────────────────────────────────────────────────────────────┤\n");

        let verdict = if run.success {
            self.paint("PASSED", GREEN)
        } else {
            self.paint("FAILED", RED)
        };
        output.push_str(&format!(
            "│ Result: {} | Score: {} | Tests: {} | Duration: {}ms\n",
            verdict,
            self.paint(&format!("{:.2}", run.score), Self::rate_color(run.score)),
            run.total_tests(),
            run.duration_ms
        ));
        output.push_str("└─────────────────────────────────────────────────────────────┘\n");

        if !run.recommendations.is_empty() {
            output.push_str("\n Recommendations:\n");
            for recommendation in &run.recommendations {
                output.push_str(&format!("   - {recommendation}\n"));
            }
        }
        output
    }

    /// Format a listing of stored runs, newest first
    pub fn format_runs(&self, runs: &[RunInfo]) -> String {
        let mut output = String::new();
        output.push_str("\n┌──────────────────────────────────────┬─────────────┬────────┬───────┬───────┬──────────────────────┐\n");
        output.push_str("│ Run                                  │ Trigger     │ Result │ Score │ Tests │ Timestamp            │\n");
        output.push_str("├──────────────────────────────────────┼─────────────┼────────┼───────┼───────┼──────────────────────┤\n");
        for run in runs {
            let result = if run.success {
                self.paint("PASS  ", GREEN)
            } else {
                self.paint("FAIL  ", RED)
            };
            output.push_str(&format!(
                "│ {:36} │ {:11} │ {} │ {:5.2} │ {:5} │ {:20} │\n",
                run.id,
                run.trigger.to_string(),
                result,
                run.score,
                run.tests,
                run.timestamp.format("%Y-%m-%d %H:%M:%S")
            ));
        }
        output.push_str("└──────────────────────────────────────┴─────────────┴────────┴───────┴───────┴──────────────────────┘\n");
        output
    }

    /// Format an analytics report
    pub fn format_analytics(&self, report: &AnalyticsReport) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(report),
            OutputFormat::Csv => {
                let mut output = String::from("priority,category,title,affected\n");
                for r in &report.recommendations {
                    output.push_str(&format!(
                        "{},{:?},\"{}\",\"{}\"\n",
                        r.priority,
                        r.category,
                        r.title,
                        r.affected.join(";")
                    ));
                }
                output
            }
            OutputFormat::Summary => format!(
                "{} runs: {:.1}% success, {} flaky, {} recommendations",
                report.runs_analyzed,
                report.success_rate * 100.0,
                report.flaky_tests.len(),
                report.recommendations.len()
            ),
            OutputFormat::Table => self.format_analytics_table(report),
        }
    }

    fn format_analytics_table(&self, report: &AnalyticsReport) -> String {
        let mut output = String::new();

        output.push_str("\n═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(" Pipeline Analytics ({} runs)\n", report.runs_analyzed));
        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(
            " Success Rate: {}\n",
            self.paint(
                &format!("{:.1}%", report.success_rate * 100.0),
                Self::rate_color(report.success_rate)
            )
        ));
        output.push_str(&format!(
            " Avg Duration: {:.0}ms\n",
            report.average_duration_ms
        ));
        match report.average_coverage {
            Some(coverage) => {
                output.push_str(&format!(" Avg Coverage: {:.1}%\n", coverage * 100.0))
            }
            None => output.push_str(" Avg Coverage: n/a\n"),
        }
        output.push_str(&format!(" Avg Score:    {:.2}\n\n", report.average_score));

        output.push_str(" Trends:\n");
        output.push_str(" ───────────────────────────────────────────────────────────\n");
        for trend in &report.trends {
            let color = match trend.direction {
                TrendDirection::Improving => GREEN,
                TrendDirection::Stable => RESET,
                TrendDirection::Degrading => RED,
            };
            output.push_str(&format!(
                "   {:18} {} ({:.3} -> {:.3})\n",
                trend.metric,
                self.paint(&format!("{:9}", trend.direction.to_string()), color),
                trend.baseline,
                trend.recent
            ));
        }

        if !report.flaky_tests.is_empty() {
            output.push_str("\n Flaky Tests:\n");
            for flaky in &report.flaky_tests {
                let rate = flaky.failure_rate * 100.0;
                let bar_len = (flaky.failure_rate * 20.0).round() as usize;
                output.push_str(&format!(
                    "   {:30} {}{} {:5.1}% [{}]\n",
                    flaky.name,
                    "█".repeat(bar_len),
                    "░".repeat(20usize.saturating_sub(bar_len)),
                    rate,
                    flaky.severity
                ));
            }
        }

        if !report.recommendations.is_empty() {
            output.push_str("\n Recommendations:\n");
            for recommendation in &report.recommendations {
                let color = match recommendation.priority {
                    RecommendationPriority::Critical => RED,
                    RecommendationPriority::High => YELLOW,
                    _ => RESET,
                };
                output.push_str(&format!(
                    "   {} {}: {}\n",
                    self.paint(&format!("[{}]", recommendation.priority), color),
                    recommendation.title,
                    recommendation.description
                ));
                if !recommendation.affected.is_empty() {
                    output.push_str(&format!("       {}\n", recommendation.affected.join(", ")));
                }
            }
        }
        output
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

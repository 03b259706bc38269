//! Report generation for pipeline results
//!
//! Renders a `PipelineResult` as HTML, JSON, XML or JUnit XML.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::models::{TestStatus, TestSuiteResult};
use crate::pipeline::PipelineResult;

/// Report format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Html,
    #[default]
    Json,
    Xml,
    Junit,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "html" | "htm" => Some(ReportFormat::Html),
            "json" => Some(ReportFormat::Json),
            "xml" => Some(ReportFormat::Xml),
            "junit" => Some(ReportFormat::Junit),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Json => "json",
            ReportFormat::Xml | ReportFormat::Junit => "xml",
        }
    }
}

/// Report generator
#[derive(Clone, Copy, Debug, Default)]
pub struct ReportGenerator;

impl ReportGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Render a pipeline run in the given format
    pub fn render(&self, result: &PipelineResult, format: ReportFormat) -> Result<String> {
        let mut output = String::new();
        match format {
            ReportFormat::Json => {
                return serde_json::to_string_pretty(result).context("Failed to serialize report")
            }
            ReportFormat::Html => self.format_html_report(&mut output, result)?,
            ReportFormat::Xml => self.format_xml_report(&mut output, result)?,
            ReportFormat::Junit => self.format_junit_report(&mut output, result)?,
        }
        Ok(output)
    }

    /// Render and write to a file
    pub fn write(
        &self,
        result: &PipelineResult,
        format: ReportFormat,
        path: &std::path::Path,
    ) -> Result<()> {
        let content = self.render(result, format)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write report: {}", path.display()))
    }

    fn format_html_report(&self, output: &mut String, run: &PipelineResult) -> std::fmt::Result {
        writeln!(
            output,
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Pipeline Report - {}</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 40px; background: #f5f5f5; }}
        .container {{ max-width: 1200px; margin: 0 auto; background: white; padding: 40px; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }}
        h1 {{ color: #333; border-bottom: 2px solid #007bff; padding-bottom: 10px; }}
        h2 {{ color: #555; margin-top: 30px; }}
        table {{ width: 100%; border-collapse: collapse; margin: 20px 0; }}
        th, td {{ padding: 12px; text-align: left; border-bottom: 1px solid #ddd; }}
        th {{ background: #007bff; color: white; }}
        .pass {{ color: #28a745; font-weight: bold; }}
        .fail {{ color: #dc3545; font-weight: bold; }}
        .skip {{ color: #6c757d; }}
        .stat-card {{ display: inline-block; background: #f8f9fa; padding: 20px; margin: 10px; border-radius: 8px; min-width: 150px; text-align: center; }}
        .stat-value {{ font-size: 24px; font-weight: bold; color: #007bff; }}
        .stat-label {{ color: #666; font-size: 14px; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Pipeline Report</h1>
        <div class="stat-card"><div class="stat-value {}">{}</div><div class="stat-label">Result</div></div>
        <div class="stat-card"><div class="stat-value">{:.2}</div><div class="stat-label">Score</div></div>
        <div class="stat-card"><div class="stat-value">{}</div><div class="stat-label">Trigger</div></div>
        <div class="stat-card"><div class="stat-value">{}ms</div><div class="stat-label">Duration</div></div>

        <h2>Stages</h2>
        <table>
            <tr><th>Stage</th><th>Result</th><th>Duration</th><th>Error</th></tr>"#,
            escape(&run.id),
            if run.success { "pass" } else { "fail" },
            if run.success { "PASSED" } else { "FAILED" },
            run.score,
            run.trigger,
            run.duration_ms
        )?;

        for stage in &run.stage_results {
            let (class, label) = if stage.success {
                ("pass", "PASS")
            } else {
                ("fail", "FAIL")
            };
            writeln!(
                output,
                r#"            <tr><td>{}</td><td class="{}">{}</td><td>{}ms</td><td>{}</td></tr>"#,
                stage.stage.title(),
                class,
                label,
                stage.duration_ms,
                escape(stage.error.as_deref().unwrap_or(""))
            )?;
        }
        for stage in run.not_attempted() {
            writeln!(
                output,
                r#"            <tr><td>{}</td><td class="skip">NOT ATTEMPTED</td><td>-</td><td></td></tr>"#,
                stage.title()
            )?;
        }
        writeln!(output, "        </table>")?;

        for suite in &run.suite_results {
            writeln!(
                output,
                r#"
        <h2>Suite {} ({})</h2>
        <table>
            <tr><th>Test</th><th>Status</th><th>Duration</th><th>Attempts</th><th>Error</th></tr>"#,
                escape(&suite.suite_name),
                suite.suite_type
            )?;
            for result in &suite.results {
                let class = match result.status {
                    TestStatus::Passed => "pass",
                    TestStatus::Failed => "fail",
                    TestStatus::Skipped => "skip",
                };
                writeln!(
                    output,
                    r#"            <tr><td>{}</td><td class="{}">{}</td><td>{}ms</td><td>{}</td><td>{}</td></tr>"#,
                    escape(&result.test_name),
                    class,
                    result.status,
                    result.duration_ms,
                    result.attempts,
                    escape(result.error.as_deref().unwrap_or(""))
                )?;
            }
            writeln!(output, "        </table>")?;
        }

        writeln!(output, "\n        <h2>Recommendations</h2>\n        <ul>")?;
        for recommendation in &run.recommendations {
            writeln!(output, "            <li>{}</li>", escape(recommendation))?;
        }
        writeln!(
            output,
            r#"        </ul>
        <p class="stat-label">Generated {}</p>
    </div>
</body>
</html>"#,
            format_datetime(&run.timestamp)
        )
    }

    fn format_xml_report(&self, output: &mut String, run: &PipelineResult) -> std::fmt::Result {
        writeln!(output, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(
            output,
            r#"<pipeline id="{}" trigger="{}" timestamp="{}" success="{}" score="{:.4}" durationMs="{}">"#,
            escape(&run.id),
            run.trigger,
            run.timestamp.to_rfc3339(),
            run.success,
            run.score,
            run.duration_ms
        )?;

        writeln!(output, "  <stages>")?;
        for stage in &run.stage_results {
            write!(
                output,
                r#"    <stage name="{}" success="{}" durationMs="{}""#,
                stage.stage, stage.success, stage.duration_ms
            )?;
            if stage.details.is_empty() && stage.error.is_none() {
                writeln!(output, "/>")?;
                continue;
            }
            writeln!(output, ">")?;
            if let Some(error) = &stage.error {
                writeln!(output, "      <error>{}</error>", escape(error))?;
            }
            for (key, value) in &stage.details {
                writeln!(
                    output,
                    r#"      <detail key="{}">{}</detail>"#,
                    escape(key),
                    escape(&value.to_string())
                )?;
            }
            writeln!(output, "    </stage>")?;
        }
        for stage in run.not_attempted() {
            writeln!(output, r#"    <stage name="{stage}" attempted="false"/>"#)?;
        }
        writeln!(output, "  </stages>")?;

        writeln!(output, "  <recommendations>")?;
        for recommendation in &run.recommendations {
            writeln!(
                output,
                "    <recommendation>{}</recommendation>",
                escape(recommendation)
            )?;
        }
        writeln!(output, "  </recommendations>")?;
        writeln!(output, "</pipeline>")
    }

    fn format_junit_report(&self, output: &mut String, run: &PipelineResult) -> std::fmt::Result {
        let tests: usize = run.suite_results.iter().map(|s| s.total).sum();
        let failures: usize = run.suite_results.iter().map(|s| s.failed).sum();
        let skipped: usize = run.suite_results.iter().map(|s| s.skipped).sum();

        writeln!(output, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(
            output,
            r#"<testsuites name="{}" tests="{}" failures="{}" skipped="{}" time="{}">"#,
            escape(&run.id),
            tests,
            failures,
            skipped,
            seconds(run.duration_ms)
        )?;
        for suite in &run.suite_results {
            self.format_junit_suite(output, suite)?;
        }
        writeln!(output, "</testsuites>")
    }

    fn format_junit_suite(&self, output: &mut String, suite: &TestSuiteResult) -> std::fmt::Result {
        writeln!(
            output,
            r#"  <testsuite name="{}" tests="{}" failures="{}" skipped="{}" time="{}" timestamp="{}">"#,
            escape(&suite.suite_name),
            suite.total,
            suite.failed,
            suite.skipped,
            seconds(suite.duration_ms),
            suite.started_at.to_rfc3339()
        )?;
        for result in &suite.results {
            write!(
                output,
                r#"    <testcase classname="{}.{}" name="{}" time="{}""#,
                suite.suite_type,
                escape(&suite.suite_name),
                escape(&result.test_name),
                seconds(result.duration_ms)
            )?;
            match result.status {
                TestStatus::Passed => writeln!(output, "/>")?,
                TestStatus::Failed => {
                    let kind = result
                        .failure_kind
                        .map(|k| k.to_string())
                        .unwrap_or_else(|| "failure".to_string());
                    let message = escape(result.error.as_deref().unwrap_or(""));
                    writeln!(output, ">")?;
                    writeln!(
                        output,
                        r#"      <failure type="{kind}" message="{message}">{message}</failure>"#
                    )?;
                    writeln!(output, "    </testcase>")?;
                }
                TestStatus::Skipped => {
                    writeln!(output, ">")?;
                    writeln!(
                        output,
                        r#"      <skipped message="{}"/>"#,
                        escape(result.error.as_deref().unwrap_or(""))
                    )?;
                    writeln!(output, "    </testcase>")?;
                }
            }
        }
        writeln!(output, "  </testsuite>")
    }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn seconds(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

/// Escape text for HTML and XML output
fn escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureKind, SuiteType, TestOutcome, TestResult};
    use crate::pipeline::{PipelineStage, StageResult, Trigger};

    fn sample() -> PipelineResult {
        let suite = TestSuiteResult::new(
            "suite_1",
            "core",
            SuiteType::Unit,
            vec![
                TestResult::pass("parses <input>", 3, TestOutcome::default()),
                TestResult::fail("rejects", 4, FailureKind::Failure, "expected \"a\" & \"b\""),
                TestResult::skip("late", "skipped after critical test 'rejects' failed"),
            ],
            7,
            Utc::now(),
        );
        PipelineResult {
            id: "pipeline_1".into(),
            timestamp: Utc::now(),
            trigger: Trigger::PullRequest,
            duration_ms: 1500,
            success: false,
            stage_results: vec![
                StageResult::passed(PipelineStage::Preparation, 1),
                StageResult::failed(PipelineStage::UnitTesting, 7, "1 of 3 tests failed"),
            ],
            score: 0.5,
            recommendations: vec!["Fix failing unit tests.".into()],
            planned_stages: vec![
                PipelineStage::Preparation,
                PipelineStage::UnitTesting,
                PipelineStage::IntegrationTesting,
            ],
            suite_results: vec![suite],
        }
    }

    #[test]
    fn test_report_format() {
        assert_eq!(ReportFormat::from_str("JUnit"), Some(ReportFormat::Junit));
        assert_eq!(ReportFormat::from_str("htm"), Some(ReportFormat::Html));
        assert!(ReportFormat::from_str("markdown").is_none());
        assert_eq!(ReportFormat::Junit.extension(), "xml");
    }

    #[test]
    fn test_json_report_parses_back() {
        let run = sample();
        let json = ReportGenerator::new().render(&run, ReportFormat::Json).unwrap();
        let parsed: PipelineResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, run);
    }

    #[test]
    fn test_junit_report() {
        let xml = ReportGenerator::new().render(&sample(), ReportFormat::Junit).unwrap();
        assert!(xml.contains(r#"<testsuites name="pipeline_1" tests="3" failures="1" skipped="1" time="1.500">"#));
        assert!(xml.contains("parses &lt;input&gt;"));
        assert!(xml.contains(r#"<failure type="failure""#));
        assert!(xml.contains("&quot;a&quot; &amp; &quot;b&quot;"));
        assert!(xml.contains("<skipped message="));
    }

    #[test]
    fn test_xml_report_marks_not_attempted() {
        let xml = ReportGenerator::new().render(&sample(), ReportFormat::Xml).unwrap();
        assert!(xml.contains(r#"<stage name="integration-testing" attempted="false"/>"#));
        assert!(xml.contains("<recommendation>Fix failing unit tests.</recommendation>"));
    }

    #[test]
    fn test_html_report() {
        let html = ReportGenerator::new().render(&sample(), ReportFormat::Html).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("NOT ATTEMPTED"));
        assert!(html.contains("Unit Testing"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a<b>&'c'"), "a&lt;b&gt;&amp;&apos;c&apos;");
    }
}

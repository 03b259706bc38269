//! Runnable test cases
//!
//! A test case is a name, a priority, tags and an operation. Operations run
//! either in-process (an async closure) or as an external command in a child
//! process. Child processes are killed when the attempt is dropped, which is
//! the only way to stop a test that never observes its cancellation token.

use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::test_result::{PerformanceMetrics, TestOutcome};

/// Marker printed by command tests to report coverage (`CI_GATE_COVERAGE=0.82`)
pub const COVERAGE_MARKER: &str = "CI_GATE_COVERAGE=";

/// Test priority
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Per-attempt context handed to every test operation
///
/// Long-running operations are expected to poll [`TestContext::checkpoint`]
/// or select on [`TestContext::cancelled`]; an operation that does neither
/// keeps running until its next await point after a timeout fires.
#[derive(Clone, Debug)]
pub struct TestContext {
    test_name: String,
    attempt: u32,
    cancel: CancellationToken,
}

impl TestContext {
    pub fn new(test_name: impl Into<String>, attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            test_name: test_name.into(),
            attempt,
            cancel,
        }
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the attempt is cancelled or timed out
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Fail early when the attempt has been cancelled
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!("{} cancelled at checkpoint", self.test_name);
        }
        Ok(())
    }
}

/// In-process test body
pub type TestFn = Arc<dyn Fn(TestContext) -> BoxFuture<'static, Result<TestOutcome>> + Send + Sync>;

/// External command executed as a test
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    async fn run(self, ctx: TestContext) -> Result<TestOutcome> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!("{}: spawning {} {:?}", ctx.test_name(), self.program, self.args);

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        // Dropping the output future on cancellation drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output.context("Failed to wait for test process")?,
            _ = ctx.cancelled() => bail!("{} cancelled", self.program),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = last_line(&stderr).or_else(|| last_line(&stdout));
            match detail {
                Some(line) => bail!("{} exited with {}: {}", self.program, output.status, line),
                None => bail!("{} exited with {}", self.program, output.status),
            }
        }

        let coverage = stdout
            .lines()
            .find_map(|line| line.trim().strip_prefix(COVERAGE_MARKER))
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0);

        Ok(TestOutcome::default().with_coverage(coverage))
    }
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[derive(Clone)]
enum Operation {
    InProcess(TestFn),
    Command(CommandSpec),
}

/// A single runnable test
#[derive(Clone)]
pub struct TestCase {
    name: String,
    priority: Priority,
    tags: Vec<String>,
    timeout: Option<Duration>,
    operation: Operation,
}

impl TestCase {
    /// Create an in-process test from an async closure
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TestOutcome>> + Send + 'static,
    {
        let body: TestFn = Arc::new(move |ctx| f(ctx).boxed());
        Self {
            name: name.into(),
            priority: Priority::default(),
            tags: Vec::new(),
            timeout: None,
            operation: Operation::InProcess(body),
        }
    }

    /// Create a test that runs an external command; exit status 0 passes
    pub fn command(name: impl Into<String>, spec: CommandSpec) -> Self {
        Self {
            name: name.into(),
            priority: Priority::default(),
            tags: Vec::new(),
            timeout: None,
            operation: Operation::Command(spec),
        }
    }

    /// Test that always passes with the given coverage
    pub fn passing(name: impl Into<String>, coverage: f64) -> Self {
        Self::new(name, move |_| async move {
            Ok::<_, anyhow::Error>(TestOutcome::default().with_coverage(coverage))
        })
    }

    /// Test that always fails with the given message
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::new(name, move |_| {
            let message = message.clone();
            async move { Err::<TestOutcome, _>(anyhow::anyhow!(message)) }
        })
    }

    /// Test that passes and reports performance metrics
    pub fn measured(name: impl Into<String>, metrics: PerformanceMetrics) -> Self {
        Self::new(name, move |_| async move {
            Ok::<_, anyhow::Error>(TestOutcome::default().with_metrics(metrics))
        })
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Override the suite timeout for this test
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_critical(&self) -> bool {
        self.priority == Priority::Critical
    }

    pub fn is_command(&self) -> bool {
        matches!(self.operation, Operation::Command(_))
    }

    /// Start one attempt of the operation
    pub fn invoke(&self, ctx: TestContext) -> BoxFuture<'static, Result<TestOutcome>> {
        match &self.operation {
            Operation::InProcess(body) => body(ctx),
            Operation::Command(spec) => spec.clone().run(ctx).boxed(),
        }
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("tags", &self.tags)
            .field("timeout", &self.timeout)
            .field("command", &self.is_command())
            .finish()
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.priority)
    }
}

//! Pipeline runner
//!
//! Executes the planned stages in their fixed order under a wall-clock
//! ceiling. State is published on a `watch` channel and every transition is
//! broadcast as a `PipelineEvent`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{PipelineEvent, PipelineState};
use super::recommend::generate_recommendations;
use super::stage::{
    compute_score, PipelineResult, PipelineStage, StageOutcome, StageResult, Trigger,
};
use super::stages::{
    DeploymentValidationStage, PerformanceStage, PreparationStage, QualityStage, SecurityStage,
    StageContext, StageExecutor, SuiteStage,
};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::executor::TestOrchestrator;
use crate::models::{ExecutionKind, ExecutionStatus, TestExecution};
use crate::utils::timer::Stopwatch;

const EVENT_BUFFER: usize = 128;
/// How long in-flight stages get to wind down after the ceiling is hit
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Runs pipelines over one orchestrator
pub struct PipelineRunner {
    config: PipelineConfig,
    orchestrator: Arc<TestOrchestrator>,
    stages: Vec<Box<dyn StageExecutor>>,
    events: broadcast::Sender<PipelineEvent>,
    state: watch::Sender<PipelineState>,
}

impl PipelineRunner {
    /// Runner with no stages
    pub fn new(config: PipelineConfig, orchestrator: Arc<TestOrchestrator>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (state, _) = watch::channel(PipelineState::default());
        Self {
            config,
            orchestrator,
            stages: Vec::new(),
            events,
            state,
        }
    }

    /// Runner with the default executor for every stage
    pub fn standard(config: PipelineConfig, orchestrator: Arc<TestOrchestrator>) -> Self {
        Self::new(config, orchestrator)
            .with_stage(PreparationStage::new().with_check(super::capabilities::SuitesRegistered))
            .with_stage(SuiteStage::unit())
            .with_stage(SuiteStage::integration())
            .with_stage(PerformanceStage::default())
            .with_stage(SecurityStage::default())
            .with_stage(QualityStage::default())
            .with_stage(DeploymentValidationStage::new())
    }

    /// Add or replace the executor for a stage; execution order is the stage order
    pub fn with_stage(mut self, executor: impl StageExecutor + 'static) -> Self {
        let stage = executor.stage();
        self.stages.retain(|s| s.stage() != stage);
        self.stages.push(Box::new(executor));
        self.stages.sort_by_key(|s| s.stage());
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<TestOrchestrator> {
        &self.orchestrator
    }

    /// Stages a run will attempt, in order
    pub fn planned_stages(&self) -> Vec<PipelineStage> {
        self.stages
            .iter()
            .map(|s| s.stage())
            .filter(|s| {
                *s != PipelineStage::Completed
                    && (*s != PipelineStage::DeploymentValidation
                        || self.config.include_deployment_validation)
            })
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub async fn run_pipeline(&self, trigger: Trigger) -> Result<PipelineResult, PipelineError> {
        self.run_pipeline_with(trigger, &CancellationToken::new())
            .await
    }

    /// Run the pipeline; cancelling `parent` cancels the run
    pub async fn run_pipeline_with(
        &self,
        trigger: Trigger,
        parent: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        self.config.validate()?;

        let execution = TestExecution::new(ExecutionKind::Pipeline, format!("pipeline ({trigger})"));
        let id = execution.id.clone();
        let token = parent.child_token();
        let registry = self.orchestrator.registry();
        if let Err(e) = registry.register(execution, token.clone()).await {
            warn!("Pipeline {} runs untracked: {}", id, e);
        }

        let planned = self.planned_stages();
        info!(
            "Starting pipeline {} ({}), {} stages planned",
            id,
            trigger,
            planned.len()
        );
        self.state.send_replace(PipelineState {
            execution_id: Some(id.clone()),
            trigger: Some(trigger),
            running: true,
            ..Default::default()
        });
        let _ = self.events.send(PipelineEvent::Started {
            id: id.clone(),
            trigger,
            planned: planned.clone(),
        });

        let ceiling = self.config.timeout();
        let run = self.run_stages(&id, trigger, &planned, &token);
        tokio::pin!(run);

        let outcome = tokio::select! {
            biased;
            outcome = &mut run => outcome,
            _ = tokio::time::sleep(ceiling) => {
                error!("Pipeline {} exceeded {:?}, cancelling in-flight work", id, ceiling);
                token.cancel();
                if tokio::time::timeout(CANCEL_GRACE, &mut run).await.is_err() {
                    warn!("Pipeline {} did not stop within {:?}, abandoning it", id, CANCEL_GRACE);
                }
                Err(PipelineError::Timeout(ceiling))
            }
        };

        let status = match &outcome {
            Ok(result) if result.success => ExecutionStatus::Passed,
            Err(PipelineError::Cancelled) => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Failed,
        };
        if let Err(e) = registry.complete(&id, status).await {
            debug!("Could not complete pipeline {}: {}", id, e);
        }

        self.state.send_modify(|state| state.running = false);
        match &outcome {
            Ok(result) => {
                info!(
                    "Pipeline {} {} (score {:.2}) in {}ms",
                    id,
                    if result.success { "passed" } else { "failed" },
                    result.score,
                    result.duration_ms
                );
                let _ = self
                    .events
                    .send(PipelineEvent::Completed(Box::new(result.clone())));
            }
            Err(e) => {
                error!("Pipeline {} aborted: {}", id, e);
                let _ = self.events.send(PipelineEvent::aborted(&id, e));
            }
        }

        outcome
    }

    async fn run_stages(
        &self,
        id: &str,
        trigger: Trigger,
        planned: &[PipelineStage],
        token: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        let timestamp = Utc::now();
        let mut stopwatch = Stopwatch::new();
        let mut ctx = StageContext::new(
            id,
            self.orchestrator.clone(),
            self.config.clone(),
            token.clone(),
        );

        for executor in self.stages.iter().filter(|s| planned.contains(&s.stage())) {
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let stage = executor.stage();
            info!("▶ {}", stage.title());
            self.state
                .send_modify(|state| state.current_stage = Some(stage));
            let _ = self.events.send(PipelineEvent::StageStarted {
                id: id.to_string(),
                stage,
            });

            stopwatch.reset_lap();
            let outcome = match executor.execute(&mut ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("{} errored: {:#}", stage.title(), e);
                    StageOutcome::failed(format!("{e:#}"))
                }
            };

            // an interrupted stage is not recorded
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let elapsed = stopwatch.lap(stage.name());
            let result = StageResult::new(stage, elapsed.as_millis() as u64, outcome);
            if result.success {
                info!("✓ {} ({}ms)", stage.title(), result.duration_ms);
            } else {
                warn!(
                    "✗ {}: {}",
                    stage.title(),
                    result.error.as_deref().unwrap_or("failed")
                );
            }
            ctx.stage_results.push(result.clone());

            let completed = ctx.stage_results.len();
            let progress = completed as f64 / planned.len() as f64;
            self.state.send_modify(|state| {
                state.completed_stages = completed;
                state.progress = state.progress.max(progress);
            });
            let _ = self.events.send(PipelineEvent::StageCompleted {
                id: id.to_string(),
                result: result.clone(),
                progress,
            });

            if !result.success && self.config.fail_fast && stage.is_gating() {
                if stage == PipelineStage::Preparation {
                    return Err(PipelineError::PreparationFailed(
                        result
                            .error
                            .unwrap_or_else(|| "preparation failed".to_string()),
                    ));
                }
                warn!("Fail-fast: skipping stages after {}", stage.title());
                break;
            }
        }

        let StageContext {
            stage_results,
            suite_results,
            ..
        } = ctx;
        let score = compute_score(&stage_results);
        let recommendations = generate_recommendations(&stage_results, planned);
        let success = stage_results.len() == planned.len() && stage_results.iter().all(|r| r.success);

        self.state.send_modify(|state| {
            state.current_stage = Some(PipelineStage::Completed);
            state.progress = 1.0;
        });
        debug!("Stage timings for {}:\n{}", id, stopwatch.format());

        Ok(PipelineResult {
            id: id.to_string(),
            timestamp,
            trigger,
            duration_ms: stopwatch.total().as_millis() as u64,
            success,
            stage_results,
            score,
            recommendations,
            planned_stages: planned.to_vec(),
            suite_results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::models::{SuiteType, TestCase, TestSuite};
    use crate::pipeline::capabilities::SuitesRegistered;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn orchestrator_with_suites() -> Arc<TestOrchestrator> {
        let orchestrator = Arc::new(TestOrchestrator::new(ExecutionConfig {
            backoff_ms: 1,
            ..Default::default()
        }));
        orchestrator
            .add_test_suite(
                TestSuite::new("core", SuiteType::Unit)
                    .with_test(TestCase::passing("parse", 0.9))
                    .with_test(TestCase::failing("render", "assertion failed")),
            )
            .await;
        orchestrator
            .add_test_suite(
                TestSuite::new("api", SuiteType::Integration)
                    .with_test(TestCase::passing("health", 0.9))
                    .with_test(TestCase::passing("login", 0.9)),
            )
            .await;
        orchestrator
    }

    fn three_stage(config: PipelineConfig, orchestrator: Arc<TestOrchestrator>) -> PipelineRunner {
        PipelineRunner::new(config, orchestrator)
            .with_stage(SuiteStage::integration())
            .with_stage(PreparationStage::new())
            .with_stage(SuiteStage::unit())
    }

    /// Stage with a fixed outcome
    struct Fixed(PipelineStage, bool);

    #[async_trait]
    impl StageExecutor for Fixed {
        fn stage(&self) -> PipelineStage {
            self.0
        }

        async fn execute(&self, _ctx: &mut StageContext) -> anyhow::Result<StageOutcome> {
            Ok(if self.1 {
                StageOutcome::passed()
            } else {
                StageOutcome::failed("fixed failure")
            })
        }
    }

    /// Stage that signals when it starts and then waits for cancellation
    struct Hang(Mutex<Option<oneshot::Sender<()>>>);

    #[async_trait]
    impl StageExecutor for Hang {
        fn stage(&self) -> PipelineStage {
            PipelineStage::UnitTesting
        }

        async fn execute(&self, ctx: &mut StageContext) -> anyhow::Result<StageOutcome> {
            let started = self.0.lock().unwrap().take();
            if let Some(tx) = started {
                let _ = tx.send(());
            }
            ctx.cancel.cancelled().await;
            Ok(StageOutcome::failed("interrupted"))
        }
    }

    /// Stage that never looks at its cancellation token
    struct Unresponsive;

    #[async_trait]
    impl StageExecutor for Unresponsive {
        fn stage(&self) -> PipelineStage {
            PipelineStage::UnitTesting
        }

        async fn execute(&self, _ctx: &mut StageContext) -> anyhow::Result<StageOutcome> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(StageOutcome::passed())
        }
    }

    #[tokio::test]
    async fn test_fail_fast_stops_after_failed_unit_stage() {
        let config = PipelineConfig {
            fail_fast: true,
            ..Default::default()
        };
        let runner = three_stage(config, orchestrator_with_suites().await);

        let result = runner.run_pipeline(Trigger::Commit).await.unwrap();

        assert_eq!(result.stage_results.len(), 2);
        assert_eq!(result.stage_results[0].stage, PipelineStage::Preparation);
        assert!(result.stage_results[0].success);
        assert_eq!(result.stage_results[1].stage, PipelineStage::UnitTesting);
        assert!(!result.stage_results[1].success);
        assert!(!result.success);
        assert_eq!(result.score, 0.5);
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.contains("Fix failing unit tests.")));
        assert_eq!(result.not_attempted(), vec![PipelineStage::IntegrationTesting]);
        assert_eq!(result.error(), Some(PipelineError::UnitTestsFailed));
    }

    #[tokio::test]
    async fn test_without_fail_fast_all_stages_run() {
        let config = PipelineConfig {
            fail_fast: false,
            ..Default::default()
        };
        let runner = three_stage(config, orchestrator_with_suites().await);

        let result = runner.run_pipeline(Trigger::Manual).await.unwrap();

        assert_eq!(result.stage_results.len(), 3);
        let integration = result.stage(PipelineStage::IntegrationTesting).unwrap();
        assert!(integration.success);
        assert!(!result.success);
        assert!((result.score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.suite_results.len(), 2);
        assert!(result.not_attempted().is_empty());
    }

    #[tokio::test]
    async fn test_preparation_failure_is_an_error_under_fail_fast() {
        let orchestrator = Arc::new(TestOrchestrator::new(ExecutionConfig::default()));
        let runner = PipelineRunner::new(PipelineConfig::default(), orchestrator.clone())
            .with_stage(PreparationStage::new().with_check(SuitesRegistered))
            .with_stage(SuiteStage::unit());

        let err = runner.run_pipeline(Trigger::Manual).await.unwrap_err();
        assert!(matches!(err, PipelineError::PreparationFailed(ref reason) if reason.contains("no test suites")));
        assert!(orchestrator.active_executions().await.is_empty());

        // without fail-fast the failure is data
        let runner = PipelineRunner::new(
            PipelineConfig {
                fail_fast: false,
                ..Default::default()
            },
            orchestrator,
        )
        .with_stage(PreparationStage::new().with_check(SuitesRegistered));
        let result = runner.run_pipeline(Trigger::Manual).await.unwrap();
        assert!(matches!(result.error(), Some(PipelineError::PreparationFailed(_))));
    }

    #[tokio::test]
    async fn test_diagnostic_stages_never_abort() {
        let orchestrator = Arc::new(TestOrchestrator::new(ExecutionConfig::default()));
        let runner = PipelineRunner::new(PipelineConfig::default(), orchestrator)
            .with_stage(Fixed(PipelineStage::PerformanceTesting, false))
            .with_stage(Fixed(PipelineStage::SecurityTesting, false))
            .with_stage(Fixed(PipelineStage::CodeQuality, true));

        let result = runner.run_pipeline(Trigger::Scheduled).await.unwrap();
        assert_eq!(result.stage_results.len(), 3);
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.contains("security vulnerabilities")));
    }

    #[tokio::test]
    async fn test_deployment_validation_only_when_configured() {
        let orchestrator = Arc::new(TestOrchestrator::new(ExecutionConfig::default()));
        let runner = PipelineRunner::standard(PipelineConfig::default(), orchestrator.clone());
        assert!(!runner
            .planned_stages()
            .contains(&PipelineStage::DeploymentValidation));
        assert_eq!(runner.planned_stages().len(), 6);

        let runner = PipelineRunner::standard(
            PipelineConfig {
                include_deployment_validation: true,
                ..Default::default()
            },
            orchestrator,
        );
        assert_eq!(
            runner.planned_stages().last(),
            Some(&PipelineStage::DeploymentValidation)
        );
    }

    #[tokio::test]
    async fn test_events_and_state() {
        let orchestrator = Arc::new(TestOrchestrator::new(ExecutionConfig::default()));
        let runner = PipelineRunner::new(PipelineConfig::default(), orchestrator)
            .with_stage(Fixed(PipelineStage::Preparation, true))
            .with_stage(Fixed(PipelineStage::UnitTesting, true));
        let mut events = runner.subscribe();
        let state = runner.state();

        let result = runner.run_pipeline(Trigger::PullRequest).await.unwrap();
        assert!(result.success);
        assert_eq!(result.score, 1.0);

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        assert_eq!(received.len(), 6);
        assert!(matches!(received[0], PipelineEvent::Started { .. }));
        let progress: Vec<f64> = received
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StageCompleted { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![0.5, 1.0]);
        match received.last() {
            Some(PipelineEvent::Completed(completed)) => assert_eq!(completed.id, result.id),
            other => panic!("expected completion event, got {other:?}"),
        }

        let snapshot = state.borrow().clone();
        assert!(!snapshot.running);
        assert_eq!(snapshot.progress, 1.0);
        assert_eq!(snapshot.current_stage, Some(PipelineStage::Completed));
        assert_eq!(snapshot.execution_id.as_deref(), Some(result.id.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_in_flight_work() {
        let orchestrator = Arc::new(TestOrchestrator::new(ExecutionConfig::default()));
        let config = PipelineConfig {
            timeout_minutes: 1,
            ..Default::default()
        };
        let runner = PipelineRunner::new(config, orchestrator.clone())
            .with_stage(Hang(Mutex::new(None)));
        let mut events = runner.subscribe();

        let err = runner.run_pipeline(Trigger::Manual).await.unwrap_err();
        assert_eq!(err, PipelineError::Timeout(Duration::from_secs(60)));
        assert!(orchestrator.active_executions().await.is_empty());

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert!(matches!(last, Some(PipelineEvent::Aborted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_when_a_stage_ignores_cancellation() {
        let orchestrator = Arc::new(TestOrchestrator::new(ExecutionConfig::default()));
        let config = PipelineConfig {
            timeout_minutes: 1,
            ..Default::default()
        };
        let runner = PipelineRunner::new(config, orchestrator.clone()).with_stage(Unresponsive);

        let started = tokio::time::Instant::now();
        let err = runner.run_pipeline(Trigger::Manual).await.unwrap_err();

        assert_eq!(err, PipelineError::Timeout(Duration::from_secs(60)));
        assert!(started.elapsed() <= Duration::from_secs(60) + CANCEL_GRACE);
        assert!(orchestrator.active_executions().await.is_empty());
        assert!(!runner.state().borrow().running);
    }

    #[tokio::test]
    async fn test_cancel_through_registry() {
        let orchestrator = Arc::new(TestOrchestrator::new(ExecutionConfig::default()));
        let (tx, rx) = oneshot::channel();
        let runner = Arc::new(
            PipelineRunner::new(PipelineConfig::default(), orchestrator.clone())
                .with_stage(Fixed(PipelineStage::Preparation, true))
                .with_stage(Hang(Mutex::new(Some(tx)))),
        );

        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run_pipeline(Trigger::Manual).await })
        };

        rx.await.unwrap();
        let active = orchestrator.active_executions().await;
        let pipeline = active
            .iter()
            .find(|e| e.kind == ExecutionKind::Pipeline)
            .unwrap();
        orchestrator.cancel_execution(&pipeline.id).await.unwrap();

        assert_eq!(handle.await.unwrap().unwrap_err(), PipelineError::Cancelled);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let orchestrator = Arc::new(TestOrchestrator::new(ExecutionConfig::default()));
        let runner = PipelineRunner::new(
            PipelineConfig {
                min_pass_rate: 1.5,
                ..Default::default()
            },
            orchestrator,
        );
        assert!(matches!(
            runner.run_pipeline(Trigger::Manual).await,
            Err(PipelineError::Configuration(_))
        ));
    }
}

// harness/src/runner.rs
// Scenario runner: launches the agent, drives scenarios, always cleans up

use crate::agent_config::AgentConfig;
use crate::config::HarnessConfig;
use crate::error::*;
use crate::probe::ProcessProbe;
use crate::report::{
    Details, Environment, Report, ReportSummary, ResourceMonitoring, RunOutcome, ScenarioRecord,
    ScenarioResult, TimeWindow,
};
use crate::sampler::{SampleLog, Sampler};
use crate::scenarios::{self, HarnessContext, ScenarioKind, ScenarioOutput, Suite};
use crate::stats::summarize_resources;
use crate::supervisor::ProcessSupervisor;
use crate::workload::{OperationExecutor, SimulatedExecutor, WorkloadGenerator};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Called with every result as soon as it is recorded
pub type Observer = Box<dyn Fn(&ScenarioRecord) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Starting,
    Running { index: usize, name: &'static str },
    Finalizing,
    Done,
    Aborted { reason: String },
}

impl RunnerState {
    fn can_transition_to(&self, next: &RunnerState) -> bool {
        use RunnerState::*;
        match (self, next) {
            (Idle, Starting) => true,
            (Starting, Running { index: 0, .. }) => true,
            (Running { index: i, .. }, Running { index: j, .. }) => *j == i + 1,
            (Starting, Finalizing) | (Running { .. }, Finalizing) => true,
            (Finalizing, Done) | (Finalizing, Aborted { .. }) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunnerState::Done | RunnerState::Aborted { .. })
    }
}

/// Orchestrates one run of scenarios against a supervised agent.
///
/// `Aborted` is entered only after `Finalizing` has released the agent, the
/// sampler and the scratch directory.
pub struct ScenarioRunner {
    binary: PathBuf,
    config: HarnessConfig,
    agent_config: Option<PathBuf>,
    scratch_root: PathBuf,
    executor: Option<Arc<dyn OperationExecutor>>,
    observer: Option<Observer>,
    cancel: CancellationToken,
    state: RunnerState,
    history: Vec<RunnerState>,
}

impl ScenarioRunner {
    pub fn new(binary: impl Into<PathBuf>, config: HarnessConfig) -> Self {
        Self {
            binary: binary.into(),
            config,
            agent_config: None,
            scratch_root: std::env::temp_dir(),
            executor: None,
            observer: None,
            cancel: CancellationToken::new(),
            state: RunnerState::Idle,
            history: vec![RunnerState::Idle],
        }
    }

    /// Use an existing agent config instead of writing a test one.
    pub fn with_agent_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.agent_config = Some(path.into());
        self
    }

    /// Directory the per-run scratch dir is created in. Defaults to the
    /// system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    /// Replace the simulated executor.
    pub fn with_executor(mut self, executor: Arc<dyn OperationExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ScenarioRecord) + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> &RunnerState {
        &self.state
    }

    /// Every state entered so far, in order
    pub fn history(&self) -> &[RunnerState] {
        &self.history
    }

    fn transition(&mut self, next: RunnerState) {
        if !self.state.can_transition_to(&next) {
            // Programming error in the runner itself; keep going but make it loud
            error!("Invalid runner transition {:?} -> {:?}", self.state, next);
        }
        debug!("Runner state {:?} -> {:?}", self.state, next);
        self.state = next.clone();
        self.history.push(next);
    }

    /// Run every scenario of `suite`.
    pub async fn run(&mut self, suite: Suite) -> Result<Report> {
        let kinds = suite.scenarios();
        self.run_scenarios(suite, &kinds).await
    }

    /// Run `kinds` in order and build the report.
    ///
    /// Scenario failures are recorded, never returned. Errors are returned
    /// only when the scratch directory cannot be created or cleaned up.
    #[instrument(skip_all, fields(suite = %suite))]
    pub async fn run_scenarios(&mut self, suite: Suite, kinds: &[ScenarioKind]) -> Result<Report> {
        if self.state != RunnerState::Idle {
            return Err(HarnessError::Setup("runner has already been used".to_string()));
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut environment = Environment::capture(&self.binary);
        let mut results: Vec<ScenarioRecord> = Vec::with_capacity(kinds.len());

        info!("🧪 Starting {} run {} ({} scenarios)", suite, run_id, kinds.len());
        self.transition(RunnerState::Starting);

        let scratch = match tempfile::Builder::new()
            .prefix("agent-harness-")
            .tempdir_in(&self.scratch_root)
        {
            Ok(scratch) => scratch,
            Err(e) => {
                let err = HarnessError::Infrastructure(format!("cannot create scratch dir: {}", e));
                error!("❌ {}", err);
                // Nothing was launched yet, so there is nothing to release
                self.transition(RunnerState::Finalizing);
                self.transition(RunnerState::Aborted {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };
        environment.scratch_dir = Some(scratch.path().to_path_buf());

        let (mut ctx, mut abort) = self.start(scratch.path().to_path_buf()).await;
        environment.agent_config = Some(ctx.agent_config.clone());

        if abort.is_none() {
            for (index, kind) in kinds.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    warn!("Run interrupted before {}", kind);
                    abort = Some("interrupted".to_string());
                    break;
                }
                if let Err(e) = ctx.check_scratch() {
                    error!("❌ {}", e);
                    abort = Some(e.to_string());
                    break;
                }

                self.transition(RunnerState::Running {
                    index,
                    name: kind.name(),
                });

                let (record, fatal) = run_one(*kind, &mut ctx).await;
                results.push(record);
                if let (Some(observer), Some(record)) = (&self.observer, results.last()) {
                    observer(record);
                }
                if let Some(e) = fatal {
                    error!("❌ Aborting run after {}: {}", kind, e);
                    abort = Some(e.to_string());
                    break;
                }
            }
        }

        self.transition(RunnerState::Finalizing);
        let monitoring = finalize(&mut ctx).await;

        let scratch_path = scratch.path().to_path_buf();
        let cleanup = match scratch.close() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HarnessError::Infrastructure(format!(
                "failed to remove scratch dir {}: {}",
                scratch_path.display(),
                e
            ))),
        };

        let outcome = match abort {
            Some(reason) => {
                self.transition(RunnerState::Aborted {
                    reason: reason.clone(),
                });
                RunOutcome::Aborted { reason }
            }
            None => {
                self.transition(RunnerState::Done);
                RunOutcome::Completed
            }
        };
        cleanup?;

        let report = Report {
            run_id,
            suite,
            started_at,
            summary: ReportSummary::compute(&results, clock.elapsed()),
            results,
            environment,
            resource_monitoring: monitoring,
            outcome,
        };
        info!(
            "🏁 Run finished: {}/{} passed, grade {}",
            report.summary.passed, report.summary.total_tests, report.summary.grade
        );
        Ok(report)
    }

    /// Write the agent config, launch the agent and start sampling.
    /// Returns the context plus an abort reason when launch failed.
    async fn start(&self, scratch: PathBuf) -> (HarnessContext, Option<String>) {
        let log = Arc::new(SampleLog::new());
        let executor = self
            .executor
            .clone()
            .unwrap_or_else(|| Arc::new(SimulatedExecutor::new(&self.config.workload)));
        let mut workload = WorkloadGenerator::new(executor);
        if let Some(seed) = self.config.workload.seed {
            workload = workload.with_seed(seed);
        }

        let mut ctx = HarnessContext {
            config: self.config.clone(),
            supervisor: ProcessSupervisor::new(&self.binary)
                .with_log_dir(&scratch)
                .with_startup_grace(self.config.agent.startup_grace()),
            agent: None,
            sampler: Sampler::new(Arc::clone(&log)),
            log,
            agent_config: self.agent_config.clone().unwrap_or_default(),
            scratch,
            workload,
            probe: ProcessProbe::new(),
            cancel: self.cancel.clone(),
        };

        if self.agent_config.is_none() {
            match AgentConfig::default().write_to(&ctx.scratch) {
                Ok(path) => ctx.agent_config = path,
                Err(e) => return (ctx, Some(e.to_string())),
            }
        }

        match ctx.supervisor.start(&ctx.start_args()).await {
            Ok(handle) => {
                let pid = handle.pid;
                ctx.agent = Some(handle);
                ctx.sampler.start(pid, ctx.config.sampling.interval()).await;
                (ctx, None)
            }
            Err(e) => {
                error!("❌ Agent launch failed: {}", e);
                (ctx, Some(e.to_string()))
            }
        }
    }
}

/// Execute one scenario and turn its outcome into a record. The second
/// value carries a fatal error that must end the run.
async fn run_one(kind: ScenarioKind, ctx: &mut HarnessContext) -> (ScenarioRecord, Option<HarnessError>) {
    info!("▶️  {}", kind);
    let start = Utc::now();
    let clock = Instant::now();
    let mut details = Details::new();

    let result = scenarios::execute(kind, ctx, &mut details).await;

    let end = Utc::now();
    let base = ScenarioResult {
        name: kind.name().to_string(),
        success: result.is_ok(),
        duration: clock.elapsed(),
        details,
        error: result.as_ref().err().map(|e| e.to_string()),
        window: TimeWindow { start, end },
    };

    match result {
        Ok(ScenarioOutput::Basic) => (ScenarioRecord::Basic(base), None),
        Ok(ScenarioOutput::Load(run)) => {
            let usage = summarize_resources(ctx.log.window(start, end).iter());
            let record = run.into_record(base, usage, ctx.config.scenarios.min_success_rate);
            (record, None)
        }
        Err(e) if e.is_fatal() => (ScenarioRecord::Basic(base), Some(e)),
        Err(e) => {
            warn!("Scenario {} failed: {}", kind, e);
            if kind.is_load() {
                let record = scenarios::LoadRun {
                    outcomes: Vec::new(),
                    elapsed: base.duration,
                    error_limit: 0,
                    memory_trend: None,
                    interrupted: None,
                }
                .into_record(base, summarize_resources(ctx.log.window(start, end).iter()), 1.0);
                (record, None)
            } else {
                (ScenarioRecord::Basic(base), None)
            }
        }
    }
}

/// Stop the sampler and the agent. Never fails; problems are logged.
async fn finalize(ctx: &mut HarnessContext) -> ResourceMonitoring {
    ctx.sampler.stop().await;

    if let Some(handle) = ctx.agent.as_mut() {
        let graceful = ctx
            .supervisor
            .stop(handle, ctx.config.agent.cleanup_grace())
            .await;
        if !graceful {
            warn!("Agent {} had to be killed during cleanup", handle.pid);
        }
    }

    let samples = ctx.log.snapshot();
    let monitoring_duration = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => span(first.timestamp, last.timestamp),
        _ => std::time::Duration::ZERO,
    };
    ResourceMonitoring {
        total_samples: samples.len(),
        monitoring_duration,
    }
}

fn span(start: DateTime<Utc>, end: DateTime<Utc>) -> std::time::Duration {
    (end - start).to_std().unwrap_or_default()
}

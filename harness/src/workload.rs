// harness/src/workload.rs
// Synthetic operations and the generator that drives them against an executor

use crate::config::WorkloadConfig;
use crate::error::OperationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument};

/// A product scan as a scanner would report it
#[derive(Debug, Clone, Serialize)]
pub struct ScanEvent {
    pub product_id: String,
    pub scanner_id: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: IndexMap<String, serde_json::Value>,
}

/// A transaction handed to the network for broadcast
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub transaction_id: String,
    pub payload_size: usize,
    pub priority: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Scan(ScanEvent),
    Submission(Submission),
}

impl Operation {
    /// Short identifier used in error samples
    pub fn label(&self) -> String {
        match self {
            Operation::Scan(scan) => format!("scan {}", scan.product_id),
            Operation::Submission(sub) => format!("submission {}", sub.transaction_id),
        }
    }
}

/// Latency and result of one executed operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationOutcome {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
}

impl OperationOutcome {
    /// Outcome for an operation that never ran because its worker died
    pub fn aborted(reason: &str) -> Self {
        Self {
            started_at: Utc::now(),
            duration: Duration::ZERO,
            success: false,
            error: Some(reason.to_string()),
        }
    }
}

/// Performs one operation. Implementations take some latency and either
/// succeed or fail with an [`OperationError`].
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, operation: &Operation) -> Result<(), OperationError>;
}

/// Stand-in for the agent's scan pipeline and network client: random
/// latency inside a fixed range plus a fixed failure probability.
pub struct SimulatedExecutor {
    scan_latency: Range<Duration>,
    scan_failure_probability: f64,
    submission_latency: Range<Duration>,
    submission_failure_probability: f64,
    rng: Mutex<fastrand::Rng>,
}

impl SimulatedExecutor {
    pub fn new(config: &WorkloadConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Self {
            scan_latency: config.scan_latency(),
            scan_failure_probability: config.scan_failure_probability,
            submission_latency: config.submission_latency(),
            submission_failure_probability: config.submission_failure_probability,
            rng: Mutex::new(rng),
        }
    }

    fn draw(&self, latency: &Range<Duration>, failure_probability: f64) -> (Duration, bool) {
        let mut rng = self.rng.lock();
        (
            uniform(&mut rng, latency.start, latency.end),
            rng.f64() < failure_probability,
        )
    }
}

#[async_trait]
impl OperationExecutor for SimulatedExecutor {
    async fn execute(&self, operation: &Operation) -> Result<(), OperationError> {
        let (latency, fails, what) = match operation {
            Operation::Scan(_) => {
                let (l, f) = self.draw(&self.scan_latency, self.scan_failure_probability);
                (l, f, "Simulated scan processing failure")
            }
            Operation::Submission(_) => {
                let (l, f) = self.draw(&self.submission_latency, self.submission_failure_probability);
                (l, f, "Simulated network failure")
            }
        };

        tokio::time::sleep(latency).await;

        if fails {
            Err(OperationError::new(operation.label(), what))
        } else {
            Ok(())
        }
    }
}

/// Delay inserted after every operation a worker runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pacing {
    None,
    Fixed(Duration),
    /// Uniform in `0..=max`
    Jitter(Duration),
}

impl Pacing {
    fn delay(&self, rng: &mut fastrand::Rng) -> Duration {
        match *self {
            Pacing::None => Duration::ZERO,
            Pacing::Fixed(d) => d,
            Pacing::Jitter(max) => uniform(rng, Duration::ZERO, max),
        }
    }
}

fn uniform(rng: &mut fastrand::Rng, low: Duration, high: Duration) -> Duration {
    let (lo, hi) = (low.as_micros() as u64, high.as_micros() as u64);
    if hi <= lo {
        return low;
    }
    Duration::from_micros(rng.u64(lo..=hi))
}

/// Runs batches of operations sequentially or across concurrent workers
#[derive(Clone)]
pub struct WorkloadGenerator {
    executor: Arc<dyn OperationExecutor>,
    seed: u64,
}

impl WorkloadGenerator {
    pub fn new(executor: Arc<dyn OperationExecutor>) -> Self {
        Self {
            executor,
            seed: fastrand::u64(..),
        }
    }

    /// Fix the seed used for pacing jitter.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Execute one operation and time it. Never fails.
    pub async fn execute_one(&self, operation: &Operation) -> OperationOutcome {
        timed(self.executor.as_ref(), operation).await
    }

    /// Execute every operation in order. A failed operation is recorded and
    /// the batch carries on.
    #[instrument(skip(self, operations), fields(count = operations.len()))]
    pub async fn run_sequential(&self, operations: &[Operation], pacing: Pacing) -> Vec<OperationOutcome> {
        let mut rng = fastrand::Rng::with_seed(self.seed);
        let mut outcomes = Vec::with_capacity(operations.len());

        for (i, operation) in operations.iter().enumerate() {
            outcomes.push(self.execute_one(operation).await);
            pause(pacing.delay(&mut rng)).await;

            if (i + 1) % 100 == 0 {
                debug!("Processed {}/{} operations", i + 1, operations.len());
            }
        }

        outcomes
    }

    /// Split `operations` into `concurrency` contiguous partitions and run
    /// each on its own task. Outcomes of one worker stay in order; workers
    /// are concatenated in partition order.
    ///
    /// A worker that dies contributes a failed outcome for every operation it
    /// had not finished, so the result always has `operations.len()` entries.
    #[instrument(skip(self, operations), fields(count = operations.len()))]
    pub async fn run_concurrent(
        &self,
        operations: Vec<Operation>,
        concurrency: usize,
        pacing: Pacing,
    ) -> Vec<OperationOutcome> {
        let total = operations.len();
        let partitions = partition(operations, concurrency.max(1));

        let mut sinks = Vec::with_capacity(partitions.len());
        let mut tasks = Vec::with_capacity(partitions.len());

        for (worker_id, partition) in partitions.into_iter().enumerate() {
            let sink = Arc::new(Mutex::new(Vec::with_capacity(partition.len())));
            let executor = Arc::clone(&self.executor);
            let worker_sink = Arc::clone(&sink);
            let seed = self.seed ^ (worker_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);

            sinks.push((partition.len(), sink));
            tasks.push(tokio::spawn(async move {
                let mut rng = fastrand::Rng::with_seed(seed);
                for operation in &partition {
                    let outcome = timed(executor.as_ref(), operation).await;
                    worker_sink.lock().push(outcome);
                    pause(pacing.delay(&mut rng)).await;
                }
            }));
        }

        let joined = join_all(tasks).await;

        let mut outcomes = Vec::with_capacity(total);
        for (worker_id, ((assigned, sink), joined)) in sinks.into_iter().zip(joined).enumerate() {
            let mut finished = std::mem::take(&mut *sink.lock());
            if let Err(e) = joined {
                let missing = assigned.saturating_sub(finished.len());
                error!(
                    "Worker {} failed after {}/{} operations: {}",
                    worker_id,
                    finished.len(),
                    assigned,
                    e
                );
                let reason = format!("worker {} failed: {}", worker_id, e);
                finished.extend((0..missing).map(|_| OperationOutcome::aborted(&reason)));
            }
            outcomes.append(&mut finished);
        }

        outcomes
    }
}

async fn timed(executor: &dyn OperationExecutor, operation: &Operation) -> OperationOutcome {
    let started_at = Utc::now();
    let clock = Instant::now();
    let result = executor.execute(operation).await;
    OperationOutcome {
        started_at,
        duration: clock.elapsed(),
        success: result.is_ok(),
        error: result.err().map(|e| e.to_string()),
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Balanced contiguous split; the first `len % parts` partitions get one extra.
fn partition<T>(items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    let base = items.len() / parts;
    let extra = items.len() % parts;
    let mut iter = items.into_iter();
    (0..parts)
        .map(|i| {
            let take = base + usize::from(i < extra);
            iter.by_ref().take(take).collect()
        })
        .collect()
}

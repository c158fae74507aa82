// harness/src/scenarios/load.rs
// Throughput, soak and stress scenarios

use super::{HarnessContext, ScenarioOutput};
use crate::error::*;
use crate::report::{Details, LoadResourceUsage, LoadTestResult, ScenarioRecord, ScenarioResult};
use crate::stats::{self, detect_memory_trend, MemoryTrend, ResourceUsage};
use crate::workload::{Operation, OperationOutcome, Pacing, ScanEvent, Submission};
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Raw material of a load scenario, reduced by the runner once the
/// scenario window has closed.
#[derive(Debug, Clone)]
pub struct LoadRun {
    pub outcomes: Vec<OperationOutcome>,
    pub elapsed: Duration,
    pub error_limit: usize,
    pub memory_trend: Option<MemoryTrend>,
    /// Set when the run ended before all operations were issued
    pub interrupted: Option<String>,
}

impl LoadRun {
    fn new(outcomes: Vec<OperationOutcome>, elapsed: Duration, error_limit: usize) -> Self {
        Self {
            outcomes,
            elapsed,
            error_limit,
            memory_trend: None,
            interrupted: None,
        }
    }

    /// Build the load record. Success requires the success rate to reach
    /// `min_success_rate` and the run to have finished.
    pub fn into_record(
        self,
        mut base: ScenarioResult,
        resource_usage: ResourceUsage,
        min_success_rate: f64,
    ) -> ScenarioRecord {
        let latency = stats::reduce_latencies(&self.outcomes);
        let ops_per_second = stats::throughput(latency.successful, self.elapsed.as_secs_f64());
        let errors: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|o| o.error.clone())
            .take(self.error_limit)
            .collect();

        base.success = base.error.is_none() && latency.success_rate >= min_success_rate;
        match self.interrupted {
            Some(reason) => {
                base.success = false;
                base.error.get_or_insert(reason);
            }
            None if !base.success && base.error.is_none() => {
                base.error = Some(format!(
                    "Success rate {:.1}% below required {:.1}%",
                    latency.success_rate * 100.0,
                    min_success_rate * 100.0
                ));
            }
            None => {}
        }

        info!(
            "📊 {}: {} ops, {:.1} ops/s, {:.1}% success, p95 {:.1}ms",
            base.name,
            latency.count,
            ops_per_second,
            latency.success_rate * 100.0,
            latency.p95_ms
        );

        let usage = LoadResourceUsage {
            window: resource_usage,
            memory_trend: self.memory_trend,
        };
        ScenarioRecord::Load(LoadTestResult::new(base, &latency, ops_per_second, errors, usage))
    }
}

fn scan(product_id: String, scanner_id: String, metadata: IndexMap<String, serde_json::Value>) -> Operation {
    Operation::Scan(ScanEvent {
        product_id,
        scanner_id,
        timestamp: Utc::now(),
        metadata,
    })
}

fn meta(pairs: &[(&str, serde_json::Value)]) -> IndexMap<String, serde_json::Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub async fn scan_throughput(ctx: &mut HarnessContext, details: &mut Details) -> Result<ScenarioOutput> {
    let count = ctx.config.scenarios.scan_count;
    details.insert("scan_count".into(), json!(count));

    let operations: Vec<Operation> = (0..count)
        .map(|i| {
            scan(
                format!("PERF-TEST-{:06}", i),
                format!("perf-scanner-{}", i % 10),
                meta(&[("test_batch", json!("throughput")), ("sequence", json!(i))]),
            )
        })
        .collect();

    let clock = Instant::now();
    let outcomes = ctx.workload.run_sequential(&operations, Pacing::None).await;
    Ok(ScenarioOutput::Load(LoadRun::new(
        outcomes,
        clock.elapsed(),
        ctx.config.scenarios.error_sample_limit,
    )))
}

pub async fn concurrent_scanners(ctx: &mut HarnessContext, details: &mut Details) -> Result<ScenarioOutput> {
    let scanners = ctx.config.scenarios.concurrent_scanners;
    let per_scanner = ctx.config.scenarios.scans_per_scanner;
    details.insert("concurrent_scanners".into(), json!(scanners));
    details.insert("scans_per_scanner".into(), json!(per_scanner));

    // Scanner-major order so each worker partition is one scanner
    let operations: Vec<Operation> = (0..scanners)
        .flat_map(|s| {
            (0..per_scanner).map(move |i| {
                scan(
                    format!("CONC-{:02}-{:03}", s, i),
                    format!("concurrent-scanner-{:02}", s),
                    meta(&[("scanner_id", json!(s)), ("scan_index", json!(i))]),
                )
            })
        })
        .collect();

    let jitter = Pacing::Jitter(Duration::from_millis(ctx.config.scenarios.scanner_jitter_max_ms));
    let clock = Instant::now();
    let outcomes = ctx.workload.run_concurrent(operations, scanners, jitter).await;
    Ok(ScenarioOutput::Load(LoadRun::new(
        outcomes,
        clock.elapsed(),
        ctx.config.scenarios.error_sample_limit,
    )))
}

pub async fn submission_throughput(ctx: &mut HarnessContext, details: &mut Details) -> Result<ScenarioOutput> {
    let count = ctx.config.scenarios.submission_count;
    details.insert("submission_count".into(), json!(count));

    let mut rng = match ctx.config.workload.seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    };
    let operations: Vec<Operation> = (0..count)
        .map(|i| {
            Operation::Submission(Submission {
                transaction_id: format!("perf-tx-{:06}", i),
                payload_size: rng.usize(100..=5000),
                priority: "normal".to_string(),
            })
        })
        .collect();

    let clock = Instant::now();
    let outcomes = ctx.workload.run_sequential(&operations, Pacing::None).await;
    Ok(ScenarioOutput::Load(LoadRun::new(
        outcomes,
        clock.elapsed(),
        ctx.config.scenarios.error_sample_limit,
    )))
}

/// Steady scan rate for a fixed duration while snapshotting agent memory.
pub async fn memory_soak(ctx: &mut HarnessContext, details: &mut Details) -> Result<ScenarioOutput> {
    let cfg = ctx.config.scenarios.clone();
    let total = (cfg.soak_duration_secs * cfg.soak_ops_per_minute / 60) as usize;
    let period = Duration::from_secs_f64(60.0 / cfg.soak_ops_per_minute.max(1) as f64);
    let snapshot_every = cfg.soak_snapshot_every.max(1);

    details.insert("duration_secs".into(), json!(cfg.soak_duration_secs));
    details.insert("target_ops_per_minute".into(), json!(cfg.soak_ops_per_minute));
    details.insert("planned_operations".into(), json!(total));

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut outcomes = Vec::with_capacity(total);
    let mut memory_mb = Vec::new();
    let mut interrupted = None;
    let clock = Instant::now();

    for i in 0..total {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                interrupted = Some("Memory soak interrupted".to_string());
                break;
            }
            _ = ticker.tick() => {}
        }

        if i % snapshot_every == 0 {
            match ctx.probe_agent() {
                Ok(sample) => memory_mb.push(sample.memory_mb()),
                Err(e) => {
                    warn!("Agent disappeared during memory soak: {}", e);
                    interrupted = Some(format!("Agent process exited during memory soak: {}", e));
                    break;
                }
            }
        }

        let operation = scan(
            format!("MEM-TEST-{:06}", i),
            "memory-test-scanner".to_string(),
            meta(&[("memory_test", json!(true))]),
        );
        outcomes.push(ctx.workload.execute_one(&operation).await);
    }

    details.insert("memory_snapshots".into(), json!(memory_mb.len()));

    let mut run = LoadRun::new(outcomes, clock.elapsed(), cfg.error_sample_limit);
    run.memory_trend = Some(detect_memory_trend(&memory_mb));
    run.interrupted = interrupted;
    Ok(ScenarioOutput::Load(run))
}

pub async fn stress_burst(ctx: &mut HarnessContext, details: &mut Details) -> Result<ScenarioOutput> {
    let workers = ctx.config.scenarios.stress_workers;
    let per_worker = ctx.config.scenarios.stress_ops_per_worker;
    details.insert("workers".into(), json!(workers));
    details.insert("ops_per_worker".into(), json!(per_worker));

    let operations: Vec<Operation> = (0..workers)
        .flat_map(|w| {
            (0..per_worker).map(move |op| {
                scan(
                    format!("STRESS-{:03}-{:03}", w, op),
                    format!("stress-scanner-{}", w),
                    meta(&[("stress_test", json!(true))]),
                )
            })
        })
        .collect();

    let delay = Pacing::Fixed(Duration::from_millis(ctx.config.scenarios.stress_delay_ms));
    let clock = Instant::now();
    let outcomes = ctx.workload.run_concurrent(operations, workers, delay).await;
    Ok(ScenarioOutput::Load(LoadRun::new(
        outcomes,
        clock.elapsed(),
        ctx.config.scenarios.stress_error_sample_limit,
    )))
}

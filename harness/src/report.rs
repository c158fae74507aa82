// harness/src/report.rs
// Result records and the final run report

use crate::error::*;
use crate::scenarios::Suite;
use crate::stats::{Grade, LatencySummary, MemoryTrend, ResourceUsage};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Detail mapping attached to every result, in insertion order
pub type Details = IndexMap<String, Value>;

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Wall-clock interval a scenario ran in
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
    pub details: Details,
    pub error: Option<String>,
    pub window: TimeWindow,
}

/// Result of a throughput scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadTestResult {
    #[serde(flatten)]
    pub base: ScenarioResult,
    pub total_operations: usize,
    pub operations_per_second: f64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    /// First few error messages only
    pub errors: Vec<String>,
    pub resource_usage: LoadResourceUsage,
}

/// Resource figures of a load scenario's window, plus the memory trend for
/// scenarios that snapshot memory as they go
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadResourceUsage {
    #[serde(flatten)]
    pub window: ResourceUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_trend: Option<MemoryTrend>,
}

impl From<ResourceUsage> for LoadResourceUsage {
    fn from(window: ResourceUsage) -> Self {
        Self {
            window,
            memory_trend: None,
        }
    }
}

impl LoadTestResult {
    pub fn new(
        base: ScenarioResult,
        latency: &LatencySummary,
        operations_per_second: f64,
        errors: Vec<String>,
        resource_usage: impl Into<LoadResourceUsage>,
    ) -> Self {
        Self {
            base,
            total_operations: latency.count,
            operations_per_second,
            success_rate: latency.success_rate,
            avg_latency_ms: latency.avg_ms,
            p95_latency_ms: latency.p95_ms,
            p99_latency_ms: latency.p99_ms,
            errors,
            resource_usage: resource_usage.into(),
        }
    }
}

/// One entry of the report's result list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioRecord {
    Basic(ScenarioResult),
    Load(LoadTestResult),
}

impl ScenarioRecord {
    pub fn base(&self) -> &ScenarioResult {
        match self {
            ScenarioRecord::Basic(result) => result,
            ScenarioRecord::Load(load) => &load.base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn success(&self) -> bool {
        self.base().success
    }

    pub fn as_load(&self) -> Option<&LoadTestResult> {
        match self {
            ScenarioRecord::Load(load) => Some(load),
            ScenarioRecord::Basic(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percent of scenarios that passed
    pub pass_rate: f64,
    #[serde(serialize_with = "as_secs")]
    pub total_time: Duration,
    pub total_operations: usize,
    pub avg_throughput: f64,
    pub avg_success_rate: f64,
    pub grade: Grade,
}

impl ReportSummary {
    pub fn compute(results: &[ScenarioRecord], total_time: Duration) -> Self {
        let total_tests = results.len();
        let passed = results.iter().filter(|r| r.success()).count();
        let loads: Vec<&LoadTestResult> = results.iter().filter_map(ScenarioRecord::as_load).collect();

        let (avg_throughput, avg_success_rate, grade) = if loads.is_empty() {
            (0.0, 0.0, Grade::D)
        } else {
            let n = loads.len() as f64;
            let throughput = loads.iter().map(|l| l.operations_per_second).sum::<f64>() / n;
            let success = loads.iter().map(|l| l.success_rate).sum::<f64>() / n;
            (throughput, success, Grade::from_averages(success, throughput))
        };

        Self {
            total_tests,
            passed,
            failed: total_tests - passed,
            pass_rate: if total_tests > 0 {
                passed as f64 / total_tests as f64 * 100.0
            } else {
                0.0
            },
            total_time,
            total_operations: loads.iter().map(|l| l.total_operations).sum(),
            avg_throughput,
            avg_success_rate,
            grade,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Environment {
    pub os: String,
    pub arch: String,
    pub cpu_count: usize,
    pub total_memory_gb: f64,
    pub harness_version: String,
    pub agent_binary: PathBuf,
    pub agent_config: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
}

impl Environment {
    pub fn capture(agent_binary: &Path) -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_memory();

        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_count: num_cpus::get(),
            total_memory_gb: system.total_memory() as f64 / 1024.0 / 1024.0 / 1024.0,
            harness_version: env!("CARGO_PKG_VERSION").to_string(),
            agent_binary: agent_binary.to_path_buf(),
            agent_config: None,
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceMonitoring {
    pub total_samples: usize,
    #[serde(serialize_with = "as_secs")]
    pub monitoring_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Aborted { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: Uuid,
    pub suite: Suite,
    pub started_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub results: Vec<ScenarioRecord>,
    pub environment: Environment,
    pub resource_monitoring: ResourceMonitoring,
    pub outcome: RunOutcome,
}

impl Report {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(ScenarioRecord::success)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted { .. })
    }

    /// Process exit code for this run.
    ///
    /// Aborted runs exit 2. The performance suite maps its grade to 0/1/2;
    /// other suites exit 0 only when every scenario passed.
    pub fn exit_code(&self) -> i32 {
        if self.is_aborted() {
            return 2;
        }
        match self.suite {
            Suite::Performance => match self.summary.grade {
                Grade::A => 0,
                Grade::B => 1,
                Grade::C | Grade::D => 2,
            },
            _ => {
                if self.all_passed() {
                    0
                } else {
                    1
                }
            }
        }
    }

    pub fn result(&self, name: &str) -> Option<&ScenarioRecord> {
        self.results.iter().find(|r| r.name() == name)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| HarnessError::Serialization {
            context: "run report".to_string(),
            source: Box::new(e),
        })
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)
            .map_err(|e| HarnessError::io(format!("write report {}", path.display()), e))?;
        info!("📄 Report saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ResourceSummary;

    fn basic(name: &str, success: bool) -> ScenarioRecord {
        let now = Utc::now();
        ScenarioRecord::Basic(ScenarioResult {
            name: name.to_string(),
            success,
            duration: Duration::from_millis(1500),
            details: Details::new(),
            error: (!success).then(|| "boom".to_string()),
            window: TimeWindow { start: now, end: now },
        })
    }

    fn load(name: &str, throughput: f64, success_rate: f64) -> ScenarioRecord {
        let base = match basic(name, true) {
            ScenarioRecord::Basic(base) => base,
            ScenarioRecord::Load(_) => unreachable!(),
        };
        let latency = LatencySummary {
            count: 100,
            successful: (success_rate * 100.0) as usize,
            success_rate,
            avg_ms: 50.0,
            p95_ms: 90.0,
            p99_ms: 99.0,
        };
        ScenarioRecord::Load(LoadTestResult::new(base, &latency, throughput, vec![], ResourceUsage::NoData))
    }

    fn report(suite: Suite, results: Vec<ScenarioRecord>, outcome: RunOutcome) -> Report {
        Report {
            run_id: Uuid::new_v4(),
            suite,
            started_at: Utc::now(),
            summary: ReportSummary::compute(&results, Duration::from_secs(10)),
            results,
            environment: Environment::capture(Path::new("/bin/agent")),
            resource_monitoring: ResourceMonitoring {
                total_samples: 0,
                monitoring_duration: Duration::ZERO,
            },
            outcome,
        }
    }

    #[test]
    fn test_summary_counts_and_grade() {
        let results = vec![
            basic("Installation", true),
            basic("Configuration", false),
            load("Scan Throughput", 150.0, 1.0),
            load("Stress Burst", 50.0, 0.96),
        ];
        let summary = ReportSummary::compute(&results, Duration::from_secs(3));

        assert_eq!(summary.total_tests, 4);
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pass_rate, 75.0);
        assert_eq!(summary.total_operations, 200);
        assert_eq!(summary.avg_throughput, 100.0);
        assert_eq!(summary.grade, Grade::B);
    }

    #[test]
    fn test_no_load_results_grade_d() {
        let summary = ReportSummary::compute(&[basic("Installation", true)], Duration::ZERO);
        assert_eq!(summary.grade, Grade::D);
        assert_eq!(summary.avg_success_rate, 0.0);
    }

    #[test]
    fn test_exit_codes() {
        let passing = report(Suite::Lifecycle, vec![basic("a", true)], RunOutcome::Completed);
        assert_eq!(passing.exit_code(), 0);

        let failing = report(Suite::Full, vec![basic("a", true), basic("b", false)], RunOutcome::Completed);
        assert_eq!(failing.exit_code(), 1);

        let graded = report(Suite::Performance, vec![load("x", 60.0, 0.96)], RunOutcome::Completed);
        assert_eq!(graded.exit_code(), 1);

        let aborted = report(
            Suite::Lifecycle,
            vec![],
            RunOutcome::Aborted {
                reason: "launch failed".to_string(),
            },
        );
        assert_eq!(aborted.exit_code(), 2);
    }

    #[test]
    fn test_records_are_tagged() {
        let value = serde_json::to_value(load("Scan Throughput", 10.0, 0.5)).unwrap();
        assert_eq!(value["kind"], "load");
        assert_eq!(value["name"], "Scan Throughput");
        assert_eq!(value["duration"], 1.5);
        assert_eq!(value["total_operations"], 100);
        assert_eq!(value["resource_usage"]["status"], "no_data");
        assert!(value["resource_usage"].get("memory_trend").is_none());

        let value = serde_json::to_value(basic("Installation", false)).unwrap();
        assert_eq!(value["kind"], "basic");
        assert_eq!(value["error"], "boom");
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut results = vec![basic("Installation", true)];
        if let ScenarioRecord::Load(mut l) = load("Scan Throughput", 200.0, 1.0) {
            l.resource_usage.window = ResourceUsage::Measured(ResourceSummary {
                avg_cpu_percent: 1.0,
                max_cpu_percent: 2.0,
                avg_memory_mb: 10.0,
                max_memory_mb: 12.0,
                avg_open_files: 3.0,
                max_open_files: 4,
                avg_threads: 2.0,
                max_threads: 2,
                sample_count: 3,
            });
            results.push(ScenarioRecord::Load(l));
        }

        let report = report(Suite::Performance, results, RunOutcome::Completed);
        report.write_json(&path).unwrap();

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["summary"]["grade"], "A");
        assert_eq!(parsed["suite"], "performance");
        assert_eq!(parsed["outcome"]["status"], "completed");
        assert_eq!(parsed["results"][1]["resource_usage"]["status"], "measured");
        assert_eq!(parsed["results"][1]["resource_usage"]["sample_count"], 3);
        assert_eq!(report.exit_code(), 0);
    }
}

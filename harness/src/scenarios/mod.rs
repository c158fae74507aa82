// harness/src/scenarios/mod.rs
// Scenario catalogue, suites and the context scenarios run against

pub mod lifecycle;
pub mod load;

use crate::config::HarnessConfig;
use crate::error::*;
use crate::probe::ProcessProbe;
use crate::report::Details;
use crate::sampler::{ResourceSample, SampleLog, Sampler};
use crate::supervisor::{CommandOutput, ProcessHandle, ProcessSupervisor};
use crate::workload::WorkloadGenerator;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use load::LoadRun;

/// Named groups of scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Suite {
    /// End-to-end lifecycle checks against the agent CLI
    Lifecycle,
    /// Throughput, soak and stress runs
    Performance,
    /// Lifecycle essentials followed by every load scenario
    Full,
    /// Caller-supplied scenario list
    Custom,
}

impl Suite {
    pub fn scenarios(&self) -> Vec<ScenarioKind> {
        use ScenarioKind::*;
        match self {
            Suite::Lifecycle => vec![
                Installation,
                Configuration,
                ServiceManagement,
                KeyManagement,
                ScannerDiscovery,
                ScanProcessing,
                NetworkDiagnostics,
                OfflineQueue,
                Monitoring,
                SecurityFeatures,
                Performance,
                FailureRecovery,
            ],
            Suite::Performance => vec![
                ScanThroughput,
                ConcurrentScanners,
                SubmissionThroughput,
                MemorySoak,
                StressBurst,
            ],
            Suite::Full => vec![
                Installation,
                Configuration,
                ServiceManagement,
                KeyManagement,
                ScannerDiscovery,
                ScanThroughput,
                ConcurrentScanners,
                SubmissionThroughput,
                MemorySoak,
                StressBurst,
                FailureRecovery,
            ],
            Suite::Custom => Vec::new(),
        }
    }
}

impl FromStr for Suite {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lifecycle" | "e2e" => Ok(Suite::Lifecycle),
            "performance" | "perf" => Ok(Suite::Performance),
            "full" => Ok(Suite::Full),
            other => Err(HarnessError::Config {
                field: "suite".to_string(),
                message: format!("unknown suite '{}'", other),
            }),
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Suite::Lifecycle => "lifecycle",
            Suite::Performance => "performance",
            Suite::Full => "full",
            Suite::Custom => "custom",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioKind {
    Installation,
    Configuration,
    ServiceManagement,
    KeyManagement,
    ScannerDiscovery,
    ScanProcessing,
    NetworkDiagnostics,
    OfflineQueue,
    Monitoring,
    SecurityFeatures,
    Performance,
    FailureRecovery,
    ScanThroughput,
    ConcurrentScanners,
    SubmissionThroughput,
    MemorySoak,
    StressBurst,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 17] = [
        ScenarioKind::Installation,
        ScenarioKind::Configuration,
        ScenarioKind::ServiceManagement,
        ScenarioKind::KeyManagement,
        ScenarioKind::ScannerDiscovery,
        ScenarioKind::ScanProcessing,
        ScenarioKind::NetworkDiagnostics,
        ScenarioKind::OfflineQueue,
        ScenarioKind::Monitoring,
        ScenarioKind::SecurityFeatures,
        ScenarioKind::Performance,
        ScenarioKind::FailureRecovery,
        ScenarioKind::ScanThroughput,
        ScenarioKind::ConcurrentScanners,
        ScenarioKind::SubmissionThroughput,
        ScenarioKind::MemorySoak,
        ScenarioKind::StressBurst,
    ];

    /// Display name, also used as the result name in reports
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::Installation => "Installation",
            ScenarioKind::Configuration => "Configuration",
            ScenarioKind::ServiceManagement => "Service Management",
            ScenarioKind::KeyManagement => "Key Management",
            ScenarioKind::ScannerDiscovery => "Scanner Discovery",
            ScenarioKind::ScanProcessing => "Scan Processing",
            ScenarioKind::NetworkDiagnostics => "Network Diagnostics",
            ScenarioKind::OfflineQueue => "Offline Queue",
            ScenarioKind::Monitoring => "Monitoring",
            ScenarioKind::SecurityFeatures => "Security Features",
            ScenarioKind::Performance => "Performance",
            ScenarioKind::FailureRecovery => "Failure Recovery",
            ScenarioKind::ScanThroughput => "Scan Throughput",
            ScenarioKind::ConcurrentScanners => "Concurrent Scanners",
            ScenarioKind::SubmissionThroughput => "Submission Throughput",
            ScenarioKind::MemorySoak => "Memory Soak",
            ScenarioKind::StressBurst => "Stress Burst",
        }
    }

    /// Whether the scenario produces a load result
    pub fn is_load(&self) -> bool {
        matches!(
            self,
            ScenarioKind::ScanThroughput
                | ScenarioKind::ConcurrentScanners
                | ScenarioKind::SubmissionThroughput
                | ScenarioKind::MemorySoak
                | ScenarioKind::StressBurst
        )
    }
}

impl FromStr for ScenarioKind {
    type Err = HarnessError;

    /// Accepts display names or their kebab/snake forms, case-insensitive.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = normalize(s);
        ScenarioKind::ALL
            .iter()
            .copied()
            .find(|kind| normalize(kind.name()) == wanted)
            .ok_or_else(|| HarnessError::Config {
                field: "scenario".to_string(),
                message: format!("unknown scenario '{}'", s),
            })
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a scenario hands back to the runner
pub enum ScenarioOutput {
    Basic,
    Load(LoadRun),
}

/// Everything a scenario may touch. Owned by the runner for one run.
pub struct HarnessContext {
    pub config: HarnessConfig,
    pub supervisor: ProcessSupervisor,
    pub agent: Option<ProcessHandle>,
    pub sampler: Sampler,
    pub log: Arc<SampleLog>,
    pub scratch: PathBuf,
    pub agent_config: PathBuf,
    pub workload: WorkloadGenerator,
    pub probe: ProcessProbe,
    pub cancel: CancellationToken,
}

impl HarnessContext {
    pub fn agent_pid(&self) -> Option<u32> {
        self.agent.as_ref().map(|a| a.pid)
    }

    /// Non-blocking check that the supervised agent is still alive
    pub fn agent_running(&mut self) -> bool {
        match self.agent.as_mut() {
            Some(handle) => self.supervisor.is_running(handle),
            None => false,
        }
    }

    /// Run an agent subcommand with `--config` appended.
    pub async fn agent_command(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut full: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        full.push("--config".to_string());
        full.push(self.agent_config.display().to_string());
        self.supervisor
            .run_one_shot(&full, self.config.agent.command_timeout())
            .await
    }

    /// Run the agent binary with exactly `args`.
    pub async fn raw_command(&self, args: &[&str]) -> Result<CommandOutput> {
        let full: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.supervisor
            .run_one_shot(&full, self.config.agent.command_timeout())
            .await
    }

    /// Arguments the agent service is launched with
    pub fn start_args(&self) -> Vec<String> {
        start_args(&self.agent_config)
    }

    /// One immediate resource reading of the agent
    pub fn probe_agent(&mut self) -> Result<ResourceSample> {
        let pid = self
            .agent_pid()
            .ok_or_else(|| HarnessError::Assertion("Agent process is not running".to_string()))?;
        self.probe.read(pid)
    }

    /// Fail with an infrastructure error when the scratch dir has vanished.
    pub fn check_scratch(&self) -> Result<()> {
        if self.scratch.is_dir() {
            Ok(())
        } else {
            Err(HarnessError::Infrastructure(format!(
                "scratch directory {} disappeared",
                self.scratch.display()
            )))
        }
    }
}

pub fn start_args(agent_config: &Path) -> Vec<String> {
    vec![
        "start".to_string(),
        "--config".to_string(),
        agent_config.display().to_string(),
    ]
}

/// Run one scenario. Details written before an error are kept in the record.
pub async fn execute(
    kind: ScenarioKind,
    ctx: &mut HarnessContext,
    details: &mut Details,
) -> Result<ScenarioOutput> {
    match kind {
        ScenarioKind::Installation => lifecycle::installation(ctx, details).await,
        ScenarioKind::Configuration => lifecycle::configuration(ctx, details).await,
        ScenarioKind::ServiceManagement => lifecycle::service_management(ctx, details).await,
        ScenarioKind::KeyManagement => lifecycle::key_management(ctx, details).await,
        ScenarioKind::ScannerDiscovery => lifecycle::scanner_discovery(ctx, details).await,
        ScenarioKind::ScanProcessing => lifecycle::scan_processing(ctx, details).await,
        ScenarioKind::NetworkDiagnostics => lifecycle::network_diagnostics(ctx, details).await,
        ScenarioKind::OfflineQueue => lifecycle::offline_queue(ctx, details).await,
        ScenarioKind::Monitoring => lifecycle::monitoring(ctx, details).await,
        ScenarioKind::SecurityFeatures => lifecycle::security_features(ctx, details).await,
        ScenarioKind::Performance => lifecycle::performance(ctx, details).await,
        ScenarioKind::FailureRecovery => lifecycle::failure_recovery(ctx, details).await,
        ScenarioKind::ScanThroughput => load::scan_throughput(ctx, details).await,
        ScenarioKind::ConcurrentScanners => load::concurrent_scanners(ctx, details).await,
        ScenarioKind::SubmissionThroughput => load::submission_throughput(ctx, details).await,
        ScenarioKind::MemorySoak => load::memory_soak(ctx, details).await,
        ScenarioKind::StressBurst => load::stress_burst(ctx, details).await,
    }
}

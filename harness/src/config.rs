// harness/src/config.rs
// Harness configuration: layered loading and validation

use crate::error::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable prefix for overrides, e.g. `HARNESS__SAMPLING__INTERVAL_MS=250`.
pub const ENV_PREFIX: &str = "HARNESS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub agent: AgentTimingConfig,
    pub sampling: SamplingConfig,
    pub workload: WorkloadConfig,
    pub scenarios: ScenarioConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentTimingConfig {
    pub startup_grace_ms: u64,
    pub stop_grace_ms: u64,
    pub cleanup_grace_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for AgentTimingConfig {
    fn default() -> Self {
        Self {
            startup_grace_ms: 3000,
            stop_grace_ms: 10_000,
            cleanup_grace_ms: 5000,
            command_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub interval_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub scan_latency_min_ms: u64,
    pub scan_latency_max_ms: u64,
    pub scan_failure_probability: f64,
    pub submission_latency_min_ms: u64,
    pub submission_latency_max_ms: u64,
    pub submission_failure_probability: f64,
    /// Fixed seed for the simulated executor; random when unset.
    pub seed: Option<u64>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            scan_latency_min_ms: 10,
            scan_latency_max_ms: 100,
            scan_failure_probability: 0.02,
            submission_latency_min_ms: 500,
            submission_latency_max_ms: 3000,
            submission_failure_probability: 0.05,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub scan_count: usize,
    pub concurrent_scanners: usize,
    pub scans_per_scanner: usize,
    pub scanner_jitter_max_ms: u64,
    pub submission_count: usize,
    pub soak_duration_secs: u64,
    pub soak_ops_per_minute: u64,
    pub soak_snapshot_every: usize,
    pub stress_workers: usize,
    pub stress_ops_per_worker: usize,
    pub stress_delay_ms: u64,
    pub error_sample_limit: usize,
    pub stress_error_sample_limit: usize,
    pub monitoring_settle_ms: u64,
    pub key_settle_ms: u64,
    pub performance_window_samples: usize,
    pub min_success_rate: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            scan_count: 1000,
            concurrent_scanners: 20,
            scans_per_scanner: 50,
            scanner_jitter_max_ms: 100,
            submission_count: 100,
            soak_duration_secs: 300,
            soak_ops_per_minute: 120,
            soak_snapshot_every: 10,
            stress_workers: 100,
            stress_ops_per_worker: 20,
            stress_delay_ms: 10,
            error_sample_limit: 10,
            stress_error_sample_limit: 20,
            monitoring_settle_ms: 3000,
            key_settle_ms: 2000,
            performance_window_samples: 5,
            min_success_rate: 0.90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub service_max_memory_mb: f64,
    pub performance_max_avg_cpu_percent: f64,
    pub performance_max_memory_mb: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            service_max_memory_mb: 256.0,
            performance_max_avg_cpu_percent: 50.0,
            performance_max_memory_mb: 512.0,
        }
    }
}

impl AgentTimingConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl WorkloadConfig {
    pub fn scan_latency(&self) -> Range<Duration> {
        Duration::from_millis(self.scan_latency_min_ms)..Duration::from_millis(self.scan_latency_max_ms)
    }

    pub fn submission_latency(&self) -> Range<Duration> {
        Duration::from_millis(self.submission_latency_min_ms)
            ..Duration::from_millis(self.submission_latency_max_ms)
    }
}

impl HarnessConfig {
    /// Layer defaults, an optional TOML file and `HARNESS__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&HarnessConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(HarnessError::Config {
                    field: "harness_config".to_string(),
                    message: format!("file not found: {}", path.display()),
                });
            }
            info!("Loading harness configuration from {}", path.display());
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml),
            );
        }

        let loaded: HarnessConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        debug!("Effective harness configuration: {:?}", loaded);
        Ok(loaded)
    }

    /// Run every validation rule and collect the findings.
    pub fn validate(&self) -> ValidationReport {
        let mut issues = Vec::new();

        for rule in validation_rules() {
            if let Err(message) = (rule.check)(self) {
                match rule.severity {
                    ValidationSeverity::Info => debug!("{}: {}", rule.name, message),
                    ValidationSeverity::Warning => warn!("{}: {}", rule.name, message),
                    _ => warn!("{} ({:?}): {}", rule.name, rule.severity, message),
                }
                issues.push(ValidationIssue {
                    rule_name: rule.name.to_string(),
                    field: rule.field.to_string(),
                    severity: rule.severity,
                    message,
                });
            }
        }

        let is_valid = issues.iter().all(|i| i.severity < ValidationSeverity::Error);
        ValidationReport { is_valid, issues }
    }

    /// Shrink the soak to the requested number of minutes.
    pub fn with_soak_minutes(mut self, minutes: u64) -> Self {
        self.scenarios.soak_duration_secs = minutes * 60;
        self
    }
}

/// Validation severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub rule_name: String,
    pub field: String,
    pub severity: ValidationSeverity,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// First blocking issue as a config error, if any.
    pub fn into_result(self) -> Result<()> {
        match self
            .issues
            .into_iter()
            .find(|i| i.severity >= ValidationSeverity::Error)
        {
            Some(issue) => Err(HarnessError::Config {
                field: issue.field,
                message: issue.message,
            }),
            None => Ok(()),
        }
    }
}

struct ValidationRule {
    name: &'static str,
    field: &'static str,
    severity: ValidationSeverity,
    check: fn(&HarnessConfig) -> std::result::Result<(), String>,
}

fn validation_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule {
            name: "sampling_interval_positive",
            field: "sampling.interval_ms",
            severity: ValidationSeverity::Critical,
            check: |c| {
                if c.sampling.interval_ms == 0 {
                    Err("sampling interval must be greater than zero".to_string())
                } else {
                    Ok(())
                }
            },
        },
        ValidationRule {
            name: "command_timeout_positive",
            field: "agent.command_timeout_ms",
            severity: ValidationSeverity::Error,
            check: |c| {
                if c.agent.command_timeout_ms == 0 {
                    Err("command timeout must be greater than zero".to_string())
                } else {
                    Ok(())
                }
            },
        },
        ValidationRule {
            name: "latency_ranges_ordered",
            field: "workload",
            severity: ValidationSeverity::Error,
            check: |c| {
                let w = &c.workload;
                if w.scan_latency_min_ms > w.scan_latency_max_ms {
                    Err(format!(
                        "scan latency range {}..{}ms is inverted",
                        w.scan_latency_min_ms, w.scan_latency_max_ms
                    ))
                } else if w.submission_latency_min_ms > w.submission_latency_max_ms {
                    Err(format!(
                        "submission latency range {}..{}ms is inverted",
                        w.submission_latency_min_ms, w.submission_latency_max_ms
                    ))
                } else {
                    Ok(())
                }
            },
        },
        ValidationRule {
            name: "failure_probabilities_bounded",
            field: "workload",
            severity: ValidationSeverity::Error,
            check: |c| {
                let p = [
                    c.workload.scan_failure_probability,
                    c.workload.submission_failure_probability,
                ];
                if p.iter().all(|v| (0.0..=1.0).contains(v)) {
                    Ok(())
                } else {
                    Err(format!("failure probabilities {:?} must lie in [0, 1]", p))
                }
            },
        },
        ValidationRule {
            name: "concurrency_positive",
            field: "scenarios",
            severity: ValidationSeverity::Error,
            check: |c| {
                let s = &c.scenarios;
                if s.concurrent_scanners == 0 || s.stress_workers == 0 {
                    Err("worker counts must be greater than zero".to_string())
                } else {
                    Ok(())
                }
            },
        },
        ValidationRule {
            name: "soak_rate_positive",
            field: "scenarios.soak_ops_per_minute",
            severity: ValidationSeverity::Error,
            check: |c| {
                if c.scenarios.soak_ops_per_minute == 0 || c.scenarios.soak_snapshot_every == 0 {
                    Err("soak rate and snapshot cadence must be greater than zero".to_string())
                } else {
                    Ok(())
                }
            },
        },
        ValidationRule {
            name: "success_threshold_bounded",
            field: "scenarios.min_success_rate",
            severity: ValidationSeverity::Error,
            check: |c| {
                if (0.0..=1.0).contains(&c.scenarios.min_success_rate) {
                    Ok(())
                } else {
                    Err(format!(
                        "minimum success rate {} must lie in [0, 1]",
                        c.scenarios.min_success_rate
                    ))
                }
            },
        },
        ValidationRule {
            name: "soak_trend_resolution",
            field: "scenarios",
            severity: ValidationSeverity::Warning,
            check: |c| {
                let s = &c.scenarios;
                let ops = s.soak_duration_secs * s.soak_ops_per_minute / 60;
                let snapshots = ops / (s.soak_snapshot_every.max(1) as u64);
                if snapshots < 10 {
                    Err(format!(
                        "soak yields only {} memory snapshots, trend detection needs 10",
                        snapshots
                    ))
                } else {
                    Ok(())
                }
            },
        },
        ValidationRule {
            name: "stop_grace_vs_sampling",
            field: "agent.stop_grace_ms",
            severity: ValidationSeverity::Info,
            check: |c| {
                if c.agent.stop_grace_ms < c.sampling.interval_ms {
                    Err("stop grace is shorter than one sampling tick".to_string())
                } else {
                    Ok(())
                }
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let report = HarnessConfig::default().validate();
        assert!(report.is_valid, "issues: {:?}", report.issues);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let mut config = HarnessConfig::default();
        config.sampling.interval_ms = 0;

        let report = config.validate();
        assert!(!report.is_valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.rule_name == "sampling_interval_positive"
                && i.severity == ValidationSeverity::Critical));
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_inverted_latency_range() {
        let mut config = HarnessConfig::default();
        config.workload.scan_latency_min_ms = 200;

        let err = config.validate().into_result().unwrap_err();
        assert!(err.to_string().contains("inverted"));
    }

    #[test]
    fn test_short_soak_only_warns() {
        let config = HarnessConfig::default().with_soak_minutes(0);
        let report = config.validate();
        assert!(report.is_valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.rule_name == "soak_trend_resolution"));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[sampling]\ninterval_ms = 250\n\n[scenarios]\nscan_count = 40\nmin_success_rate = 0.5"
        )
        .unwrap();

        let config = HarnessConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.sampling.interval_ms, 250);
        assert_eq!(config.scenarios.scan_count, 40);
        assert_eq!(config.scenarios.min_success_rate, 0.5);
        // Untouched sections keep their defaults
        assert_eq!(config.agent, AgentTimingConfig::default());
        assert_eq!(config.scenarios.stress_workers, 100);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = HarnessConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, HarnessError::Config { .. }));
    }
}

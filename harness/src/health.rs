// harness/src/health.rs
// Health evaluation of the supervised agent against resource thresholds

use crate::config::LimitsConfig;
use crate::stats::ResourceSummary;
use serde::Serialize;

/// Health status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Limits the agent must stay under. `None` disables a check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub max_memory_mb: Option<f64>,
    pub max_avg_cpu_percent: Option<f64>,
}

impl HealthThresholds {
    /// Memory ceiling for a freshly started agent
    pub fn service(limits: &LimitsConfig) -> Self {
        Self {
            max_memory_mb: Some(limits.service_max_memory_mb),
            max_avg_cpu_percent: None,
        }
    }

    /// Limits applied to a window of steady-state samples
    pub fn performance(limits: &LimitsConfig) -> Self {
        Self {
            max_memory_mb: Some(limits.performance_max_memory_mb),
            max_avg_cpu_percent: Some(limits.performance_max_avg_cpu_percent),
        }
    }
}

type Check = Box<dyn Fn(&ResourceSummary) -> (HealthStatus, Option<String>) + Send + Sync>;

/// Runs every registered check and keeps the worst status
pub struct HealthChecker {
    checks: Vec<Check>,
}

impl HealthChecker {
    pub fn with_thresholds(thresholds: HealthThresholds) -> Self {
        let mut checker = Self { checks: Vec::new() };

        if let Some(max_memory) = thresholds.max_memory_mb {
            checker.checks.push(Box::new(move |s: &ResourceSummary| {
                if s.max_memory_mb > max_memory {
                    (
                        HealthStatus::Critical,
                        Some(format!(
                            "Memory usage too high: {:.1}MB (limit {:.0}MB)",
                            s.max_memory_mb, max_memory
                        )),
                    )
                } else if s.max_memory_mb > max_memory / 2.0 {
                    (
                        HealthStatus::Warning,
                        Some(format!("Memory usage above half the limit: {:.1}MB", s.max_memory_mb)),
                    )
                } else {
                    (HealthStatus::Healthy, None)
                }
            }));
        }

        if let Some(max_cpu) = thresholds.max_avg_cpu_percent {
            checker.checks.push(Box::new(move |s: &ResourceSummary| {
                if s.avg_cpu_percent > max_cpu {
                    (
                        HealthStatus::Critical,
                        Some(format!(
                            "High average CPU usage: {:.1}% (limit {:.0}%)",
                            s.avg_cpu_percent, max_cpu
                        )),
                    )
                } else if s.avg_cpu_percent > max_cpu * 0.75 {
                    (
                        HealthStatus::Warning,
                        Some(format!("Average CPU usage nearing limit: {:.1}%", s.avg_cpu_percent)),
                    )
                } else {
                    (HealthStatus::Healthy, None)
                }
            }));
        }

        checker
    }

    /// Add a custom check
    pub fn add_check<F>(&mut self, check: F)
    where
        F: Fn(&ResourceSummary) -> (HealthStatus, Option<String>) + Send + Sync + 'static,
    {
        self.checks.push(Box::new(check));
    }

    pub fn evaluate(&self, summary: &ResourceSummary) -> HealthReport {
        let mut status = HealthStatus::Healthy;
        let mut issues = Vec::new();

        for check in &self.checks {
            let (result, issue) = check(summary);
            status = status.max(result);
            if let Some(issue) = issue {
                issues.push(issue);
            }
        }

        HealthReport { status, issues }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
}

impl HealthReport {
    pub fn is_critical(&self) -> bool {
        self.status == HealthStatus::Critical
    }

    /// All issues joined into one message
    pub fn summary_line(&self) -> String {
        self.issues.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(avg_cpu: f64, max_memory_mb: f64) -> ResourceSummary {
        ResourceSummary {
            avg_cpu_percent: avg_cpu,
            max_cpu_percent: avg_cpu,
            avg_memory_mb: max_memory_mb,
            max_memory_mb,
            avg_open_files: 10.0,
            max_open_files: 10,
            avg_threads: 4.0,
            max_threads: 4,
            sample_count: 5,
        }
    }

    #[test]
    fn test_healthy_agent() {
        let checker = HealthChecker::with_thresholds(HealthThresholds::performance(&LimitsConfig::default()));
        let report = checker.evaluate(&summary(5.0, 64.0));
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_warning_levels() {
        let checker = HealthChecker::with_thresholds(HealthThresholds::performance(&LimitsConfig::default()));

        // Half the 512MB memory limit
        let report = checker.evaluate(&summary(5.0, 300.0));
        assert_eq!(report.status, HealthStatus::Warning);

        // 75% of the 50% CPU limit
        let report = checker.evaluate(&summary(40.0, 64.0));
        assert_eq!(report.status, HealthStatus::Warning);
        assert!(!report.is_critical());
    }

    #[test]
    fn test_critical_collects_all_issues() {
        let checker = HealthChecker::with_thresholds(HealthThresholds::performance(&LimitsConfig::default()));
        let report = checker.evaluate(&summary(75.0, 600.0));

        assert!(report.is_critical());
        assert_eq!(report.issues.len(), 2);
        assert!(report.summary_line().contains("High average CPU usage"));
    }

    #[test]
    fn test_service_thresholds_ignore_cpu() {
        let checker = HealthChecker::with_thresholds(HealthThresholds::service(&LimitsConfig::default()));
        assert_eq!(checker.evaluate(&summary(99.0, 32.0)).status, HealthStatus::Healthy);
        assert!(checker.evaluate(&summary(1.0, 300.0)).is_critical());
    }

    #[test]
    fn test_custom_check() {
        let mut checker = HealthChecker::with_thresholds(HealthThresholds {
            max_memory_mb: None,
            max_avg_cpu_percent: None,
        });
        checker.add_check(|s| {
            if s.max_threads > 2 {
                (HealthStatus::Warning, Some("thread count".to_string()))
            } else {
                (HealthStatus::Healthy, None)
            }
        });
        assert_eq!(checker.evaluate(&summary(1.0, 1.0)).status, HealthStatus::Warning);
    }
}

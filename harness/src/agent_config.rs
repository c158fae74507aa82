// harness/src/agent_config.rs
// Test configuration handed to the agent under test

use crate::error::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const AGENT_CONFIG_FILE: &str = "test-config.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub kaspa: KaspaConfig,
    pub scanners: ScannersConfig,
    pub logging: LoggingConfig,
    pub queue: QueueConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KaspaConfig {
    pub rpc_endpoints: Vec<String>,
    pub fee_rate: String,
    pub max_fee: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannersConfig {
    pub auto_discovery: bool,
    pub enabled_types: Vec<String>,
    pub discovery_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub audit_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_items: usize,
    pub retention_days: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub heartbeat_interval_hours: u64,
    pub anomaly_detection: bool,
}

impl Default for KaspaConfig {
    fn default() -> Self {
        Self {
            rpc_endpoints: vec!["grpc://localhost:16210".to_string()],
            fee_rate: "1000".to_string(),
            max_fee: "10000000".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Default for ScannersConfig {
    fn default() -> Self {
        Self {
            auto_discovery: true,
            enabled_types: vec!["mock".to_string()],
            discovery_interval_seconds: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            audit_enabled: true,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_items: 10_000,
            retention_days: 7,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_hours: 1,
            anomaly_detection: true,
        }
    }
}

impl AgentConfig {
    /// Write the configuration as YAML into `dir` and return its path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(AGENT_CONFIG_FILE);
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(&path, yaml)
            .map_err(|e| HarnessError::Setup(format!("cannot write {}: {}", path.display(), e)))?;
        info!("📝 Agent test configuration written to {}", path.display());
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::io(format!("read {}", path.display()), e))?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_written_config_has_every_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = AgentConfig::default().write_to(dir.path()).unwrap();

        assert_eq!(path.file_name().unwrap(), AGENT_CONFIG_FILE);
        let text = std::fs::read_to_string(&path).unwrap();
        for section in ["kaspa:", "scanners:", "logging:", "queue:", "monitoring:"] {
            assert!(text.contains(section), "missing {}", section);
        }
        assert!(text.contains("grpc://localhost:16210"));

        assert_eq!(AgentConfig::load(&path).unwrap(), AgentConfig::default());
    }

    #[test]
    fn test_write_into_missing_dir_is_setup_error() {
        let err = AgentConfig::default()
            .write_to(Path::new("/definitely/not/a/dir"))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Setup(_)));
    }
}

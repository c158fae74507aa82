// harness/src/error.rs
// Error taxonomy for the load and lifecycle harness

use std::path::PathBuf;
use std::result;
use thiserror::Error;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The agent binary is missing, not executable, or exited before it came up
    #[error("Launch failed: {binary} ({reason})")]
    Launch { binary: PathBuf, reason: String },

    /// A one-shot command or a shutdown exceeded its bound
    #[error("Operation timed out: {operation} (timeout: {timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The sampled process disappeared or its counters became unreadable
    #[error("Resource read failed for pid {pid}: {reason}")]
    ResourceRead { pid: u32, reason: String },

    /// A scenario precondition could not be established
    #[error("Setup failed: {0}")]
    Setup(String),

    /// A scenario check did not hold
    #[error("{0}")]
    Assertion(String),

    /// Configuration validation errors
    #[error("Configuration error: {field} - {message}")]
    Config { field: String, message: String },

    /// File system or process I/O errors
    #[error("I/O error: {operation} failed - {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context} - {source}")]
    Serialization {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Harness-level failures that make continuing the run pointless
    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),
}

/// A single synthetic unit of work failed. Tallied as data, never propagated.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{operation}: {message}")]
pub struct OperationError {
    pub operation: String,
    pub message: String,
}

impl OperationError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = result::Result<T, HarnessError>;

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCategory {
    Transient,    // May resolve on retry (timeouts, vanished processes)
    Permanent,    // Needs intervention (bad binary, bad config)
    Critical,     // Ends the run
    Warning,      // Scenario-level, recorded and reported
}

impl HarnessError {
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            HarnessError::Infrastructure(_) => ErrorCategory::Critical,
            HarnessError::Timeout { .. } => ErrorCategory::Transient,
            HarnessError::ResourceRead { .. } => ErrorCategory::Transient,
            HarnessError::Assertion(_) | HarnessError::Setup(_) => ErrorCategory::Warning,
            _ => ErrorCategory::Permanent,
        }
    }

    /// Whether the runner must abort instead of recording a failed scenario.
    pub fn is_fatal(&self) -> bool {
        matches!(self.error_category(), ErrorCategory::Critical)
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        HarnessError::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn launch(binary: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        HarnessError::Launch {
            binary: binary.into(),
            reason: reason.into(),
        }
    }
}

/// Helper macro for scenario checks
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::HarnessError::Assertion(format!($($arg)+)));
        }
    };
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        HarnessError::Io {
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        HarnessError::Serialization {
            context: "JSON processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<serde_yaml::Error> for HarnessError {
    fn from(err: serde_yaml::Error) -> Self {
        HarnessError::Serialization {
            context: "YAML processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<config::ConfigError> for HarnessError {
    fn from(err: config::ConfigError) -> Self {
        HarnessError::Config {
            field: "harness".to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_infrastructure_is_fatal() {
        assert!(HarnessError::Infrastructure("scratch dir gone".into()).is_fatal());
        assert!(!HarnessError::Assertion("status missing".into()).is_fatal());
        assert!(!HarnessError::launch("/nope", "missing").is_fatal());
        assert!(!HarnessError::Timeout {
            operation: "status".into(),
            timeout_ms: 10
        }
        .is_fatal());
    }

    #[test]
    fn test_error_categorization() {
        let err = HarnessError::ResourceRead {
            pid: 42,
            reason: "gone".into(),
        };
        assert_eq!(err.error_category(), ErrorCategory::Transient);
        assert_eq!(
            HarnessError::Setup("write failed".into()).error_category(),
            ErrorCategory::Warning
        );
    }

    #[test]
    fn test_ensure_macro() {
        fn check(v: u32) -> Result<()> {
            crate::ensure!(v < 10, "value {} too large", v);
            Ok(())
        }
        assert!(check(3).is_ok());
        let msg = check(12).unwrap_err().to_string();
        assert_eq!(msg, "value 12 too large");
    }

    #[test]
    fn test_operation_error_display() {
        let err = OperationError::new("scan PERF-TEST-000001", "simulated failure");
        assert_eq!(err.to_string(), "scan PERF-TEST-000001: simulated failure");
    }
}

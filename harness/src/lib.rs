// harness/src/lib.rs
// Load and lifecycle test harness for a supervised agent process

pub mod agent_config;
pub mod config;
pub mod error;
pub mod health;
pub mod observability;
pub mod probe;
pub mod report;
pub mod runner;
pub mod sampler;
pub mod scenarios;
pub mod stats;
pub mod supervisor;
pub mod workload;


pub use config::HarnessConfig;
pub use error::{HarnessError, OperationError, Result};
pub use report::{Report, ScenarioRecord};
pub use runner::{RunnerState, ScenarioRunner};
pub use sampler::{ResourceSample, SampleLog, Sampler};
pub use scenarios::{ScenarioKind, Suite};
pub use supervisor::{CommandOutput, ProcessHandle, ProcessSupervisor};
pub use workload::{Operation, OperationExecutor, OperationOutcome, SimulatedExecutor, WorkloadGenerator};

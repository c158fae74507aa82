// harness/src/probe.rs
// Point-in-time resource readings for a single process

use crate::error::*;
use crate::sampler::ResourceSample;
use chrono::Utc;
use sysinfo::{Pid, ProcessStatus, System};
use tracing::{debug, warn};

/// Reads CPU, memory, descriptor and thread counters for one pid.
///
/// CPU usage is computed by sysinfo against the previous refresh, so the
/// first reading for a process reports 0%.
pub struct ProcessProbe {
    system: System,
    total_memory: u64,
}

impl ProcessProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let total_memory = system.total_memory();
        Self {
            system,
            total_memory,
        }
    }

    /// Take one reading. A vanished or zombie process is a `ResourceRead` error.
    pub fn read(&mut self, pid: u32) -> Result<ResourceSample> {
        let sys_pid = Pid::from_u32(pid);
        if !self.system.refresh_process(sys_pid) {
            return Err(HarnessError::ResourceRead {
                pid,
                reason: "no such process".to_string(),
            });
        }

        let process = self
            .system
            .process(sys_pid)
            .ok_or_else(|| HarnessError::ResourceRead {
                pid,
                reason: "no such process".to_string(),
            })?;

        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return Err(HarnessError::ResourceRead {
                pid,
                reason: format!("process is {:?}", process.status()),
            });
        }

        let memory_resident_bytes = process.memory();
        let memory_percent = if self.total_memory > 0 {
            memory_resident_bytes as f64 / self.total_memory as f64 * 100.0
        } else {
            0.0
        };

        let (open_file_count, connection_count) = count_descriptors(pid);

        Ok(ResourceSample {
            timestamp: Utc::now(),
            cpu_percent: process.cpu_usage() as f64,
            memory_resident_bytes,
            memory_percent,
            open_file_count,
            thread_count: count_threads(pid),
            connection_count,
        })
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Open descriptors and how many of them are sockets.
fn count_descriptors(pid: u32) -> (u64, u64) {
    #[cfg(target_os = "linux")]
    {
        use std::fs;

        match fs::read_dir(format!("/proc/{}/fd", pid)) {
            Ok(entries) => {
                let mut files = 0;
                let mut sockets = 0;
                for entry in entries.flatten() {
                    files += 1;
                    if let Ok(target) = fs::read_link(entry.path()) {
                        if target.to_string_lossy().starts_with("socket:") {
                            sockets += 1;
                        }
                    }
                }
                (files, sockets)
            }
            Err(e) => {
                debug!("Failed to read descriptors for {}: {}", pid, e);
                (0, 0)
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        (0, 0) // Fallback
    }
}

fn count_threads(pid: u32) -> u64 {
    #[cfg(target_os = "linux")]
    {
        use std::fs;

        match fs::read_dir(format!("/proc/{}/task", pid)) {
            Ok(entries) => entries.count() as u64,
            Err(e) => {
                warn!("Failed to read thread count for {}: {}", pid, e);
                0
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        1 // Fallback
    }
}

/// Real uid of a process, when the platform exposes it.
pub fn process_uid(pid: u32) -> Option<u32> {
    #[cfg(target_os = "linux")]
    {
        let contents = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
        contents
            .lines()
            .find(|line| line.starts_with("Uid:"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|uid| uid.parse().ok())
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_own_process() {
        let mut probe = ProcessProbe::new();
        let sample = probe.read(std::process::id()).unwrap();

        assert!(sample.memory_resident_bytes > 0);
        assert!(sample.memory_percent >= 0.0);
        assert!(sample.cpu_percent >= 0.0);
        #[cfg(target_os = "linux")]
        {
            assert!(sample.thread_count >= 1);
            assert!(sample.open_file_count >= 1);
        }
    }

    #[test]
    fn test_read_missing_process() {
        let mut probe = ProcessProbe::new();
        // Above the default pid_max on Linux
        let err = probe.read(4_194_304 + 17).unwrap_err();
        assert!(matches!(err, HarnessError::ResourceRead { .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_uid_of_self() {
        assert!(process_uid(std::process::id()).is_some());
    }
}

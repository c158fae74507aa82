// harness/src/supervisor.rs
// Launch, query and terminate the external agent process

use crate::error::*;
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

pub const STDOUT_LOG: &str = "agent.stdout.log";
pub const STDERR_LOG: &str = "agent.stderr.log";

/// How much of the stderr log goes into a launch error
const STDERR_TAIL_BYTES: usize = 2048;

/// A running (or finished) supervised process
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub exit_status: Option<ExitStatus>,
    args: Vec<String>,
    child: Child,
}

impl ProcessHandle {
    /// Arguments the process was launched with
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Result of a command run to completion
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    /// `None` when the process was ended by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Owns the lifecycle of the agent binary
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    binary: PathBuf,
    log_dir: Option<PathBuf>,
    startup_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            log_dir: None,
            startup_grace: Duration::from_secs(3),
        }
    }

    /// Redirect long-running process output to files in `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Check that the binary exists and is executable.
    pub fn verify_binary(&self) -> Result<()> {
        let metadata = std::fs::metadata(&self.binary)
            .map_err(|e| HarnessError::launch(&self.binary, format!("not found: {}", e)))?;

        if !metadata.is_file() {
            return Err(HarnessError::launch(&self.binary, "not a regular file"));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return Err(HarnessError::launch(&self.binary, "not executable"));
            }
        }

        Ok(())
    }

    /// Launch the agent. Fails if it cannot be spawned or exits inside the
    /// startup grace window.
    #[instrument(skip(self), fields(binary = %self.binary.display()))]
    pub async fn start(&self, args: &[String]) -> Result<ProcessHandle> {
        self.verify_binary()?;

        let (stdout, stderr) = self.output_sinks()?;
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| HarnessError::launch(&self.binary, format!("spawn failed: {}", e)))?;

        let pid = child
            .id()
            .ok_or_else(|| HarnessError::launch(&self.binary, "exited before a pid was assigned"))?;
        let started_at = Utc::now();

        match tokio::time::timeout(self.startup_grace, child.wait()).await {
            Ok(Ok(status)) => {
                let tail = self.stderr_tail();
                return Err(HarnessError::launch(
                    &self.binary,
                    format!("exited during startup with {}{}", status, tail),
                ));
            }
            Ok(Err(e)) => {
                return Err(HarnessError::launch(&self.binary, format!("wait failed: {}", e)));
            }
            Err(_) => {}
        }

        info!("🚀 Agent started with pid {}", pid);
        Ok(ProcessHandle {
            pid,
            started_at,
            exit_status: None,
            args: args.to_vec(),
            child,
        })
    }

    /// Run the binary to completion, killing it if `timeout` elapses first.
    #[instrument(skip(self))]
    pub async fn run_one_shot(&self, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::launch(&self.binary, format!("spawn failed: {}", e)))?;

        // Dropping the wait future on timeout kills the child
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| HarnessError::Timeout {
                operation: format!("{} {}", self.binary.display(), args.join(" ")),
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| HarnessError::io("collect command output", e))?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("Command {:?} exited with {:?}", args, result.exit_code);
        Ok(result)
    }

    /// Terminate gracefully, escalating to a kill after `grace`.
    ///
    /// Returns true when the process exited without escalation, including
    /// when it had already exited before the call.
    #[instrument(skip(self, handle), fields(pid = handle.pid))]
    pub async fn stop(&self, handle: &mut ProcessHandle, grace: Duration) -> bool {
        if handle.exit_status.is_some() || !self.is_running(handle) {
            debug!("Process {} already exited", handle.pid);
            return true;
        }

        send_terminate(handle);

        match tokio::time::timeout(grace, handle.child.wait()).await {
            Ok(Ok(status)) => {
                info!("🛑 Agent {} stopped gracefully ({})", handle.pid, status);
                handle.exit_status = Some(status);
                true
            }
            Ok(Err(e)) => {
                warn!("Waiting for {} failed: {}, forcing kill", handle.pid, e);
                force_kill(handle).await;
                false
            }
            Err(_) => {
                warn!(
                    "Agent {} ignored termination for {:?}, forcing kill",
                    handle.pid, grace
                );
                force_kill(handle).await;
                false
            }
        }
    }

    /// Non-blocking liveness check
    pub fn is_running(&self, handle: &mut ProcessHandle) -> bool {
        if handle.exit_status.is_some() {
            return false;
        }
        match handle.child.try_wait() {
            Ok(Some(status)) => {
                handle.exit_status = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Liveness check for {} failed: {}", handle.pid, e);
                false
            }
        }
    }

    fn output_sinks(&self) -> Result<(Stdio, Stdio)> {
        match &self.log_dir {
            Some(dir) => {
                let stdout = open_log(&dir.join(STDOUT_LOG))?;
                let stderr = open_log(&dir.join(STDERR_LOG))?;
                Ok((Stdio::from(stdout), Stdio::from(stderr)))
            }
            None => Ok((Stdio::null(), Stdio::null())),
        }
    }

    fn stderr_tail(&self) -> String {
        let Some(dir) = &self.log_dir else {
            return String::new();
        };
        match std::fs::read(dir.join(STDERR_LOG)) {
            Ok(bytes) if !bytes.is_empty() => {
                let start = bytes.len().saturating_sub(STDERR_TAIL_BYTES);
                format!(": {}", String::from_utf8_lossy(&bytes[start..]).trim())
            }
            _ => String::new(),
        }
    }
}

fn open_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| HarnessError::io(format!("open {}", path.display()), e))
}

#[cfg(unix)]
fn send_terminate(handle: &mut ProcessHandle) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // The agent leads its own process group, so helpers it spawned go too
    match killpg(Pid::from_raw(handle.pid as i32), Signal::SIGTERM) {
        Ok(()) => debug!("Sent SIGTERM to process group {}", handle.pid),
        Err(Errno::ESRCH) => debug!("Process group {} already gone", handle.pid),
        Err(e) => warn!("Failed to signal {}: {}", handle.pid, e),
    }
}

#[cfg(not(unix))]
fn send_terminate(handle: &mut ProcessHandle) {
    if let Err(e) = handle.child.start_kill() {
        warn!("Failed to terminate {}: {}", handle.pid, e);
    }
}

async fn force_kill(handle: &mut ProcessHandle) {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        match killpg(Pid::from_raw(handle.pid as i32), Signal::SIGKILL) {
            Ok(()) => debug!("Sent SIGKILL to process group {}", handle.pid),
            Err(Errno::ESRCH) => debug!("Process group {} already gone", handle.pid),
            Err(e) => warn!("Failed to kill process group {}: {}", handle.pid, e),
        }
    }

    if let Err(e) = handle.child.kill().await {
        debug!("Kill of {} reported: {}", handle.pid, e);
    }
    match handle.child.try_wait() {
        Ok(Some(status)) => handle.exit_status = Some(status),
        Ok(None) => warn!("Process {} still running after kill", handle.pid),
        Err(e) => warn!("Failed to reap {}: {}", handle.pid, e),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{}", body).unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let supervisor = ProcessSupervisor::new("/definitely/not/an/agent");
        let err = supervisor.start(&[]).await.unwrap_err();
        assert!(matches!(err, HarnessError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_non_executable_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = ProcessSupervisor::new(&path).start(&[]).await.unwrap_err();
        assert!(err.to_string().contains("not executable"));
    }

    #[tokio::test]
    async fn test_early_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "agent", "echo 'bad config' >&2\nexit 3");

        let supervisor = ProcessSupervisor::new(&path)
            .with_log_dir(dir.path())
            .with_startup_grace(Duration::from_millis(500));
        let err = supervisor.start(&args(&["start"])).await.unwrap_err();

        let msg = err.to_string();
        assert!(matches!(err, HarnessError::Launch { .. }));
        assert!(msg.contains("bad config"), "{}", msg);
    }

    #[tokio::test]
    async fn test_one_shot_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "agent", "echo \"out $1\"\necho err >&2\nexit 4");

        let output = ProcessSupervisor::new(&path)
            .run_one_shot(&args(&["status"]), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(4));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out status");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_one_shot_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "agent", "sleep 5");

        let started = Instant::now();
        let result = ProcessSupervisor::new(&path)
            .run_one_shot(&[], Duration::from_millis(200))
            .await;

        let err = assert_err!(result);
        assert!(matches!(err, HarnessError::Timeout { timeout_ms: 200, .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_graceful_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(
            dir.path(),
            "agent",
            "trap 'exit 0' TERM\nwhile true; do sleep 0.1; done",
        );

        let supervisor = ProcessSupervisor::new(&path)
            .with_log_dir(dir.path())
            .with_startup_grace(Duration::from_millis(200));
        let mut handle = assert_ok!(supervisor.start(&args(&["start"])).await);
        assert!(supervisor.is_running(&mut handle));
        assert_eq!(handle.args(), &args(&["start"])[..]);

        assert!(supervisor.stop(&mut handle, Duration::from_secs(5)).await);
        assert!(!supervisor.is_running(&mut handle));
        assert!(handle.exit_status.is_some());
        assert!(dir.path().join(STDOUT_LOG).exists());
    }

    #[tokio::test]
    async fn test_stop_escalates_for_term_resistant_child() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(
            dir.path(),
            "agent",
            "trap '' TERM\nwhile true; do sleep 0.1; done",
        );

        let supervisor = ProcessSupervisor::new(&path).with_startup_grace(Duration::from_millis(200));
        let mut handle = supervisor.start(&[]).await.unwrap();

        let started = Instant::now();
        let graceful = supervisor.stop(&mut handle, Duration::from_millis(300)).await;

        assert!(!graceful);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!supervisor.is_running(&mut handle));
    }

    #[tokio::test]
    async fn test_stop_on_exited_process_is_graceful() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "agent", "sleep 0.3\nexit 0");

        let supervisor = ProcessSupervisor::new(&path).with_startup_grace(Duration::from_millis(100));
        let mut handle = supervisor.start(&[]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        let started = Instant::now();
        assert!(supervisor.stop(&mut handle, Duration::from_secs(5)).await);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(handle.exit_status.and_then(|s| s.code()), Some(0));
    }
}

//! Coordinator process management
//!
//! A running coordinator leaves a single JSON runtime file behind: its PID,
//! its version, and the address the lobby listener actually bound. The CLI
//! reads that file to find the coordinator it should talk to, so `tripd
//! ping`/`stop` keep working even when the local config names a different
//! bind address (or the listener was started on port 0).

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Current version (compile time)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long `stop` waits for a graceful exit before escalating
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the coordinator to exit
const STOP_POLL: Duration = Duration::from_millis(250);

/// What a running coordinator records about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub pid: u32,
    pub version: String,
    /// Address the lobby listener actually bound
    pub bind: String,
}

/// Default runtime file location
fn default_runtime_path() -> PathBuf {
    debug!("default_runtime_path: called");
    let path = dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tripdaemon")
        .join("coordinator.json");
    debug!(?path, "default_runtime_path: returning");
    path
}

/// Manages the coordinator process through its runtime file
#[derive(Debug)]
pub struct DaemonManager {
    runtime_file: PathBuf,
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonManager {
    /// Create a manager for the default runtime file location
    pub fn new() -> Self {
        debug!("DaemonManager::new: called");
        Self {
            runtime_file: default_runtime_path(),
        }
    }

    /// Create a manager with a custom runtime file path (for testing)
    pub fn with_runtime_file(runtime_file: PathBuf) -> Self {
        debug!(?runtime_file, "DaemonManager::with_runtime_file: called");
        Self { runtime_file }
    }

    /// The runtime file path
    pub fn runtime_file(&self) -> &PathBuf {
        &self.runtime_file
    }

    /// Run info left behind by a coordinator, without checking liveness
    ///
    /// An unreadable or unparseable file is treated as absent; it gets
    /// overwritten on the next registration.
    pub fn read_info(&self) -> Option<RunInfo> {
        debug!(?self.runtime_file, "DaemonManager::read_info: called");
        let raw = fs::read_to_string(&self.runtime_file).ok()?;
        match serde_json::from_str(&raw) {
            Ok(info) => {
                debug!(?info, "DaemonManager::read_info: parsed");
                Some(info)
            }
            Err(e) => {
                warn!(path = ?self.runtime_file, error = %e, "Runtime file unreadable, ignoring");
                None
            }
        }
    }

    /// Run info of a coordinator that is still alive
    pub fn live_info(&self) -> Option<RunInfo> {
        debug!("DaemonManager::live_info: called");
        let info = self.read_info().filter(|info| process_alive(info.pid));
        debug!(running = info.is_some(), "DaemonManager::live_info: returning");
        info
    }

    /// Check if a coordinator is running
    pub fn is_running(&self) -> bool {
        self.live_info().is_some()
    }

    /// Get the running coordinator's PID
    pub fn running_pid(&self) -> Option<u32> {
        self.live_info().map(|info| info.pid)
    }

    /// The listener address recorded by the running coordinator
    pub fn reachable_at(&self) -> Option<String> {
        debug!("DaemonManager::reachable_at: called");
        let bind = self.live_info().map(|info| info.bind);
        debug!(?bind, "DaemonManager::reachable_at: returning");
        bind
    }

    /// Whether the running coordinator was built from this binary's version
    pub fn version_matches(&self) -> bool {
        debug!("DaemonManager::version_matches: called");
        let matches = self.live_info().is_some_and(|info| info.version == VERSION);
        debug!(matches, cli_version = VERSION, "DaemonManager::version_matches: returning");
        matches
    }

    fn write_info(&self, info: &RunInfo) -> Result<()> {
        debug!(?info, ?self.runtime_file, "DaemonManager::write_info: called");
        if let Some(parent) = self.runtime_file.parent() {
            fs::create_dir_all(parent).context("Failed to create runtime directory")?;
        }

        let raw = serde_json::to_string_pretty(info).context("Failed to serialize run info")?;
        fs::write(&self.runtime_file, raw).context("Failed to write runtime file")?;
        debug!(path = ?self.runtime_file, "DaemonManager::write_info: written");
        Ok(())
    }

    /// Remove the runtime file
    ///
    /// Called by the coordinator itself on graceful exit, and by `stop`
    /// after a kill, so a stale file only survives a crash.
    pub fn clear(&self) -> Result<()> {
        debug!(?self.runtime_file, "DaemonManager::clear: called");
        if self.runtime_file.exists() {
            fs::remove_file(&self.runtime_file).context("Failed to remove runtime file")?;
            debug!("DaemonManager::clear: removed");
        }
        Ok(())
    }

    /// Record the current process as the running coordinator
    ///
    /// Called by the coordinator once its listener is bound, with the
    /// address the listener actually got.
    pub fn register_self(&self, bind: &str) -> Result<()> {
        debug!(%bind, "DaemonManager::register_self: called");
        let info = RunInfo {
            pid: std::process::id(),
            version: VERSION.to_string(),
            bind: bind.to_string(),
        };
        self.write_info(&info)?;
        info!(pid = info.pid, version = %info.version, bind = %info.bind, "Coordinator registered");
        Ok(())
    }

    /// Fork a coordinator into the background
    ///
    /// The child registers itself once its listener is up, so this only
    /// spawns and returns the child PID.
    pub fn start(&self) -> Result<u32> {
        debug!("DaemonManager::start: called");
        if let Some(info) = self.live_info() {
            debug!(pid = info.pid, "DaemonManager::start: already running");
            return Err(eyre::eyre!("Coordinator already running with PID {}", info.pid));
        }

        let exe = std::env::current_exe().context("Failed to get current executable")?;
        debug!(?exe, "DaemonManager::start: spawning run-daemon");

        let child = std::process::Command::new(&exe)
            .arg("run-daemon")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .context("Failed to spawn coordinator process")?;

        let pid = child.id();
        info!(pid, "Coordinator forked");
        Ok(pid)
    }

    /// Stop the running coordinator, escalating if it lingers
    pub fn stop(&self) -> Result<()> {
        debug!("DaemonManager::stop: called");
        let info = self
            .live_info()
            .ok_or_else(|| eyre::eyre!("Coordinator is not running"))?;

        info!(pid = info.pid, "Stopping coordinator...");
        terminate(info.pid)?;

        let deadline = Instant::now() + STOP_GRACE;
        while process_alive(info.pid) {
            if Instant::now() >= deadline {
                warn!(pid = info.pid, "Coordinator ignored the termination signal, killing");
                kill_hard(info.pid);
                break;
            }
            std::thread::sleep(STOP_POLL);
        }

        self.clear()?;
        info!(pid = info.pid, "Coordinator stopped");
        Ok(())
    }

    /// Status for the CLI
    pub fn status(&self) -> DaemonStatus {
        debug!("DaemonManager::status: called");
        let info = self.read_info();
        let running = info.as_ref().is_some_and(|info| process_alive(info.pid));
        let status = DaemonStatus {
            running,
            info,
            runtime_file: self.runtime_file.clone(),
        };
        debug!(?status, "DaemonManager::status: returning");
        status
    }
}

/// Coordinator status information
#[derive(Debug)]
pub struct DaemonStatus {
    /// Whether the coordinator is running
    pub running: bool,
    /// Recorded run info; may be stale when `running` is false
    pub info: Option<RunInfo>,
    /// Runtime file path
    pub runtime_file: PathBuf,
}

/// Check whether a process with the given PID exists
fn process_alive(pid: u32) -> bool {
    debug!(pid, "process_alive: called");
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        // Signal 0 probes for existence without delivering anything
        let alive = kill(Pid::from_raw(pid as i32), None).is_ok();
        debug!(pid, alive, "process_alive: returning");
        alive
    }

    #[cfg(windows)]
    {
        let alive = std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output()
            .map(|o| !o.stdout.is_empty() && !String::from_utf8_lossy(&o.stdout).contains("No tasks"))
            .unwrap_or(false);
        debug!(pid, alive, "process_alive: returning");
        return alive;
    }

    #[cfg(not(any(unix, windows)))]
    {
        // Assume running on unknown platforms
        let _ = pid;
        true
    }
}

/// Ask a process to exit
fn terminate(pid: u32) -> Result<()> {
    debug!(pid, "terminate: called");
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).context("Failed to send SIGTERM")?;
    }

    #[cfg(windows)]
    {
        std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string()])
            .output()
            .context("Failed to run taskkill")?;
    }

    Ok(())
}

/// Force a process down; best effort
fn kill_hard(pid: u32) {
    debug!(pid, "kill_hard: called");
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }

    #[cfg(windows)]
    {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .output();
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> DaemonManager {
        DaemonManager::with_runtime_file(temp.path().join("coordinator.json"))
    }

    /// A PID that is guaranteed dead: a child we already reaped
    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("spawning `true` should work");
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_registering_own_process_counts_as_running() {
        let temp = TempDir::new().unwrap();
        let daemon = manager(&temp);

        assert!(!daemon.is_running());
        daemon.register_self("127.0.0.1:4717").unwrap();

        // The test process itself is the registered coordinator
        assert!(daemon.is_running());
        assert_eq!(daemon.running_pid(), Some(std::process::id()));
        assert_eq!(daemon.reachable_at().as_deref(), Some("127.0.0.1:4717"));
        assert!(daemon.version_matches());
    }

    #[test]
    fn test_dead_pid_reads_back_but_is_not_running() {
        let temp = TempDir::new().unwrap();
        let daemon = manager(&temp);

        daemon
            .write_info(&RunInfo {
                pid: dead_pid(),
                version: VERSION.to_string(),
                bind: "127.0.0.1:4717".to_string(),
            })
            .unwrap();

        // The file is intact but the process is gone
        assert!(daemon.read_info().is_some());
        assert!(!daemon.is_running());
        assert_eq!(daemon.reachable_at(), None);
        assert!(!daemon.version_matches());

        let status = daemon.status();
        assert!(!status.running);
        assert_eq!(status.info.unwrap().bind, "127.0.0.1:4717");
    }

    #[test]
    fn test_stale_version_does_not_match() {
        let temp = TempDir::new().unwrap();
        let daemon = manager(&temp);

        daemon
            .write_info(&RunInfo {
                pid: std::process::id(),
                version: "0.0.0-ancient".to_string(),
                bind: "127.0.0.1:4717".to_string(),
            })
            .unwrap();

        assert!(daemon.is_running());
        assert!(!daemon.version_matches());
    }

    #[test]
    fn test_corrupt_runtime_file_is_treated_as_absent() {
        let temp = TempDir::new().unwrap();
        let daemon = manager(&temp);

        fs::write(daemon.runtime_file(), "{ not json").unwrap();

        assert!(daemon.read_info().is_none());
        assert!(!daemon.is_running());
        let status = daemon.status();
        assert!(!status.running);
        assert!(status.info.is_none());
    }

    #[test]
    fn test_clear_removes_file_and_tolerates_absence() {
        let temp = TempDir::new().unwrap();
        let daemon = manager(&temp);

        // Nothing to remove is fine
        daemon.clear().unwrap();

        daemon.register_self("127.0.0.1:0").unwrap();
        assert!(daemon.runtime_file().exists());

        daemon.clear().unwrap();
        assert!(!daemon.runtime_file().exists());
        assert!(daemon.read_info().is_none());
    }

    #[test]
    fn test_stop_errors_when_nothing_runs() {
        let temp = TempDir::new().unwrap();
        let daemon = manager(&temp);
        assert!(daemon.stop().is_err());
    }

    #[test]
    fn test_run_info_round_trips_as_json() {
        let info = RunInfo {
            pid: 4242,
            version: "1.2.3".to_string(),
            bind: "0.0.0.0:9000".to_string(),
        };
        let json = serde_json::to_string(&info).unwrap();
        let parsed: RunInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, info);
    }
}

// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Restart coordination with whatever owns the running core process

use crate::config::{Branch, UpgraderConfig};
use crate::error::{Result, UpgraderError};
use crate::platform::BranchPaths;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

/// Work run while the core is stopped (e.g. swapping the binary back from backup)
pub type PreStartAction = BoxFuture<'static, Result<()>>;

const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    Restarted,
    /// Nothing was running, so nothing was restarted and no action was run
    NotRunning,
}

/// The process supervisor's side of a restart.
///
/// Implementations stop the running core, run `pre_start` if given, then start the
/// core again with its last known configuration. A refused request is
/// `NotRunning`, not an error. If `pre_start` fails the core is still started
/// again and the action's error is returned.
#[async_trait]
pub trait CoreSupervisor: Send + Sync {
    fn is_running(&self) -> bool;

    fn active_branch(&self) -> Branch;

    async fn restart_active_core(&self, pre_start: Option<PreStartAction>)
    -> Result<RestartOutcome>;
}

/// Supervises a core started in the background and tracked through a pid file
#[derive(Debug, Clone)]
pub struct PidFileSupervisor {
    pid_file: PathBuf,
    active_branch: Branch,
    binary: PathBuf,
    args: Vec<String>,
    graceful_timeout: Duration,
}

impl PidFileSupervisor {
    pub fn new(config: &UpgraderConfig) -> Self {
        let branch = config.active_branch;
        Self {
            pid_file: config.pid_file(),
            active_branch: branch,
            binary: BranchPaths::new(config, branch).binary,
            args: config.core_args(),
            graceful_timeout: GRACEFUL_TIMEOUT,
        }
    }

    pub fn with_graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = timeout;
        self
    }

    fn read_pid(&self) -> Option<i32> {
        let content = std::fs::read_to_string(&self.pid_file).ok()?;
        content.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
    }

    async fn stop(&self, pid: i32) -> Result<()> {
        tracing::info!("Stopping core (PID {pid})");
        stop_pid(pid, self.graceful_timeout).await
    }

    async fn start(&self) -> Result<u32> {
        tracing::info!("Starting core from {}", self.binary.display());

        let child = tokio::process::Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| UpgraderError::Restart(format!("Failed to start core: {e}")))?;

        let pid = child
            .id()
            .ok_or_else(|| UpgraderError::Restart("Core exited immediately".to_string()))?;
        tokio::fs::write(&self.pid_file, pid.to_string()).await?;

        tracing::info!("Core started with PID: {pid}");
        Ok(pid)
    }
}

#[async_trait]
impl CoreSupervisor for PidFileSupervisor {
    fn is_running(&self) -> bool {
        self.read_pid().is_some_and(pid_alive)
    }

    fn active_branch(&self) -> Branch {
        self.active_branch
    }

    async fn restart_active_core(
        &self,
        pre_start: Option<PreStartAction>,
    ) -> Result<RestartOutcome> {
        let Some(pid) = self.read_pid().filter(|pid| pid_alive(*pid)) else {
            tracing::info!("Core is not running, restart skipped");
            return Ok(RestartOutcome::NotRunning);
        };

        self.stop(pid).await?;

        let action_result = match pre_start {
            Some(action) => action.await,
            None => Ok(()),
        };

        self.start().await?;
        action_result.map(|()| RestartOutcome::Restarted)
    }
}

#[cfg(unix)]
fn pid_alive(pid: i32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;
    signal::kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn pid_alive(_pid: i32) -> bool {
    false
}

/// Graceful stop: SIGTERM -> timeout -> SIGKILL
#[cfg(unix)]
async fn stop_pid(pid: i32, graceful_timeout: Duration) -> Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let target = Pid::from_raw(pid);
    if let Err(e) = signal::kill(target, Signal::SIGTERM) {
        tracing::warn!("Failed to send SIGTERM: {e}");
    }

    let start = std::time::Instant::now();
    while pid_alive(pid) {
        if start.elapsed() >= graceful_timeout {
            tracing::warn!("Core did not stop gracefully, killing");
            signal::kill(target, Signal::SIGKILL)
                .map_err(|e| UpgraderError::Restart(format!("Failed to kill core: {e}")))?;
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    tracing::info!("Core stopped gracefully");
    Ok(())
}

#[cfg(not(unix))]
async fn stop_pid(_pid: i32, _graceful_timeout: Duration) -> Result<()> {
    Err(UpgraderError::Restart(
        "stopping the core is not supported on this platform".to_string(),
    ))
}

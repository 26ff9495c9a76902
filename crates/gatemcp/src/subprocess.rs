//! Supervision of the stdio-bridge child process.
//!
//! In stdio mode the MCP server is not an HTTP process; a bridge command
//! (`npx -y supergateway …`, assembled by [`Config::exec_command`]) exposes
//! its stdio over a local HTTP/SSE endpoint that the proxy then fronts. The
//! supervisor owns that child: it spawns it through the platform shell with
//! stderr passed through for operator visibility, and tears it down with a
//! termination signal, a grace period, and a forced kill.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::GateError;

/// Grace period between the termination signal and a forced kill.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Launcher the bridge command is built around.
const LAUNCHER: &str = "npx";

/// Handle to the supervised bridge process.
///
/// Created once at startup in stdio mode and shut down exactly once on proxy
/// exit; `shutdown` is idempotent.
pub struct Supervisor {
    child: Mutex<Option<Child>>,
    command: String,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("command", &self.command)
            .finish()
    }
}

impl Supervisor {
    /// Spawn the bridge command derived from config.
    pub fn spawn(cfg: &Config) -> Result<Self, GateError> {
        let command = cfg.exec_command();
        if command.is_empty() {
            return Err(GateError::subprocess("no stdio.user_command configured"));
        }
        Self::launch(&command, cfg.stdio.work_dir.as_deref(), &cfg.stdio.env)
    }

    /// Spawn an arbitrary shell command under supervision.
    pub fn launch(
        command: &str,
        work_dir: Option<&str>,
        env: &[String],
    ) -> Result<Self, GateError> {
        info!(%command, "starting subprocess");

        let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
        let mut cmd = Command::new(shell);
        cmd.arg(flag)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(dir) = work_dir.filter(|d| !d.is_empty()) {
            cmd.current_dir(dir);
        }
        for entry in env {
            match entry.split_once('=') {
                Some((key, value)) => {
                    cmd.env(key, value);
                }
                None => warn!(%entry, "ignoring malformed env entry, expected KEY=VALUE"),
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| GateError::subprocess(format!("failed to spawn subprocess: {e}")))?;
        info!(pid = ?child.id(), "subprocess started");

        Ok(Self {
            child: Mutex::new(Some(child)),
            command: command.to_string(),
        })
    }

    /// Non-blocking liveness check.
    pub async fn is_running(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Terminate the child: signal, wait up to the grace period, then kill.
    ///
    /// Subsequent calls return immediately.
    pub async fn shutdown(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };

        info!(command = %self.command, "terminating subprocess");
        terminate(&mut child);

        match timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => info!(%status, "subprocess exited"),
            Ok(Err(e)) => error!(error = %e, "failed waiting for subprocess exit"),
            Err(_) => {
                warn!("subprocess did not exit within grace period, killing");
                if let Err(e) = child.kill().await {
                    error!(error = %e, "failed to kill subprocess");
                }
            }
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(pid, error = %e, "failed to signal subprocess");
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "failed to signal subprocess");
    }
}

/// Pre-flight check that the bridge launcher exists on `PATH`.
///
/// Callers treat a failure as warn-only so a misconfigured host surfaces in
/// logs instead of refusing to start.
pub fn ensure_dependencies(user_command: &str) -> Result<(), GateError> {
    if launcher_on_path(LAUNCHER) {
        Ok(())
    } else {
        Err(GateError::subprocess(format!(
            "required launcher '{LAUNCHER}' not found on PATH (needed to run {user_command:?})"
        )))
    }
}

fn launcher_on_path(name: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    for dir in std::env::split_paths(&path) {
        if dir.join(name).is_file() {
            return true;
        }
        if cfg!(windows) {
            for ext in ["exe", "cmd", "bat"] {
                if dir.join(format!("{name}.{ext}")).is_file() {
                    return true;
                }
            }
        }
    }
    false
}

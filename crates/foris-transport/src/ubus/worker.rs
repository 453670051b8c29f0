//! ubus worker processes
//!
//! The daemon re-executes itself once per module (or once for all modules)
//! and supervises the children. Each child asks the kernel to terminate it
//! when the parent dies.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::{Result, TransportError};

/// Split the enabled modules into worker process groups
pub fn plan_workers(modules: &[String], single: bool) -> Vec<Vec<String>> {
    if modules.is_empty() {
        return Vec::new();
    }
    if single {
        vec![modules.to_vec()]
    } else {
        modules.iter().map(|m| vec![m.clone()]).collect()
    }
}

/// Spawns and watches the worker processes
pub struct WorkerSupervisor {
    exe: PathBuf,
    base_args: Vec<OsString>,
    plan: Vec<Vec<String>>,
}

impl WorkerSupervisor {
    /// `base_args` are passed to every worker before the `--module` flags
    pub fn new(exe: impl Into<PathBuf>, base_args: Vec<OsString>, plan: Vec<Vec<String>>) -> Self {
        Self {
            exe: exe.into(),
            base_args,
            plan,
        }
    }

    fn command(&self, modules: &[String]) -> Command {
        let mut command = Command::new(&self.exe);
        command.args(&self.base_args);
        for module in modules {
            command.arg("--module").arg(module);
        }
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    /// Run the workers until shutdown.
    ///
    /// A worker exiting on its own is an error; on shutdown every worker is
    /// killed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut workers: JoinSet<(String, Option<std::io::Result<ExitStatus>>)> = JoinSet::new();

        for modules in &self.plan {
            let label = modules.join(",");
            let mut child = self.command(modules).spawn().map_err(|e| {
                TransportError::ConnectionFailed(format!("failed to spawn worker {}: {}", label, e))
            })?;
            info!("Started ubus worker for {} (pid {:?})", label, child.id());

            let mut stop = shutdown.clone();
            workers.spawn(async move {
                tokio::select! {
                    status = child.wait() => (label, Some(status)),
                    _ = stop.changed() => {
                        if let Err(e) = child.kill().await {
                            warn!("Failed to kill worker {}: {}", label, e);
                        }
                        (label, None)
                    }
                }
            });
        }

        let result = loop {
            tokio::select! {
                finished = workers.join_next() => match finished {
                    Some(Ok((label, Some(status)))) => {
                        let status = status.map(|s| s.to_string()).unwrap_or_else(|e| e.to_string());
                        error!("ubus worker {} exited: {}", label, status);
                        break Err(TransportError::ConnectionClosed);
                    }
                    Some(Ok((_, None))) => {}
                    Some(Err(e)) => {
                        error!("Worker supervisor task failed: {}", e);
                        break Err(TransportError::ConnectionClosed);
                    }
                    None => break Ok(()),
                },
                _ = shutdown.changed() => break Ok(()),
            }
        };

        // aborted tasks drop their children, which kills them
        workers.shutdown().await;
        result
    }
}

/// Ask the kernel to send SIGTERM when the parent process dies
#[cfg(target_os = "linux")]
pub fn set_parent_death_signal() -> Result<()> {
    // SAFETY: prctl with PR_SET_PDEATHSIG only changes a flag of this process
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // the parent may already be gone
    if unsafe { libc::getppid() } == 1 {
        return Err(TransportError::ConnectionClosed);
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_parent_death_signal() -> Result<()> {
    Ok(())
}

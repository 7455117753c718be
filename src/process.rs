//! Child process ownership for the dev supervisor.
//!
//! This module defines the specification of the worker to launch (`WorkerSpec`)
//! and the handle the supervisor keeps on it (`ChildHandle`), which is the only
//! way the parent talks to the worker: deliver a signal, or wait for its exit.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use tokio::process::{Child, Command};

use crate::signals::{self, Delivery, Signal};

/// Hidden flag that switches the binary into its worker role.
pub const WORKER_FLAG: &str = "--worker";

/// Specification for the worker process to launch.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Executable to run, normally the current binary.
    pub program: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<OsString>,
}

impl WorkerSpec {
    /// Re-runs the current executable as a worker, forwarding global options
    /// and the invocation's command tokens.
    pub fn current_exe(
        config: Option<&PathBuf>,
        no_config: bool,
        cwd: Option<&PathBuf>,
        tokens: &[String],
    ) -> Result<Self> {
        let program = std::env::current_exe().context("failed to resolve current executable")?;
        let mut args: Vec<OsString> = vec![WORKER_FLAG.into()];
        if let Some(config) = config {
            args.push("--config".into());
            args.push(config.into());
        }
        if no_config {
            args.push("--no-config".into());
        }
        if let Some(cwd) = cwd {
            args.push("--cwd".into());
            args.push(cwd.into());
        }
        args.push("--".into());
        args.extend(tokens.iter().map(OsString::from));
        Ok(Self { program, args })
    }
}

/// Exclusive handle on a spawned worker.
#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
    pid: u32,
}

impl ChildHandle {
    /// Spawns the worker with inherited standard streams.
    ///
    /// The worker stays in the parent's process group so a terminal Ctrl-C
    /// reaches it directly as well as through the relay.
    pub fn spawn(spec: &WorkerSpec) -> Result<Self> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn worker {}", spec.program.display()))?;
        let pid = child.id().unwrap_or(0);
        tracing::info!(pid, "worker spawned");
        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Delivers `signal` to the worker.
    ///
    /// Once the worker has been reaped the pid may belong to someone else, so
    /// nothing is sent and the delivery is reported as gone.
    pub fn signal(&mut self, signal: Signal) -> Delivery {
        match self.child.try_wait() {
            Ok(Some(_)) => return Delivery::Gone,
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(pid = self.pid, error = %err, "could not poll worker");
            }
        }
        match signals::send_os_signal(self.pid, signal) {
            Ok(delivery) => delivery,
            Err(err) => {
                tracing::debug!(pid = self.pid, %signal, error = %err, "signal delivery failed");
                Delivery::Gone
            }
        }
    }

    /// Waits for the worker to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.context("failed to wait for worker")
    }
}

/// Maps a worker exit status to the parent's exit code.
///
/// A worker killed by a signal it did not handle has no code and counts as a failure.
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

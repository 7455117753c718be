//! Parent side of `kiln dev`.
//!
//! The supervisor owns exactly one worker. Every interrupt, quit or terminate
//! the parent receives is relayed to the worker; the parent then exits with the
//! code the signal maps to, either immediately or once the worker is gone
//! (bounded by a timeout), depending on the configured [`RelayMode`].

use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::{RelayMode, SupervisorConfig};
use crate::process::{self, ChildHandle, WorkerSpec};
use crate::signals::{Delivery, Signal};

#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    pub relay: RelayMode,
    pub await_child_timeout: Duration,
}

impl From<&SupervisorConfig> for SupervisorOptions {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            relay: config.relay,
            await_child_timeout: Duration::from_millis(config.await_child_timeout_ms),
        }
    }
}

pub struct Supervisor {
    child: ChildHandle,
    options: SupervisorOptions,
}

enum Step {
    Signal(Signal),
    Exited(Result<std::process::ExitStatus>),
    TimedOut,
}

impl Supervisor {
    /// Spawns the worker. The signal listener should already be installed so
    /// nothing sent in between falls through to the default disposition.
    pub fn spawn(spec: &WorkerSpec, options: SupervisorOptions) -> Result<Self> {
        let child = ChildHandle::spawn(spec)?;
        Ok(Self { child, options })
    }

    /// Relays signals until the parent should exit; returns the exit code.
    ///
    /// If the worker exits on its own its code is passed through.
    pub async fn run(&mut self, signals: &mut mpsc::Receiver<Signal>) -> Result<i32> {
        // Code and deadline of the first relayed signal while awaiting the child.
        let mut pending: Option<(i32, Instant)> = None;

        loop {
            let deadline = pending.map(|(_, deadline)| deadline);
            let step = tokio::select! {
                Some(signal) = signals.recv() => Step::Signal(signal),
                status = self.child.wait() => Step::Exited(status),
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    Step::TimedOut
                }
            };

            match step {
                Step::Signal(signal) => {
                    let code = self.relay(signal);
                    match self.options.relay {
                        RelayMode::Immediate => return Ok(code),
                        RelayMode::AwaitChild => {
                            if pending.is_none() {
                                pending =
                                    Some((code, Instant::now() + self.options.await_child_timeout));
                            }
                        }
                    }
                }
                Step::Exited(status) => {
                    let status = status?;
                    return Ok(match pending {
                        Some((code, _)) => code,
                        None => {
                            tracing::info!(code = ?status.code(), "worker exited on its own");
                            process::exit_code(status)
                        }
                    });
                }
                Step::TimedOut => {
                    tracing::warn!(
                        pid = self.child.pid(),
                        timeout = ?self.options.await_child_timeout,
                        "worker still running after relay timeout"
                    );
                    if let Some((code, _)) = pending {
                        return Ok(code);
                    }
                }
            }
        }
    }

    fn relay(&mut self, signal: Signal) -> i32 {
        match self.child.signal(signal) {
            Delivery::Delivered => {
                tracing::info!(%signal, pid = self.child.pid(), "signal relayed to worker");
            }
            Delivery::Gone => {
                tracing::debug!(%signal, "worker already gone, nothing to relay");
            }
        }
        signal.supervisor_exit_code()
    }
}

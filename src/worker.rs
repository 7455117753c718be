//! The dev worker: runs "dev" inside the child process and shuts it down once.
//!
//! The first interrupt, quit or terminate flips [`ShutdownState`], emits the
//! `onExit` event to the runner and ends the worker with code 0. Later signals,
//! including ones racing on other runtime threads, are ignored. A signal may
//! arrive before, during or after `Runner::start`; the shutdown path never waits
//! for startup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::command::Command;
use crate::hooks::LifecycleEvent;
use crate::runner::{Mode, Runner, RunnerOptions};
use crate::signals::Signal;

/// Process-wide "already closing" flag. Set once, never reset.
#[derive(Debug, Default)]
pub struct ShutdownState {
    closed: AtomicBool,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the shutdown. Only the first caller gets `true`.
    pub fn try_close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Why the worker stopped, and the code its process exits with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// A signal triggered the shutdown protocol.
    Signalled(Signal),
    /// `start` resolved and nothing else is left to do.
    Completed,
}

impl WorkerExit {
    pub fn code(self) -> i32 {
        match self {
            WorkerExit::Signalled(_) | WorkerExit::Completed => 0,
        }
    }
}

/// Single-fire shutdown sequence bound to a runner.
pub struct Shutdown<R: ?Sized> {
    state: ShutdownState,
    runner: Arc<R>,
    grace: Duration,
}

impl<R: Runner + ?Sized> Shutdown<R> {
    /// `grace` bounds how long hook work may run before the worker exits; zero
    /// exits right after the hooks were called.
    pub fn new(runner: Arc<R>, grace: Duration) -> Self {
        Self {
            state: ShutdownState::new(),
            runner,
            grace,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Runs the shutdown protocol for `signal`.
    ///
    /// Returns `false` without doing anything when a shutdown already happened.
    pub async fn on_signal(&self, signal: Signal) -> bool {
        if !self.state.try_close() {
            tracing::debug!(%signal, "shutdown already in progress");
            return false;
        }
        tracing::info!(%signal, "worker shutting down");
        let mut pending = self.runner.emit(&LifecycleEvent::Exit { signal });

        if !self.grace.is_zero() && !pending.is_empty() {
            let drained = tokio::time::timeout(self.grace, async {
                while pending.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(
                    grace = ?self.grace,
                    "exit hooks still running after grace period"
                );
            }
        }
        true
    }
}

/// Entry point of the worker process.
///
/// Fixes development mode before the runner is built, then runs `command`
/// with the shutdown protocol armed. `signals` must already be fed by an
/// installed listener.
pub async fn serve<R, F>(
    command: &Command,
    mut options: RunnerOptions,
    grace: Duration,
    build_runner: F,
    signals: &mut mpsc::Receiver<Signal>,
) -> Result<WorkerExit>
where
    R: Runner,
    F: FnOnce(RunnerOptions) -> R,
{
    options.mode = Some(Mode::Development);
    let runner = Arc::new(build_runner(options));
    let shutdown = Shutdown::new(runner, grace);
    run(&shutdown, command, signals).await
}

/// Runs `command` on `runner` until it completes, fails, or a signal arrives.
///
/// The signal listener feeding `signals` must be installed before this is
/// called. A startup failure is returned as an error and emits nothing.
pub async fn run<R: Runner + ?Sized>(
    shutdown: &Shutdown<R>,
    command: &Command,
    signals: &mut mpsc::Receiver<Signal>,
) -> Result<WorkerExit> {
    let runner = shutdown.runner.clone();
    let start = runner.start(command);
    tokio::pin!(start);

    loop {
        tokio::select! {
            biased;
            Some(signal) = signals.recv() => {
                if shutdown.on_signal(signal).await {
                    return Ok(WorkerExit::Signalled(signal));
                }
            }
            result = &mut start => {
                result?;
                tracing::info!(command = %command.name, "command completed");
                return Ok(WorkerExit::Completed);
            }
        }
    }
}

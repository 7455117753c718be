//! Termination signals: listening for them and delivering them to children.
//!
//! Listeners are installed synchronously and then drained by a background task
//! that forwards every occurrence (repeats included) into an mpsc channel, so
//! the supervisor and the worker can consume signals inside a `select!` loop.

use std::fmt;
use std::io;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

/// The termination signals this layer intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// SIGINT, usually Ctrl-C.
    Interrupt,
    /// SIGQUIT, usually Ctrl-\.
    Quit,
    /// SIGTERM, the default for `kill`.
    Terminate,
}

impl Signal {
    pub const ALL: [Signal; 3] = [Signal::Interrupt, Signal::Quit, Signal::Terminate];

    pub fn label(self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Quit => "SIGQUIT",
            Signal::Terminate => "SIGTERM",
        }
    }

    /// Exit code the supervisor uses after relaying this signal.
    ///
    /// An interrupt is the user stopping the dev server and counts as success;
    /// anything else means the process was asked to stop from outside.
    pub fn supervisor_exit_code(self) -> i32 {
        match self {
            Signal::Interrupt => 0,
            Signal::Quit | Signal::Terminate => 1,
        }
    }

    #[cfg(unix)]
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Quit => libc::SIGQUIT,
            Signal::Terminate => libc::SIGTERM,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Installs listeners for interrupt, quit and terminate and forwards every
/// delivery into `tx`.
///
/// Registration happens before this function returns; the forwarding task
/// stops once the receiver is dropped.
#[cfg(unix)]
pub fn spawn_signal_listener(tx: mpsc::Sender<Signal>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint =
        signal(SignalKind::interrupt()).context("failed to install SIGINT listener")?;
    let mut sigquit = signal(SignalKind::quit()).context("failed to install SIGQUIT listener")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM listener")?;

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = sigint.recv() => Signal::Interrupt,
                Some(()) = sigquit.recv() => Signal::Quit,
                Some(()) = sigterm.recv() => Signal::Terminate,
                else => break,
            };
            tracing::debug!(signal = %received, "signal received");
            if tx.send(received).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn spawn_signal_listener(tx: mpsc::Sender<Signal>) -> Result<()> {
    use tokio::signal::windows::{ctrl_break, ctrl_c};

    let mut interrupt = ctrl_c().context("failed to install Ctrl-C listener")?;
    let mut brk = ctrl_break().context("failed to install Ctrl-Break listener")?;

    tokio::spawn(async move {
        loop {
            // Ctrl-Break is what a parent can deliver, so it stands in for SIGTERM.
            let received = tokio::select! {
                Some(()) = interrupt.recv() => Signal::Interrupt,
                Some(()) = brk.recv() => Signal::Terminate,
                else => break,
            };
            tracing::debug!(signal = %received, "signal received");
            if tx.send(received).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

/// Outcome of delivering a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The target no longer exists. The intent (it is not running) already holds.
    Gone,
}

/// Delivers `signal` to `pid`.
///
/// A missing target is reported as [`Delivery::Gone`] rather than an error.
#[cfg(unix)]
pub fn send_os_signal(pid: u32, signal: Signal) -> io::Result<Delivery> {
    let Ok(pid) = i32::try_from(pid) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("pid {pid} out of range"),
        ));
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signal.raw()) };
    if rc == 0 {
        return Ok(Delivery::Delivered);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(Delivery::Gone)
    } else {
        Err(err)
    }
}

#[cfg(windows)]
pub fn send_os_signal(pid: u32, signal: Signal) -> io::Result<Delivery> {
    use windows_sys::Win32::System::Console::{
        GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT, CTRL_C_EVENT,
    };
    // Windows has no SIGTERM/SIGQUIT; console control events are the closest thing.
    let event = match signal {
        Signal::Interrupt => CTRL_C_EVENT,
        Signal::Quit | Signal::Terminate => CTRL_BREAK_EVENT,
    };
    // SAFETY: GenerateConsoleCtrlEvent takes plain integers and has no memory-safety preconditions.
    let ok = unsafe { GenerateConsoleCtrlEvent(event, pid) };
    if ok != 0 {
        Ok(Delivery::Delivered)
    } else {
        Ok(Delivery::Gone)
    }
}

#[cfg(all(not(unix), not(windows)))]
pub fn send_os_signal(_pid: u32, _signal: Signal) -> io::Result<Delivery> {
    Ok(Delivery::Gone)
}

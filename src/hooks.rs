//! Exit hook registry.
//!
//! Plugins register [`ExitHook`]s with the runner. Emitting a lifecycle event
//! calls every hook synchronously, in registration order; any asynchronous
//! follow-up a hook starts is collected in the returned `JoinSet` so the caller
//! decides whether to wait for it.

use std::path::PathBuf;
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;
use tokio::task::JoinSet;

use crate::signals::Signal;

/// Name under which the shutdown event is emitted.
pub const ON_EXIT: &str = "onExit";

/// Lifecycle events the runner can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The dev worker is shutting down because it received `signal`.
    Exit { signal: Signal },
}

#[derive(Debug, Serialize)]
struct EventPayload<'a> {
    event: &'a str,
    signal: &'a str,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Exit { .. } => ON_EXIT,
        }
    }

    pub fn signal(&self) -> Signal {
        match self {
            LifecycleEvent::Exit { signal } => *signal,
        }
    }

    /// JSON form handed to out-of-process hooks.
    pub fn to_json(&self) -> String {
        let payload = EventPayload {
            event: self.name(),
            signal: self.signal().label(),
        };
        serde_json::to_string(&payload).unwrap_or_default()
    }
}

/// A plugin callback invoked on lifecycle events.
pub trait ExitHook: Send + Sync {
    fn name(&self) -> &str;

    /// Handles `event`. Runs synchronously; long work goes into `tasks`.
    fn on_event(&self, event: &LifecycleEvent, tasks: &mut JoinSet<()>);
}

/// Ordered collection of registered hooks.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn ExitHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Box<dyn ExitHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Calls every hook with `event` and returns the work they left running.
    pub fn emit(&self, event: &LifecycleEvent) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        for hook in &self.hooks {
            tracing::debug!(hook = hook.name(), event = event.name(), "calling hook");
            hook.on_event(event, &mut tasks);
        }
        tasks
    }
}

/// Runs a shell command line when an event fires.
///
/// The command receives the signal in `KILN_EXIT_SIGNAL` and the whole event as
/// JSON in `KILN_EVENT`. It is launched before `on_event` returns and is not
/// tied to the worker's lifetime, so it keeps running if the worker exits first.
pub struct ShellHook {
    line: String,
    root: PathBuf,
}

impl ShellHook {
    pub fn new(line: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            line: line.into(),
            root: root.into(),
        }
    }
}

impl ExitHook for ShellHook {
    fn name(&self) -> &str {
        &self.line
    }

    fn on_event(&self, event: &LifecycleEvent, tasks: &mut JoinSet<()>) {
        let mut parts = match shell_words::split(&self.line) {
            Ok(parts) => parts,
            Err(err) => {
                tracing::warn!(hook = %self.line, error = %err, "failed to parse hook");
                return;
            }
        };
        if parts.is_empty() {
            return;
        }
        let program = parts.remove(0);
        let mut command = Command::new(program);
        command
            .args(parts)
            .current_dir(&self.root)
            .env("KILN_EXIT_SIGNAL", event.signal().label())
            .env("KILN_EVENT", event.to_json())
            .stdin(Stdio::null());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!(hook = %self.line, error = %err, "failed to spawn hook");
                return;
            }
        };
        let line = self.line.clone();
        tasks.spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    tracing::warn!(hook = %line, code = ?status.code(), "hook failed");
                }
                Err(err) => {
                    tracing::warn!(hook = %line, error = %err, "failed to wait for hook");
                }
            }
        });
    }
}

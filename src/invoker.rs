//! In-process execution for every command except "dev".

use anyhow::Result;

use crate::command::Command;
use crate::runner::{Mode, Runner, RunnerOptions};

/// Mode a one-shot command runs in. Only "build" pins one.
pub fn mode_for(command: &Command) -> Option<Mode> {
    if command.is_build() {
        Some(Mode::Production)
    } else {
        None
    }
}

/// Fixes the mode, constructs the runner once and runs `command` to completion.
///
/// `build_runner` only ever sees options whose mode is already settled.
pub async fn invoke<R, F>(command: &Command, mut options: RunnerOptions, build_runner: F) -> Result<()>
where
    R: Runner,
    F: FnOnce(RunnerOptions) -> R,
{
    options.mode = mode_for(command);
    let runner = build_runner(options);
    tracing::debug!(command = %command.name, "running in-process");
    runner.start(command).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::task::JoinSet;

    use super::*;
    use crate::command::classify;
    use crate::config::Config;
    use crate::hooks::LifecycleEvent;
    use crate::runner::RunnerError;

    struct Probe {
        mode: Option<Mode>,
        fail: bool,
        calls: Arc<Mutex<Vec<(String, Option<Mode>)>>>,
        emitted: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl Runner for Probe {
        async fn start(&self, command: &Command) -> Result<(), RunnerError> {
            self.calls
                .lock()
                .unwrap()
                .push((command.name.clone(), self.mode));
            if self.fail {
                Err(RunnerError::Failed {
                    name: command.name.clone(),
                    code: 1,
                })
            } else {
                Ok(())
            }
        }

        fn emit(&self, _event: &LifecycleEvent) -> JoinSet<()> {
            *self.emitted.lock().unwrap() += 1;
            JoinSet::new()
        }
    }

    fn options() -> RunnerOptions {
        RunnerOptions {
            mode: Some(Mode::Development),
            root: PathBuf::from("."),
            config: Config::default(),
        }
    }

    async fn invoke_with(raw: &[&str], fail: bool) -> (Result<()>, Vec<(String, Option<Mode>)>, usize) {
        let tokens: Vec<String> = raw.iter().map(|s| s.to_string()).collect();
        let command = classify(false, &tokens);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let emitted = Arc::new(Mutex::new(0));
        let result = invoke(&command, options(), |options| Probe {
            mode: options.mode,
            fail,
            calls: calls.clone(),
            emitted: emitted.clone(),
        })
        .await;
        let calls = calls.lock().unwrap().clone();
        let emitted = *emitted.lock().unwrap();
        (result, calls, emitted)
    }

    #[tokio::test]
    async fn build_runs_in_production_mode() {
        let (result, calls, _) = invoke_with(&["build"], false).await;
        assert!(result.is_ok());
        assert_eq!(calls, vec![("build".to_string(), Some(Mode::Production))]);
    }

    #[tokio::test]
    async fn other_commands_leave_mode_unset() {
        let (result, calls, _) = invoke_with(&["lint", "--fix"], false).await;
        assert!(result.is_ok());
        assert_eq!(calls, vec![("lint".to_string(), None)]);
    }

    #[tokio::test]
    async fn empty_input_runs_help_in_process() {
        let (result, calls, _) = invoke_with(&[], false).await;
        assert!(result.is_ok());
        assert_eq!(calls, vec![("help".to_string(), None)]);
    }

    #[tokio::test]
    async fn failing_build_is_an_error_without_exit_event() {
        let (result, calls, emitted) = invoke_with(&["build"], true).await;
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "build exited with code 1");
        assert_eq!(calls.len(), 1);
        assert_eq!(emitted, 0);
    }
}

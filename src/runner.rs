//! The build engine boundary.
//!
//! `Runner` is the only surface this crate needs from the engine: start a
//! command, and emit lifecycle events to plugins. `ScriptRunner` is the bundled
//! engine; it runs command lines from `kiln.toml` and owns the exit hook
//! registry.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command as ProcessCommand;
use tokio::task::JoinSet;

use crate::command::{self, Command};
use crate::config::{Config, ScriptConfig};
use crate::hooks::{ExitHook, HookRegistry, LifecycleEvent, ShellHook};
use crate::signals::{self, Delivery};

/// Build mode fixed before the runner is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Development,
    Production,
}

impl Mode {
    /// Value exported to scripts as `NODE_ENV`.
    pub fn node_env(self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }
}

/// Everything a runner is constructed from.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// `None` leaves the scripts' inherited environment alone.
    pub mode: Option<Mode>,
    /// Project root that relative paths resolve against.
    pub root: PathBuf,
    pub config: Config,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("unknown command: {0} (run `kiln help` to list commands)")]
    UnknownCommand(String),
    #[error("failed to parse script for {name}")]
    Script {
        name: String,
        #[source]
        source: shell_words::ParseError,
    },
    #[error("empty script for {0}")]
    EmptyScript(String),
    #[error("failed to spawn {name}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("{name} exited with code {code}")]
    Failed { name: String, code: i32 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The external build engine as seen by the command entry.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runs `command` to completion. For "dev" this is long-lived.
    async fn start(&self, command: &Command) -> Result<(), RunnerError>;

    /// Calls plugins synchronously with `event`; returns the work they left running.
    fn emit(&self, event: &LifecycleEvent) -> JoinSet<()>;
}

/// Runs command lines configured in `kiln.toml`.
pub struct ScriptRunner {
    mode: Option<Mode>,
    root: PathBuf,
    scripts: BTreeMap<String, ScriptConfig>,
    hooks: HookRegistry,
    active: Arc<AtomicU32>,
    /// Directory of the running kiln binary, exported as `KILN_DIR`.
    kiln_dir: Option<PathBuf>,
}

impl ScriptRunner {
    pub fn new(options: RunnerOptions) -> Self {
        let RunnerOptions { mode, root, config } = options;
        let active = Arc::new(AtomicU32::new(0));

        let mut hooks = HookRegistry::new();
        // The running script goes first so servers close before cleanup hooks run.
        hooks.register(Box::new(ForwardSignal {
            active: active.clone(),
        }));
        for line in config.hooks.on_exit {
            hooks.register(Box::new(ShellHook::new(line, root.clone())));
        }

        let scripts = config
            .commands
            .into_iter()
            .map(|(name, script)| (name, script.into_script()))
            .collect();

        let kiln_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from));

        Self {
            mode,
            root,
            scripts,
            hooks,
            active,
            kiln_dir,
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    /// Register an in-process plugin hook.
    pub fn register_hook(&mut self, hook: Box<dyn ExitHook>) {
        self.hooks.register(hook);
    }

    fn help_text(&self) -> String {
        let mut text = format!(
            "kiln {}\n\nUsage: kiln [--config <path>] [--cwd <dir>] <command> [args...]\n\nCommands:\n",
            env!("CARGO_PKG_VERSION")
        );
        let mut names: Vec<&str> = self.scripts.keys().map(String::as_str).collect();
        for builtin in [command::DEV, command::BUILD] {
            if !names.contains(&builtin) {
                names.push(builtin);
            }
        }
        names.sort_unstable();
        let width = names.iter().map(|name| name.len()).max().unwrap_or(0);
        for name in names {
            let about = match self.scripts.get(name) {
                Some(script) => script
                    .description
                    .clone()
                    .unwrap_or_else(|| script.cmd.clone()),
                None => "(not configured)".to_string(),
            };
            text.push_str(&format!("  {name:<width$}  {about}\n"));
        }
        text.push_str(&format!(
            "  {:<width$}  Show this message\n  {:<width$}  Print the version\n",
            command::HELP,
            command::VERSION,
        ));
        text
    }

    async fn run_script(&self, command: &Command) -> Result<(), RunnerError> {
        let name = command.name.as_str();
        let script = self
            .scripts
            .get(name)
            .ok_or_else(|| RunnerError::UnknownCommand(name.to_string()))?;
        let mut parts = shell_words::split(&script.cmd).map_err(|source| RunnerError::Script {
            name: name.to_string(),
            source,
        })?;
        if parts.is_empty() {
            return Err(RunnerError::EmptyScript(name.to_string()));
        }
        let program = parts.remove(0);

        let mut process = ProcessCommand::new(&program);
        process.args(&parts).args(&command.args.tokens);
        match &script.cwd {
            Some(cwd) => process.current_dir(self.root.join(cwd)),
            None => process.current_dir(&self.root),
        };
        if let Some(env) = &script.env {
            process.envs(env);
        }
        if let Some(mode) = self.mode {
            process.env("NODE_ENV", mode.node_env());
        }
        process.env("KILN_VERSION", env!("CARGO_PKG_VERSION"));
        if let Some(dir) = &self.kiln_dir {
            process.env("KILN_DIR", dir);
        }
        // The script shares the terminal, so it stays in kiln's process group:
        // terminal signals reach it directly and reads do not stop it.
        // No kill_on_drop: the worker drops this future on shutdown and the
        // script must get to handle the forwarded signal.
        process
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let mut child = process.spawn().map_err(|source| RunnerError::Spawn {
            name: name.to_string(),
            source,
        })?;
        let pid = child.id().unwrap_or(0);
        self.active.store(pid, Ordering::SeqCst);
        tracing::info!(command = name, pid, mode = ?self.mode, "script started");

        let status = child.wait().await;
        self.active.store(0, Ordering::SeqCst);
        let status = status?;
        tracing::info!(command = name, code = ?status.code(), "script finished");
        if status.success() {
            Ok(())
        } else {
            Err(RunnerError::Failed {
                name: name.to_string(),
                code: status.code().unwrap_or(1),
            })
        }
    }
}

#[async_trait]
impl Runner for ScriptRunner {
    async fn start(&self, command: &Command) -> Result<(), RunnerError> {
        if command.name == command::HELP {
            print!("{}", self.help_text());
            return Ok(());
        }
        self.run_script(command).await
    }

    fn emit(&self, event: &LifecycleEvent) -> JoinSet<()> {
        self.hooks.emit(event)
    }
}

/// Built-in hook that passes the shutdown signal on to the running script.
///
/// Only the script's own pid is signalled; a terminal Ctrl-C already reaches
/// the whole foreground group.
struct ForwardSignal {
    active: Arc<AtomicU32>,
}

impl ExitHook for ForwardSignal {
    fn name(&self) -> &str {
        "forward-signal"
    }

    fn on_event(&self, event: &LifecycleEvent, _tasks: &mut JoinSet<()>) {
        let pid = self.active.load(Ordering::SeqCst);
        if pid == 0 {
            return;
        }
        match signals::send_os_signal(pid, event.signal()) {
            Ok(Delivery::Delivered) => {
                tracing::info!(pid, signal = %event.signal(), "signal forwarded to script");
            }
            Ok(Delivery::Gone) => {}
            Err(err) => {
                tracing::warn!(pid, error = %err, "failed to forward signal to script");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::command::classify;
    use crate::config::CommandConfig;
    use crate::signals::Signal;

    fn runner_with(root: PathBuf, mode: Option<Mode>, commands: &[(&str, &str)]) -> ScriptRunner {
        let mut config = Config::default();
        for (name, line) in commands {
            config
                .commands
                .insert(name.to_string(), CommandConfig::Line(line.to_string()));
        }
        ScriptRunner::new(RunnerOptions { mode, root, config })
    }

    fn tokens(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let runner = runner_with(PathBuf::from("."), None, &[]);
        let err = runner
            .start(&classify(false, &tokens(&["deploy"])))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::UnknownCommand(name) if name == "deploy"));
    }

    #[tokio::test]
    async fn help_is_always_available() {
        let runner = runner_with(PathBuf::from("."), None, &[("lint", "eslint .")]);
        runner.start(&classify(false, &[])).await.unwrap();
        let help = runner.help_text();
        assert!(help.contains("lint"));
        assert!(help.contains("eslint ."));
        assert!(help.contains("dev"));
        assert!(help.contains("(not configured)"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_sees_mode_and_forwarded_args() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_with(
            dir.path().to_path_buf(),
            Some(Mode::Production),
            &[("build", r#"sh -c 'echo "$NODE_ENV $1" > out.txt' sh"#)],
        );
        runner
            .start(&classify(false, &tokens(&["build", "--minify"])))
            .await
            .unwrap();
        let out = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(out.trim(), "production --minify");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_sees_kiln_version_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_with(
            dir.path().to_path_buf(),
            None,
            &[(
                "info",
                r#"sh -c 'echo "$KILN_VERSION" > version.txt; echo "$KILN_DIR" > dir.txt'"#,
            )],
        );
        runner
            .start(&classify(false, &tokens(&["info"])))
            .await
            .unwrap();
        let version = std::fs::read_to_string(dir.path().join("version.txt")).unwrap();
        assert_eq!(version.trim(), env!("CARGO_PKG_VERSION"));
        let exe = std::env::current_exe().unwrap();
        let kiln_dir = std::fs::read_to_string(dir.path().join("dir.txt")).unwrap();
        assert_eq!(PathBuf::from(kiln_dir.trim()), exe.parent().unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_stays_in_callers_process_group() {
        let runner = Arc::new(runner_with(
            PathBuf::from("."),
            None,
            &[("serve", "sleep 30")],
        ));
        let start = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.start(&classify(false, &tokens(&["serve"]))).await })
        };
        let pid = loop {
            let pid = runner.active.load(Ordering::SeqCst);
            if pid != 0 {
                break pid;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        let script_group = unsafe { libc::getpgid(pid as libc::pid_t) };
        let own_group = unsafe { libc::getpgrp() };
        runner.emit(&LifecycleEvent::Exit {
            signal: Signal::Interrupt,
        });
        let result = tokio::time::timeout(Duration::from_secs(5), start)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(script_group, own_group);
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_honours_cwd_and_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("web")).unwrap();
        let mut config = Config::default();
        config.commands.insert(
            "build".to_string(),
            CommandConfig::Detailed(ScriptConfig {
                cmd: r#"sh -c 'echo "$TARGET" > out.txt'"#.to_string(),
                cwd: Some("web".to_string()),
                env: Some(HashMap::from([("TARGET".to_string(), "es2020".to_string())])),
                description: None,
            }),
        );
        let runner = ScriptRunner::new(RunnerOptions {
            mode: None,
            root: dir.path().to_path_buf(),
            config,
        });
        runner
            .start(&classify(false, &tokens(&["build"])))
            .await
            .unwrap();
        let out = std::fs::read_to_string(dir.path().join("web/out.txt")).unwrap();
        assert_eq!(out.trim(), "es2020");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_script_reports_exit_code() {
        let runner = runner_with(PathBuf::from("."), None, &[("build", "sh -c 'exit 7'")]);
        let err = runner
            .start(&classify(false, &tokens(&["build"])))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Failed { code: 7, .. }));
    }

    #[tokio::test]
    async fn unparsable_script_is_an_error() {
        let runner = runner_with(PathBuf::from("."), None, &[("build", "vite 'oops")]);
        let err = runner
            .start(&classify(false, &tokens(&["build"])))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Script { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_event_is_forwarded_to_running_script() {
        let runner = Arc::new(runner_with(
            PathBuf::from("."),
            Some(Mode::Development),
            &[("dev", "sleep 30")],
        ));
        let start = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.start(&classify(false, &tokens(&["dev"]))).await })
        };
        while runner.active.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        runner.emit(&LifecycleEvent::Exit {
            signal: Signal::Terminate,
        });
        let result = tokio::time::timeout(Duration::from_secs(5), start)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(RunnerError::Failed { code: 1, .. })));
    }
}

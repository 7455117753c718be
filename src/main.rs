//! kiln: the command-line entry point.
//!
//! Parses the invocation, prints the version banner when asked, and then takes
//! one of three roles: dev supervisor (parent of `kiln dev`), dev worker (the
//! child it spawns, selected with a hidden flag), or in-process runner for every
//! other command.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use crossterm::style::Stylize;
use tokio::sync::mpsc;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

use kiln::command::{self, Command};
use kiln::config::{self, Config};
use kiln::process::WorkerSpec;
use kiln::runner::{RunnerOptions, ScriptRunner};
use kiln::supervisor::{Supervisor, SupervisorOptions};
use kiln::{invoker, preflight, signals, worker};

/// Command-line interface definition.
///
/// Help and version flags are disabled so `-h`/`-v` reach the classifier, and
/// everything from the command name on is captured verbatim.
#[derive(Debug, Parser)]
#[command(
    name = "kiln",
    about = "Front-end build tool",
    disable_help_flag = true,
    disable_version_flag = true,
    disable_help_subcommand = true
)]
struct Cli {
    /// Path to kiln.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore any kiln.toml in the project root.
    #[arg(long)]
    no_config: bool,
    /// Project root (defaults to the current directory).
    #[arg(long)]
    cwd: Option<PathBuf>,
    /// Print the version.
    #[arg(short = 'v', long)]
    version: bool,
    /// Run as the dev worker spawned by the supervisor.
    #[arg(long, hide = true)]
    worker: bool,
    /// Command followed by its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    tokens: Vec<String>,
}

#[tokio::main]
async fn main() {
    // Usage errors are startup failures like any other and exit 1, not clap's 2.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };
    init_tracing();

    let role = if cli.worker { "worker" } else { "main" };
    let span = tracing::info_span!("kiln", role, pid = std::process::id());
    let code = match run(cli).instrument(span).await {
        Ok(code) => code,
        Err(err) => {
            report_failure(&err);
            1
        }
    };
    // Exit without waiting on runtime tasks; in the dev roles that is the point.
    std::process::exit(code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("KILN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    let command = command::classify(cli.version, &cli.tokens);
    tracing::debug!(?command, "classified invocation");

    if command.is_version() && !cli.worker {
        println!("kiln@{}", env!("CARGO_PKG_VERSION"));
        return Ok(0);
    }

    let root = config::project_root(cli.cwd.as_deref())?;
    let config = config::resolve(cli.config.as_deref(), cli.no_config, &root)?;
    if let Err(err) =
        preflight::check_requirement(config.requires.as_deref(), env!("CARGO_PKG_VERSION"))
    {
        eprintln!("{}", paint_red(&err.to_string()));
        return Ok(1);
    }

    if cli.worker {
        return run_worker(&command, root, config).await;
    }
    if command.is_dev() {
        return run_supervisor(&cli, &config).await;
    }

    let options = RunnerOptions {
        mode: None,
        root,
        config,
    };
    invoker::invoke(&command, options, ScriptRunner::new).await?;
    Ok(0)
}

async fn run_supervisor(cli: &Cli, config: &Config) -> Result<i32> {
    let (tx, mut rx) = mpsc::channel(16);
    signals::spawn_signal_listener(tx)?;

    let spec = WorkerSpec::current_exe(
        cli.config.as_ref(),
        cli.no_config,
        cli.cwd.as_ref(),
        &cli.tokens,
    )?;
    let mut supervisor = Supervisor::spawn(&spec, SupervisorOptions::from(&config.supervisor))?;
    supervisor.run(&mut rx).await
}

async fn run_worker(command: &Command, root: PathBuf, config: Config) -> Result<i32> {
    if !command.is_dev() {
        bail!("the worker only runs `dev`, got `{}`", command.name);
    }
    // Listen before starting so an early signal still runs the shutdown protocol.
    let (tx, mut rx) = mpsc::channel(16);
    signals::spawn_signal_listener(tx)?;

    let grace = Duration::from_millis(config.supervisor.exit_grace_ms);
    let options = RunnerOptions {
        mode: None,
        root,
        config,
    };
    let exit = worker::serve(command, options, grace, ScriptRunner::new, &mut rx).await?;
    tracing::debug!(?exit, "worker finished");
    Ok(exit.code())
}

/// Prints an uncaught failure: the message, then the full chain and backtrace.
fn report_failure(err: &anyhow::Error) {
    eprintln!("{}", paint_red(&err.to_string()));
    eprintln!("{err:?}");
}

fn paint_red(text: &str) -> String {
    if std::io::stderr().is_terminal() {
        text.red().to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn command_and_flags_are_captured_verbatim() {
        let cli = parse(&["kiln", "dev", "--port", "3000", "-v"]);
        assert!(!cli.version);
        assert_eq!(cli.tokens, vec!["dev", "--port", "3000", "-v"]);
        assert!(command::classify(cli.version, &cli.tokens).is_dev());
    }

    #[test]
    fn global_options_precede_the_command() {
        let cli = parse(&["kiln", "--config", "site/kiln.toml", "--cwd", "site", "build"]);
        assert_eq!(cli.config, Some(PathBuf::from("site/kiln.toml")));
        assert_eq!(cli.cwd, Some(PathBuf::from("site")));
        assert_eq!(cli.tokens, vec!["build"]);
    }

    #[test]
    fn short_version_flag_selects_version() {
        let cli = parse(&["kiln", "-v"]);
        assert!(cli.version);
        assert!(command::classify(cli.version, &cli.tokens).is_version());
    }

    #[test]
    fn missing_option_value_is_a_usage_error() {
        assert!(Cli::try_parse_from(["kiln", "--config"]).is_err());
    }

    #[test]
    fn failure_text_is_plain_off_terminal() {
        // Only checkable when the test run itself writes stderr to a pipe or file.
        if !std::io::stderr().is_terminal() {
            assert_eq!(paint_red("boom"), "boom");
        }
    }

    #[test]
    fn bare_invocation_is_help() {
        let cli = parse(&["kiln"]);
        assert_eq!(command::classify(cli.version, &cli.tokens).name, command::HELP);
    }

    #[test]
    fn worker_invocation_round_trips() {
        let config = PathBuf::from("kiln.toml");
        let tokens = vec!["dev".to_string(), "--open".to_string()];
        let spec = WorkerSpec::current_exe(Some(&config), true, None, &tokens).unwrap();
        let mut argv = vec![std::ffi::OsString::from("kiln")];
        argv.extend(spec.args);
        let cli = Cli::try_parse_from(argv).unwrap();
        assert!(cli.worker);
        assert!(cli.no_config);
        assert_eq!(cli.config, Some(config));
        assert_eq!(cli.tokens, tokens);
    }
}

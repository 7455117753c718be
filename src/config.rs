//! Configuration management for kiln.
//!
//! This module defines the structure of the `kiln.toml` configuration file
//! and provides functionality to load and parse it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Top-level configuration structure corresponding to `kiln.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Minimum kiln version required by the project (e.g. ">=0.2.0").
    pub requires: Option<String>,
    /// Scripts keyed by command name.
    #[serde(default)]
    pub commands: BTreeMap<String, CommandConfig>,
    /// Plugin hooks.
    #[serde(default)]
    pub hooks: HooksConfig,
    /// Dev supervisor behaviour.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// A script bound to a command name: either a bare command line or a table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandConfig {
    Line(String),
    Detailed(ScriptConfig),
}

/// Detailed script configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    /// Command line to execute.
    pub cmd: String,
    /// Working directory, relative to the project root.
    pub cwd: Option<String>,
    /// Environment variables to set for the script.
    pub env: Option<HashMap<String, String>>,
    /// One-line description shown by `kiln help`.
    pub description: Option<String>,
}

impl CommandConfig {
    pub fn into_script(self) -> ScriptConfig {
        match self {
            CommandConfig::Line(cmd) => ScriptConfig {
                cmd,
                cwd: None,
                env: None,
                description: None,
            },
            CommandConfig::Detailed(script) => script,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HooksConfig {
    /// Command lines run when the dev worker shuts down on a signal.
    #[serde(default)]
    pub on_exit: Vec<String>,
}

/// How the supervisor leaves after relaying a signal to the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelayMode {
    /// Exit right after relaying; the worker finishes its hooks on its own.
    #[default]
    Immediate,
    /// Wait for the worker to exit (bounded by a timeout) before exiting.
    AwaitChild,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub relay: RelayMode,
    /// Upper bound on the wait in `await-child` mode.
    pub await_child_timeout_ms: u64,
    /// Time the worker gives exit hooks to finish before exiting. Zero exits at once.
    pub exit_grace_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            relay: RelayMode::Immediate,
            await_child_timeout_ms: 5000,
            exit_grace_ms: 0,
        }
    }
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Resolves the configuration for an invocation.
///
/// An explicit path must exist; otherwise `kiln.toml` in `root` is used when
/// present and defaults apply when it is not.
pub fn resolve(explicit: Option<&Path>, no_config: bool, root: &Path) -> Result<Config> {
    if no_config {
        return Ok(Config::default());
    }
    if let Some(path) = explicit {
        return load_config(path);
    }
    match default_config_path(root) {
        Some(path) => load_config(&path),
        None => Ok(Config::default()),
    }
}

/// Project root: `cwd` resolved against the current directory, or the current directory.
pub fn project_root(cwd: Option<&Path>) -> Result<PathBuf> {
    let current = std::env::current_dir().context("failed to resolve current dir")?;
    Ok(match cwd {
        Some(dir) => current.join(dir),
        None => current,
    })
}

fn default_config_path(root: &Path) -> Option<PathBuf> {
    let path = root.join(CONFIG_FILE);
    if path.exists() {
        Some(path)
    } else {
        None
    }
}

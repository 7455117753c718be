//! Command classification.
//!
//! Turns the raw tokens of an invocation into a normalized [`Command`]: a
//! command name plus the flags and positionals that follow it. Classification
//! never fails; malformed flags are kept as-is for the runner to validate.

use std::collections::BTreeMap;

/// Long-running command served by a supervised worker process.
pub const DEV: &str = "dev";
/// One-shot production build.
pub const BUILD: &str = "build";
/// Prints the version banner and exits without reaching the runner.
pub const VERSION: &str = "version";
/// Fallback when no command was given.
pub const HELP: &str = "help";

/// Value attached to a flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    Bool(bool),
    Str(String),
    /// The flag was given more than once.
    Many(Vec<String>),
}

impl FlagValue {
    /// Whether the flag counts as "set" (`--x`, `--x=1`, but not `--no-x`).
    pub fn is_truthy(&self) -> bool {
        match self {
            FlagValue::Bool(value) => *value,
            FlagValue::Str(value) => !matches!(value.as_str(), "" | "0" | "false"),
            FlagValue::Many(values) => !values.is_empty(),
        }
    }

    fn as_text(&self) -> String {
        match self {
            FlagValue::Bool(value) => value.to_string(),
            FlagValue::Str(value) => value.clone(),
            FlagValue::Many(values) => values.join(","),
        }
    }
}

/// Arguments that follow the command name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    /// Positional tokens after the command name.
    pub positionals: Vec<String>,
    /// Flags keyed by name without leading dashes.
    pub flags: BTreeMap<String, FlagValue>,
    /// The tokens after the command name, untouched, for forwarding.
    pub tokens: Vec<String>,
}

impl Args {
    pub fn flag(&self, name: &str) -> Option<&FlagValue> {
        self.flags.get(name)
    }
}

/// A classified invocation. Created once per process; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Args,
}

impl Command {
    pub fn is_dev(&self) -> bool {
        self.name == DEV
    }

    pub fn is_build(&self) -> bool {
        self.name == BUILD
    }

    pub fn is_version(&self) -> bool {
        self.name == VERSION
    }
}

/// Classifies raw tokens into a [`Command`].
///
/// `version_flag` carries a version flag already consumed by the outer CLI
/// parser; a `-v`/`--version` inside `tokens` counts the same.
pub fn classify(version_flag: bool, tokens: &[String]) -> Command {
    let parsed = parse_tokens(tokens);
    let version_requested = version_flag
        || ["version", "v"]
            .iter()
            .any(|key| parsed.flags.get(*key).is_some_and(FlagValue::is_truthy));

    let Some(&(index, _)) = parsed.positionals.first() else {
        let name = if version_requested { VERSION } else { HELP };
        return Command {
            name: name.to_string(),
            args: Args {
                positionals: Vec::new(),
                flags: parsed.flags,
                tokens: tokens.to_vec(),
            },
        };
    };

    let name = tokens[index].clone();
    let mut rest = tokens.to_vec();
    rest.remove(index);
    let rest_parsed = parse_tokens(&rest);
    Command {
        name,
        args: Args {
            positionals: rest_parsed
                .positionals
                .into_iter()
                .map(|(_, value)| value)
                .collect(),
            flags: rest_parsed.flags,
            tokens: rest,
        },
    }
}

struct Parsed {
    /// Positionals with their index in the token list.
    positionals: Vec<(usize, String)>,
    flags: BTreeMap<String, FlagValue>,
}

fn parse_tokens(tokens: &[String]) -> Parsed {
    let mut parsed = Parsed {
        positionals: Vec::new(),
        flags: BTreeMap::new(),
    };
    let mut idx = 0;
    while idx < tokens.len() {
        let token = &tokens[idx];
        if token == "--" {
            for (offset, rest) in tokens[idx + 1..].iter().enumerate() {
                parsed.positionals.push((idx + 1 + offset, rest.clone()));
            }
            break;
        }

        if let Some(long) = token.strip_prefix("--") {
            if let Some((key, value)) = long.split_once('=') {
                insert_flag(&mut parsed.flags, key, FlagValue::Str(value.to_string()));
            } else if let Some(negated) = long.strip_prefix("no-") {
                insert_flag(&mut parsed.flags, negated, FlagValue::Bool(false));
            } else if let Some(value) = value_after(tokens, idx) {
                insert_flag(&mut parsed.flags, long, FlagValue::Str(value.clone()));
                idx += 1;
            } else {
                insert_flag(&mut parsed.flags, long, FlagValue::Bool(true));
            }
        } else if let Some(short) = token.strip_prefix('-').filter(|s| !s.is_empty()) {
            if short.chars().count() == 1 {
                if let Some(value) = value_after(tokens, idx) {
                    insert_flag(&mut parsed.flags, short, FlagValue::Str(value.clone()));
                    idx += 1;
                } else {
                    insert_flag(&mut parsed.flags, short, FlagValue::Bool(true));
                }
            } else {
                for ch in short.chars() {
                    insert_flag(&mut parsed.flags, &ch.to_string(), FlagValue::Bool(true));
                }
            }
        } else {
            parsed.positionals.push((idx, token.clone()));
        }
        idx += 1;
    }
    parsed
}

// Flags that never take a value, so `-v dev` keeps `dev` as the command.
const BOOLEAN_FLAGS: &[&str] = &["version", "v", "help", "h"];

fn value_after(tokens: &[String], idx: usize) -> Option<&String> {
    let key = tokens[idx].trim_start_matches('-');
    if key.is_empty() || BOOLEAN_FLAGS.contains(&key) {
        return None;
    }
    tokens
        .get(idx + 1)
        .filter(|next| !next.starts_with('-') || next.as_str() == "-")
}

fn insert_flag(flags: &mut BTreeMap<String, FlagValue>, key: &str, value: FlagValue) {
    if key.is_empty() {
        return;
    }
    match flags.remove(key) {
        None => {
            flags.insert(key.to_string(), value);
        }
        Some(FlagValue::Many(mut values)) => {
            values.push(value.as_text());
            flags.insert(key.to_string(), FlagValue::Many(values));
        }
        Some(previous) => {
            flags.insert(
                key.to_string(),
                FlagValue::Many(vec![previous.as_text(), value.as_text()]),
            );
        }
    }
}

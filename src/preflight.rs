//! Version precondition checked before any command runs.
//!
//! A project can pin the kiln release it needs with `requires = ">=x.y.z"` in
//! `kiln.toml`. An older binary refuses to run rather than misbehave.

use anyhow::{anyhow, bail, Result};

/// Fails when `requires` names a newer kiln than `current`.
pub fn check_requirement(requires: Option<&str>, current: &str) -> Result<()> {
    let Some(requires) = requires else {
        return Ok(());
    };
    let wanted = requires.trim().trim_start_matches(">=").trim();
    let wanted_version =
        version_tuple(wanted).ok_or_else(|| anyhow!("invalid version requirement {requires:?}"))?;
    let current_version =
        version_tuple(current).ok_or_else(|| anyhow!("invalid kiln version {current:?}"))?;
    if current_version < wanted_version {
        bail!(
            "Your kiln {} is not supported by this project, please upgrade to {} or above.",
            normalize_version(current).unwrap_or_else(|| current.to_string()),
            normalize_version(wanted).unwrap_or_else(|| wanted.to_string()),
        );
    }
    Ok(())
}

fn normalize_version(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('v');
    let no_build = trimmed.split('+').next().unwrap_or(trimmed);
    let no_pre = no_build.split('-').next().unwrap_or(no_build);
    if no_pre.is_empty() {
        None
    } else {
        Some(no_pre.to_string())
    }
}

/// Parses `major[.minor[.patch]]`; missing parts count as zero.
fn version_tuple(raw: &str) -> Option<(u64, u64, u64)> {
    let normalized = normalize_version(raw)?;
    let mut parts = normalized.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map(str::parse::<u64>).transpose().ok()?.unwrap_or(0);
    let patch = parts.next().map(str::parse::<u64>).transpose().ok()?.unwrap_or(0);
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_requirement_passes() {
        assert!(check_requirement(None, "0.1.0").is_ok());
    }

    #[test]
    fn satisfied_requirement_passes() {
        assert!(check_requirement(Some(">=0.1.0"), "0.1.0").is_ok());
        assert!(check_requirement(Some("0.1"), "0.2.3").is_ok());
        assert!(check_requirement(Some("v1"), "1.0.0-beta.2").is_ok());
    }

    #[test]
    fn newer_requirement_fails_with_upgrade_hint() {
        let err = check_requirement(Some(">=2.0.0"), "1.4.0").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Your kiln 1.4.0 is not supported by this project, please upgrade to 2.0.0 or above."
        );
    }

    #[test]
    fn garbage_requirement_is_an_error() {
        let err = check_requirement(Some("latest"), "1.0.0").unwrap_err();
        assert!(err.to_string().contains("invalid version requirement"));
    }

    #[test]
    fn version_tuple_parses_partial_semver() {
        assert_eq!(version_tuple("0.2.3"), Some((0, 2, 3)));
        assert_eq!(version_tuple("v10.4"), Some((10, 4, 0)));
        assert_eq!(version_tuple("3"), Some((3, 0, 0)));
        assert_eq!(version_tuple("x.1"), None);
    }
}

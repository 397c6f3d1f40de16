//! First-run setup and config migration.
//!
//! The config file starts with a `config_version = "X.Y.Z"` line naming the
//! release that last touched it. A missing file gets the bundled template.
//! An older or unversioned file keeps every setting and only has its version
//! line restamped, since keys added later fall back to their serde defaults.

use anyhow::{anyhow, Context};
use regex::Regex;
use std::cmp::Ordering;
use std::path::Path;

/// Embedded default configuration template.
const DEFAULT_CONFIG: &str = include_str!("../../environments/depthcap.toml");

/// Current application version from Cargo.toml
const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How the config on disk relates to the running binary.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfigState {
    Missing,
    Current,
    /// Written by an older release
    Outdated(String),
    /// No version line at all
    Unversioned,
    /// Written by a newer release; left alone
    Newer(String),
}

/// `major.minor.patch` as a comparable tuple. Pre-release and build
/// suffixes on the patch number are ignored.
fn parse_version(text: &str) -> anyhow::Result<(u32, u32, u32)> {
    let mut parts = text.trim().splitn(3, '.');
    let mut next = |what: &str| -> anyhow::Result<u32> {
        let part = parts
            .next()
            .ok_or_else(|| anyhow!("Version '{text}' is missing its {what} number"))?;
        let digits = if what == "patch" {
            part.split(['-', '+']).next().unwrap_or_default()
        } else {
            part
        };
        digits
            .parse()
            .map_err(|_| anyhow!("Invalid {what} number '{part}' in version '{text}'"))
    };
    Ok((next("major")?, next("minor")?, next("patch")?))
}

/// Version named on the first line of `content`, if that line is a
/// `config_version` assignment.
fn version_line(content: &str) -> anyhow::Result<Option<String>> {
    let pattern = Regex::new(r#"^\s*config_version\s*=\s*"([^"]+)""#)?;
    Ok(content
        .lines()
        .next()
        .and_then(|first| pattern.captures(first))
        .map(|caps| caps[1].to_string()))
}

fn inspect(config_path: &Path) -> anyhow::Result<ConfigState> {
    if !config_path.exists() {
        return Ok(ConfigState::Missing);
    }
    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Cannot read {}", config_path.display()))?;
    let Some(found) = version_line(&content)? else {
        return Ok(ConfigState::Unversioned);
    };

    Ok(match parse_version(&found)?.cmp(&parse_version(CURRENT_VERSION)?) {
        Ordering::Less => ConfigState::Outdated(found),
        Ordering::Equal => ConfigState::Current,
        Ordering::Greater => ConfigState::Newer(found),
    })
}

/// `content` with any `config_version` lines replaced by one for `version`
/// at the top.
fn restamp(content: &str, version: &str) -> String {
    let mut stamped = format!("config_version = \"{version}\"\n");
    for line in content
        .lines()
        .filter(|line| !line.trim_start().starts_with("config_version"))
    {
        stamped.push_str(line);
        stamped.push('\n');
    }
    stamped
}

/// Writes the default config to `config_path` if it does not exist yet.
///
/// Returns whether a new file was written.
///
/// # Errors
/// Returns an error if the directory or file cannot be written.
pub fn write_default_config(config_path: &Path) -> anyhow::Result<bool> {
    if config_path.exists() {
        return Ok(false);
    }
    if let Some(dir) = config_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(config_path, restamp(DEFAULT_CONFIG, CURRENT_VERSION))?;
    tracing::info!("Default configuration written to {}", config_path.display());
    Ok(true)
}

/// Creates or migrates the config at `config_path` as needed.
///
/// # Errors
/// Returns an error if the config cannot be read or written, or if its
/// version line does not parse.
pub fn run_setup(config_path: &Path) -> anyhow::Result<()> {
    let from = match inspect(config_path)? {
        ConfigState::Missing => {
            write_default_config(config_path)?;
            return Ok(());
        }
        ConfigState::Current => {
            tracing::debug!("Config version up to date ({})", CURRENT_VERSION);
            return Ok(());
        }
        ConfigState::Newer(found) => {
            tracing::warn!("Config version {} is newer than depthcap {}", found, CURRENT_VERSION);
            return Ok(());
        }
        ConfigState::Outdated(found) => found,
        ConfigState::Unversioned => "an unversioned file".to_string(),
    };

    tracing::info!("Migrating configuration from {} to {}", from, CURRENT_VERSION);
    let content = std::fs::read_to_string(config_path)?;
    std::fs::write(config_path, restamp(&content, CURRENT_VERSION))
        .map_err(|e| anyhow!("Failed to update config version: {e}"))?;
    Ok(())
}

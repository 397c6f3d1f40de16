//! `config` command: edit, check or print the configuration.
//!
//! Editing re-validates the file on exit so a broken config is reported
//! immediately instead of at the next capture.

use crate::config::{get_config_path, DepthcapConfig};
use anyhow::{anyhow, Context};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

/// What `depthcap config` should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigAction {
    /// Open the file in an editor
    #[default]
    Edit,
    /// Validate and summarize the effective settings
    Check,
    /// Print the effective settings as TOML
    Show,
    /// Print the config file location
    Path,
}

pub fn handle_config(action: ConfigAction) -> anyhow::Result<()> {
    let config_path = get_config_path()?;

    match action {
        ConfigAction::Path => println!("{}", config_path.display()),
        ConfigAction::Show => {
            let config = DepthcapConfig::load_from(&config_path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Check => {
            let config = DepthcapConfig::load_from(&config_path)?;
            println!("{} is valid", config_path.display());
            for (label, value) in summary(&config)? {
                println!("  {label:<16}{value}");
            }
        }
        ConfigAction::Edit => edit(&config_path)?,
    }
    Ok(())
}

fn edit(config_path: &Path) -> anyhow::Result<()> {
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    let (program, args) = editor_from_env(|name| std::env::var(name).ok())
        .or_else(|| fallback_editor(&path_var))
        .ok_or_else(|| anyhow!("No editor found. Set $VISUAL or $EDITOR."))?;

    tracing::info!("Editing {} with {}", config_path.display(), program);

    let status = Command::new(&program)
        .args(&args)
        .arg(config_path)
        .status()
        .with_context(|| format!("Failed to start editor '{program}'"))?;

    if !status.success() {
        return Err(anyhow!("Editor exited with status {}", status.code().unwrap_or(-1)));
    }

    match DepthcapConfig::load_from(config_path) {
        Ok(_) => tracing::info!("Config edited and still valid"),
        Err(e) => {
            tracing::warn!("Edited config does not load: {}", e);
            eprintln!("Warning: {e}");
            eprintln!("Run `depthcap config` again to fix it; captures use it as is.");
        }
    }
    Ok(())
}

/// Editor command from `$VISUAL`, then `$EDITOR`, split into program and
/// arguments so values like `code --wait` work.
fn editor_from_env(var: impl Fn(&str) -> Option<String>) -> Option<(String, Vec<String>)> {
    ["VISUAL", "EDITOR"].iter().find_map(|name| {
        let value = var(name)?;
        let mut words = value.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some((program, words.collect()))
    })
}

/// First of nano or vi found on `path_var`.
fn fallback_editor(path_var: &OsStr) -> Option<(String, Vec<String>)> {
    ["nano", "vi"]
        .iter()
        .find(|name| find_on_path(name, path_var).is_some())
        .map(|name| (name.to_string(), Vec::new()))
}

fn find_on_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Label/value pairs for the settings that decide where captures go and
/// what ends up in them.
fn summary(config: &DepthcapConfig) -> anyhow::Result<Vec<(&'static str, String)>> {
    let source = &config.source;
    let mut lines = vec![
        ("output dir", config.output_dir()?.display().to_string()),
        ("min confidence", config.capture.min_confidence.to_string()),
        ("sample stride", config.capture.sample_stride.to_string()),
        ("format", config.export.format.to_string()),
        ("artifact", config.export.artifact_name.clone()),
        ("share", format!("{:?}", config.export.share).to_lowercase()),
        (
            "source",
            format!("{} {}x{} @ {} fps", source.kind, source.width, source.height, source.fps),
        ),
    ];
    if source.fail_after_frames > 0 {
        lines.push(("fails after", format!("{} frames", source.fail_after_frames)));
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_visual_wins_over_editor() {
        let found = editor_from_env(env(&[("VISUAL", "code --wait"), ("EDITOR", "vim")]));
        assert_eq!(found, Some(("code".to_string(), vec!["--wait".to_string()])));
    }

    #[test]
    fn test_blank_visual_falls_through_to_editor() {
        let found = editor_from_env(env(&[("VISUAL", "  "), ("EDITOR", "hx")]));
        assert_eq!(found, Some(("hx".to_string(), Vec::new())));
        assert_eq!(editor_from_env(env(&[])), None);
    }

    #[test]
    fn test_fallback_editor_searches_path() {
        let empty = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();
        fs::write(bin.path().join("vi"), "").unwrap();

        let path_var = std::env::join_paths([empty.path(), bin.path()]).unwrap();
        assert_eq!(fallback_editor(&path_var), Some(("vi".to_string(), Vec::new())));
        assert_eq!(fallback_editor(empty.path().as_os_str()), None);
    }

    #[test]
    fn test_summary_shows_resolved_output_dir() {
        let mut config = DepthcapConfig::default();
        config.capture.output_dir = "~/scans".to_string();
        let lines = summary(&config).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(lines[0], ("output dir", home.join("scans").display().to_string()));
        assert!(lines.iter().all(|(label, _)| *label != "fails after"));

        config.source.fail_after_frames = 30;
        let lines = summary(&config).unwrap();
        assert_eq!(lines.last().unwrap().1, "30 frames");
    }

    #[test]
    fn test_shown_config_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("depthcap.toml");
        let mut config = DepthcapConfig::default();
        config.capture.sample_stride = 3;

        fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = DepthcapConfig::load_from(&path).unwrap();
        assert_eq!(loaded.capture.sample_stride, 3);
    }
}

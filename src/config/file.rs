//! Configuration file management for depthcap.
//!
//! This module handles loading and saving application configuration from TOML files.
//! Configuration is stored in the user's config directory.

use crate::export::{ExportSettings, PlyFormat};
use crate::frame::synthetic::SyntheticSettings;
use crate::frame::Confidence;
use crate::orchestrator::OrchestratorSettings;
use crate::recording::RecorderSettings;
use crate::share::ShareKind;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Which frame source to capture from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Ray-cast test scene, no hardware needed
    #[default]
    Synthetic,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// Capture and accumulation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Root folder for session folders; `~` expands to the home directory
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Lowest confidence that still becomes a point
    #[serde(default)]
    pub min_confidence: Confidence,
    /// Use every n-th depth pixel in both directions
    #[serde(default = "default_sample_stride")]
    pub sample_stride: u32,
    /// Save depth, confidence and pose with every snapshot
    #[serde(default = "default_true")]
    pub snapshot_depth: bool,
    /// Accept snapshots while not recording
    #[serde(default = "default_true")]
    pub snapshots_when_idle: bool,
}

fn default_output_dir() -> String {
    "~/depthcap".to_string()
}

fn default_sample_stride() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            min_confidence: Confidence::default(),
            sample_stride: default_sample_stride(),
            snapshot_depth: true,
            snapshots_when_idle: true,
        }
    }
}

/// Export and hand-off settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub format: PlyFormat,
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
    #[serde(default)]
    pub share: ShareKind,
}

fn default_artifact_name() -> String {
    "pointcloud.ply".to_string()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: PlyFormat::default(),
            artifact_name: default_artifact_name(),
            share: ShareKind::default(),
        }
    }
}

/// Frame source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Injected failure after this many frames; 0 disables it
    #[serde(default)]
    pub fail_after_frames: u64,
}

fn default_fps() -> u32 {
    30
}

fn default_width() -> u32 {
    256
}

fn default_height() -> u32 {
    192
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            fps: default_fps(),
            width: default_width(),
            height: default_height(),
            fail_after_frames: 0,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepthcapConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub source: SourceSection,
}

impl DepthcapConfig {
    /// Loads configuration from the user's config directory.
    ///
    /// # Errors
    /// - If the config directory cannot be determined
    /// - If the config file cannot be read
    /// - If the TOML is malformed
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&get_config_path()?)
    }

    /// Loads configuration from `path`.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: DepthcapConfig = toml::from_str(&content)
            .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.capture.sample_stride == 0 {
            return Err(anyhow!("capture.sample_stride must be at least 1"));
        }
        if self.source.fps == 0 {
            return Err(anyhow!("source.fps must be at least 1"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source.width and source.height must be non-zero"));
        }
        let name = &self.export.artifact_name;
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(anyhow!("export.artifact_name must be a plain file name, got '{name}'"));
        }
        Ok(())
    }

    /// Output root with `~` expanded.
    pub fn output_dir(&self) -> anyhow::Result<PathBuf> {
        expand_home(&self.capture.output_dir)
    }

    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            min_confidence: self.capture.min_confidence,
            sample_stride: self.capture.sample_stride,
        }
    }

    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            ply_format: self.export.format,
            artifact_name: self.export.artifact_name.clone(),
        }
    }

    pub fn synthetic_settings(&self) -> SyntheticSettings {
        SyntheticSettings {
            width: self.source.width,
            height: self.source.height,
            fps: self.source.fps,
            fail_after_frames: (self.source.fail_after_frames > 0).then_some(self.source.fail_after_frames),
        }
    }

    pub fn orchestrator_settings(&self) -> anyhow::Result<OrchestratorSettings> {
        let mut settings = OrchestratorSettings::new(self.output_dir()?);
        settings.recorder = self.recorder_settings();
        settings.export = self.export_settings();
        settings.snapshot_depth = self.capture.snapshot_depth;
        settings.snapshots_when_idle = self.capture.snapshots_when_idle;
        Ok(settings)
    }
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    if path == "~" || path.starts_with("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
        let rest = path.trim_start_matches('~').trim_start_matches('/');
        return Ok(if rest.is_empty() { home } else { home.join(rest) });
    }
    Ok(PathBuf::from(path))
}

/// Retrieves the path to the config file, creating its directory.
///
/// Assumes the config file exists (created by setup if needed).
///
/// # Errors
/// - If the home directory cannot be determined
/// - If the config directory cannot be created
pub fn get_config_path() -> anyhow::Result<PathBuf> {
    let config_dir = dirs::home_dir()
        .ok_or_else(|| anyhow!("Could not find home directory"))?
        .join(".config")
        .join("depthcap");
    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("depthcap.toml"))
}

/// Directory holding the export history database.
pub fn data_dir() -> anyhow::Result<PathBuf> {
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow!("Could not determine home directory"))?
        .join(".local")
        .join("share")
        .join("depthcap"))
}

//! List session folders under the output root.

use crate::config::DepthcapConfig;
use crate::export::read_ply_header;
use crate::orchestrator::IDLE_SNAPSHOT_DIR;
use std::fs;
use std::path::{Path, PathBuf};

/// What a session folder holds.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub name: String,
    pub path: PathBuf,
    /// Vertex count of the exported cloud; `None` if it is missing or unreadable
    pub point_count: Option<usize>,
    pub snapshots: usize,
}

/// Session folders in `root`, newest first.
///
/// Folder names are timestamps, so name order is start order.
pub fn list_sessions(root: &Path, artifact_name: &str) -> anyhow::Result<Vec<SessionSummary>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut sessions: Vec<SessionSummary> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter(|entry| entry.file_name() != IDLE_SNAPSHOT_DIR)
        .map(|entry| {
            let path = entry.path();
            let point_count = match read_ply_header(&path.join(artifact_name)) {
                Ok(header) => Some(header.vertex_count),
                Err(e) => {
                    tracing::debug!("No readable cloud in {}: {}", path.display(), e);
                    None
                }
            };
            SessionSummary {
                name: entry.file_name().to_string_lossy().to_string(),
                snapshots: count_snapshots(&path),
                point_count,
                path,
            }
        })
        .collect();

    sessions.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(sessions)
}

fn count_snapshots(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    let name = e.file_name().to_string_lossy().to_string();
                    name.starts_with("snapshot-") && name.ends_with(".png")
                })
                .count()
        })
        .unwrap_or(0)
}

/// Prints every session folder with its point count.
///
/// # Errors
/// - If the configuration cannot be loaded
/// - If the output directory cannot be read
pub fn handle_sessions() -> anyhow::Result<()> {
    let config_data = DepthcapConfig::load()?;
    let root = config_data.output_dir()?;
    let sessions = list_sessions(&root, &config_data.export.artifact_name)?;

    if sessions.is_empty() {
        println!("No sessions in {}", root.display());
        return Ok(());
    }

    println!("Sessions in {}:", root.display());
    println!();
    for session in &sessions {
        let points = session
            .point_count
            .map_or_else(|| "not exported".to_string(), |n| format!("{n} points"));
        println!("  {:<17} {:>16}  {} snapshots", session.name, points, session.snapshots);
    }
    Ok(())
}

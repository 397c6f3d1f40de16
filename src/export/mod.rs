//! Durable output of point clouds and snapshots.
//!
//! Every file is written to a hidden temporary file in its destination
//! directory, flushed and synced, then linked into place under a name that
//! is not already taken. Readers never observe a partially written artifact
//! and an earlier artifact is never overwritten.
//!
//! Layout under a session folder:
//! ```text
//! <session>/
//! ├── pointcloud.ply          # finalized point cloud (pointcloud-1.ply, ... on re-export)
//! ├── snapshot-000012345.png  # still images, named by frame time in ms
//! └── data/in/
//!     ├── depth-000012345.png       # 16-bit millimeters
//!     ├── confidence-000012345.png
//!     └── depth-000012345.json      # pose + intrinsics
//! ```

pub mod ply;
pub mod still;

use crate::error::{CaptureError, Result};
use crate::recording::snapshot::{DepthCapture, SnapshotCapture};
use crate::recording::PointCloudSnapshot;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub use ply::{PlyFormat, PlyHeader};
pub use still::DepthSidecar;

/// Upper bound on `-N` suffixes tried before giving up on a name.
const MAX_NAME_ATTEMPTS: u32 = 10_000;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// What an artifact contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    PointCloud,
    Snapshot,
    DepthSnapshot,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PointCloud => "point_cloud",
            Self::Snapshot => "snapshot",
            Self::DepthSnapshot => "depth_snapshot",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "point_cloud" => Some(Self::PointCloud),
            "snapshot" => Some(Self::Snapshot),
            "depth_snapshot" => Some(Self::DepthSnapshot),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finalized file ready for hand-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    /// Name of the folder the artifact belongs to
    pub session: String,
    pub point_count: Option<usize>,
    pub bytes: u64,
    pub created_at: DateTime<Local>,
}

/// Export settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSettings {
    pub ply_format: PlyFormat,
    /// Base file name of the point cloud, e.g. `pointcloud.ply`
    pub artifact_name: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            ply_format: PlyFormat::Binary,
            artifact_name: "pointcloud.ply".to_string(),
        }
    }
}

/// Writes artifacts with the temp-then-link discipline.
#[derive(Debug, Clone, Default)]
pub struct Exporter {
    settings: ExportSettings,
}

impl Exporter {
    pub fn new(settings: ExportSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    /// Writes `points` as a PLY file under `destination`.
    ///
    /// Blocking; run it on a background task.
    pub fn export(&self, points: &PointCloudSnapshot, destination: &Path) -> Result<ExportArtifact> {
        let format = self.settings.ply_format;
        let (path, bytes) = write_atomically(destination, &self.settings.artifact_name, |out| {
            ply::write_ply(out, points, format).map_err(|e| CaptureError::io(destination, e))
        })?;

        tracing::info!(
            "Point cloud exported: {} ({} points, {} bytes, {})",
            path.display(),
            points.len(),
            bytes,
            format
        );
        Ok(ExportArtifact {
            kind: ArtifactKind::PointCloud,
            path,
            session: folder_name(destination),
            point_count: Some(points.len()),
            bytes,
            created_at: Local::now(),
        })
    }

    /// Writes a color still as PNG under `destination`.
    pub fn export_snapshot(
        &self,
        image: &crate::frame::ColorImage,
        destination: &Path,
        timestamp: f64,
    ) -> Result<ExportArtifact> {
        let name = format!("snapshot-{}.png", frame_millis(timestamp));
        let (path, bytes) = write_atomically(destination, &name, |out| still::write_color_png(out, image))?;

        tracing::info!("Snapshot saved: {} ({} bytes)", path.display(), bytes);
        Ok(ExportArtifact {
            kind: ArtifactKind::Snapshot,
            path,
            session: folder_name(destination),
            point_count: None,
            bytes,
            created_at: Local::now(),
        })
    }

    /// Writes depth, confidence and a JSON sidecar under `destination`
    /// (normally a session's `data/in`).
    pub fn export_depth(&self, capture: &DepthCapture, destination: &Path, timestamp: f64) -> Result<ExportArtifact> {
        fs::create_dir_all(destination).map_err(|e| CaptureError::io(destination, e))?;
        let stem = frame_millis(timestamp);

        let (depth_path, depth_bytes) = write_atomically(destination, &format!("depth-{stem}.png"), |out| {
            still::write_depth_png(out, &capture.depth)
        })?;
        let (confidence_path, _) = write_atomically(destination, &format!("confidence-{stem}.png"), |out| {
            still::write_confidence_png(out, &capture.confidence)
        })?;

        let sidecar = DepthSidecar {
            timestamp,
            width: capture.depth.width,
            height: capture.depth.height,
            depth_unit: "millimeters".to_string(),
            pose: capture.pose,
            intrinsics: capture.intrinsics,
            depth_file: file_name(&depth_path),
            confidence_file: file_name(&confidence_path),
        };
        // the sidecar follows the depth file's name, including any suffix
        let sidecar_name = match depth_path.file_stem() {
            Some(stem) => format!("{}.json", stem.to_string_lossy()),
            None => format!("depth-{stem}.json"),
        };
        write_atomically(destination, &sidecar_name, |out| {
            serde_json::to_writer_pretty(out, &sidecar).map_err(|e| CaptureError::Encode(e.to_string()))
        })?;

        tracing::debug!("Depth snapshot saved: {}", depth_path.display());
        Ok(ExportArtifact {
            kind: ArtifactKind::DepthSnapshot,
            path: depth_path,
            session: session_of_raw_dir(destination),
            point_count: None,
            bytes: depth_bytes,
            created_at: Local::now(),
        })
    }

    /// Writes everything a snapshot capture holds: the still, and the depth
    /// set when present.
    pub fn export_capture(&self, capture: &SnapshotCapture) -> Result<Vec<ExportArtifact>> {
        let folder = capture.folder.path();
        fs::create_dir_all(folder).map_err(|e| CaptureError::io(folder, e))?;

        let mut artifacts = vec![self.export_snapshot(&capture.color, folder, capture.timestamp)?];
        if let Some(depth) = &capture.depth {
            let destination = if capture.in_session {
                capture.folder.raw_input_dir()
            } else {
                folder.to_path_buf()
            };
            artifacts.push(self.export_depth(depth, &destination, capture.timestamp)?);
        }
        Ok(artifacts)
    }
}

/// Reads the header of an exported PLY file.
pub fn read_ply_header(path: &Path) -> Result<ply::PlyHeader> {
    let file = File::open(path).map_err(|e| CaptureError::io(path, e))?;
    ply::read_header(&mut std::io::BufReader::new(file)).map_err(|e| CaptureError::io(path, e))
}

/// Frame time as zero-padded milliseconds, sortable as text.
fn frame_millis(timestamp: f64) -> String {
    format!("{:09}", (timestamp.max(0.0) * 1000.0).round() as u64)
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    folder_name(path)
}

/// Session name for a `<session>/data/in` directory.
fn session_of_raw_dir(path: &Path) -> String {
    let session = path.parent().and_then(Path::parent);
    match session {
        Some(session) if path.ends_with(crate::recording::session::RAW_INPUT_DIR) => folder_name(session),
        _ => folder_name(path),
    }
}

/// `name`, `stem-1.ext`, `stem-2.ext`, ...
fn candidate_name(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{attempt}.{ext}"),
        _ => format!("{name}-{attempt}"),
    }
}

/// Writes a file via a temp file and publishes it without clobbering.
///
/// Returns the final path and its size in bytes.
pub fn write_atomically<F>(dir: &Path, name: &str, write: F) -> Result<(PathBuf, u64)>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let temp_path = dir.join(format!(
        ".{}.{}-{}.tmp",
        name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = write_temp(&temp_path, write).and_then(|bytes| {
        let path = publish(&temp_path, dir, name)?;
        Ok((path, bytes))
    });

    if temp_path.exists() {
        if let Err(e) = fs::remove_file(&temp_path) {
            tracing::debug!("Failed to remove temp file {}: {}", temp_path.display(), e);
        }
    }
    result
}

fn write_temp<F>(temp_path: &Path, write: F) -> Result<u64>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let file = File::create(temp_path).map_err(|e| CaptureError::io(temp_path, e))?;
    let mut out = BufWriter::new(file);
    write(&mut out)?;
    out.flush().map_err(|e| CaptureError::io(temp_path, e))?;
    let file = out
        .into_inner()
        .map_err(|e| CaptureError::io(temp_path, e.into_error()))?;
    file.sync_all().map_err(|e| CaptureError::io(temp_path, e))?;
    let bytes = file
        .metadata()
        .map_err(|e| CaptureError::io(temp_path, e))?
        .len();
    Ok(bytes)
}

/// Links the temp file to the first free name.
///
/// `hard_link` fails when the target exists, which makes the
/// check-and-publish a single atomic step. Filesystems without hard links
/// fall back to an existence check plus rename.
fn publish(temp_path: &Path, dir: &Path, name: &str) -> Result<PathBuf> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let target = dir.join(candidate_name(name, attempt));
        match fs::hard_link(temp_path, &target) {
            Ok(()) => return Ok(target),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                tracing::debug!("hard_link unavailable ({}), falling back to rename", e);
                if target.exists() {
                    continue;
                }
                fs::rename(temp_path, &target).map_err(|e| CaptureError::io(&target, e))?;
                return Ok(target);
            }
        }
    }
    Err(CaptureError::io(
        dir.join(name),
        std::io::Error::new(std::io::ErrorKind::AlreadyExists, "no free artifact name"),
    ))
}

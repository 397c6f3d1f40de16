//! Hand-off of finished artifacts.
//!
//! After a point cloud is exported its path is passed to a share target:
//! printed, copied to the clipboard with pbcopy (macOS), wl-copy (Wayland)
//! or xclip (X11), or opened with the system viewer.

use crate::export::ExportArtifact;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Configured hand-off behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareKind {
    #[default]
    Print,
    Clipboard,
    Open,
    None,
}

/// Receives each exported point cloud.
pub trait ShareTarget: Send + Sync {
    fn present(&self, artifact: &ExportArtifact) -> anyhow::Result<()>;

    /// Emits anything held back while the terminal was busy.
    fn flush(&self) {}
}

/// Builds the target for `kind`.
///
/// `defer_output` holds printed paths until [`ShareTarget::flush`], for use
/// while the TUI owns the terminal.
pub fn target_for(kind: ShareKind, defer_output: bool) -> Arc<dyn ShareTarget> {
    match kind {
        ShareKind::Print => Arc::new(PrintShare::new(defer_output)),
        ShareKind::Clipboard => Arc::new(ClipboardShare),
        ShareKind::Open => Arc::new(OpenShare),
        ShareKind::None => Arc::new(NoShare),
    }
}

/// Writes the artifact path to stdout.
#[derive(Debug, Default)]
pub struct PrintShare {
    deferred: Option<Mutex<Vec<PathBuf>>>,
}

impl PrintShare {
    pub fn new(defer_output: bool) -> Self {
        Self {
            deferred: defer_output.then(|| Mutex::new(Vec::new())),
        }
    }

    /// Paths waiting for [`ShareTarget::flush`].
    pub fn pending(&self) -> Vec<PathBuf> {
        match &self.deferred {
            Some(pending) => pending.lock().map(|p| p.clone()).unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

impl ShareTarget for PrintShare {
    fn present(&self, artifact: &ExportArtifact) -> anyhow::Result<()> {
        match &self.deferred {
            Some(pending) => {
                pending
                    .lock()
                    .map_err(|_| anyhow::anyhow!("share queue poisoned"))?
                    .push(artifact.path.clone());
            }
            None => println!("{}", artifact.path.display()),
        }
        Ok(())
    }

    fn flush(&self) {
        if let Some(pending) = &self.deferred {
            if let Ok(mut pending) = pending.lock() {
                for path in pending.drain(..) {
                    println!("{}", path.display());
                }
            }
        }
    }
}

/// Copies the artifact path to the system clipboard.
#[derive(Debug, Default)]
pub struct ClipboardShare;

impl ShareTarget for ClipboardShare {
    fn present(&self, artifact: &ExportArtifact) -> anyhow::Result<()> {
        copy_to_clipboard(&artifact.path.display().to_string())
    }
}

/// Opens the artifact with the system viewer.
#[derive(Debug, Default)]
pub struct OpenShare;

impl ShareTarget for OpenShare {
    fn present(&self, artifact: &ExportArtifact) -> anyhow::Result<()> {
        open_path(&artifact.path)
    }
}

/// Leaves the artifact where it is.
#[derive(Debug, Default)]
pub struct NoShare;

impl ShareTarget for NoShare {
    fn present(&self, artifact: &ExportArtifact) -> anyhow::Result<()> {
        tracing::debug!("Share disabled, artifact left at {}", artifact.path.display());
        Ok(())
    }
}

fn pipe_to(program: &str, args: &[&str], text: &str) -> bool {
    let Ok(mut child) = Command::new(program).args(args).stdin(Stdio::piped()).spawn() else {
        tracing::debug!("{program} not found or not executable");
        return false;
    };
    let Some(mut stdin) = child.stdin.take() else {
        return false;
    };
    match write!(stdin, "{text}") {
        Ok(_) => {
            drop(stdin);
            thread::sleep(Duration::from_millis(100));
            tracing::debug!("Artifact path copied to clipboard via {program}");
            true
        }
        Err(e) => {
            tracing::warn!("Failed to write to {program} stdin: {e}");
            false
        }
    }
}

/// Copies text to the clipboard.
///
/// Missing clipboard tools are logged, not treated as errors, so the export
/// still counts as delivered.
pub fn copy_to_clipboard(text: &str) -> anyhow::Result<()> {
    #[cfg(target_os = "macos")]
    if pipe_to("pbcopy", &[], text) {
        return Ok(());
    }
    if pipe_to("wl-copy", &["--type", "text/plain", "--trim-newline"], text) {
        return Ok(());
    }
    if pipe_to("xclip", &["-selection", "clipboard", "-in", "-quiet"], text) {
        return Ok(());
    }

    #[cfg(target_os = "macos")]
    tracing::warn!("No clipboard tool available (pbcopy not found)");
    #[cfg(not(target_os = "macos"))]
    tracing::warn!("No clipboard tool available (wl-copy or xclip not found)");
    Ok(())
}

/// Opens `path` with the platform's default application.
///
/// # Errors
/// - If the file does not exist
/// - If no viewer could be launched
pub fn open_path(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        return Err(anyhow::anyhow!("File not found: {}", path.display()));
    }

    #[cfg(target_os = "macos")]
    let candidates: &[&str] = &["open"];
    #[cfg(not(target_os = "macos"))]
    let candidates: &[&str] = &["xdg-open", "meshlab", "f3d"];

    for viewer in candidates {
        match Command::new(viewer).arg(path).spawn() {
            Ok(mut child) => {
                child
                    .wait()
                    .map_err(|e| anyhow::anyhow!("Viewer error: {e}"))?;
                tracing::info!("Opened {} with {}", path.display(), viewer);
                return Ok(());
            }
            Err(e) => tracing::debug!("{viewer} unavailable: {e}"),
        }
    }

    Err(anyhow::anyhow!(
        "No viewer found for {}. Install xdg-utils, MeshLab or f3d",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ArtifactKind;
    use chrono::Local;

    fn artifact(path: &str) -> ExportArtifact {
        ExportArtifact {
            kind: ArtifactKind::PointCloud,
            path: PathBuf::from(path),
            session: "20240102-030405".to_string(),
            point_count: Some(3),
            bytes: 10,
            created_at: Local::now(),
        }
    }

    #[test]
    fn test_deferred_print_holds_paths_until_flush() {
        let share = PrintShare::new(true);
        share.present(&artifact("/tmp/a.ply")).unwrap();
        share.present(&artifact("/tmp/b.ply")).unwrap();
        assert_eq!(
            share.pending(),
            vec![PathBuf::from("/tmp/a.ply"), PathBuf::from("/tmp/b.ply")]
        );

        share.flush();
        assert!(share.pending().is_empty());
    }

    #[test]
    fn test_immediate_print_keeps_nothing() {
        let share = PrintShare::new(false);
        share.present(&artifact("/tmp/a.ply")).unwrap();
        assert!(share.pending().is_empty());
    }

    #[test]
    fn test_open_missing_file_fails() {
        assert!(open_path(Path::new("/nonexistent/depthcap/pointcloud.ply")).is_err());
    }

    #[test]
    fn test_share_kind_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            share: ShareKind,
        }
        let w: Wrapper = toml::from_str("share = \"clipboard\"").unwrap();
        assert_eq!(w.share, ShareKind::Clipboard);
    }
}

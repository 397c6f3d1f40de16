//! Export history viewer.
//!
//! Lists every recorded artifact and opens the selected one with the
//! system viewer.

use crate::config::data_dir;
use crate::history::{ExportHistory, HistoryViewer};
use crate::share::open_path;

/// Displays the export history and opens the selected artifact.
///
/// # Errors
/// - If data directory cannot be determined
/// - If the history database cannot be read
/// - If the selected artifact cannot be opened
pub async fn handle_history() -> Result<(), anyhow::Error> {
    tracing::info!("=== depthcap History Viewer ===");

    let mut history = ExportHistory::new(&data_dir()?)?;
    let entries = history.get_all_exports()?;

    if entries.is_empty() {
        println!("No exports recorded yet.");
        return Ok(());
    }

    let mut viewer = HistoryViewer::new(entries)?;

    match viewer.run()? {
        Some(path) => {
            open_path(&path)?;
            tracing::info!("Opened {} from history", path.display());
        }
        None => {
            tracing::debug!("History viewer exited without selection");
        }
    }

    tracing::debug!("History viewer closed");
    Ok(())
}

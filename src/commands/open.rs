//! Open a previous export without browsing the history.

use crate::config::data_dir;
use crate::history::{ExportEntry, ExportHistory};
use crate::share::open_path;

/// Picks the `index`-th most recent entry (1 = most recent).
fn select(entries: &[ExportEntry], index: Option<usize>) -> anyhow::Result<&ExportEntry> {
    if entries.is_empty() {
        return Err(anyhow::anyhow!("No exports found in history"));
    }
    let index = index.unwrap_or(1);
    if index < 1 || index > entries.len() {
        return Err(anyhow::anyhow!(
            "Export index out of range. Available exports: 1-{}",
            entries.len()
        ));
    }
    Ok(&entries[index - 1])
}

/// Opens a previous export with the system viewer.
///
/// # Arguments
/// * `index` - Optional index of the export to open (1 = most recent, None = most recent)
///
/// # Errors
/// - If the history is empty or the index is out of range
/// - If the file no longer exists or no viewer is available
pub async fn handle_open(index: Option<usize>) -> anyhow::Result<()> {
    let mut history = ExportHistory::new(&data_dir()?)?;
    let entries = history.get_all_exports()?;
    let entry = select(&entries, index)?;

    tracing::info!("Opening export #{}: {}", index.unwrap_or(1), entry.path.display());
    println!("{}", entry.path.display());
    open_path(&entry.path)
}

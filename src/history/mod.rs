//! Export history: SQLite-backed record of every finalized artifact, plus a
//! terminal browser for it.

pub mod storage;
pub mod ui;

pub use storage::{ExportEntry, ExportHistory};
pub use ui::HistoryViewer;

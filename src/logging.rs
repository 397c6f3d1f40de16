//! Structured logging for depthcap using the tracing crate.
//!
//! Log records go to a daily-rotated file under the XDG state directory and
//! never to the terminal, which belongs to the TUI. Only the newest week of
//! log files is kept.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;

/// Prefix of every log file; the appender adds `.YYYY-MM-DD`.
pub const LOG_FILE_PREFIX: &str = "depthcap.log";

/// Days of logs kept on disk.
const MAX_LOG_FILES: usize = 7;

/// Keeps the non-blocking writer alive for the program lifetime.
static APPENDER_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Initializes file-based logging.
///
/// The level comes from `RUST_LOG` and defaults to `info`.
///
/// # Errors
/// - If the log directory cannot be determined or created
/// - If logging was already initialized
pub fn init_logging() -> Result<(), anyhow::Error> {
    let log_dir = get_log_dir()?;

    if let Err(e) = prune_logs(&log_dir, MAX_LOG_FILES) {
        eprintln!("Warning: Failed to clean up old logs: {e}");
    }

    let file_appender = rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    APPENDER_GUARD
        .set(guard)
        .map_err(|_| anyhow::anyhow!("Logging already initialized"))?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_level(true)
                .with_thread_names(true)
                .with_ansi(false),
        )
        .init();

    tracing::debug!("Logging initialized. Log directory: {}", log_dir.display());
    Ok(())
}

/// Log directory: `$XDG_STATE_HOME/depthcap`, else `~/.local/state/depthcap`.
///
/// # Errors
/// - If home directory cannot be determined
/// - If log directory cannot be created
pub fn get_log_dir() -> Result<PathBuf, anyhow::Error> {
    let log_dir = match std::env::var("XDG_STATE_HOME") {
        Ok(xdg_state) if !xdg_state.is_empty() => PathBuf::from(xdg_state).join("depthcap"),
        _ => dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?
            .join(".local/state/depthcap"),
    };

    fs::create_dir_all(&log_dir)?;
    Ok(log_dir)
}

/// Dated log files in `log_dir`, newest first.
pub fn log_files(log_dir: &Path) -> Result<Vec<PathBuf>, anyhow::Error> {
    let prefix = format!("{LOG_FILE_PREFIX}.");
    let mut files: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            let file_name = path.file_name()?.to_string_lossy().to_string();
            if file_name.starts_with(&prefix) && file_name.matches('-').count() == 2 {
                let modified = fs::metadata(&path).ok()?.modified().ok()?;
                Some((path, modified))
            } else {
                None
            }
        })
        .collect();

    // name breaks ties between files written in the same instant
    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    Ok(files.into_iter().map(|(path, _)| path).collect())
}

/// Removes all but the `keep` newest log files.
fn prune_logs(log_dir: &Path, keep: usize) -> Result<(), anyhow::Error> {
    for path in log_files(log_dir)?.iter().skip(keep) {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!("Failed to delete old log file {}: {}", path.display(), e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prune_keeps_newest_and_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        for day in 1..=9 {
            fs::write(dir.path().join(format!("depthcap.log.2024-01-0{day}")), "x").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        prune_logs(dir.path(), 7).unwrap();

        let remaining = log_files(dir.path()).unwrap();
        assert_eq!(remaining.len(), 7);
        assert!(!dir.path().join("depthcap.log.2024-01-01").exists());
        assert!(!dir.path().join("depthcap.log.2024-01-02").exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}

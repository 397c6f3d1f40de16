//! Display recent log entries from the application.

use crate::logging::{get_log_dir, log_files};
use anyhow::anyhow;
use std::fs;

const DEFAULT_LINES: usize = 50;

/// The last `count` lines of `content`, with the number skipped.
fn tail(content: &str, count: usize) -> (usize, Vec<&str>) {
    let lines: Vec<&str> = content.lines().collect();
    let start_index = lines.len().saturating_sub(count);
    (start_index, lines[start_index..].to_vec())
}

/// Shows recent log entries from the newest log file.
///
/// # Errors
/// - If the log directory cannot be determined
/// - If log files cannot be read
pub fn handle_logs() -> Result<(), anyhow::Error> {
    let log_dir = get_log_dir()?;

    let Some(log_file) = log_files(&log_dir)?.into_iter().next() else {
        println!("No log files found in: {}", log_dir.display());
        println!("Run 'depthcap' or other commands to generate logs.");
        return Ok(());
    };

    let content = fs::read_to_string(&log_file)
        .map_err(|e| anyhow!("Failed to read log file: {e}"))?;

    if content.is_empty() {
        println!("Log file is empty: {}", log_file.display());
        return Ok(());
    }

    let (skipped, lines) = tail(&content, DEFAULT_LINES);

    println!();
    if skipped > 0 {
        println!("Showing last {} of {} lines:", lines.len(), skipped + lines.len());
    } else {
        println!("Showing all {} lines:", lines.len());
    }
    println!("Full log file at: {}", log_file.display());
    println!();

    for line in lines {
        println!("{line}");
    }

    Ok(())
}

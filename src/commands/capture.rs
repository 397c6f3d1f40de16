//! Headless capture.
//!
//! Records one session for a fixed time without a terminal UI, optionally
//! taking evenly spaced snapshots, then exports it and hands the point
//! cloud to the configured share target.

use super::record::build_orchestrator;
use crate::config::DepthcapConfig;
use crate::orchestrator::{OrchestratorEvent, RecoveryAction};
use crate::share::target_for;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Source restarts attempted before giving up.
const MAX_RESTARTS: u32 = 3;

/// Upper bound for `--snapshots`; each one writes at least one image.
const MAX_SNAPSHOTS: u32 = 1000;

/// When each snapshot is due, as offsets from the start of recording.
fn snapshot_offsets(duration: Duration, snapshots: u32) -> impl Iterator<Item = Duration> {
    let step = duration / snapshots.saturating_add(1);
    (1..=snapshots).map(move |i| step * i)
}

fn validate_request(seconds: f64, snapshots: u32) -> anyhow::Result<()> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(anyhow::anyhow!("--seconds must be a positive number"));
    }
    if snapshots > MAX_SNAPSHOTS {
        return Err(anyhow::anyhow!("--snapshots must be at most {MAX_SNAPSHOTS}, got {snapshots}"));
    }
    Ok(())
}

/// Records for `seconds`, taking `snapshots` stills along the way.
///
/// # Errors
/// - If `seconds` is not positive or `snapshots` exceeds the cap
/// - If the configuration cannot be loaded
/// - If the frame source fails and cannot be restarted
/// - If the export fails
pub async fn handle_capture(seconds: f64, snapshots: u32) -> anyhow::Result<()> {
    validate_request(seconds, snapshots)?;
    tracing::info!("=== depthcap Headless Capture: {}s, {} snapshots ===", seconds, snapshots);

    let config_data = DepthcapConfig::load().map_err(|e| anyhow::anyhow!("Configuration error: {e}"))?;
    let share = target_for(config_data.export.share, false);
    let mut orchestrator = build_orchestrator(&config_data, share)?;
    let mut events = orchestrator
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("Event stream already taken"))?;

    orchestrator.start_source().await?;
    let folder = orchestrator.start_recording().await?;
    eprintln!("Recording {} for {seconds}s", folder.path().display());

    let started = Instant::now();
    let deadline = started + Duration::from_secs_f64(seconds);
    let mut due = snapshot_offsets(deadline - started, snapshots).map(|d| started + d);
    let mut next_snapshot = due.next();
    let mut restarts = 0;

    loop {
        let wake = next_snapshot.map_or(deadline, |t| t.min(deadline));
        tokio::select! {
            _ = sleep_until(wake) => {
                if Instant::now() >= deadline {
                    break;
                }
                if next_snapshot.is_some_and(|t| Instant::now() >= t) {
                    orchestrator.on_snapshot_toggle();
                    next_snapshot = due.next();
                }
            }
            Some(event) = events.recv() => match event {
                OrchestratorEvent::SourceFailed(error) => {
                    let message = error.message().replace('\n', " / ");
                    match orchestrator.on_frame_source_failure(error) {
                        Some(RecoveryAction::RestartSource) if restarts < MAX_RESTARTS => {
                            restarts += 1;
                            eprintln!("Frame source failed ({message}), restarting");
                            orchestrator.restart_source().await?;
                        }
                        _ => {
                            orchestrator.shutdown().await?;
                            return Err(anyhow::anyhow!("Frame source failed: {message}"));
                        }
                    }
                }
                OrchestratorEvent::SnapshotSaved(artifacts) => {
                    for artifact in artifacts {
                        eprintln!("Saved {}", artifact.path.display());
                    }
                }
                OrchestratorEvent::SnapshotFailed(error) => eprintln!("Warning: snapshot failed: {error}"),
                _ => {}
            },
        }
    }

    let artifact = orchestrator
        .shutdown()
        .await?
        .ok_or_else(|| anyhow::anyhow!("Session ended without an export"))?;

    eprintln!(
        "Captured {} points into {}",
        artifact.point_count.unwrap_or(0),
        artifact.session
    );
    tracing::info!("Headless capture finished: {}", artifact.path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshots_are_spread_evenly() {
        let offsets: Vec<_> = snapshot_offsets(Duration::from_secs(4), 3).collect();
        assert_eq!(
            offsets,
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(3)]
        );
        assert_eq!(snapshot_offsets(Duration::from_secs(4), 0).count(), 0);
    }

    #[test]
    fn test_snapshot_count_is_capped() {
        assert!(validate_request(2.0, MAX_SNAPSHOTS).is_ok());
        assert!(validate_request(2.0, MAX_SNAPSHOTS + 1).is_err());
        assert!(validate_request(2.0, u32::MAX).is_err());
        assert!(validate_request(0.0, 1).is_err());
        assert!(validate_request(f64::NAN, 1).is_err());
    }

    #[test]
    fn test_offsets_do_not_overflow_at_max_count() {
        let duration = Duration::from_nanos(u64::from(u32::MAX));
        let mut offsets = snapshot_offsets(duration, u32::MAX);
        assert_eq!(offsets.next(), Some(Duration::from_nanos(1)));
        assert_eq!(offsets.next(), Some(Duration::from_nanos(2)));
    }
}

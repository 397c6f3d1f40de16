//! Interactive capture.
//!
//! Runs the live capture TUI: the frame source streams into the recorder,
//! the operator toggles sessions and snapshots from the keyboard, and each
//! stopped session is exported in the background. Supports external
//! triggers via SIGUSR1 (record toggle) and SIGUSR2 (snapshot).

use crate::config::{DepthcapConfig, SourceKind};
use crate::frame::{FrameSource, SyntheticSource};
use crate::history::ExportHistory;
use crate::orchestrator::{Orchestrator, OrchestratorEvent, ToggleOutcome};
use crate::recording::ui::CaptureView;
use crate::recording::{CaptureCommand, DepthcapTui};
use crate::share::{target_for, ShareTarget};
use crate::ui::ErrorScreen;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Loop iterations between refreshes of the cloud preview.
const CLOUD_REFRESH_TICKS: u64 = 10;

/// Builds the frame source named in the config.
pub(crate) fn build_source(config: &DepthcapConfig) -> Box<dyn FrameSource> {
    match config.source.kind {
        SourceKind::Synthetic => Box::new(SyntheticSource::new(config.synthetic_settings())),
    }
}

/// Builds an orchestrator from the config, with export history attached
/// when the data directory is usable.
pub(crate) fn build_orchestrator(
    config: &DepthcapConfig,
    share: Arc<dyn ShareTarget>,
) -> anyhow::Result<Orchestrator> {
    let history = match crate::config::data_dir().and_then(|dir| ExportHistory::new(&dir)) {
        Ok(history) => Some(history),
        Err(e) => {
            tracing::warn!("Export history unavailable: {}", e);
            None
        }
    };
    let orchestrator = Orchestrator::new(
        config.orchestrator_settings()?,
        build_source(config),
        share,
        history,
    )?;
    Ok(orchestrator)
}

fn show_error_screen(message: &str) -> anyhow::Result<()> {
    let mut error_screen = ErrorScreen::new()?;
    error_screen.show_error(message)?;
    error_screen.cleanup()?;
    Ok(())
}

/// Handles the interactive capture.
///
/// # Errors
/// - If the configuration cannot be loaded
/// - If the frame source cannot be started
/// - If the terminal cannot be driven
pub async fn handle_record() -> anyhow::Result<()> {
    tracing::info!("=== depthcap Capture Started ===");

    let config_data = match DepthcapConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Failed to load configuration: {err}");
            show_error_screen(&format!(
                "Configuration Error:\n\n{err}\n\nPlease check your ~/.config/depthcap/depthcap.toml file and try again."
            ))?;
            return Err(anyhow::anyhow!("Configuration error: {err}"));
        }
    };

    tracing::info!(
        "Configuration loaded: source={}, {}x{} @ {} fps, output={}, share={:?}",
        config_data.source.kind,
        config_data.source.width,
        config_data.source.height,
        config_data.source.fps,
        config_data.capture.output_dir,
        config_data.export.share
    );

    let share = target_for(config_data.export.share, true);
    let mut orchestrator = build_orchestrator(&config_data, share.clone())?;

    if let Err(e) = orchestrator.start_source().await {
        tracing::error!("Failed to start frame source: {}", e);
        show_error_screen(&format!(
            "Frame Source Error:\n\n{e}\n\nPlease check the [source] section of your configuration."
        ))?;
        return Err(e.into());
    }

    let mut events = orchestrator
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("Event stream already taken"))?;
    let status = orchestrator.status();

    let record_trigger = Arc::new(AtomicBool::new(false));
    let snapshot_trigger = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGUSR1, record_trigger.clone())
        .map_err(|e| anyhow::anyhow!("Failed to register signal handler: {e}"))?;
    signal_hook::flag::register(signal_hook::consts::SIGUSR2, snapshot_trigger.clone())
        .map_err(|e| anyhow::anyhow!("Failed to register signal handler: {e}"))?;

    let mut tui = DepthcapTui::new()?;
    let mut message: Option<String> = None;
    let mut tick = 0u64;

    tracing::debug!("Entering capture loop. 'r' toggles recording, 's' takes a snapshot, 'q' quits.");

    loop {
        if record_trigger.swap(false, Ordering::Relaxed) {
            tracing::info!("Received SIGUSR1: toggling recording");
            toggle_record(&mut orchestrator, &mut message).await;
        }
        if snapshot_trigger.swap(false, Ordering::Relaxed) {
            tracing::info!("Received SIGUSR2: requesting snapshot");
            request_snapshot(&orchestrator, &mut message);
        }

        while let Ok(event) = events.try_recv() {
            handle_event(&mut orchestrator, event, &mut message);
        }

        match tui.handle_input()? {
            CaptureCommand::Continue => {}
            CaptureCommand::ToggleRecord => toggle_record(&mut orchestrator, &mut message).await,
            CaptureCommand::Snapshot => request_snapshot(&orchestrator, &mut message),
            CaptureCommand::RestartSource => {
                if orchestrator.pending_recovery().is_some() {
                    match orchestrator.restart_source().await {
                        Ok(()) => message = Some("source restarted".to_string()),
                        Err(e) => {
                            tracing::error!("Source restart failed: {}", e);
                            message = Some(format!("restart failed: {e}"));
                        }
                    }
                }
            }
            CaptureCommand::Quit => break,
        }

        tick += 1;
        if orchestrator.is_recording() && tick.is_multiple_of(CLOUD_REFRESH_TICKS) {
            let cloud = orchestrator.point_cloud().await?;
            tui.set_cloud(&cloud);
        }

        let current = status.borrow().clone();
        tui.render(&CaptureView {
            status: &current,
            tasks: orchestrator.tracker().counts(),
            failure: orchestrator.last_failure(),
            can_restart: orchestrator.pending_recovery().is_some(),
            message: message.as_deref(),
        })?;
    }

    tui.cleanup()?;

    for _ in 0..orchestrator.pending_retries() {
        if let Some(handle) = orchestrator.retry_export() {
            if let Err(e) = handle.wait().await {
                eprintln!("Warning: export of a session failed again: {e}");
            }
        }
    }

    let result = orchestrator.shutdown().await;
    share.flush();

    match result {
        Ok(Some(artifact)) => tracing::info!("Final session exported to {}", artifact.path.display()),
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Final export failed: {}", e);
            eprintln!("Error: final export failed: {e}");
            return Err(e.into());
        }
    }

    tracing::info!("=== depthcap Capture Exited Successfully ===");
    Ok(())
}

async fn toggle_record(orchestrator: &mut Orchestrator, message: &mut Option<String>) {
    match orchestrator.on_record_toggle().await {
        Ok(ToggleOutcome::Started(folder)) => *message = Some(format!("recording {}", folder.name())),
        Ok(ToggleOutcome::Stopped(handle)) => *message = Some(format!("saving {}", handle.session())),
        Ok(ToggleOutcome::Ignored) => {}
        Err(e) => {
            tracing::error!("Record toggle failed: {}", e);
            *message = Some(e.to_string());
        }
    }
}

fn request_snapshot(orchestrator: &Orchestrator, message: &mut Option<String>) {
    if !orchestrator.on_snapshot_toggle() && !orchestrator.snapshots().is_armed() {
        *message = Some("snapshots need an active session".to_string());
    }
}

fn handle_event(orchestrator: &mut Orchestrator, event: OrchestratorEvent, message: &mut Option<String>) {
    *message = match event {
        OrchestratorEvent::RecordingStarted { .. } | OrchestratorEvent::RecordingStopped { .. } => return,
        OrchestratorEvent::ExportFinished(artifact) => Some(format!("saved {}", artifact.path.display())),
        OrchestratorEvent::ExportFailed { session, error } => {
            Some(format!("export of {session} failed, kept for retry: {error}"))
        }
        OrchestratorEvent::SnapshotSaved(artifacts) => artifacts
            .first()
            .and_then(|a| a.path.file_name())
            .map(|name| format!("saved {}", name.to_string_lossy())),
        OrchestratorEvent::SnapshotFailed(error) => Some(format!("snapshot failed: {error}")),
        OrchestratorEvent::SourceFailed(error) => {
            orchestrator.on_frame_source_failure(error);
            None
        }
        OrchestratorEvent::SourceRestarted => return,
    };
}

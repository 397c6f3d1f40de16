//! Background export tasks and their handles.

use crate::error::{CaptureError, FrameSourceError, Result};
use crate::export::{ExportArtifact, Exporter};
use crate::history::ExportHistory;
use crate::recording::{CapturedSession, SnapshotCapture};
use crate::share::ShareTarget;
use crate::tasks::TaskTracker;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Notifications for the interaction context.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    RecordingStarted { session: String },
    RecordingStopped { session: String, points: usize },
    ExportFinished(ExportArtifact),
    /// The session is kept for [`super::Orchestrator::retry_export`]
    ExportFailed { session: String, error: String },
    SnapshotSaved(Vec<ExportArtifact>),
    SnapshotFailed(String),
    SourceFailed(FrameSourceError),
    SourceRestarted,
}

/// A running point cloud export.
///
/// Dropping the handle does not stop the export; it keeps running and is
/// still counted by the task tracker.
#[derive(Debug)]
pub struct ExportHandle {
    session: String,
    cancel: CancellationToken,
    join: JoinHandle<Result<ExportArtifact>>,
}

impl ExportHandle {
    /// Name of the session being exported.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Skips the export if it has not started writing yet. A skipped
    /// session is queued for retry.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the export to finish.
    pub async fn wait(self) -> Result<ExportArtifact> {
        self.join
            .await
            .map_err(|e| CaptureError::Background(e.to_string()))?
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

/// What happens to artifacts after they are written: history, hand-off and
/// notification. Shared by the orchestrator and the capture loop.
#[derive(Clone)]
pub(crate) struct ArtifactPipeline {
    pub exporter: Exporter,
    pub tracker: TaskTracker,
    pub share: Arc<dyn ShareTarget>,
    pub history: Option<Arc<Mutex<ExportHistory>>>,
    pub events: mpsc::UnboundedSender<OrchestratorEvent>,
    /// Sessions whose export failed, oldest first
    pub retry_queue: Arc<Mutex<VecDeque<CapturedSession>>>,
}

impl ArtifactPipeline {
    pub fn notify(&self, event: OrchestratorEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    fn record(&self, artifact: &ExportArtifact) {
        let Some(history) = &self.history else {
            return;
        };
        match history.lock() {
            Ok(mut history) => {
                if let Err(e) = history.record(artifact) {
                    tracing::warn!("Failed to record export in history: {}", e);
                }
            }
            Err(_) => tracing::warn!("Export history lock poisoned, entry skipped"),
        }
    }

    fn retain(&self, session: CapturedSession) {
        tracing::info!(
            "Keeping {} ({} points) for retry",
            session.folder.name(),
            session.points.len()
        );
        match self.retry_queue.lock() {
            Ok(mut queue) => queue.push_back(session),
            Err(_) => tracing::error!("Retry queue lock poisoned, session {} dropped", session.folder.name()),
        }
    }

    pub fn take_retry(&self) -> Option<CapturedSession> {
        self.retry_queue.lock().ok()?.pop_front()
    }

    pub fn pending_retries(&self) -> usize {
        self.retry_queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Exports `session` on a blocking worker, then shares and records it.
    pub fn spawn_export(&self, runtime: &Handle, session: CapturedSession) -> ExportHandle {
        let guard = self.tracker.track();
        let cancel = CancellationToken::new();
        let name = session.folder.name().to_string();
        let pipeline = self.clone();
        let token = cancel.clone();

        let join = runtime.spawn(async move {
            let _guard = guard;
            let name = session.folder.name().to_string();

            let worker = pipeline.clone();
            let blocking = tokio::task::spawn_blocking(move || {
                if token.is_cancelled() {
                    return (session, Err(CaptureError::Cancelled));
                }
                // The session lives outside the unwind boundary so a panic
                // in export or hand-off still leaves it retryable.
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    let result = worker.exporter.export(&session.points, session.folder.path());
                    if let Ok(artifact) = &result {
                        worker.record(artifact);
                        if let Err(e) = worker.share.present(artifact) {
                            tracing::warn!("Share hand-off failed for {}: {}", artifact.path.display(), e);
                        }
                    }
                    result
                }));
                let result = outcome.unwrap_or_else(|payload| {
                    Err(CaptureError::Background(format!("export panicked: {}", panic_message(&*payload))))
                });
                (session, result)
            });

            let (session, result) = blocking
                .await
                .map_err(|e| CaptureError::Background(e.to_string()))?;

            match &result {
                Ok(artifact) => pipeline.notify(OrchestratorEvent::ExportFinished(artifact.clone())),
                Err(CaptureError::Cancelled) => {
                    tracing::info!("Export of {} cancelled", name);
                    pipeline.retain(session);
                }
                Err(e) => {
                    tracing::error!("Export of {} failed: {}", name, e);
                    pipeline.retain(session);
                    pipeline.notify(OrchestratorEvent::ExportFailed {
                        session: name,
                        error: e.to_string(),
                    });
                }
            }
            result
        });

        ExportHandle {
            session: name,
            cancel,
            join,
        }
    }

    /// Writes a snapshot capture on a blocking worker.
    ///
    /// Safe to call from the capture thread; the tracker counts the task
    /// before this returns.
    pub fn spawn_snapshot(&self, runtime: &Handle, capture: SnapshotCapture) {
        let guard = self.tracker.track();
        let pipeline = self.clone();

        runtime.spawn_blocking(move || {
            let _guard = guard;
            match pipeline.exporter.export_capture(&capture) {
                Ok(artifacts) => {
                    for artifact in &artifacts {
                        pipeline.record(artifact);
                    }
                    pipeline.notify(OrchestratorEvent::SnapshotSaved(artifacts));
                }
                Err(e) => {
                    tracing::error!("Snapshot write failed: {}", e);
                    pipeline.notify(OrchestratorEvent::SnapshotFailed(e.to_string()));
                }
            }
        });
    }
}

//! Wires operator commands, the frame source and background exports
//! together.
//!
//! The orchestrator lives in the interaction context (the tokio runtime).
//! It never touches the point buffer: the capture thread owns the recorder,
//! and a stopped session's points move by value into the export task.
//!
//! ```text
//! FrameSource ──SourceEvent──▶ capture thread ──spawn_blocking──▶ snapshot writes
//!                                  ▲   │
//!                     Control ─────┘   └── CaptureStatus (watch)
//!                        │
//! Orchestrator ──stop()──┴──CapturedSession──▶ export task ──▶ history, share
//! ```

pub mod capture_loop;
pub mod handle;

pub use capture_loop::CaptureStatus;
pub use handle::{ExportHandle, OrchestratorEvent};

use crate::error::{CaptureError, FrameSourceError, Result};
use crate::export::{ExportSettings, Exporter};
use crate::frame::{FrameSink, FrameSource, SourceConfig, SourceEvent};
use crate::history::ExportHistory;
use crate::recording::{
    PointCloudSnapshot, RecorderSettings, SessionFolder, SessionRecorder, SnapshotController,
};
use crate::share::ShareTarget;
use crate::tasks::TaskTracker;
use capture_loop::{CaptureLoop, Control};
use chrono::Local;
use handle::ArtifactPipeline;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};

/// Stills taken while no session is active go here, under the output root.
pub const IDLE_SNAPSHOT_DIR: &str = "snapshots";

/// Frames buffered between the source and the capture thread.
const FRAME_QUEUE_DEPTH: usize = 8;

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Root under which session folders are created
    pub output_dir: PathBuf,
    pub recorder: RecorderSettings,
    pub source: SourceConfig,
    pub export: ExportSettings,
    /// Include depth, confidence and pose with each still
    pub snapshot_depth: bool,
    /// Accept snapshots while idle, writing them to [`IDLE_SNAPSHOT_DIR`]
    pub snapshots_when_idle: bool,
}

impl OrchestratorSettings {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            recorder: RecorderSettings::default(),
            source: SourceConfig::default(),
            export: ExportSettings::default(),
            snapshot_depth: false,
            snapshots_when_idle: true,
        }
    }
}

/// What the operator should be offered after a source failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    RestartSource,
}

/// Result of a record toggle.
#[derive(Debug)]
pub enum ToggleOutcome {
    Started(SessionFolder),
    Stopped(ExportHandle),
    /// The command did not apply in the current state
    Ignored,
}

/// The command side of a capture.
pub struct Orchestrator {
    output_dir: PathBuf,
    source_config: SourceConfig,
    snapshots_when_idle: bool,
    source: Option<Box<dyn FrameSource>>,
    source_running: bool,
    sink: FrameSink,
    control: crossbeam_channel::Sender<Control>,
    capture_thread: Option<std::thread::JoinHandle<()>>,
    status: watch::Receiver<CaptureStatus>,
    events: Option<mpsc::UnboundedReceiver<OrchestratorEvent>>,
    snapshots: SnapshotController,
    tracker: TaskTracker,
    pipeline: ArtifactPipeline,
    runtime: Handle,
    recording: bool,
    pending_recovery: Option<RecoveryAction>,
    last_failure: Option<FrameSourceError>,
}

fn background(e: tokio::task::JoinError) -> CaptureError {
    CaptureError::Background(e.to_string())
}

impl Orchestrator {
    /// Spawns the capture thread. The source is not started until
    /// [`Orchestrator::start_source`].
    ///
    /// # Errors
    /// - If called outside a tokio runtime
    /// - If the capture thread cannot be spawned
    pub fn new(
        settings: OrchestratorSettings,
        source: Box<dyn FrameSource>,
        share: Arc<dyn ShareTarget>,
        history: Option<ExportHistory>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| CaptureError::Background(e.to_string()))?;

        let tracker = TaskTracker::new();
        let snapshots = SnapshotController::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pipeline = ArtifactPipeline {
            exporter: Exporter::new(settings.export.clone()),
            tracker: tracker.clone(),
            share,
            history: history.map(|h| Arc::new(Mutex::new(h))),
            events: events_tx,
            retry_queue: Arc::new(Mutex::new(VecDeque::new())),
        };

        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<SourceEvent>(FRAME_QUEUE_DEPTH);
        let (status_tx, status_rx) = watch::channel(CaptureStatus::default());

        let idle_folder = settings.snapshots_when_idle.then(|| {
            SessionFolder::existing(settings.output_dir.join(IDLE_SNAPSHOT_DIR), Local::now())
        });

        let capture_thread = CaptureLoop {
            recorder: SessionRecorder::new(settings.recorder),
            snapshots: snapshots.clone(),
            idle_folder,
            snapshot_depth: settings.snapshot_depth,
            pipeline: pipeline.clone(),
            runtime: runtime.clone(),
            status: status_tx,
            last_timestamp: None,
        }
        .spawn(control_rx, frame_rx)
        .map_err(|e| CaptureError::Background(e.to_string()))?;

        tracing::debug!(
            "Orchestrator ready: output {}, source {}",
            settings.output_dir.display(),
            source.name()
        );

        Ok(Self {
            output_dir: settings.output_dir,
            source_config: settings.source,
            snapshots_when_idle: settings.snapshots_when_idle,
            source: Some(source),
            source_running: false,
            sink: FrameSink::new(frame_tx),
            control: control_tx,
            capture_thread: Some(capture_thread),
            status: status_rx,
            events: Some(events_rx),
            snapshots,
            tracker,
            pipeline,
            runtime,
            recording: false,
            pending_recovery: None,
            last_failure: None,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Status published by the capture thread on every frame.
    pub fn status(&self) -> watch::Receiver<CaptureStatus> {
        self.status.clone()
    }

    /// The event stream. Can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<OrchestratorEvent>> {
        self.events.take()
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn snapshots(&self) -> &SnapshotController {
        &self.snapshots
    }

    pub fn pending_recovery(&self) -> Option<RecoveryAction> {
        self.pending_recovery
    }

    pub fn last_failure(&self) -> Option<&FrameSourceError> {
        self.last_failure.as_ref()
    }

    /// Sessions waiting for [`Orchestrator::retry_export`].
    pub fn pending_retries(&self) -> usize {
        self.pipeline.pending_retries()
    }

    fn send(&self, msg: Control) -> Result<()> {
        self.control.send(msg).map_err(|_| CaptureError::CaptureLoopClosed)
    }

    /// Runs `f` against the source on a blocking worker.
    async fn with_source<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn FrameSource) -> Result<()> + Send + 'static,
    {
        let mut source = self.source.take().ok_or(CaptureError::CaptureLoopClosed)?;
        let (source, result) = tokio::task::spawn_blocking(move || {
            let result = f(source.as_mut());
            (source, result)
        })
        .await
        .map_err(background)?;
        self.source = Some(source);
        result
    }

    /// Starts frame delivery with the configured source settings.
    pub async fn start_source(&mut self) -> Result<()> {
        let config = self.source_config;
        let sink = self.sink.clone();
        self.with_source(move |source| source.start(&config, sink)).await?;
        self.source_running = true;
        Ok(())
    }

    /// Toggles recording. State-machine misuse is logged and reported as
    /// [`ToggleOutcome::Ignored`]; I/O failures are returned.
    pub async fn on_record_toggle(&mut self) -> Result<ToggleOutcome> {
        let result = if self.recording {
            self.stop_recording().await.map(ToggleOutcome::Stopped)
        } else {
            self.start_recording().await.map(ToggleOutcome::Started)
        };
        match result {
            Err(e) if e.is_contract_violation() => {
                tracing::debug!("Record toggle ignored: {}", e);
                Ok(ToggleOutcome::Ignored)
            }
            other => other,
        }
    }

    /// Creates a session folder and starts accumulating into it.
    ///
    /// The folder exists on disk before the capture thread is told to
    /// start, so no frame is accepted for a session without a directory.
    ///
    /// # Errors
    /// - `AlreadyRecording` if a session is active
    /// - `DuplicateFolder` if a session started within the same second
    /// - `Io` if the folder cannot be created
    pub async fn start_recording(&mut self) -> Result<SessionFolder> {
        if self.recording {
            return Err(CaptureError::AlreadyRecording);
        }

        let root = self.output_dir.clone();
        let started_at = Local::now();
        let folder = tokio::task::spawn_blocking(move || SessionFolder::create(&root, started_at))
            .await
            .map_err(background)??;

        let (reply, rx) = oneshot::channel();
        self.send(Control::Start {
            folder: folder.clone(),
            reply,
        })?;
        rx.await.map_err(|_| CaptureError::CaptureLoopClosed)??;

        self.recording = true;
        self.pipeline.notify(OrchestratorEvent::RecordingStarted {
            session: folder.name().to_string(),
        });
        Ok(folder)
    }

    /// Stops the session and exports it in the background.
    ///
    /// # Errors
    /// - `NotRecording` if no session is active
    pub async fn stop_recording(&mut self) -> Result<ExportHandle> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::Stop { reply })?;
        let session = rx.await.map_err(|_| CaptureError::CaptureLoopClosed)??;
        self.recording = false;

        self.pipeline.notify(OrchestratorEvent::RecordingStopped {
            session: session.folder.name().to_string(),
            points: session.points.len(),
        });
        Ok(self.pipeline.spawn_export(&self.runtime, session))
    }

    /// Arms a snapshot if there is somewhere to put it.
    ///
    /// Returns whether a new request was armed.
    pub fn on_snapshot_toggle(&self) -> bool {
        if !self.recording && !self.snapshots_when_idle {
            tracing::debug!("Snapshot ignored: not recording and idle snapshots disabled");
            return false;
        }
        self.snapshots.request_snapshot()
    }

    /// Classifies a source failure and remembers the recovery to offer.
    pub fn on_frame_source_failure(&mut self, error: FrameSourceError) -> Option<RecoveryAction> {
        self.source_running = false;
        self.pending_recovery = error.recoverable.then_some(RecoveryAction::RestartSource);
        if self.pending_recovery.is_none() {
            tracing::error!("Frame source failed and cannot be restarted: {}", error);
        } else {
            tracing::warn!("Frame source failed, restart offered: {}", error);
        }
        self.last_failure = Some(error);
        self.pending_recovery
    }

    /// Restarts the source with the same configuration and a reset of its
    /// reconstruction state. The current session and its points are kept.
    pub async fn restart_source(&mut self) -> Result<()> {
        let config = SourceConfig {
            reset_reconstruction: true,
            ..self.source_config
        };
        let sink = self.sink.clone();
        self.with_source(move |source| {
            source.stop();
            source.start(&config, sink)
        })
        .await?;

        self.source_running = true;
        self.pending_recovery = None;
        self.last_failure = None;
        tracing::info!("Frame source restarted");
        self.pipeline.notify(OrchestratorEvent::SourceRestarted);
        Ok(())
    }

    /// Exports the oldest session whose previous export failed.
    pub fn retry_export(&mut self) -> Option<ExportHandle> {
        let session = self.pipeline.take_retry()?;
        tracing::info!("Retrying export of {}", session.folder.name());
        Some(self.pipeline.spawn_export(&self.runtime, session))
    }

    /// Points accumulated in the active session so far.
    ///
    /// Frames already queued are applied first.
    pub async fn point_cloud(&self) -> Result<PointCloudSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::Points { reply })?;
        rx.await.map_err(|_| CaptureError::CaptureLoopClosed)
    }

    /// Stops everything: exports an active session, stops the source, joins
    /// the capture thread and waits for background writes to drain.
    ///
    /// Returns the artifact of the session that was active, if any.
    pub async fn shutdown(mut self) -> Result<Option<crate::export::ExportArtifact>> {
        let final_export = if self.recording {
            Some(self.stop_recording().await?)
        } else {
            None
        };

        if let Err(e) = self.with_source(|source| {
            source.stop();
            Ok(())
        })
        .await
        {
            tracing::warn!("Failed to stop frame source: {}", e);
        }
        self.source_running = false;

        let _ = self.control.send(Control::Shutdown);
        if let Some(thread) = self.capture_thread.take() {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                tracing::error!("Capture thread did not exit cleanly");
            }
        }

        let artifact = match final_export {
            Some(handle) => Some(handle.wait().await?),
            None => None,
        };

        self.tracker.wait_drained().await;
        let counts = self.tracker.counts();
        tracing::info!(
            "Shutdown complete: {} background tasks run, {} sessions awaiting retry",
            counts.started,
            self.pipeline.pending_retries()
        );
        Ok(artifact)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(source) = self.source.as_mut() {
            if self.source_running {
                source.stop();
            }
        }
        let _ = self.control.send(Control::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{read_ply_header, ArtifactKind};
    use crate::frame::{Confidence, Frame};
    use crate::share::NoShare;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Source driven by the test through its sink.
    #[derive(Clone, Default)]
    struct ManualSource {
        sink: Arc<Mutex<Option<FrameSink>>>,
        starts: Arc<AtomicU32>,
        last_config: Arc<Mutex<Option<SourceConfig>>>,
    }

    impl ManualSource {
        fn deliver(&self, frame: Frame) {
            let sink = self.sink.lock().unwrap().clone().expect("source not started");
            sink.deliver(frame).unwrap();
        }

        fn fail(&self, error: FrameSourceError) {
            let sink = self.sink.lock().unwrap().take().expect("source not started");
            sink.fail(error).unwrap();
        }
    }

    impl FrameSource for ManualSource {
        fn name(&self) -> &str {
            "manual"
        }

        fn start(&mut self, config: &SourceConfig, sink: FrameSink) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            *self.last_config.lock().unwrap() = Some(*config);
            *self.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn stop(&mut self) {
            self.sink.lock().unwrap().take();
        }
    }

    /// 10x10 frame where every pixel qualifies: 100 points.
    fn frame(t: f64) -> Frame {
        Frame::uniform(10, 10, 1.0, Confidence::High, t)
    }

    async fn orchestrator(root: &Path, snapshots_when_idle: bool) -> (Orchestrator, ManualSource) {
        let source = ManualSource::default();
        let mut settings = OrchestratorSettings::new(root);
        settings.snapshots_when_idle = snapshots_when_idle;
        let history = ExportHistory::new(&root.join("data")).unwrap();
        let mut orchestrator =
            Orchestrator::new(settings, Box::new(source.clone()), Arc::new(NoShare), Some(history)).unwrap();
        orchestrator.start_source().await.unwrap();
        (orchestrator, source)
    }

    fn count_files(dir: &Path, prefix: &str) -> usize {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
                    .count()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_three_frames_export_three_hundred_points() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, source) = orchestrator(dir.path(), true).await;

        let folder = match orchestrator.on_record_toggle().await.unwrap() {
            ToggleOutcome::Started(folder) => folder,
            other => panic!("expected start, got {other:?}"),
        };
        assert_eq!(folder.name(), SessionFolder::name_for(&folder.started_at()));
        assert!(folder.raw_input_dir().is_dir());

        for i in 0..3 {
            source.deliver(frame(i as f64 / 30.0));
        }

        let handle = match orchestrator.on_record_toggle().await.unwrap() {
            ToggleOutcome::Stopped(handle) => handle,
            other => panic!("expected stop, got {other:?}"),
        };
        assert_eq!(handle.session(), folder.name());
        let artifact = handle.wait().await.unwrap();

        assert_eq!(artifact.kind, ArtifactKind::PointCloud);
        assert_eq!(artifact.point_count, Some(300));
        assert_eq!(artifact.path, folder.path().join("pointcloud.ply"));
        assert_eq!(read_ply_header(&artifact.path).unwrap().vertex_count, 300);

        orchestrator.tracker().wait_drained().await;
        let counts = orchestrator.tracker().counts();
        assert_eq!((counts.started, counts.finished), (1, 1));
    }

    #[tokio::test]
    async fn test_export_is_recorded_in_history() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, source) = orchestrator(dir.path(), true).await;

        orchestrator.start_recording().await.unwrap();
        source.deliver(frame(0.0));
        let artifact = orchestrator.stop_recording().await.unwrap().wait().await.unwrap();

        let mut history = ExportHistory::new(&dir.path().join("data")).unwrap();
        let latest = history.latest(ArtifactKind::PointCloud).unwrap().unwrap();
        assert_eq!(latest.path, artifact.path);
        assert_eq!(latest.point_count, Some(100));
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_not_recording() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, source) = orchestrator(dir.path(), true).await;
        source.deliver(frame(0.0));

        let result = orchestrator.stop_recording().await;
        assert!(matches!(result, Err(CaptureError::NotRecording)));
        assert!(!orchestrator.is_recording());

        let counts = orchestrator.tracker().counts();
        assert_eq!((counts.started, counts.finished), (0, 0));
        assert_eq!(count_files(dir.path(), "20"), 0);
        assert_eq!(orchestrator.point_cloud().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_start_while_recording_is_already_recording() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, _source) = orchestrator(dir.path(), true).await;
        orchestrator.start_recording().await.unwrap();
        assert!(matches!(
            orchestrator.start_recording().await,
            Err(CaptureError::AlreadyRecording)
        ));
        assert_eq!(count_files(dir.path(), "20"), 1);
    }

    #[tokio::test]
    async fn test_double_snapshot_request_writes_one_image() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, source) = orchestrator(dir.path(), true).await;

        assert!(orchestrator.on_snapshot_toggle());
        assert!(!orchestrator.on_snapshot_toggle());
        for i in 0..3 {
            source.deliver(frame(i as f64));
        }

        // the reply comes after every queued frame has been handled
        orchestrator.point_cloud().await.unwrap();
        orchestrator.tracker().wait_drained().await;

        let snapshots = dir.path().join(IDLE_SNAPSHOT_DIR);
        assert_eq!(count_files(&snapshots, "snapshot-"), 1);
        assert!(!orchestrator.snapshots().is_armed());
    }

    #[tokio::test]
    async fn test_snapshot_while_idle_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, source) = orchestrator(dir.path(), false).await;

        assert!(!orchestrator.on_snapshot_toggle());
        source.deliver(frame(0.0));
        orchestrator.point_cloud().await.unwrap();
        orchestrator.tracker().wait_drained().await;

        assert!(!dir.path().join(IDLE_SNAPSHOT_DIR).exists());
    }

    #[tokio::test]
    async fn test_snapshot_during_session_lands_in_session_folder() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, source) = orchestrator(dir.path(), false).await;
        let folder = orchestrator.start_recording().await.unwrap();

        assert!(orchestrator.on_snapshot_toggle());
        source.deliver(frame(1.5));
        orchestrator.point_cloud().await.unwrap();
        orchestrator.tracker().wait_drained().await;

        assert!(folder.path().join("snapshot-000001500.png").is_file());
    }

    #[tokio::test]
    async fn test_source_failure_keeps_session_and_restart_appends() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, source) = orchestrator(dir.path(), true).await;
        let mut events = orchestrator.take_events().unwrap();

        let folder = orchestrator.start_recording().await.unwrap();
        source.deliver(frame(0.0));
        source.deliver(frame(0.1));
        source.fail(FrameSourceError::new("Session interrupted").with_reason("Tracking lost"));

        let error = loop {
            match events.recv().await.unwrap() {
                OrchestratorEvent::SourceFailed(error) => break error,
                _ => continue,
            }
        };
        assert_eq!(
            orchestrator.on_frame_source_failure(error),
            Some(RecoveryAction::RestartSource)
        );
        assert!(orchestrator.is_recording());
        assert_eq!(orchestrator.point_cloud().await.unwrap().len(), 200);

        orchestrator.restart_source().await.unwrap();
        assert_eq!(source.starts.load(Ordering::SeqCst), 2);
        assert!(source.last_config.lock().unwrap().unwrap().reset_reconstruction);
        assert_eq!(orchestrator.pending_recovery(), None);

        source.deliver(frame(0.2));
        let artifact = orchestrator.stop_recording().await.unwrap().wait().await.unwrap();
        assert_eq!(artifact.point_count, Some(300));
        assert_eq!(artifact.session, folder.name());
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_stop_capture() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, source) = orchestrator(dir.path(), true).await;
        orchestrator.start_recording().await.unwrap();

        source.deliver(frame(0.0));
        let mut short = frame(0.1);
        short.color.pixels.truncate(10);
        source.deliver(short);

        assert_eq!(orchestrator.point_cloud().await.unwrap().len(), 100);
        source.deliver(frame(0.2));
        let artifact = orchestrator.stop_recording().await.unwrap().wait().await.unwrap();
        assert_eq!(artifact.point_count, Some(200));
    }

    #[tokio::test]
    async fn test_fatal_source_failure_offers_no_restart() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, _source) = orchestrator(dir.path(), true).await;
        let action = orchestrator.on_frame_source_failure(FrameSourceError::new("No sensor").fatal());
        assert_eq!(action, None);
        assert_eq!(orchestrator.last_failure().unwrap().description, "No sensor");
    }

    #[tokio::test]
    async fn test_failed_export_is_retained_for_retry() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, source) = orchestrator(dir.path(), true).await;

        let folder = orchestrator.start_recording().await.unwrap();
        source.deliver(frame(0.0));
        orchestrator.point_cloud().await.unwrap();
        std::fs::remove_dir_all(folder.path()).unwrap();

        let result = orchestrator.stop_recording().await.unwrap().wait().await;
        assert!(matches!(result, Err(CaptureError::Io { .. })));
        assert_eq!(orchestrator.pending_retries(), 1);

        std::fs::create_dir_all(folder.path()).unwrap();
        let artifact = orchestrator.retry_export().unwrap().wait().await.unwrap();
        assert_eq!(artifact.point_count, Some(100));
        assert_eq!(orchestrator.pending_retries(), 0);
        assert!(orchestrator.retry_export().is_none());
    }

    /// Share target that panics while `armed` is set.
    struct PanickingShare {
        armed: AtomicBool,
    }

    impl ShareTarget for PanickingShare {
        fn present(&self, _artifact: &crate::export::ExportArtifact) -> anyhow::Result<()> {
            if self.armed.load(Ordering::SeqCst) {
                panic!("viewer crashed");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_panicking_export_keeps_session_for_retry() {
        let dir = TempDir::new().unwrap();
        let source = ManualSource::default();
        let share = Arc::new(PanickingShare {
            armed: AtomicBool::new(true),
        });
        let mut orchestrator = Orchestrator::new(
            OrchestratorSettings::new(dir.path()),
            Box::new(source.clone()),
            share.clone(),
            None,
        )
        .unwrap();
        let mut events = orchestrator.take_events().unwrap();
        orchestrator.start_source().await.unwrap();

        orchestrator.start_recording().await.unwrap();
        source.deliver(frame(0.0));
        let result = orchestrator.stop_recording().await.unwrap().wait().await;

        match result {
            Err(CaptureError::Background(message)) => assert!(message.contains("viewer crashed")),
            other => panic!("expected background error, got {other:?}"),
        }
        assert_eq!(orchestrator.pending_retries(), 1);
        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            saw_failure |= matches!(event, OrchestratorEvent::ExportFailed { .. });
        }
        assert!(saw_failure);

        share.armed.store(false, Ordering::SeqCst);
        let artifact = orchestrator.retry_export().unwrap().wait().await.unwrap();
        assert_eq!(artifact.point_count, Some(100));
        assert_eq!(orchestrator.pending_retries(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_exports_active_session() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, source) = orchestrator(dir.path(), true).await;
        orchestrator.start_recording().await.unwrap();
        source.deliver(frame(0.0));

        let artifact = orchestrator.shutdown().await.unwrap().unwrap();
        assert_eq!(artifact.point_count, Some(100));
        assert!(source.sink.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_synthetic_source_end_to_end() {
        use crate::frame::synthetic::SyntheticSettings;
        use crate::frame::SyntheticSource;

        let dir = TempDir::new().unwrap();
        let source = SyntheticSource::new(SyntheticSettings {
            width: 32,
            height: 24,
            fps: 120,
            fail_after_frames: None,
        });
        let mut orchestrator = Orchestrator::new(
            OrchestratorSettings::new(dir.path()),
            Box::new(source),
            Arc::new(NoShare),
            None,
        )
        .unwrap();
        orchestrator.start_source().await.unwrap();
        orchestrator.start_recording().await.unwrap();

        let mut status = orchestrator.status();
        status
            .wait_for(|s| s.frames_accumulated >= 3)
            .await
            .unwrap();

        let artifact = orchestrator.shutdown().await.unwrap().unwrap();
        assert!(artifact.point_count.unwrap() > 0);
        assert_eq!(
            read_ply_header(&artifact.path).unwrap().vertex_count,
            artifact.point_count.unwrap()
        );
    }
}

//! The frame-delivery thread.
//!
//! Owns the [`SessionRecorder`] outright. Commands arrive on a control
//! channel and are answered over oneshot channels; frames and source
//! failures arrive on the source channel. Nothing here touches the disk:
//! snapshot writes are handed to blocking workers.

use super::handle::{ArtifactPipeline, OrchestratorEvent};
use crate::error::Result;
use crate::frame::{Frame, SourceEvent};
use crate::recording::{
    CapturedSession, PointCloudSnapshot, RecorderState, SessionFolder, SessionRecorder,
    SnapshotController, SnapshotIndicator,
};
use crossbeam_channel::{select, Receiver};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};

/// Per-frame status for the render boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureStatus {
    pub state: RecorderState,
    pub session: Option<String>,
    pub point_count: usize,
    pub frames_seen: u64,
    pub frames_accumulated: u64,
    pub snapshot: SnapshotIndicator,
    /// Timestamp of the last frame received, recording or not
    pub last_timestamp: Option<f64>,
}

impl Default for CaptureStatus {
    fn default() -> Self {
        Self {
            state: RecorderState::Idle,
            session: None,
            point_count: 0,
            frames_seen: 0,
            frames_accumulated: 0,
            snapshot: SnapshotIndicator::Disarmed,
            last_timestamp: None,
        }
    }
}

pub(crate) enum Control {
    Start {
        folder: SessionFolder,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<Result<CapturedSession>>,
    },
    Points {
        reply: oneshot::Sender<PointCloudSnapshot>,
    },
    Shutdown,
}

pub(crate) struct CaptureLoop {
    pub recorder: SessionRecorder,
    pub snapshots: SnapshotController,
    /// Where stills go while no session is active; `None` disables them
    pub idle_folder: Option<SessionFolder>,
    pub snapshot_depth: bool,
    pub pipeline: ArtifactPipeline,
    pub runtime: Handle,
    pub status: watch::Sender<CaptureStatus>,
    pub last_timestamp: Option<f64>,
}

impl CaptureLoop {
    pub fn spawn(
        self,
        control: Receiver<Control>,
        events: Receiver<SourceEvent>,
    ) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("depthcap-capture".to_string())
            .spawn(move || self.run(control, events))
    }

    fn run(mut self, control: Receiver<Control>, events: Receiver<SourceEvent>) {
        tracing::debug!("Capture loop started");
        loop {
            select! {
                recv(control) -> msg => {
                    // frames queued before the command belong before it
                    self.drain(&events);
                    match msg {
                        Ok(Control::Shutdown) | Err(_) => break,
                        Ok(msg) => self.handle_control(msg),
                    }
                }
                recv(events) -> event => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => break,
                },
            }
        }
        tracing::debug!("Capture loop exited");
    }

    fn drain(&mut self, events: &Receiver<SourceEvent>) {
        while let Ok(event) = events.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Frame(frame) => self.on_frame(&frame),
            SourceEvent::Failed(error) => {
                tracing::warn!("Frame source failed: {}", error.message().replace('\n', " / "));
                self.pipeline.notify(OrchestratorEvent::SourceFailed(error));
            }
        }
    }

    fn handle_control(&mut self, msg: Control) {
        match msg {
            Control::Start { folder, reply } => {
                let result = self.recorder.start(folder);
                self.publish_status();
                let _ = reply.send(result);
            }
            Control::Stop { reply } => {
                let result = self.recorder.stop();
                if result.is_ok() && self.idle_folder.is_none() && self.snapshots.cancel() {
                    tracing::debug!("Pending snapshot dropped with the session");
                }
                self.publish_status();
                let _ = reply.send(result);
            }
            Control::Points { reply } => {
                let _ = reply.send(self.recorder.snapshot());
            }
            Control::Shutdown => {}
        }
    }

    fn on_frame(&mut self, frame: &Frame) {
        self.recorder.on_frame(frame);
        self.last_timestamp = Some(frame.timestamp);

        let in_session = self.recorder.is_recording();
        let folder = self.recorder.folder().or(self.idle_folder.as_ref());
        if let Some(folder) = folder {
            if let Some(capture) = self.snapshots.on_frame(frame, folder, in_session, self.snapshot_depth) {
                self.pipeline.spawn_snapshot(&self.runtime, capture);
            }
        }

        self.publish_status();
    }

    fn publish_status(&self) {
        self.status.send_replace(CaptureStatus {
            state: self.recorder.state(),
            session: self.recorder.folder().map(|f| f.name().to_string()),
            point_count: self.recorder.point_count(),
            frames_seen: self.recorder.frames_seen(),
            frames_accumulated: self.recorder.frames_accumulated(),
            snapshot: self.snapshots.indicator(),
            last_timestamp: self.last_timestamp,
        });
    }
}

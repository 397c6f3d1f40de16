//! The boundary between the sensor subsystem and the capture core.

use super::Frame;
use crate::error::{FrameSourceError, Result};
use crossbeam_channel::{SendError, Sender};

/// Configuration requested from a frame source when it is (re)started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceConfig {
    /// Deliver a depth channel with every frame
    pub depth: bool,
    /// Prefer temporally smoothed depth over raw per-frame depth
    pub smoothed_depth: bool,
    /// Drop any reconstruction/tracking state the source keeps internally
    pub reset_reconstruction: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            depth: true,
            smoothed_depth: true,
            reset_reconstruction: false,
        }
    }
}

/// What a source delivers: a frame, or a failure at any point in the stream.
#[derive(Debug)]
pub enum SourceEvent {
    Frame(Box<Frame>),
    Failed(FrameSourceError),
}

/// Sending half handed to a source on start.
///
/// Cloned into every run of the source so a restart keeps feeding the same
/// capture loop.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: Sender<SourceEvent>,
}

impl FrameSink {
    pub fn new(tx: Sender<SourceEvent>) -> Self {
        Self { tx }
    }

    /// Delivers a frame. Fails only when the capture loop has gone away.
    pub fn deliver(&self, frame: Frame) -> std::result::Result<(), SendError<SourceEvent>> {
        self.tx.send(SourceEvent::Frame(Box::new(frame)))
    }

    pub fn fail(&self, error: FrameSourceError) -> std::result::Result<(), SendError<SourceEvent>> {
        self.tx.send(SourceEvent::Failed(error))
    }
}

/// A producer of synchronized depth frames.
///
/// Implementations deliver frames from their own thread or callback context;
/// `start` must return promptly. After a failure the source may be started
/// again with the same configuration.
pub trait FrameSource: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Begins delivery into `sink`.
    fn start(&mut self, config: &SourceConfig, sink: FrameSink) -> Result<()>;

    /// Stops delivery. Safe to call when not started.
    fn stop(&mut self);
}

//! Point cloud recording for depthcap.
//!
//! Accumulates depth frames into a session's point buffer, captures one-shot
//! stills, and draws the live capture status in the terminal.

pub mod points;
pub mod session;
pub mod snapshot;
pub mod ui;

pub use points::{ColoredPoint, PointBuffer, PointCloudSnapshot};
pub use session::{CapturedSession, RecorderSettings, RecorderState, SessionFolder, SessionRecorder};
pub use snapshot::{DepthCapture, SnapshotCapture, SnapshotController, SnapshotIndicator};
pub use ui::{CaptureCommand, DepthcapTui};

//! One-shot still capture.
//!
//! The operator arms a snapshot from the interaction context; the next frame
//! to arrive on the frame thread consumes the request and copies the images
//! it needs. Arming is a single atomic flag, so neither side ever waits on
//! the other.

use super::session::SessionFolder;
use crate::frame::{CameraIntrinsics, ColorImage, ConfidenceMap, DepthMap, Frame, Pose};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Armed/disarmed indicator shown next to the snapshot control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotIndicator {
    Armed,
    Disarmed,
}

/// Shared snapshot request flag. Clones refer to the same flag.
#[derive(Debug, Clone, Default)]
pub struct SnapshotController {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    armed: AtomicBool,
    captured: AtomicU64,
}

impl SnapshotController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a capture for the next frame.
    ///
    /// Returns `false` without changing anything if a request is already
    /// pending, so at most one request exists at a time.
    pub fn request_snapshot(&self) -> bool {
        let armed = self
            .inner
            .armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if armed {
            tracing::debug!("Snapshot armed");
        } else {
            tracing::debug!("Snapshot already pending, request ignored");
        }
        armed
    }

    /// Consumes the pending request, if any. Called from the frame thread.
    pub fn take_request(&self) -> bool {
        let taken = self
            .inner
            .armed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if taken {
            self.inner.captured.fetch_add(1, Ordering::Relaxed);
        }
        taken
    }

    /// Drops a pending request without capturing.
    pub fn cancel(&self) -> bool {
        self.inner.armed.swap(false, Ordering::AcqRel)
    }

    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::Acquire)
    }

    pub fn indicator(&self) -> SnapshotIndicator {
        if self.is_armed() {
            SnapshotIndicator::Armed
        } else {
            SnapshotIndicator::Disarmed
        }
    }

    /// Number of requests consumed so far.
    pub fn captured_count(&self) -> u64 {
        self.inner.captured.load(Ordering::Relaxed)
    }

    /// Consumes a pending request against `frame`, copying what the still
    /// needs. Returns `None` when nothing was armed.
    ///
    /// `in_session` tells whether `folder` belongs to an active recording
    /// rather than the default snapshot folder.
    pub fn on_frame(
        &self,
        frame: &Frame,
        folder: &SessionFolder,
        in_session: bool,
        include_depth: bool,
    ) -> Option<SnapshotCapture> {
        if !self.take_request() {
            return None;
        }
        tracing::info!(
            "Snapshot captured at t={:.3}s into {}",
            frame.timestamp,
            folder.path().display()
        );
        Some(SnapshotCapture {
            folder: folder.clone(),
            color: frame.color.clone(),
            depth: include_depth.then(|| DepthCapture {
                depth: frame.depth.clone(),
                confidence: frame.confidence.clone(),
                pose: frame.pose,
                intrinsics: frame.intrinsics,
            }),
            timestamp: frame.timestamp,
            in_session,
        })
    }
}

/// Depth data captured alongside a still.
#[derive(Debug, Clone)]
pub struct DepthCapture {
    pub depth: DepthMap,
    pub confidence: ConfidenceMap,
    pub pose: Pose,
    pub intrinsics: CameraIntrinsics,
}

/// Everything needed to write one still, detached from the frame.
#[derive(Debug, Clone)]
pub struct SnapshotCapture {
    pub folder: SessionFolder,
    pub color: ColorImage,
    pub depth: Option<DepthCapture>,
    pub timestamp: f64,
    /// Whether the folder belongs to an active recording session
    pub in_session: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Confidence;
    use chrono::Local;
    use std::path::PathBuf;

    fn folder() -> SessionFolder {
        SessionFolder::existing(PathBuf::from("/nonexistent/snapshots"), Local::now())
    }

    #[test]
    fn test_second_request_is_ignored() {
        let controller = SnapshotController::new();
        assert!(controller.request_snapshot());
        assert!(!controller.request_snapshot());
        assert_eq!(controller.indicator(), SnapshotIndicator::Armed);
    }

    #[test]
    fn test_double_request_captures_once() {
        let controller = SnapshotController::new();
        controller.request_snapshot();
        controller.request_snapshot();

        let frame = Frame::uniform(4, 4, 1.0, Confidence::High, 0.5);
        let captures: Vec<_> = (0..5)
            .filter_map(|_| controller.on_frame(&frame, &folder(), false, false))
            .collect();

        assert_eq!(captures.len(), 1);
        assert_eq!(controller.captured_count(), 1);
        assert_eq!(controller.indicator(), SnapshotIndicator::Disarmed);
    }

    #[test]
    fn test_rearm_after_capture() {
        let controller = SnapshotController::new();
        let frame = Frame::uniform(2, 2, 1.0, Confidence::High, 0.0);
        controller.request_snapshot();
        assert!(controller.on_frame(&frame, &folder(), false, true).is_some());
        assert!(controller.request_snapshot());
        let capture = controller.on_frame(&frame, &folder(), false, true).unwrap();
        assert!(capture.depth.is_some());
        assert!(!capture.in_session);
    }

    #[test]
    fn test_concurrent_requests_arm_once() {
        let controller = SnapshotController::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = controller.clone();
                std::thread::spawn(move || c.request_snapshot())
            })
            .collect();
        let armed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&armed| armed)
            .count();
        assert_eq!(armed, 1);
    }

    #[test]
    fn test_cancel_disarms() {
        let controller = SnapshotController::new();
        controller.request_snapshot();
        assert!(controller.cancel());
        assert!(!controller.take_request());
    }
}

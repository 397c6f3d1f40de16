//! Recording sessions and the per-frame accumulation state machine.
//!
//! A session starts in a freshly created, timestamp-named folder and
//! accumulates world-space points from every frame until it is stopped. The
//! recorder itself never touches the disk: folder creation happens in
//! [`SessionFolder::create`] before the recorder is handed the folder, and
//! stopping yields the points as an owned [`CapturedSession`] for export.

use super::points::{ColoredPoint, PointBuffer, PointCloudSnapshot};
use crate::error::{CaptureError, Result};
use crate::frame::{Confidence, Frame};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

/// Timestamp format for session folder names: sortable, second resolution.
pub const FOLDER_NAME_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Raw per-frame inputs live under this path inside a session folder.
pub const RAW_INPUT_DIR: &str = "data/in";

/// An on-disk session folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFolder {
    name: String,
    path: PathBuf,
    started_at: DateTime<Local>,
}

impl SessionFolder {
    /// Folder name for a session started at `started_at`.
    pub fn name_for(started_at: &DateTime<Local>) -> String {
        started_at.format(FOLDER_NAME_FORMAT).to_string()
    }

    /// Creates `<root>/<timestamp>/data/in`.
    ///
    /// Blocking. Two sessions started within the same second would share a
    /// name; the second one fails with `DuplicateFolder` instead of writing
    /// into the first one's folder.
    pub fn create(root: &Path, started_at: DateTime<Local>) -> Result<Self> {
        let name = Self::name_for(&started_at);
        let path = root.join(&name);

        fs::create_dir_all(root).map_err(|e| CaptureError::io(root, e))?;
        match fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::warn!("Session folder already exists: {}", path.display());
                return Err(CaptureError::DuplicateFolder(path));
            }
            Err(e) => return Err(CaptureError::io(&path, e)),
        }

        let raw_dir = path.join(RAW_INPUT_DIR);
        fs::create_dir_all(&raw_dir).map_err(|e| CaptureError::io(&raw_dir, e))?;

        tracing::info!("Session folder created: {}", path.display());
        Ok(Self {
            name,
            path,
            started_at,
        })
    }

    /// Refers to an existing folder, e.g. the default snapshot folder.
    pub fn existing(path: PathBuf, started_at: DateTime<Local>) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            name,
            path,
            started_at,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn raw_input_dir(&self) -> PathBuf {
        self.path.join(RAW_INPUT_DIR)
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }
}

/// Which depth samples become points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecorderSettings {
    /// Samples below this confidence are discarded
    pub min_confidence: Confidence,
    /// Use every n-th pixel in both directions; 1 keeps every pixel
    pub sample_stride: u32,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            min_confidence: Confidence::Medium,
            sample_stride: 1,
        }
    }
}

/// Recorder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

/// A finished session: its folder and the points it accumulated.
///
/// Owned by whoever exports it; nothing else holds a reference to these
/// points.
#[derive(Debug, Clone)]
pub struct CapturedSession {
    pub folder: SessionFolder,
    pub points: PointCloudSnapshot,
    pub frames_seen: u64,
    pub frames_accumulated: u64,
}

struct ActiveSession {
    folder: SessionFolder,
    frames_seen: u64,
    frames_accumulated: u64,
}

/// The Idle/Recording state machine that owns the point buffer.
pub struct SessionRecorder {
    settings: RecorderSettings,
    active: Option<ActiveSession>,
    points: PointBuffer,
}

impl SessionRecorder {
    pub fn new(settings: RecorderSettings) -> Self {
        Self {
            settings,
            active: None,
            points: PointBuffer::new(),
        }
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn state(&self) -> RecorderState {
        if self.active.is_some() {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn folder(&self) -> Option<&SessionFolder> {
        self.active.as_ref().map(|s| &s.folder)
    }

    /// Idle → Recording in `folder`, which must already exist on disk.
    pub fn start(&mut self, folder: SessionFolder) -> Result<()> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        tracing::info!("Recording started: {}", folder.name());
        self.points.clear();
        self.active = Some(ActiveSession {
            folder,
            frames_seen: 0,
            frames_accumulated: 0,
        });
        Ok(())
    }

    /// Appends the frame's qualifying depth samples as world-space points.
    ///
    /// Returns how many points were added; always 0 while idle.
    pub fn on_frame(&mut self, frame: &Frame) -> usize {
        let Some(active) = self.active.as_mut() else {
            return 0;
        };

        let expected = estimate_points(frame, &self.settings);
        let scratch = self.points.begin_frame();
        scratch.reserve(expected);
        unproject_into(frame, &self.settings, scratch);
        let added = self.points.commit_frame();

        active.frames_seen += 1;
        if added > 0 {
            active.frames_accumulated += 1;
        }
        added
    }

    /// Recording → Idle, handing back the accumulated points.
    ///
    /// The state changes before the buffer is moved out, so no frame can be
    /// appended to a session that is being exported.
    pub fn stop(&mut self) -> Result<CapturedSession> {
        let active = self.active.take().ok_or(CaptureError::NotRecording)?;
        let points = self.points.take();

        tracing::info!(
            "Recording stopped: {} ({} points from {} of {} frames)",
            active.folder.name(),
            points.len(),
            active.frames_accumulated,
            active.frames_seen
        );

        Ok(CapturedSession {
            folder: active.folder,
            points,
            frames_seen: active.frames_seen,
            frames_accumulated: active.frames_accumulated,
        })
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn frames_seen(&self) -> u64 {
        self.active.as_ref().map(|s| s.frames_seen).unwrap_or(0)
    }

    pub fn frames_accumulated(&self) -> u64 {
        self.active.as_ref().map(|s| s.frames_accumulated).unwrap_or(0)
    }

    /// Read-only view of the points accumulated so far.
    pub fn snapshot(&self) -> PointCloudSnapshot {
        self.points.snapshot()
    }
}

/// Number of points `frame` will contribute under `settings`.
#[cfg(test)]
fn expected_point_count(frame: &Frame, settings: &RecorderSettings) -> usize {
    if layout_problem(frame).is_some() {
        return 0;
    }
    let stride = settings.sample_stride.max(1);
    let width = frame.depth.width;
    let mut count = 0;
    for v in (0..frame.depth.height).step_by(stride as usize) {
        for u in (0..width).step_by(stride as usize) {
            let i = (v * width + u) as usize;
            if frame.confidence.values[i] >= settings.min_confidence
                && is_valid_depth(frame.depth.values[i])
            {
                count += 1;
            }
        }
    }
    count
}

fn estimate_points(frame: &Frame, settings: &RecorderSettings) -> usize {
    let stride = settings.sample_stride.max(1) as usize;
    (frame.depth.values.len() / (stride * stride)).max(1)
}

fn is_valid_depth(meters: f32) -> bool {
    meters.is_finite() && meters > 0.0
}

/// Why the frame's buffers cannot be indexed by their declared sizes, if
/// they cannot.
fn layout_problem(frame: &Frame) -> Option<String> {
    let depth = &frame.depth;
    let confidence = &frame.confidence;
    let color = &frame.color;
    let pixels = |w: u32, h: u32| w as usize * h as usize;

    if confidence.width != depth.width || confidence.height != depth.height {
        return Some(format!(
            "confidence map {}x{} does not match depth map {}x{}",
            confidence.width, confidence.height, depth.width, depth.height
        ));
    }
    if depth.values.len() != pixels(depth.width, depth.height) {
        return Some(format!(
            "depth map {}x{} holds {} values",
            depth.width,
            depth.height,
            depth.values.len()
        ));
    }
    if confidence.values.len() != pixels(confidence.width, confidence.height) {
        return Some(format!(
            "confidence map {}x{} holds {} values",
            confidence.width,
            confidence.height,
            confidence.values.len()
        ));
    }
    if color.pixels.len() != pixels(color.width, color.height) {
        return Some(format!(
            "color image {}x{} holds {} pixels",
            color.width,
            color.height,
            color.pixels.len()
        ));
    }
    None
}

/// Projects every qualifying depth sample through the intrinsics and pose.
fn unproject_into(frame: &Frame, settings: &RecorderSettings, out: &mut Vec<ColoredPoint>) {
    let depth = &frame.depth;
    let k = &frame.intrinsics;
    let stride = settings.sample_stride.max(1) as usize;

    if depth.width == 0 || depth.height == 0 {
        return;
    }
    if let Some(problem) = layout_problem(frame) {
        tracing::warn!("Malformed frame at {:.3}s, skipping: {}", frame.timestamp, problem);
        return;
    }

    let color = &frame.color;
    let scale_x = color.width as f32 / depth.width as f32;
    let scale_y = color.height as f32 / depth.height as f32;
    let has_color = color.width > 0 && color.height > 0;

    for v in (0..depth.height).step_by(stride) {
        let row = (v * depth.width) as usize;
        for u in (0..depth.width).step_by(stride) {
            let i = row + u as usize;
            if frame.confidence.values[i] < settings.min_confidence {
                continue;
            }
            let z = depth.values[i];
            if !is_valid_depth(z) {
                continue;
            }

            let camera = [
                (u as f32 + 0.5 - k.cx) / k.fx * z,
                (v as f32 + 0.5 - k.cy) / k.fy * z,
                z,
            ];
            let rgb = if has_color {
                let cx = (((u as f32 + 0.5) * scale_x) as u32).min(color.width - 1);
                let cy = (((v as f32 + 0.5) * scale_y) as u32).min(color.height - 1);
                color.get(cx, cy)
            } else {
                [255, 255, 255]
            };

            out.push(ColoredPoint {
                position: frame.pose.transform_point(camera),
                color: rgb,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{synthetic::render_frame, ColorImage, ConfidenceMap, Pose};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    /// 10x10 frame where exactly `valid` pixels are at medium confidence or better.
    fn frame_with_valid(valid: usize, timestamp: f64) -> Frame {
        let mut frame = Frame::uniform(10, 10, 1.5, Confidence::Low, timestamp);
        for c in frame.confidence.values.iter_mut().take(valid) {
            *c = Confidence::High;
        }
        frame
    }

    fn recording(dir: &TempDir) -> SessionRecorder {
        let mut recorder = SessionRecorder::new(RecorderSettings::default());
        let folder = SessionFolder::create(dir.path(), t0()).unwrap();
        recorder.start(folder).unwrap();
        recorder
    }

    #[test]
    fn test_folder_name_is_sortable_timestamp() {
        assert_eq!(SessionFolder::name_for(&t0()), "20240309-140507");
    }

    #[test]
    fn test_create_builds_raw_input_dir() {
        let dir = TempDir::new().unwrap();
        let folder = SessionFolder::create(dir.path(), t0()).unwrap();
        assert_eq!(folder.name(), "20240309-140507");
        assert!(folder.path().join("data").join("in").is_dir());
    }

    #[test]
    fn test_same_second_start_is_rejected() {
        let dir = TempDir::new().unwrap();
        SessionFolder::create(dir.path(), t0()).unwrap();
        match SessionFolder::create(dir.path(), t0()) {
            Err(CaptureError::DuplicateFolder(path)) => {
                assert!(path.ends_with("20240309-140507"))
            }
            other => panic!("expected DuplicateFolder, got {other:?}"),
        }
    }

    #[test]
    fn test_frames_while_idle_are_ignored() {
        let mut recorder = SessionRecorder::new(RecorderSettings::default());
        for i in 0..5 {
            assert_eq!(recorder.on_frame(&frame_with_valid(100, i as f64)), 0);
        }
        assert_eq!(recorder.point_count(), 0);
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[test]
    fn test_start_twice_fails() {
        let dir = TempDir::new().unwrap();
        let mut recorder = recording(&dir);
        let other = SessionFolder::existing(dir.path().join("other"), t0());
        assert!(matches!(
            recorder.start(other),
            Err(CaptureError::AlreadyRecording)
        ));
        assert_eq!(recorder.folder().unwrap().name(), "20240309-140507");
    }

    #[test]
    fn test_stop_while_idle_fails_without_state_change() {
        let mut recorder = SessionRecorder::new(RecorderSettings::default());
        assert!(matches!(recorder.stop(), Err(CaptureError::NotRecording)));
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[test]
    fn test_three_frames_of_hundred_points() {
        let dir = TempDir::new().unwrap();
        let mut recorder = recording(&dir);
        for i in 0..3 {
            assert_eq!(recorder.on_frame(&frame_with_valid(100, i as f64)), 100);
        }
        let captured = recorder.stop().unwrap();
        assert_eq!(captured.points.len(), 300);
        assert_eq!(captured.frames_seen, 3);
        assert_eq!(captured.folder.name(), "20240309-140507");
        assert_eq!(recorder.point_count(), 0);
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[test]
    fn test_point_count_matches_confidence_filter() {
        let dir = TempDir::new().unwrap();
        let mut recorder = recording(&dir);
        let mut expected = 0;
        for i in 0..4 {
            let frame = render_frame(i * 5, 40, 30, 30);
            expected += frame.confidence.count_at_least(Confidence::Medium);
            assert_eq!(
                expected_point_count(&frame, recorder.settings()),
                frame.confidence.count_at_least(Confidence::Medium)
            );
            recorder.on_frame(&frame);
        }
        assert_eq!(recorder.stop().unwrap().points.len(), expected);
    }

    #[test]
    fn test_invalid_depth_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut recorder = recording(&dir);
        let mut frame = Frame::uniform(4, 1, 2.0, Confidence::High, 0.0);
        frame.depth.values[1] = f32::NAN;
        frame.depth.values[2] = 0.0;
        assert_eq!(recorder.on_frame(&frame), 2);
    }

    #[test]
    fn test_unprojection_uses_pose_and_color() {
        let dir = TempDir::new().unwrap();
        let mut recorder = recording(&dir);
        let mut frame = Frame::uniform(1, 1, 2.0, Confidence::High, 0.0);
        frame.intrinsics = crate::frame::CameraIntrinsics {
            fx: 1.0,
            fy: 1.0,
            cx: 0.5,
            cy: 0.5,
        };
        frame.pose = Pose::from_translation([1.0, 0.0, 0.0]);
        frame.color = ColorImage::filled(2, 2, [10, 20, 30]);
        recorder.on_frame(&frame);

        let captured = recorder.stop().unwrap();
        let point = captured.points.iter().next().unwrap();
        assert_eq!(point.position, [1.0, 0.0, 2.0]);
        assert_eq!(point.color, [10, 20, 30]);
    }

    #[test]
    fn test_stride_subsamples_grid() {
        let dir = TempDir::new().unwrap();
        let mut recorder = SessionRecorder::new(RecorderSettings {
            sample_stride: 2,
            ..RecorderSettings::default()
        });
        recorder
            .start(SessionFolder::create(dir.path(), t0()).unwrap())
            .unwrap();
        let frame = frame_with_valid(100, 0.0);
        assert_eq!(recorder.on_frame(&frame), 25);
    }

    #[test]
    fn test_mismatched_confidence_map_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut recorder = recording(&dir);
        let mut frame = Frame::uniform(4, 4, 1.0, Confidence::High, 0.0);
        frame.confidence = ConfidenceMap::filled(2, 2, Confidence::High);
        assert_eq!(recorder.on_frame(&frame), 0);
    }

    #[test]
    fn test_short_buffers_are_skipped_and_session_survives() {
        let dir = TempDir::new().unwrap();
        let mut recorder = recording(&dir);
        assert_eq!(recorder.on_frame(&frame_with_valid(100, 0.0)), 100);

        let mut short_color = frame_with_valid(100, 0.1);
        short_color.color.pixels.truncate(10);
        assert_eq!(recorder.on_frame(&short_color), 0);

        let mut short_depth = frame_with_valid(100, 0.2);
        short_depth.depth.values.truncate(50);
        assert_eq!(recorder.on_frame(&short_depth), 0);
        assert_eq!(expected_point_count(&short_depth, recorder.settings()), 0);

        let mut short_confidence = frame_with_valid(100, 0.3);
        short_confidence.confidence.values.pop();
        assert_eq!(recorder.on_frame(&short_confidence), 0);

        assert_eq!(recorder.on_frame(&frame_with_valid(100, 0.4)), 100);
        let captured = recorder.stop().unwrap();
        assert_eq!(captured.points.len(), 200);
        assert_eq!(captured.frames_seen, 5);
        assert_eq!(captured.frames_accumulated, 2);
    }
}

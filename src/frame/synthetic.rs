//! Deterministic frame source that ray-casts a small scene.
//!
//! The camera orbits a sphere placed in the middle of a box-shaped room.
//! Sphere hits are high confidence, nearby walls medium, far walls low, which
//! gives the confidence filter something real to do. Useful without sensor
//! hardware and in tests.

use super::source::{FrameSink, FrameSource, SourceConfig};
use super::{CameraIntrinsics, ColorImage, Confidence, ConfidenceMap, DepthMap, Frame, Pose};
use crate::error::{FrameSourceError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SPHERE_RADIUS: f32 = 0.6;
const ROOM_HALF_EXTENT: f32 = 3.0;
const ORBIT_RADIUS: f32 = 2.0;
const ORBIT_SECONDS: f64 = 12.0;
const MEDIUM_CONFIDENCE_RANGE: f32 = 4.0;
const COLOR_SCALE: u32 = 2;

/// Settings for the synthetic scene.
#[derive(Debug, Clone)]
pub struct SyntheticSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Report a recoverable failure once, after this many frames
    pub fail_after_frames: Option<u64>,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            width: 256,
            height: 192,
            fps: 30,
            fail_after_frames: None,
        }
    }
}

/// Ray-cast frame source running on its own thread.
pub struct SyntheticSource {
    settings: SyntheticSettings,
    running: Option<Running>,
    /// Frame counter shared across restarts so time keeps moving forward
    frame_index: Arc<AtomicU64>,
    failure_reported: Arc<AtomicBool>,
}

struct Running {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl SyntheticSource {
    pub fn new(settings: SyntheticSettings) -> Self {
        Self {
            settings,
            running: None,
            frame_index: Arc::new(AtomicU64::new(0)),
            failure_reported: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn settings(&self) -> &SyntheticSettings {
        &self.settings
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn start(&mut self, config: &SourceConfig, sink: FrameSink) -> Result<()> {
        self.stop();

        if !config.depth {
            return Err(FrameSourceError::new("Depth channel was not requested")
                .with_reason("The synthetic source only produces depth frames")
                .fatal()
                .into());
        }

        if config.reset_reconstruction {
            tracing::debug!("Synthetic source has no reconstruction state to reset");
        }

        let stop = Arc::new(AtomicBool::new(false));
        let settings = self.settings.clone();
        let frame_index = Arc::clone(&self.frame_index);
        let failure_reported = Arc::clone(&self.failure_reported);
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("synthetic-source".to_string())
            .spawn(move || {
                run_source(settings, sink, stop_flag, frame_index, failure_reported)
            })
            .map_err(spawn_failed)?;

        tracing::info!(
            "Synthetic source started: {}x{} @ {} fps",
            self.settings.width,
            self.settings.height,
            self.settings.fps
        );
        self.running = Some(Running { stop, handle });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop.store(true, Ordering::SeqCst);
            if running.handle.join().is_err() {
                tracing::error!("Synthetic source thread panicked");
            }
            tracing::debug!("Synthetic source stopped");
        }
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_failed(e: std::io::Error) -> crate::error::CaptureError {
    FrameSourceError::new("Could not start the frame thread")
        .with_reason(e.to_string())
        .into()
}

fn run_source(
    settings: SyntheticSettings,
    sink: FrameSink,
    stop: Arc<AtomicBool>,
    frame_index: Arc<AtomicU64>,
    failure_reported: Arc<AtomicBool>,
) {
    let interval = Duration::from_secs_f64(1.0 / settings.fps.max(1) as f64);
    let mut next_tick = Instant::now();
    let mut delivered_this_run = 0u64;

    while !stop.load(Ordering::SeqCst) {
        if let Some(limit) = settings.fail_after_frames {
            if delivered_this_run >= limit && !failure_reported.swap(true, Ordering::SeqCst) {
                tracing::warn!("Synthetic source injecting failure after {} frames", limit);
                let _ = sink.fail(
                    FrameSourceError::new("The sensor session was interrupted")
                        .with_reason("Tracking was lost")
                        .with_suggestion("Restart the session to resume capture"),
                );
                return;
            }
        }

        let index = frame_index.fetch_add(1, Ordering::SeqCst);
        let frame = render_frame(index, settings.width, settings.height, settings.fps);
        if sink.deliver(frame).is_err() {
            tracing::debug!("Capture loop closed, synthetic source exiting");
            return;
        }
        delivered_this_run += 1;

        next_tick += interval;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }
}

/// Renders frame number `index` of the orbit.
pub fn render_frame(index: u64, width: u32, height: u32, fps: u32) -> Frame {
    let timestamp = index as f64 / fps.max(1) as f64;
    let angle = (timestamp / ORBIT_SECONDS * std::f64::consts::TAU) as f32;
    let eye = [
        ORBIT_RADIUS * angle.sin(),
        -0.4,
        -ORBIT_RADIUS * angle.cos(),
    ];
    let pose = Pose::look_at(eye, [0.0, 0.0, 0.0]);
    let intrinsics = CameraIntrinsics::from_fov(width, height, 65.0);

    let pixel_count = (width * height) as usize;
    let mut depth = Vec::with_capacity(pixel_count);
    let mut confidence = Vec::with_capacity(pixel_count);
    let mut colors = Vec::with_capacity(pixel_count);

    for v in 0..height {
        for u in 0..width {
            let dir_cam = [
                (u as f32 + 0.5 - intrinsics.cx) / intrinsics.fx,
                (v as f32 + 0.5 - intrinsics.cy) / intrinsics.fy,
                1.0,
            ];
            let origin = pose.translation;
            let dir = rotate(&pose, dir_cam);

            let (t, conf, color) = match hit_sphere(origin, dir) {
                Some(t) => {
                    let p = along(origin, dir, t);
                    let shade = |c: f32| ((c / SPHERE_RADIUS * 0.5 + 0.5) * 255.0) as u8;
                    (t, Confidence::High, [shade(p[0]), shade(p[1]), shade(p[2])])
                }
                None => {
                    let t = hit_room(origin, dir);
                    let p = along(origin, dir, t);
                    let checker =
                        ((p[0].floor() + p[1].floor() + p[2].floor()) as i32).rem_euclid(2) == 0;
                    let color = if checker { [210, 200, 180] } else { [90, 110, 140] };
                    let conf = if t <= MEDIUM_CONFIDENCE_RANGE {
                        Confidence::Medium
                    } else {
                        Confidence::Low
                    };
                    (t, conf, color)
                }
            };

            // dir_cam has z = 1, so the ray parameter is the camera-space depth
            depth.push(t);
            confidence.push(conf);
            colors.push(color);
        }
    }

    let color_width = width * COLOR_SCALE;
    let color_height = height * COLOR_SCALE;
    let mut color_pixels = Vec::with_capacity((color_width * color_height) as usize);
    for y in 0..color_height {
        for x in 0..color_width {
            color_pixels.push(colors[((y / COLOR_SCALE) * width + x / COLOR_SCALE) as usize]);
        }
    }

    Frame {
        color: ColorImage::new(color_width, color_height, color_pixels),
        depth: DepthMap::new(width, height, depth),
        confidence: ConfidenceMap::new(width, height, confidence),
        pose,
        intrinsics,
        timestamp,
    }
}

fn rotate(pose: &Pose, d: [f32; 3]) -> [f32; 3] {
    let r = &pose.rotation;
    [
        r[0][0] * d[0] + r[0][1] * d[1] + r[0][2] * d[2],
        r[1][0] * d[0] + r[1][1] * d[1] + r[1][2] * d[2],
        r[2][0] * d[0] + r[2][1] * d[1] + r[2][2] * d[2],
    ]
}

fn along(o: [f32; 3], d: [f32; 3], t: f32) -> [f32; 3] {
    [o[0] + d[0] * t, o[1] + d[1] * t, o[2] + d[2] * t]
}

fn hit_sphere(o: [f32; 3], d: [f32; 3]) -> Option<f32> {
    let a = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
    let b = 2.0 * (o[0] * d[0] + o[1] * d[1] + o[2] * d[2]);
    let c = o[0] * o[0] + o[1] * o[1] + o[2] * o[2] - SPHERE_RADIUS * SPHERE_RADIUS;
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return None;
    }
    let t = (-b - disc.sqrt()) / (2.0 * a);
    (t > 0.0).then_some(t)
}

/// Distance to the room wall; the camera is always inside the room.
fn hit_room(o: [f32; 3], d: [f32; 3]) -> f32 {
    (0..3)
        .filter(|&axis| d[axis].abs() > 1e-6)
        .map(|axis| {
            let wall = ROOM_HALF_EXTENT.copysign(d[axis]);
            (wall - o[axis]) / d[axis]
        })
        .fold(f32::INFINITY, f32::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SourceEvent;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_render_frame_dimensions() {
        let frame = render_frame(0, 32, 24, 30);
        assert_eq!(frame.depth.values.len(), 32 * 24);
        assert_eq!(frame.confidence.values.len(), 32 * 24);
        assert_eq!(frame.color.width, 64);
        assert_eq!(frame.color.height, 48);
        assert!(frame.depth.values.iter().all(|d| d.is_finite() && *d > 0.0));
    }

    #[test]
    fn test_center_pixel_hits_sphere() {
        let frame = render_frame(0, 33, 25, 30);
        let center = (12 * 33 + 16) as usize;
        assert_eq!(frame.confidence.values[center], Confidence::High);
        let expected = ORBIT_RADIUS.hypot(0.4) - SPHERE_RADIUS;
        assert!((frame.depth.values[center] - expected).abs() < 0.05);
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render_frame(7, 16, 12, 30);
        let b = render_frame(7, 16, 12, 30);
        assert_eq!(a.depth, b.depth);
        assert_eq!(a.color, b.color);
    }

    #[test]
    fn test_injected_failure_is_reported_once() {
        let (tx, rx) = unbounded();
        let mut source = SyntheticSource::new(SyntheticSettings {
            width: 8,
            height: 6,
            fps: 240,
            fail_after_frames: Some(2),
        });
        source
            .start(&SourceConfig::default(), FrameSink::new(tx.clone()))
            .unwrap();

        let mut frames = 0;
        loop {
            match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
                SourceEvent::Frame(_) => frames += 1,
                SourceEvent::Failed(err) => {
                    assert!(err.recoverable);
                    break;
                }
            }
        }
        assert_eq!(frames, 2);

        // a restart keeps producing frames and does not fail again
        source
            .start(&SourceConfig::default(), FrameSink::new(tx))
            .unwrap();
        for _ in 0..4 {
            match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
                SourceEvent::Frame(frame) => assert!(frame.timestamp > 0.0),
                SourceEvent::Failed(err) => panic!("unexpected failure: {err}"),
            }
        }
        source.stop();
    }

    #[test]
    fn test_depth_disabled_is_rejected() {
        let (tx, _rx) = unbounded();
        let mut source = SyntheticSource::new(SyntheticSettings::default());
        let config = SourceConfig {
            depth: false,
            ..SourceConfig::default()
        };
        assert!(source.start(&config, FrameSink::new(tx)).is_err());
    }
}

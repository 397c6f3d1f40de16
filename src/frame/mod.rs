//! Frame types and the frame-source boundary.
//!
//! A frame is one synchronized sample from the depth sensor: a color image,
//! a depth map, a per-pixel confidence map, and the camera pose and
//! intrinsics at capture time. Frames are produced by a [`FrameSource`] and
//! are read-only to everything downstream.

pub mod source;
pub mod synthetic;

use serde::{Deserialize, Serialize};

pub use source::{FrameSink, FrameSource, SourceConfig, SourceEvent};
pub use synthetic::SyntheticSource;

/// Per-pixel reliability of a depth measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Confidence {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Packed 8-bit RGB image, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 3]>,
}

impl ColorImage {
    pub fn new(width: u32, height: u32, pixels: Vec<[u8; 3]>) -> Self {
        debug_assert_eq!(pixels.len(), (width * height) as usize);
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self::new(width, height, vec![color; (width * height) as usize])
    }

    pub fn get(&self, x: u32, y: u32) -> [u8; 3] {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Flattens to interleaved RGB bytes for encoders.
    pub fn as_rgb_bytes(&self) -> Vec<u8> {
        self.pixels.iter().flatten().copied().collect()
    }
}

/// Depth in meters per pixel. Non-finite or non-positive values mean "no
/// measurement".
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f32>,
}

impl DepthMap {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), (width * height) as usize);
        Self {
            width,
            height,
            values,
        }
    }

    pub fn filled(width: u32, height: u32, meters: f32) -> Self {
        Self::new(width, height, vec![meters; (width * height) as usize])
    }
}

/// Confidence classification per depth pixel; same dimensions as the depth map.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceMap {
    pub width: u32,
    pub height: u32,
    pub values: Vec<Confidence>,
}

impl ConfidenceMap {
    pub fn new(width: u32, height: u32, values: Vec<Confidence>) -> Self {
        debug_assert_eq!(values.len(), (width * height) as usize);
        Self {
            width,
            height,
            values,
        }
    }

    pub fn filled(width: u32, height: u32, confidence: Confidence) -> Self {
        Self::new(width, height, vec![confidence; (width * height) as usize])
    }

    /// Number of pixels at or above `min`.
    pub fn count_at_least(&self, min: Confidence) -> usize {
        self.values.iter().filter(|&&c| c >= min).count()
    }
}

/// Pinhole intrinsics expressed at depth-map resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraIntrinsics {
    /// Intrinsics for a centered principal point and the given horizontal
    /// field of view.
    pub fn from_fov(width: u32, height: u32, horizontal_fov_deg: f32) -> Self {
        let focal = (width as f32 / 2.0) / (horizontal_fov_deg.to_radians() / 2.0).tan();
        Self {
            fx: focal,
            fy: focal,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
        }
    }
}

/// Rigid camera-to-world transform: `world = rotation * camera + translation`.
///
/// Camera space follows the usual computer-vision convention: +x right,
/// +y down, +z forward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Row-major 3x3 rotation
    pub rotation: [[f32; 3]; 3],
    pub translation: [f32; 3],
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        translation: [0.0, 0.0, 0.0],
    };

    pub fn from_translation(translation: [f32; 3]) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// Camera at `eye` looking at `target`, keeping world +y pointing down
    /// in the image.
    pub fn look_at(eye: [f32; 3], target: [f32; 3]) -> Self {
        let forward = normalize(sub(target, eye));
        let mut right = cross([0.0, 1.0, 0.0], forward);
        if dot(right, right) < 1e-12 {
            right = [1.0, 0.0, 0.0];
        }
        let right = normalize(right);
        let down = cross(forward, right);
        // columns are the camera axes in world space
        Self {
            rotation: [
                [right[0], down[0], forward[0]],
                [right[1], down[1], forward[1]],
                [right[2], down[2], forward[2]],
            ],
            translation: eye,
        }
    }

    pub fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let r = &self.rotation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + self.translation[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + self.translation[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + self.translation[2],
        ]
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = dot(v, v).sqrt();
    if len == 0.0 {
        v
    } else {
        [v[0] / len, v[1] / len, v[2] / len]
    }
}

/// One synchronized sensor sample.
#[derive(Debug, Clone)]
pub struct Frame {
    pub color: ColorImage,
    pub depth: DepthMap,
    pub confidence: ConfidenceMap,
    pub pose: Pose,
    pub intrinsics: CameraIntrinsics,
    /// Seconds since the source started
    pub timestamp: f64,
}

impl Frame {
    /// Uniform frame: every depth pixel at `meters` with the same confidence.
    pub fn uniform(
        width: u32,
        height: u32,
        meters: f32,
        confidence: Confidence,
        timestamp: f64,
    ) -> Self {
        Self {
            color: ColorImage::filled(width, height, [128, 128, 128]),
            depth: DepthMap::filled(width, height, meters),
            confidence: ConfidenceMap::filled(width, height, confidence),
            pose: Pose::IDENTITY,
            intrinsics: CameraIntrinsics::from_fov(width, height, 60.0),
            timestamp,
        }
    }
}

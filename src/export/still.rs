//! Still image encoding for snapshots.

use crate::error::{CaptureError, Result};
use crate::frame::{CameraIntrinsics, ColorImage, Confidence, ConfidenceMap, DepthMap, Pose};
use image::codecs::png::PngEncoder;
use image::{ImageBuffer, Luma, Rgb};
use serde::{Deserialize, Serialize};
use std::io::Write;

fn encode_error(e: image::ImageError) -> CaptureError {
    CaptureError::Encode(e.to_string())
}

/// Encodes an RGB color image as PNG.
pub fn write_color_png<W: Write>(out: W, image: &ColorImage) -> Result<()> {
    let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_raw(image.width, image.height, image.as_rgb_bytes())
            .ok_or_else(|| CaptureError::Encode("color buffer size mismatch".to_string()))?;
    buffer
        .write_with_encoder(PngEncoder::new(out))
        .map_err(encode_error)
}

/// Encodes a depth map as 16-bit grayscale PNG in millimeters.
///
/// Missing measurements become 0; depths beyond ~65 m saturate.
pub fn write_depth_png<W: Write>(out: W, depth: &DepthMap) -> Result<()> {
    let millimeters: Vec<u16> = depth
        .values
        .iter()
        .map(|&m| {
            if m.is_finite() && m > 0.0 {
                (m * 1000.0).round().min(u16::MAX as f32) as u16
            } else {
                0
            }
        })
        .collect();
    let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_raw(depth.width, depth.height, millimeters)
            .ok_or_else(|| CaptureError::Encode("depth buffer size mismatch".to_string()))?;
    buffer
        .write_with_encoder(PngEncoder::new(out))
        .map_err(encode_error)
}

/// Encodes a confidence map as 8-bit grayscale PNG (low 0, medium 127, high 255).
pub fn write_confidence_png<W: Write>(out: W, confidence: &ConfidenceMap) -> Result<()> {
    let levels: Vec<u8> = confidence
        .values
        .iter()
        .map(|c| match c {
            Confidence::Low => 0,
            Confidence::Medium => 127,
            Confidence::High => 255,
        })
        .collect();
    let buffer: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_raw(confidence.width, confidence.height, levels)
            .ok_or_else(|| CaptureError::Encode("confidence buffer size mismatch".to_string()))?;
    buffer
        .write_with_encoder(PngEncoder::new(out))
        .map_err(encode_error)
}

/// Camera metadata written next to a depth snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSidecar {
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    pub depth_unit: String,
    pub pose: Pose,
    pub intrinsics: CameraIntrinsics,
    pub depth_file: String,
    pub confidence_file: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_png_decodes_to_same_pixels() {
        let image = ColorImage::new(2, 1, vec![[255, 0, 0], [0, 0, 255]]);
        let mut bytes = Vec::new();
        write_color_png(&mut bytes, &image).unwrap();

        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (2, 1));
        assert_eq!(decoded.get_pixel(1, 0).0, [0, 0, 255]);
    }

    #[test]
    fn test_depth_png_is_millimeters() {
        let depth = DepthMap::new(3, 1, vec![1.5, f32::NAN, 100.0]);
        let mut bytes = Vec::new();
        write_depth_png(&mut bytes, &depth).unwrap();

        let decoded = image::load_from_memory(&bytes).unwrap().to_luma16();
        assert_eq!(decoded.get_pixel(0, 0).0, [1500]);
        assert_eq!(decoded.get_pixel(1, 0).0, [0]);
        assert_eq!(decoded.get_pixel(2, 0).0, [u16::MAX]);
    }

    #[test]
    fn test_mismatched_color_buffer_is_an_encode_error() {
        let image = ColorImage {
            width: 4,
            height: 4,
            pixels: vec![[0, 0, 0]; 3],
        };
        let result = write_color_png(Vec::new(), &image);
        assert!(matches!(result, Err(CaptureError::Encode(_))));
    }
}

//! Accumulated point storage.
//!
//! Points arrive one frame at a time. Each frame's points are collected in a
//! reusable scratch vector and then frozen into an immutable chunk, so taking
//! a read-only snapshot for the renderer is a clone of a few `Arc`s rather
//! than a copy of every point.

use std::sync::Arc;

/// A world-space point with its sampled color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColoredPoint {
    pub position: [f32; 3],
    pub color: [u8; 3],
}

/// Growable point storage made of frozen per-frame chunks.
#[derive(Debug, Default)]
pub struct PointBuffer {
    chunks: Vec<Arc<[ColoredPoint]>>,
    len: usize,
    scratch: Vec<ColoredPoint>,
}

impl PointBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scratch vector for the frame being built; cleared on each call.
    pub(crate) fn begin_frame(&mut self) -> &mut Vec<ColoredPoint> {
        self.scratch.clear();
        &mut self.scratch
    }

    /// Freezes the scratch contents into a chunk. Empty frames add nothing.
    pub(crate) fn commit_frame(&mut self) -> usize {
        let added = self.scratch.len();
        if added > 0 {
            self.chunks.push(Arc::from(self.scratch.as_slice()));
            self.len += added;
        }
        self.scratch.clear();
        added
    }

    pub fn extend_from_slice(&mut self, points: &[ColoredPoint]) {
        self.begin_frame().extend_from_slice(points);
        self.commit_frame();
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[cfg(test)]
    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColoredPoint> + '_ {
        self.chunks.iter().flat_map(|chunk| chunk.iter())
    }

    /// Cheap read-only view of the current contents.
    pub fn snapshot(&self) -> PointCloudSnapshot {
        PointCloudSnapshot {
            chunks: self.chunks.clone(),
            len: self.len,
        }
    }

    /// Moves the contents out, leaving this buffer empty with its scratch
    /// capacity intact.
    pub fn take(&mut self) -> PointCloudSnapshot {
        let chunks = std::mem::take(&mut self.chunks);
        let len = std::mem::replace(&mut self.len, 0);
        PointCloudSnapshot { chunks, len }
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
        self.scratch.clear();
    }
}

/// Immutable set of points shared with renderers and exporters.
#[derive(Debug, Clone, Default)]
pub struct PointCloudSnapshot {
    chunks: Vec<Arc<[ColoredPoint]>>,
    len: usize,
}

impl PointCloudSnapshot {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColoredPoint> + '_ {
        self.chunks.iter().flat_map(|chunk| chunk.iter())
    }

    /// Axis-aligned bounds as `(min, max)`, or `None` when empty.
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let mut points = self.iter();
        let first = points.next()?.position;
        Some(points.fold((first, first), |(mut lo, mut hi), p| {
            for axis in 0..3 {
                lo[axis] = lo[axis].min(p.position[axis]);
                hi[axis] = hi[axis].max(p.position[axis]);
            }
            (lo, hi)
        }))
    }
}

impl FromIterator<ColoredPoint> for PointCloudSnapshot {
    fn from_iter<I: IntoIterator<Item = ColoredPoint>>(iter: I) -> Self {
        let points: Vec<ColoredPoint> = iter.into_iter().collect();
        let len = points.len();
        let chunks = if points.is_empty() {
            Vec::new()
        } else {
            vec![Arc::from(points)]
        };
        Self { chunks, len }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f32) -> ColoredPoint {
        ColoredPoint {
            position: [x, 0.0, 0.0],
            color: [1, 2, 3],
        }
    }

    #[test]
    fn test_commit_freezes_scratch() {
        let mut buffer = PointBuffer::new();
        buffer.begin_frame().extend([point(1.0), point(2.0)]);
        assert_eq!(buffer.commit_frame(), 2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.chunk_count(), 1);

        buffer.begin_frame();
        assert_eq!(buffer.commit_frame(), 0);
        assert_eq!(buffer.chunk_count(), 1);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_frames() {
        let mut buffer = PointBuffer::new();
        buffer.extend_from_slice(&[point(1.0)]);
        let snapshot = buffer.snapshot();
        buffer.extend_from_slice(&[point(2.0), point(3.0)]);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_take_leaves_empty_buffer() {
        let mut buffer = PointBuffer::new();
        buffer.extend_from_slice(&[point(1.0), point(2.0)]);
        let taken = buffer.take();
        assert_eq!(taken.len(), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.iter().count(), 0);
    }

    #[test]
    fn test_bounds() {
        let cloud: PointCloudSnapshot = [point(-1.0), point(4.0)].into_iter().collect();
        let (lo, hi) = cloud.bounds().unwrap();
        assert_eq!(lo[0], -1.0);
        assert_eq!(hi[0], 4.0);
        assert!(PointCloudSnapshot::default().bounds().is_none());
    }
}

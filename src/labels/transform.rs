//! Per-frame arena of projected screen points.
//!
//! Every label gets a `Range` into the shared buffer instead of owning its
//! projected points. The buffer is cleared at the start of each frame, so
//! ranges are only valid within the frame that produced them.

use glam::Vec2;

/// Handle into a per-frame arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Range {
    pub start: usize,
    pub len: usize,
}

impl Range {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Append-only buffer of projected points shared by all labels in a frame.
#[derive(Debug, Default)]
pub struct TransformBuffer {
    points: Vec<Vec2>,
}

impl TransformBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    /// The points a label wrote during projection.
    pub fn slice(&self, range: Range) -> &[Vec2] {
        &self.points[range.start..range.end()]
    }
}

/// Write view used while a label projects itself; ties the pushed points to
/// the label's `Range`.
pub struct ScreenTransform<'a> {
    buffer: &'a mut TransformBuffer,
    range: &'a mut Range,
}

impl<'a> ScreenTransform<'a> {
    pub fn new(buffer: &'a mut TransformBuffer, range: &'a mut Range) -> Self {
        range.start = buffer.points.len();
        range.len = 0;
        Self { buffer, range }
    }

    pub fn push(&mut self, point: Vec2) {
        self.buffer.points.push(point);
        self.range.len += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_track_pushes() {
        let mut buffer = TransformBuffer::new();
        let mut first = Range::default();
        {
            let mut t = ScreenTransform::new(&mut buffer, &mut first);
            t.push(Vec2::new(1.0, 2.0));
            t.push(Vec2::new(3.0, 4.0));
        }
        let mut second = Range::default();
        {
            let mut t = ScreenTransform::new(&mut buffer, &mut second);
            t.push(Vec2::new(5.0, 6.0));
        }

        assert_eq!(first, Range::new(0, 2));
        assert_eq!(second, Range::new(2, 1));
        assert_eq!(buffer.slice(second), &[Vec2::new(5.0, 6.0)]);
    }

    #[test]
    fn test_clear_resets() {
        let mut buffer = TransformBuffer::new();
        let mut range = Range::default();
        ScreenTransform::new(&mut buffer, &mut range).push(Vec2::ZERO);
        buffer.clear();
        assert!(buffer.is_empty());
    }
}

//! Screen-space bounding volumes for label collision.
//!
//! Labels collide through a two-stage test: axis-aligned extents feed the
//! grid broadphase, exact overlap is decided by a separating-axis test on
//! the oriented boxes.

use glam::Vec2;

/// Rotate `v` by the rotation encoded as a unit vector `r = (cos, sin)`.
#[inline]
pub fn rotate_by(v: Vec2, r: Vec2) -> Vec2 {
    Vec2::new(v.x * r.x - v.y * r.y, v.x * r.y + v.y * r.x)
}

/// Axis-aligned bounding box in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Strict overlap; boxes that merely touch do not intersect.
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }
}

/// Oriented bounding box with cached corners and axis-aligned extent.
#[derive(Debug, Clone, Copy)]
pub struct Obb {
    center: Vec2,
    axis: Vec2,
    quad: [Vec2; 4],
    extent: Aabb,
}

impl Obb {
    /// Build a box of `width` x `height` pixels centered at `center`, with
    /// its local x-axis along the unit vector `axis`.
    pub fn new(center: Vec2, axis: Vec2, width: f32, height: f32) -> Self {
        let x = axis * (width * 0.5);
        let y = axis.perp() * (height * 0.5);

        let quad = [
            center - x - y,
            center + x - y,
            center + x + y,
            center - x + y,
        ];

        let mut min = quad[0];
        let mut max = quad[0];
        for p in &quad[1..] {
            min = min.min(*p);
            max = max.max(*p);
        }

        Self {
            center,
            axis,
            quad,
            extent: Aabb::new(min, max),
        }
    }

    pub fn center(&self) -> Vec2 {
        self.center
    }

    pub fn axis(&self) -> Vec2 {
        self.axis
    }

    /// Corners in winding order.
    pub fn quad(&self) -> &[Vec2; 4] {
        &self.quad
    }

    pub fn extent(&self) -> Aabb {
        self.extent
    }
}

#[inline]
fn projected_interval(quad: &[Vec2; 4], axis: Vec2) -> (f32, f32) {
    let mut min = quad[0].dot(axis);
    let mut max = min;
    for p in &quad[1..] {
        let d = p.dot(axis);
        min = min.min(d);
        max = max.max(d);
    }
    (min, max)
}

/// Exact overlap test by the separating axis theorem over the two axes of
/// each box. Touching edges do not count as overlap.
pub fn intersect(a: &Obb, b: &Obb) -> bool {
    for axis in [a.axis, a.axis.perp(), b.axis, b.axis.perp()] {
        let (amin, amax) = projected_interval(&a.quad, axis);
        let (bmin, bmax) = projected_interval(&b.quad, axis);
        if amax <= bmin || bmax <= amin {
            return false;
        }
    }
    true
}

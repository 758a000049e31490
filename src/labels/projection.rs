//! World-to-screen projection for label anchors.

use glam::{Mat4, Vec2, Vec4};

/// Project a world position through `mvp` into screen pixels.
///
/// Returns `None` when the point is behind the camera (w <= 0); the caller
/// drops the label for this frame.
pub fn world_to_screen(mvp: &Mat4, world: Vec4, viewport: Vec2) -> Option<Vec2> {
    let clip = *mvp * world;

    if clip.w <= 0.0 {
        return None;
    }

    let ndc = Vec2::new(clip.x / clip.w, clip.y / clip.w);

    Some(Vec2::new(
        (ndc.x + 1.0) * 0.5 * viewport.x,
        (1.0 - ndc.y) * 0.5 * viewport.y,
    ))
}

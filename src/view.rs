//! Camera state consumed by the label engine.

use glam::Vec2;

/// Snapshot of the view for one frame.
#[derive(Debug, Clone, Copy)]
pub struct ViewState {
    /// Viewport size in pixels.
    pub viewport_size: Vec2,
    /// Fractional zoom level.
    pub zoom: f32,
}

impl ViewState {
    pub fn new(viewport_size: Vec2, zoom: f32) -> Self {
        Self { viewport_size, zoom }
    }
}

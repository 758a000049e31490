//! User-authored markers carrying their own label mesh.

use std::cell::RefCell;
use std::rc::Rc;

use glam::Mat4;

use crate::labels::TextLabels;

/// A single user marker. Markers share label priority, so the stable sort
/// preserves their insertion order.
#[derive(Debug)]
pub struct Marker {
    style_id: u32,
    mesh: Option<Rc<RefCell<TextLabels>>>,
    mvp: Mat4,
}

impl Marker {
    pub fn new(style_id: u32, mvp: Mat4) -> Self {
        Self {
            style_id,
            mesh: None,
            mvp,
        }
    }

    pub fn style_id(&self) -> u32 {
        self.style_id
    }

    pub fn set_mesh(&mut self, mesh: Rc<RefCell<TextLabels>>) {
        self.mesh = Some(mesh);
    }

    pub fn mesh(&self) -> Option<&Rc<RefCell<TextLabels>>> {
        self.mesh.as_ref()
    }

    pub fn model_view_projection(&self) -> Mat4 {
        self.mvp
    }

    pub fn set_model_view_projection(&mut self, mvp: Mat4) {
        self.mvp = mvp;
    }
}

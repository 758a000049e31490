//! Text style surface: the per-atlas quad meshes labels emit into, the
//! fixed-point vertex layout, and the font context owning the atlases.
//!
//! The style and its meshes are consumed by the downstream renderer; this
//! crate only fills them.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use bytemuck::{Pod, Zeroable};
use glam::{I16Vec2, U16Vec2};

/// Number of atlas texture slots a font context can hand out.
pub const MAX_TEXTURES: usize = 64;

/// Bitmask of atlas texture slots referenced by a glyph container.
pub type AtlasRefs = u64;

/// Owner of the glyph atlas textures; reference counts their usage.
pub trait FontContext {
    /// Release atlas references previously handed out with glyph quads.
    fn release_atlas(&self, refs: AtlasRefs);
}

/// One vertex of a glyph quad in label-local fixed point.
#[derive(Debug, Clone, Copy)]
pub struct GlyphVertex {
    /// Position relative to the label origin, scaled by `POSITION_SCALE`.
    pub pos: I16Vec2,
    pub uv: U16Vec2,
}

/// One glyph quad cut from a font atlas.
#[derive(Debug, Clone, Copy)]
pub struct GlyphQuad {
    /// Index of the atlas texture this glyph lives in.
    pub atlas: usize,
    pub vertices: [GlyphVertex; 4],
}

/// Per-quad shading state, shared by all four vertices.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TextVertexState {
    pub selection_color: u32,
    pub fill: u32,
    pub stroke: u32,
    pub alpha: u16,
    pub scale: u16,
}

/// Vertex layout consumed by the text shader. Positions are fixed-point
/// screen pixels scaled by `POSITION_SCALE`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TextVertex {
    pub pos: I16Vec2,
    pub uv: U16Vec2,
    pub state: TextVertexState,
}

impl TextVertex {
    pub const POSITION_SCALE: f32 = 4.0;
    pub const POSITION_INV_SCALE: f32 = 0.25;
    pub const ALPHA_SCALE: f32 = 65535.0;
}

/// Growable CPU-side quad mesh for one atlas texture.
#[derive(Debug, Default)]
pub struct DynamicQuadMesh {
    vertices: Vec<TextVertex>,
}

impl DynamicQuadMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a quad and return its four vertices for filling.
    pub fn push_quad(&mut self) -> &mut [TextVertex; 4] {
        let start = self.vertices.len();
        self.vertices.resize(start + 4, TextVertex::zeroed());
        (&mut self.vertices[start..start + 4])
            .try_into()
            .expect("freshly pushed quad")
    }

    pub fn vertices(&self) -> &[TextVertex] {
        &self.vertices
    }

    pub fn quad_count(&self) -> usize {
        self.vertices.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
    }
}

/// A text style holding the atlas-scoped meshes its labels emit into.
pub struct TextStyle {
    id: u32,
    context: Rc<dyn FontContext>,
    meshes: RefCell<Vec<DynamicQuadMesh>>,
}

impl TextStyle {
    pub fn new(id: u32, context: Rc<dyn FontContext>) -> Self {
        Self {
            id,
            context,
            meshes: RefCell::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn context(&self) -> &Rc<dyn FontContext> {
        &self.context
    }

    /// Drop the quads of the previous frame; called before each label pass.
    pub fn begin_frame(&self) {
        for mesh in self.meshes.borrow_mut().iter_mut() {
            mesh.clear();
        }
    }

    /// The filled meshes, one per atlas texture, for upload by the renderer.
    pub fn meshes(&self) -> Ref<'_, Vec<DynamicQuadMesh>> {
        self.meshes.borrow()
    }

    pub(crate) fn meshes_mut(&self) -> RefMut<'_, Vec<DynamicQuadMesh>> {
        self.meshes.borrow_mut()
    }
}

impl fmt::Debug for TextStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextStyle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_quad_grows_by_four() {
        let mut mesh = DynamicQuadMesh::new();
        mesh.push_quad();
        mesh.push_quad();
        assert_eq!(mesh.quad_count(), 2);
        assert_eq!(mesh.vertices().len(), 8);
    }

    #[test]
    fn test_vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<TextVertexState>(), 16);
        assert_eq!(std::mem::size_of::<TextVertex>(), 24);
    }

    #[test]
    fn test_begin_frame_clears_meshes() {
        struct NullFontContext;
        impl FontContext for NullFontContext {
            fn release_atlas(&self, _refs: AtlasRefs) {}
        }

        let style = TextStyle::new(1, Rc::new(NullFontContext));
        style.meshes_mut().push(DynamicQuadMesh::new());
        style.meshes_mut()[0].push_quad();
        style.begin_frame();
        assert!(style.meshes()[0].is_empty());
    }
}

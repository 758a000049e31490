//! Point- and line-anchored text labels.
//!
//! A text label projects its world anchor(s) into screen space, emits one
//! collision OBB per frame, and pushes its glyph quads into the atlas meshes
//! of its style once placed. The glyph quads themselves are owned by the
//! `TextLabels` container built alongside the tile mesh.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use glam::{I16Vec2, Mat4, Vec2, Vec4};

use crate::labels::label::{
    Anchor, Label, LabelKind, LabelOptions, LabelType, State, ACTIVATION_DISTANCE_THRESHOLD,
};
use crate::labels::obb::{rotate_by, Obb};
use crate::labels::projection::world_to_screen;
use crate::labels::transform::{Range, ScreenTransform};
use crate::style::{AtlasRefs, GlyphQuad, TextStyle, TextVertex, TextVertexState};
use crate::view::ViewState;

/// Outcome of projecting a label for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProjectionOutcome {
    Placed,
    /// Behind the camera; the label goes out of screen.
    Clipped,
    /// Dropped for this frame without a state change (segment too short).
    Dropped,
}

/// Horizontal alignment of the active text range. The center range is the
/// one every label carries, so it doubles as the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Center = 0,
    Left = 1,
    Right = 2,
}

/// The alignment that keeps text flowing away from the anchor point.
pub fn align_from_anchor(anchor: Anchor) -> Align {
    match anchor {
        Anchor::Left | Anchor::TopLeft | Anchor::BottomLeft => Align::Right,
        Anchor::Right | Anchor::TopRight | Anchor::BottomRight => Align::Left,
        _ => Align::Center,
    }
}

/// World-space anchor geometry, in tile mercator coordinates.
#[derive(Debug, Clone, Copy)]
pub enum WorldTransform {
    Point(Vec2),
    Line { p0: Vec2, p1: Vec2 },
}

/// Packed shading attributes shared by every glyph quad of one label.
#[derive(Debug, Clone, Copy, Default)]
pub struct VertexAttributes {
    pub fill: u32,
    pub stroke: u32,
    pub font_scale: f32,
}

/// Glyph container linkage shared by the text-bearing label kinds.
#[derive(Debug)]
pub struct TextPayload {
    pub(crate) container: Weak<RefCell<TextLabels>>,
    /// One glyph-quad range per alignment.
    pub(crate) text_ranges: [Range; 3],
    pub(crate) text_range_index: usize,
    pub(crate) attributes: VertexAttributes,
    pub(crate) preferred_alignment: Option<Align>,
}

impl TextPayload {
    /// Activate the text range matching the anchor, or the preferred
    /// alignment when the style pinned one. Empty ranges fall back to the
    /// center range.
    pub(crate) fn select_text_range(&mut self, anchor: Anchor) {
        let align = self
            .preferred_alignment
            .unwrap_or_else(|| align_from_anchor(anchor));
        self.text_range_index = align as usize;
        if self.text_ranges[self.text_range_index].is_empty() {
            self.text_range_index = 0;
        }
    }

    pub(crate) fn active_range(&self) -> Range {
        self.text_ranges[self.text_range_index]
    }
}

/// Variant payload for point, line and debug labels.
#[derive(Debug)]
pub struct TextLabel {
    pub(crate) label_type: LabelType,
    pub(crate) world: WorldTransform,
    pub(crate) text: TextPayload,
}

impl TextLabel {
    pub(crate) fn world_line_length2(&self) -> f32 {
        match self.world {
            WorldTransform::Line { p0, p1 } => p0.distance_squared(p1),
            WorldTransform::Point(_) => 0.0,
        }
    }
}

impl Label {
    /// Build a point, line or debug text label bound to its glyph container.
    pub fn new_text(
        world: WorldTransform,
        label_type: LabelType,
        dim: Vec2,
        options: LabelOptions,
        attributes: VertexAttributes,
        container: &Rc<RefCell<TextLabels>>,
        text_ranges: [Range; 3],
        preferred_alignment: Option<Align>,
    ) -> Rc<RefCell<Label>> {
        let label = Label::new(
            dim,
            options,
            LabelKind::Text(TextLabel {
                label_type,
                world,
                text: TextPayload {
                    container: Rc::downgrade(container),
                    text_ranges,
                    text_range_index: 0,
                    attributes,
                    preferred_alignment,
                },
            }),
        );
        Rc::new(RefCell::new(label))
    }

    pub(crate) fn update_text_transform(
        &mut self,
        mvp: &Mat4,
        view: &ViewState,
        transform: &mut ScreenTransform,
    ) -> ProjectionOutcome {
        let LabelKind::Text(text) = &self.kind else {
            return ProjectionOutcome::Dropped;
        };
        let viewport = view.viewport_size;

        match (text.label_type, text.world) {
            (LabelType::Point | LabelType::Debug, WorldTransform::Point(p)) => {
                let world = Vec4::new(p.x, p.y, 0.0, 1.0);
                let Some(screen) = world_to_screen(mvp, world, viewport) else {
                    return ProjectionOutcome::Clipped;
                };

                self.screen_center = screen;
                transform.push(screen + self.options.offset);
                transform.push(Vec2::new(1.0, 0.0));
                ProjectionOutcome::Placed
            }
            (LabelType::Line, WorldTransform::Line { p0, p1 }) => {
                let Some(a0) = world_to_screen(mvp, Vec4::new(p0.x, p0.y, 0.0, 1.0), viewport)
                else {
                    return ProjectionOutcome::Clipped;
                };
                let Some(a1) = world_to_screen(mvp, Vec4::new(p1.x, p1.y, 0.0, 1.0), viewport)
                else {
                    return ProjectionOutcome::Clipped;
                };

                let length = a0.distance(a1);

                // Allow the label to be at most 30% wider than its segment.
                if length < self.dim.x * 0.7 {
                    return ProjectionOutcome::Dropped;
                }

                // Anchor at the world midpoint; less sliding under tilt.
                let mid = (p0 + p1) * 0.5;
                let Some(screen) = world_to_screen(mvp, Vec4::new(mid.x, mid.y, 0.0, 1.0), viewport)
                else {
                    return ProjectionOutcome::Clipped;
                };

                // Always read left to right.
                let dir = if a0.x <= a1.x { a1 - a0 } else { a0 - a1 } / length;
                let rotation = Vec2::new(dir.x, -dir.y);

                self.screen_center = screen;
                transform.push(screen + rotate_by(self.options.offset, rotation));
                transform.push(rotation);
                ProjectionOutcome::Placed
            }
            _ => ProjectionOutcome::Dropped,
        }
    }

    pub(crate) fn text_obbs(
        &self,
        points: &[Vec2],
        obbs: &mut Vec<Obb>,
        range: &mut Range,
        append: bool,
    ) {
        if append {
            range.start = obbs.len();
        }

        let mut dim = self.dim - self.options.buffer;
        if self.occluded_last_frame {
            dim += ACTIVATION_DISTANCE_THRESHOLD;
        }
        if self.state == State::Dead {
            // Shrink culled boxes so the debug overlay can tell them apart.
            dim -= 4.0;
        }

        let position = points[0];
        let rotation = points[1];
        let obb = Obb::new(
            position + self.anchor,
            Vec2::new(rotation.x, -rotation.y),
            dim.x,
            dim.y,
        );

        if append {
            obbs.push(obb);
        } else {
            obbs[range.start] = obb;
        }
        range.len = 1;
    }

    pub(crate) fn add_text_vertices(&self, points: &[Vec2], screen_size: Vec2) {
        if !self.visible_state() {
            return;
        }
        let LabelKind::Text(text) = &self.kind else {
            return;
        };
        let Some(container) = text.text.container.upgrade() else {
            return;
        };
        let container = container.borrow();

        let state = TextVertexState {
            selection_color: self.options.selection_color,
            fill: text.text.attributes.fill,
            stroke: text.text.attributes.stroke,
            alpha: (self.alpha * TextVertex::ALPHA_SCALE) as u16,
            scale: text.text.attributes.font_scale as u16,
        };

        let range = text.text.active_range();
        let quads = &container.quads[range.start..range.end()];

        let rotation = points[1];
        let rotate = rotation.x != 1.0;
        let sp = ((points[0] + self.anchor) * TextVertex::POSITION_SCALE).as_i16vec2();

        // Conservative cull box: the screen expanded by the text height.
        let min = I16Vec2::splat((-self.dim.y * TextVertex::POSITION_SCALE) as i16);
        let max = ((screen_size + self.dim.y) * TextVertex::POSITION_SCALE).as_i16vec2();

        let mut meshes = container.style().meshes_mut();

        for quad in quads {
            let mut corners = [I16Vec2::ZERO; 4];
            for (corner, vertex) in corners.iter_mut().zip(&quad.vertices) {
                *corner = if rotate {
                    sp + rotate_by(vertex.pos.as_vec2(), rotation).as_i16vec2()
                } else {
                    sp + vertex.pos
                };
            }

            let visible = corners
                .iter()
                .any(|c| c.x > min.x && c.x < max.x && c.y > min.y && c.y < max.y);
            if !visible {
                continue;
            }

            if meshes.len() <= quad.atlas {
                meshes.resize_with(quad.atlas + 1, Default::default);
            }
            let out = meshes[quad.atlas].push_quad();
            for ((v, corner), vertex) in out.iter_mut().zip(&corners).zip(&quad.vertices) {
                *v = TextVertex {
                    pos: *corner,
                    uv: vertex.uv,
                    state,
                };
            }
        }
    }
}

/// Owns the glyph quads and labels cut from one tile-and-style mesh.
///
/// Labels hold a weak back reference; the tile cache keeps the container
/// alive for as long as its labels may be referenced by a frame.
#[derive(Debug)]
pub struct TextLabels {
    style: Rc<TextStyle>,
    labels: Vec<Rc<RefCell<Label>>>,
    pub(crate) quads: Vec<GlyphQuad>,
    atlas_refs: AtlasRefs,
}

impl TextLabels {
    pub fn new(style: Rc<TextStyle>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            style,
            labels: Vec::new(),
            quads: Vec::new(),
            atlas_refs: 0,
        }))
    }

    pub fn style(&self) -> &Rc<TextStyle> {
        &self.style
    }

    /// Hand over the glyph quads and the atlas slots they reference.
    pub fn set_quads(&mut self, quads: Vec<GlyphQuad>, atlas_refs: AtlasRefs) {
        self.quads = quads;
        self.atlas_refs = atlas_refs;
    }

    pub fn add_label(&mut self, label: Rc<RefCell<Label>>) {
        self.labels.push(label);
    }

    pub fn labels(&self) -> &[Rc<RefCell<Label>>] {
        &self.labels
    }
}

impl Drop for TextLabels {
    fn drop(&mut self) {
        self.style.context().release_atlas(self.atlas_refs);
    }
}

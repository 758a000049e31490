//! Labels following a polyline spine.
//!
//! A curved label projects every vertex of its world polyline into the
//! screen transform arena and collides with one oriented box per spine
//! segment. Glyphs are laid out by arc length along the projected spine.

use std::cell::RefCell;
use std::rc::Rc;

use glam::{I16Vec2, Mat4, Vec2, Vec4};

use crate::labels::label::{
    Label, LabelKind, LabelOptions, State, ACTIVATION_DISTANCE_THRESHOLD,
};
use crate::labels::obb::{rotate_by, Obb};
use crate::labels::projection::world_to_screen;
use crate::labels::text_label::{
    Align, ProjectionOutcome, TextLabels, TextPayload, VertexAttributes,
};
use crate::labels::transform::{Range, ScreenTransform};
use crate::style::{TextVertex, TextVertexState};
use crate::view::ViewState;

/// Variant payload for labels following a polyline spine.
#[derive(Debug)]
pub struct CurvedLabel {
    pub(crate) line: Vec<Vec2>,
    /// Placement quality assigned by the builder; orders candidates of the
    /// same text in the priority sort.
    pub(crate) candidate_priority: f32,
    pub(crate) text: TextPayload,
}

impl Label {
    /// Build a curved label bound to its glyph container.
    pub fn new_curved(
        line: Vec<Vec2>,
        dim: Vec2,
        options: LabelOptions,
        attributes: VertexAttributes,
        candidate_priority: f32,
        container: &Rc<RefCell<TextLabels>>,
        text_ranges: [Range; 3],
        preferred_alignment: Option<Align>,
    ) -> Rc<RefCell<Label>> {
        let label = Label::new(
            dim,
            options,
            LabelKind::Curved(CurvedLabel {
                line,
                candidate_priority,
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

    pub(crate) fn update_curved_transform(
        &mut self,
        mvp: &Mat4,
        view: &ViewState,
        transform: &mut ScreenTransform,
    ) -> ProjectionOutcome {
        let LabelKind::Curved(curved) = &self.kind else {
            return ProjectionOutcome::Dropped;
        };
        if curved.line.len() < 2 {
            return ProjectionOutcome::Dropped;
        }

        let mut points = Vec::with_capacity(curved.line.len());
        for p in &curved.line {
            let world = Vec4::new(p.x, p.y, 0.0, 1.0);
            let Some(screen) = world_to_screen(mvp, world, view.viewport_size) else {
                return ProjectionOutcome::Clipped;
            };
            points.push(screen);
        }

        // Keep the spine reading left to right.
        if points[0].x > points[points.len() - 1].x {
            points.reverse();
        }

        let length = path_length(&points);
        if length < self.dim.x {
            return ProjectionOutcome::Dropped;
        }

        if let Some((center, _)) = sample_at(&points, length * 0.5) {
            self.screen_center = center;
        }

        for point in points {
            transform.push(point);
        }
        ProjectionOutcome::Placed
    }

    pub(crate) fn curved_obbs(
        &self,
        points: &[Vec2],
        obbs: &mut Vec<Obb>,
        range: &mut Range,
        append: bool,
    ) {
        if append {
            range.start = obbs.len();
        }

        let mut height = self.dim.y - self.options.buffer.y;
        if self.occluded_last_frame {
            height += ACTIVATION_DISTANCE_THRESHOLD;
        }
        if self.state == State::Dead {
            height -= 4.0;
        }

        let mut count = 0;
        for pair in points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let length = a.distance(b);
            if length <= f32::EPSILON {
                continue;
            }
            let axis = (b - a) / length;
            let obb = Obb::new((a + b) * 0.5, axis, length, height);

            if append {
                obbs.push(obb);
            } else {
                obbs[range.start + count] = obb;
            }
            count += 1;
        }
        range.len = count;
    }

    pub(crate) fn add_curved_vertices(&self, points: &[Vec2], screen_size: Vec2) {
        if !self.visible_state() || points.len() < 2 {
            return;
        }
        let LabelKind::Curved(curved) = &self.kind else {
            return;
        };
        let Some(container) = curved.text.container.upgrade() else {
            return;
        };
        let container = container.borrow();

        let state = TextVertexState {
            selection_color: self.options.selection_color,
            fill: curved.text.attributes.fill,
            stroke: curved.text.attributes.stroke,
            alpha: (self.alpha * TextVertex::ALPHA_SCALE) as u16,
            scale: curved.text.attributes.font_scale as u16,
        };

        let range = curved.text.active_range();
        let quads = &container.quads[range.start..range.end()];

        let length = path_length(points);
        let start = ((length - self.dim.x) * 0.5).max(0.0);

        let min = I16Vec2::splat((-self.dim.y * TextVertex::POSITION_SCALE) as i16);
        let max = ((screen_size + self.dim.y) * TextVertex::POSITION_SCALE).as_i16vec2();

        let mut meshes = container.style().meshes_mut();

        for quad in quads {
            // Pen offset of the glyph within the laid-out text.
            let origin_x = quad.vertices[0].pos.x as f32 * TextVertex::POSITION_INV_SCALE;
            let Some((position, tangent)) = sample_at(points, start + origin_x) else {
                continue;
            };
            let rotation = Vec2::new(tangent.x, -tangent.y);
            let sp = (position * TextVertex::POSITION_SCALE).as_i16vec2();

            let mut corners = [I16Vec2::ZERO; 4];
            for (corner, vertex) in corners.iter_mut().zip(&quad.vertices) {
                let local = vertex.pos.as_vec2() - Vec2::new(quad.vertices[0].pos.x as f32, 0.0);
                *corner = sp + rotate_by(local, rotation).as_i16vec2();
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

fn path_length(points: &[Vec2]) -> f32 {
    points.windows(2).map(|pair| pair[0].distance(pair[1])).sum()
}

/// Position and unit tangent at an arc-length offset along the spine.
/// Offsets past the end clamp to the last vertex.
fn sample_at(points: &[Vec2], offset: f32) -> Option<(Vec2, Vec2)> {
    if points.len() < 2 || offset < 0.0 {
        return None;
    }

    let mut accumulated = 0.0;
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let segment = a.distance(b);
        if accumulated + segment >= offset {
            let t = (offset - accumulated) / segment.max(1e-3);
            return Some((a.lerp(b, t), (b - a) / segment.max(1e-3)));
        }
        accumulated += segment;
    }

    let a = points[points.len() - 2];
    let b = points[points.len() - 1];
    Some((b, (b - a) / a.distance(b).max(1e-3)))
}

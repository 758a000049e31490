//! Label placement and occlusion.
//!
//! Per frame the driver collects candidate labels from tiles and markers,
//! projects them into the shared transform arena, sorts them globally by
//! priority, resolves collisions through the grid broadphase with exact OBB
//! tests, advances each label's fade state and emits glyph quads for the
//! placed ones. Placement is greedy; the previous frame's outcome biases
//! both the sort and the collision boxes so labels do not flicker.

pub mod collision;
pub mod curved;
pub mod label;
pub mod obb;
pub mod projection;
pub mod text_label;
pub mod transform;

pub use collision::Isect2D;
pub use curved::CurvedLabel;
pub use label::{Anchor, Label, LabelKind, LabelOptions, LabelType, State};
pub use obb::{intersect, rotate_by, Aabb, Obb};
pub use projection::world_to_screen;
pub use text_label::{
    align_from_anchor, Align, TextLabel, TextLabels, VertexAttributes, WorldTransform,
};
pub use transform::{Range, ScreenTransform, TransformBuffer};

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use glam::{Mat4, Vec2};

use crate::marker::Marker;
use crate::style::TextStyle;
use crate::tile::{Tile, TileCache, TileId};
use crate::view::ViewState;

/// Per-frame record tying a label to its tile and its arena ranges.
#[derive(Debug)]
pub struct LabelEntry {
    pub label: Rc<RefCell<Label>>,
    pub tile: Option<Rc<Tile>>,
    pub proxy: bool,
    /// Copied from the label so the sort does not chase pointers.
    pub priority: u32,
    pub transform: Range,
    pub obbs: Range,
}

impl LabelEntry {
    fn new(
        label: &Rc<RefCell<Label>>,
        tile: Option<&Rc<Tile>>,
        proxy: bool,
        priority: u32,
        transform: Range,
    ) -> Self {
        Self {
            label: Rc::clone(label),
            tile: tile.cloned(),
            proxy,
            priority,
            transform,
            obbs: Range::default(),
        }
    }
}

/// Total order of the per-frame label entries.
///
/// Non-proxy before proxy, then ascending priority, tiles before markers,
/// closer tiles first, then the hysteresis terms: entries shown last frame
/// outrank freshly occluded ones. Ties end at the creation id so the order
/// is total and reproducible.
fn label_order(a: &LabelEntry, b: &LabelEntry) -> Ordering {
    if a.proxy != b.proxy {
        return a.proxy.cmp(&b.proxy);
    }
    if a.priority != b.priority {
        return a.priority.cmp(&b.priority);
    }
    match (&a.tile, &b.tile) {
        (Some(_), None) => return Ordering::Less,
        (None, Some(_)) => return Ordering::Greater,
        (Some(ta), Some(tb)) if ta.id().z != tb.id().z => return tb.id().z.cmp(&ta.id().z),
        _ => {}
    }

    let la = a.label.borrow();
    let lb = b.label.borrow();

    // Depends on navigation history; placement is intentionally sticky.
    if la.occluded_last_frame() != lb.occluded_last_frame() {
        return la.occluded_last_frame().cmp(&lb.occluded_last_frame());
    }
    // Prefer labels within screen over out-of-screen ones; this matters
    // for repeat groups.
    if la.visible_state() != lb.visible_state() {
        return lb.visible_state().cmp(&la.visible_state());
    }

    if la.label_type() == LabelType::Line && lb.label_type() == LabelType::Line {
        // The label on the longer segment has a better chance to fit.
        let (len_a, len_b) = (la.world_line_length2(), lb.world_line_length2());
        if len_a != len_b {
            return len_b.partial_cmp(&len_a).unwrap_or(Ordering::Equal);
        }
    }

    if la.hash() != lb.hash() {
        return la.hash().cmp(&lb.hash());
    }

    if la.label_type() == LabelType::Curved && lb.label_type() == LabelType::Curved {
        let (ca, cb) = (la.candidate_priority(), lb.candidate_priority());
        if ca != cb {
            return cb.partial_cmp(&ca).unwrap_or(Ordering::Equal);
        }
    }

    la.id().cmp(&lb.id())
}

/// The entry whose OBB arena range contains `index`. Entries are searched
/// by range start, which is ascending over the already-processed prefix.
fn entry_owning_obb(entries: &[LabelEntry], index: usize) -> Option<&LabelEntry> {
    let at = entries.partition_point(|e| e.obbs.start <= index);
    if at == 0 {
        return None;
    }
    let entry = &entries[at - 1];
    (index < entry.obbs.end()).then_some(entry)
}

fn find_proxy(
    source_id: i32,
    proxy_id: TileId,
    tiles: &[Rc<Tile>],
    cache: &dyn TileCache,
) -> Option<Rc<Tile>> {
    if let Some(tile) = cache.contains(source_id, proxy_id) {
        return Some(tile);
    }
    tiles
        .iter()
        .find(|t| t.id() == proxy_id && t.source_id() == source_id)
        .cloned()
}

/// The label placement and occlusion engine.
///
/// Owns every per-frame structure: the entry list, the transform and OBB
/// arenas, the broadphase grid and the repeat-group registry. Labels live
/// in tile meshes owned by the tile cache; entries hold shared handles that
/// are dropped when the next frame collects.
#[derive(Default)]
pub struct Labels {
    labels: Vec<LabelEntry>,
    selection_labels: Vec<LabelEntry>,
    transforms: TransformBuffer,
    obbs: Vec<Obb>,
    isect: Isect2D,
    repeat_groups: HashMap<u64, Vec<Rc<RefCell<Label>>>>,
    need_update: bool,
    last_zoom: f32,
    draw_all: bool,
}

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any label still animates; while true the host should keep
    /// driving frames.
    pub fn needs_update(&self) -> bool {
        self.need_update
    }

    /// Process dead labels too and force every label visible. Debug aid.
    pub fn set_draw_all(&mut self, draw_all: bool) {
        self.draw_all = draw_all;
    }

    /// The per-frame entry list, for the debug overlay.
    pub fn entries(&self) -> &[LabelEntry] {
        &self.labels
    }

    /// The OBB arena of the current frame, for the debug overlay.
    pub fn obbs(&self) -> &[Obb] {
        &self.obbs
    }

    /// The screen transform arena of the current frame.
    pub fn transforms(&self) -> &[Vec2] {
        self.transforms.points()
    }

    /// Hit test by pick-buffer color.
    pub fn get_label(
        &self,
        selection_color: u32,
    ) -> Option<(Rc<RefCell<Label>>, Option<Rc<Tile>>)> {
        self.selection_labels
            .iter()
            .find(|entry| {
                let label = entry.label.borrow();
                label.visible_state() && label.selection_color() == selection_color
            })
            .map(|entry| (Rc::clone(&entry.label), entry.tile.clone()))
    }

    fn process_label_update(
        &mut self,
        view: &ViewState,
        mesh: &Rc<RefCell<TextLabels>>,
        tile: Option<&Rc<Tile>>,
        mvp: &Mat4,
        dt_ms: f32,
        only_transitions: bool,
        proxy: bool,
    ) {
        let container = mesh.borrow();

        for label_rc in container.labels() {
            let mut label = label_rc.borrow_mut();

            if !self.draw_all && label.state() == State::Dead {
                continue;
            }

            let mut range = Range::default();
            let ok = {
                let mut transform = ScreenTransform::new(&mut self.transforms, &mut range);
                label.update(mvp, view, &mut transform)
            };
            if !ok {
                continue;
            }

            let priority = label.options().priority;
            let selection_color = label.selection_color();

            if only_transitions {
                // Occlusion is not re-resolved in the partial pass; carry
                // last frame's outcome so running fades continue.
                if label.occluded_last_frame() {
                    label.occlude(true);
                }
                if label.visible_state() || !label.can_occlude() {
                    self.need_update |= label.eval_state(dt_ms, self.draw_all);
                    label.add_vertices_to_mesh(self.transforms.slice(range), view.viewport_size);
                }
            } else if label.can_occlude() {
                self.labels
                    .push(LabelEntry::new(label_rc, tile, proxy, priority, range));
            } else {
                self.need_update |= label.eval_state(dt_ms, self.draw_all);
                label.add_vertices_to_mesh(self.transforms.slice(range), view.viewport_size);
            }

            if selection_color != 0 {
                self.selection_labels
                    .push(LabelEntry::new(label_rc, tile, proxy, priority, range));
            }
        }
    }

    /// Partial pass driving fades between full passes. Collects nothing
    /// new; only labels already visible (or non-colliding) are advanced
    /// and re-emitted.
    pub fn update_labels(
        &mut self,
        view: &ViewState,
        dt_ms: f32,
        styles: &[Rc<TextStyle>],
        tiles: &[Rc<Tile>],
        markers: &[Marker],
        only_transitions: bool,
    ) {
        if !only_transitions {
            self.labels.clear();
        }
        self.selection_labels.clear();
        self.need_update = false;

        for style in styles {
            style.begin_frame();
        }

        for tile in tiles {
            let proxy = tile.is_proxy();
            let mvp = tile.mvp();

            for style in styles {
                let Some(mesh) = tile.mesh(style.id()) else {
                    continue;
                };
                let mesh = Rc::clone(mesh);
                self.process_label_update(
                    view,
                    &mesh,
                    Some(tile),
                    &mvp,
                    dt_ms,
                    only_transitions,
                    proxy,
                );
            }
        }

        for marker in markers {
            for style in styles {
                if marker.style_id() != style.id() {
                    continue;
                }
                let Some(mesh) = marker.mesh() else {
                    continue;
                };
                let mesh = Rc::clone(mesh);
                let mvp = marker.model_view_projection();
                self.process_label_update(view, &mesh, None, &mvp, dt_ms, only_transitions, false);
            }
        }
    }

    fn sort_labels(&mut self) {
        // Stable, so markers sharing a priority keep their insertion order.
        self.labels.sort_by(label_order);
    }

    fn within_repeat_distance(&self, label: &Label) -> bool {
        let distance = label.options().repeat_distance;
        let threshold2 = distance * distance;

        let Some(group) = self.repeat_groups.get(&label.options().repeat_group) else {
            return false;
        };
        group.iter().any(|other| {
            label
                .screen_center()
                .distance_squared(other.borrow().screen_center())
                < threshold2
        })
    }

    fn handle_occlusions(&mut self) {
        self.isect.clear();
        self.repeat_groups.clear();

        for index in 0..self.labels.len() {
            let label_rc = Rc::clone(&self.labels[index].label);
            let transform = self.labels[index].transform;
            let mut label = label_rc.borrow_mut();

            // The parent precedes in sorted order, so its occlusion and
            // anchor are settled for this frame.
            if let Some(parent) = label.parent() {
                if parent.borrow().is_occluded() {
                    label.occlude(true);
                    self.labels[index].obbs = Range::new(self.obbs.len(), 0);
                    continue;
                }
            }

            let mut obb_range = Range::default();
            label.obbs(
                self.transforms.slice(transform),
                &mut self.obbs,
                &mut obb_range,
                true,
            );

            // Skip the label if one of its repeat group was already placed
            // within the repeat distance.
            if label.options().repeat_distance > 0.0 && self.within_repeat_distance(&label) {
                label.occlude(true);
            }

            let start_anchor = label.anchor_index();
            loop {
                if label.is_occluded() {
                    // Re-emit boxes for the fallback anchor, in place.
                    label.obbs(
                        self.transforms.slice(transform),
                        &mut self.obbs,
                        &mut obb_range,
                        false,
                    );
                    if start_anchor == label.anchor_index() {
                        // Cycled through every anchor.
                        break;
                    }
                }

                label.occlude(false);

                let parent = label.parent();
                for i in obb_range.start..obb_range.end() {
                    let obb = self.obbs[i];
                    let obbs = &self.obbs;
                    let placed = &self.labels[..index];
                    let mut occluded = false;

                    self.isect.intersect(
                        &obb.extent(),
                        |_, other| {
                            if let Some(parent_rc) = &parent {
                                if let Some(owner) = entry_owning_obb(placed, other) {
                                    if Rc::ptr_eq(parent_rc, &owner.label) {
                                        return true;
                                    }
                                }
                            }
                            if intersect(&obb, &obbs[other]) {
                                occluded = true;
                                return false;
                            }
                            true
                        },
                        false,
                    );

                    if occluded {
                        label.occlude(true);
                        break;
                    }
                }

                if !(label.is_occluded() && label.next_anchor()) {
                    break;
                }
            }
            self.labels[index].obbs = obb_range;

            if label.is_occluded() {
                // A rejected required label takes its parent down with it.
                if label.options().required {
                    if let Some(parent) = label.parent() {
                        parent.borrow_mut().occlude(true);
                    }
                }
            } else {
                for i in obb_range.start..obb_range.end() {
                    self.isect.insert(self.obbs[i].extent(), i);
                }
                if label.options().repeat_distance > 0.0 {
                    self.repeat_groups
                        .entry(label.options().repeat_group)
                        .or_default()
                        .push(Rc::clone(&label_rc));
                }
            }
        }
    }

    fn skip_transitions_between(styles: &[Rc<TextStyle>], tile: &Tile, proxy: &Tile) {
        for style in styles {
            let (Some(m0), Some(m1)) = (tile.mesh(style.id()), proxy.mesh(style.id())) else {
                continue;
            };
            let m0 = m0.borrow();
            let m1 = m1.borrow();

            for l0_rc in m0.labels() {
                let mut l0 = l0_rc.borrow_mut();
                if !l0.can_occlude() || l0.state() != State::None {
                    continue;
                }

                for l1_rc in m1.labels() {
                    let l1 = l1_rc.borrow();
                    if !l1.visible_state() || !l1.can_occlude() {
                        continue;
                    }
                    // The repeat group also ties labels with dynamic style
                    // properties across zoom levels.
                    if l0.options().repeat_group != l1.options().repeat_group {
                        continue;
                    }

                    // The shown proxy label lies within the circle spanned
                    // by the new label's box.
                    let d2 = l0.screen_center().distance_squared(l1.screen_center());
                    let radius = l0.dimension().x.max(l0.dimension().y);
                    if d2 < radius * radius {
                        l0.skip_transitions();
                    }
                }
            }
        }
    }

    fn skip_transitions(
        &self,
        styles: &[Rc<TextStyle>],
        tiles: &[Rc<Tile>],
        cache: &dyn TileCache,
        current_zoom: f32,
    ) {
        for tile in tiles {
            let id = tile.id();

            if self.last_zoom < current_zoom {
                // Zooming in; the cached parent tile may still be shown.
                if let Some(proxy) = find_proxy(tile.source_id(), id.parent(), tiles, cache) {
                    Self::skip_transitions_between(styles, tile, &proxy);
                }
            } else {
                // Zooming out; any of the four children may still be shown.
                for i in 0..4 {
                    if let Some(proxy) = find_proxy(tile.source_id(), id.child(i), tiles, cache) {
                        Self::skip_transitions_between(styles, tile, &proxy);
                    }
                }
            }
        }
    }

    /// Full placement pass for one frame.
    pub fn update_label_set(
        &mut self,
        view: &ViewState,
        dt_ms: f32,
        styles: &[Rc<TextStyle>],
        tiles: &[Rc<Tile>],
        markers: &[Marker],
        cache: &dyn TileCache,
    ) {
        self.transforms.clear();
        self.obbs.clear();

        self.update_labels(view, dt_ms, styles, tiles, markers, false);

        self.sort_labels();

        // When the integer zoom steps, matching labels shown by proxy tiles
        // suppress the fade-in of their replacements.
        if self.last_zoom as i32 != view.zoom as i32 {
            log::debug!(
                "zoom level changed to {}, checking proxy transitions",
                view.zoom as i32
            );
            self.skip_transitions(styles, tiles, cache, view.zoom);
            self.last_zoom = view.zoom;
        }

        let split = (
            (view.viewport_size.x / 256.0) as usize,
            (view.viewport_size.y / 256.0) as usize,
        );
        self.isect.resize(split, view.viewport_size);

        self.handle_occlusions();

        log::trace!("resolved {} colliding labels", self.labels.len());

        let viewport = Aabb::new(Vec2::ZERO, view.viewport_size);
        for index in 0..self.labels.len() {
            let entry = &self.labels[index];
            let mut label = entry.label.borrow_mut();

            self.need_update |= label.eval_state(dt_ms, self.draw_all);

            if !label.visible_state() {
                continue;
            }
            // Labels whose boxes all miss the viewport contribute no quads.
            // Entries without boxes (skipped via their parent) pass through.
            let obbs = &self.obbs[entry.obbs.start..entry.obbs.end()];
            if !obbs.is_empty() && !obbs.iter().any(|o| o.extent().intersects(&viewport)) {
                continue;
            }
            label.add_vertices_to_mesh(self.transforms.slice(entry.transform), view.viewport_size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_range(start: usize, len: usize) -> LabelEntry {
        use crate::labels::text_label::TextPayload;
        use std::rc::Weak;

        let label = Label::new(
            Vec2::new(10.0, 10.0),
            LabelOptions::default(),
            LabelKind::Text(TextLabel {
                label_type: LabelType::Point,
                world: WorldTransform::Point(Vec2::ZERO),
                text: TextPayload {
                    container: Weak::new(),
                    text_ranges: [Range::default(); 3],
                    text_range_index: 0,
                    attributes: VertexAttributes::default(),
                    preferred_alignment: None,
                },
            }),
        );
        LabelEntry {
            label: Rc::new(RefCell::new(label)),
            tile: None,
            proxy: false,
            priority: 0,
            transform: Range::default(),
            obbs: Range::new(start, len),
        }
    }

    #[test]
    fn test_entry_owning_obb() {
        let entries = vec![
            entry_with_range(0, 1),
            entry_with_range(1, 0), // skipped entry, empty range
            entry_with_range(1, 3),
            entry_with_range(4, 1),
        ];
        assert!(Rc::ptr_eq(
            &entry_owning_obb(&entries, 0).unwrap().label,
            &entries[0].label
        ));
        assert!(Rc::ptr_eq(
            &entry_owning_obb(&entries, 2).unwrap().label,
            &entries[2].label
        ));
        assert!(Rc::ptr_eq(
            &entry_owning_obb(&entries, 4).unwrap().label,
            &entries[3].label
        ));
        assert!(entry_owning_obb(&entries, 5).is_none());
    }

    #[test]
    fn test_sort_is_total() {
        let a = entry_with_range(0, 1);
        let b = entry_with_range(1, 1);

        assert_eq!(label_order(&a, &a), Ordering::Equal);
        let ab = label_order(&a, &b);
        let ba = label_order(&b, &a);
        assert_eq!(ab, ba.reverse());
        assert_ne!(ab, Ordering::Equal);
    }

    #[test]
    fn test_sort_prefers_non_proxy_then_priority() {
        let mut proxy = entry_with_range(0, 1);
        proxy.proxy = true;
        proxy.priority = 0;

        let mut low = entry_with_range(1, 1);
        low.priority = 10;
        let mut high = entry_with_range(2, 1);
        high.priority = 5;

        assert_eq!(label_order(&high, &proxy), Ordering::Less);
        assert_eq!(label_order(&high, &low), Ordering::Less);
        assert_eq!(label_order(&low, &proxy), Ordering::Less);
    }
}

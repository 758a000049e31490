//! Label base state: placement lifecycle, fade timing, anchor cycling and
//! parent linkage.
//!
//! A label carries the only state that survives between frames: its
//! lifecycle `State`, alpha, occlusion flags and current anchor index.
//! Everything else (projected points, collision boxes) lives in per-frame
//! arenas owned by the frame driver.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Vec2};
use serde::{Deserialize, Serialize};

use crate::labels::curved::CurvedLabel;
use crate::labels::obb::Obb;
use crate::labels::text_label::{ProjectionOutcome, TextLabel};
use crate::labels::transform::{Range, ScreenTransform};
use crate::view::ViewState;

/// Extra margin, in pixels, a label hidden last frame must clear before it
/// may reappear.
pub const ACTIVATION_DISTANCE_THRESHOLD: f32 = 2.0;

static NEXT_LABEL_ID: AtomicU64 = AtomicU64::new(1);

/// Placement lifecycle of a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Never shown.
    None,
    FadingIn,
    Visible,
    FadingOut,
    /// Anchor projects behind the camera or off the clip volume.
    OutOfScreen,
    /// Hidden by occlusion, waiting for room to reappear.
    Sleep,
    /// Excluded from future frames unless draw-all is set.
    Dead,
}

/// Kind tag used by the priority sort and the debug overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelType {
    Point,
    Line,
    Curved,
    Debug,
}

/// Named placement of a label's box relative to its anchor point, in screen
/// coordinates (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    Center,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Anchor {
    /// Unit direction the label box is pushed away from the anchor point.
    pub fn direction(self) -> Vec2 {
        match self {
            Anchor::Center => Vec2::ZERO,
            Anchor::Top => Vec2::new(0.0, -1.0),
            Anchor::Bottom => Vec2::new(0.0, 1.0),
            Anchor::Left => Vec2::new(-1.0, 0.0),
            Anchor::Right => Vec2::new(1.0, 0.0),
            Anchor::TopLeft => Vec2::new(-1.0, -1.0),
            Anchor::TopRight => Vec2::new(1.0, -1.0),
            Anchor::BottomLeft => Vec2::new(-1.0, 1.0),
            Anchor::BottomRight => Vec2::new(1.0, 1.0),
        }
    }
}

/// Per-label placement options, produced by style evaluation.
///
/// `priority` orders the global sort; lower values win. `anchors` is cycled
/// in order when the preferred placement collides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelOptions {
    pub priority: u32,
    pub anchors: Vec<Anchor>,
    /// Screen-pixel offset from the projected anchor, rotated with the
    /// label axis for line labels.
    pub offset: Vec2,
    /// Subtracted from the dimensions for collision only.
    pub buffer: Vec2,
    /// Equivalence key tying visually equal labels across tiles; 0 disables
    /// grouping.
    pub repeat_group: u64,
    /// Minimum screen distance between placed labels of one repeat group;
    /// 0 disables repeat culling.
    pub repeat_distance: f32,
    /// An occluded required label also occludes its parent.
    pub required: bool,
    /// Whether the label participates in occlusion at all.
    pub collide: bool,
    pub select_time_ms: f32,
    pub fade_in_ms: f32,
    pub fade_out_ms: f32,
    /// Pick-buffer identifier; 0 means not selectable.
    pub selection_color: u32,
    /// Content hash grouping equal labels in the sort.
    pub param_hash: u64,
}

impl Default for LabelOptions {
    fn default() -> Self {
        Self {
            priority: u32::MAX,
            anchors: vec![Anchor::Center],
            offset: Vec2::ZERO,
            buffer: Vec2::ZERO,
            repeat_group: 0,
            repeat_distance: 0.0,
            required: true,
            collide: true,
            select_time_ms: 0.0,
            fade_in_ms: 0.0,
            fade_out_ms: 0.0,
            selection_color: 0,
            param_hash: 0,
        }
    }
}

/// Linear alpha ramp driving fade transitions.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FadeEffect {
    rising: bool,
    duration_ms: f32,
    elapsed_ms: f32,
}

impl FadeEffect {
    pub(crate) fn rise(duration_ms: f32) -> Self {
        Self { rising: true, duration_ms, elapsed_ms: 0.0 }
    }

    pub(crate) fn fall(duration_ms: f32) -> Self {
        Self { rising: false, duration_ms, elapsed_ms: 0.0 }
    }

    pub(crate) fn update(&mut self, dt_ms: f32) -> f32 {
        self.elapsed_ms += dt_ms;
        let t = if self.duration_ms <= 0.0 {
            1.0
        } else {
            (self.elapsed_ms / self.duration_ms).clamp(0.0, 1.0)
        };
        if self.rising {
            t
        } else {
            1.0 - t
        }
    }

    pub(crate) fn finished(&self) -> bool {
        self.duration_ms <= 0.0 || self.elapsed_ms >= self.duration_ms
    }
}

impl Default for FadeEffect {
    fn default() -> Self {
        Self::rise(0.0)
    }
}

/// Variant payload; the operations that differ per kind dispatch on this.
#[derive(Debug)]
pub enum LabelKind {
    Text(TextLabel),
    Curved(CurvedLabel),
}

/// A candidate text or point label.
///
/// Owned by its glyph container inside a tile mesh; the frame driver holds
/// shared handles for the duration of a frame.
#[derive(Debug)]
pub struct Label {
    pub(crate) options: LabelOptions,
    pub(crate) dim: Vec2,
    pub(crate) kind: LabelKind,
    pub(crate) state: State,
    pub(crate) fade: FadeEffect,
    pub(crate) alpha: f32,
    pub(crate) occluded: bool,
    pub(crate) occluded_last_frame: bool,
    pub(crate) anchor_index: usize,
    /// Screen offset of the current anchor, recomputed by `apply_anchor`.
    pub(crate) anchor: Vec2,
    pub(crate) screen_center: Vec2,
    pub(crate) parent: Option<Weak<RefCell<Label>>>,
    /// Monotonic creation id; final tiebreak of the priority sort.
    pub(crate) id: u64,
}

impl Label {
    pub(crate) fn new(dim: Vec2, options: LabelOptions, kind: LabelKind) -> Self {
        let mut label = Self {
            options,
            dim,
            kind,
            state: State::None,
            fade: FadeEffect::default(),
            alpha: 0.0,
            occluded: false,
            occluded_last_frame: false,
            anchor_index: 0,
            anchor: Vec2::ZERO,
            screen_center: Vec2::ZERO,
            parent: None,
            id: NEXT_LABEL_ID.fetch_add(1, Ordering::Relaxed),
        };
        if let Some(&first) = label.options.anchors.first() {
            label.apply_anchor(first);
        }
        label
    }

    pub fn options(&self) -> &LabelOptions {
        &self.options
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn dimension(&self) -> Vec2 {
        self.dim
    }

    pub fn screen_center(&self) -> Vec2 {
        self.screen_center
    }

    pub fn is_occluded(&self) -> bool {
        self.occluded
    }

    pub fn occluded_last_frame(&self) -> bool {
        self.occluded_last_frame
    }

    pub fn can_occlude(&self) -> bool {
        self.options.collide
    }

    pub fn selection_color(&self) -> u32 {
        self.options.selection_color
    }

    pub fn hash(&self) -> u64 {
        self.options.param_hash
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn anchor_index(&self) -> usize {
        self.anchor_index
    }

    /// Screen offset of the current anchor relative to the anchor point.
    pub fn anchor_offset(&self) -> Vec2 {
        self.anchor
    }

    pub fn label_type(&self) -> LabelType {
        match &self.kind {
            LabelKind::Text(text) => text.label_type,
            LabelKind::Curved(_) => LabelType::Curved,
        }
    }

    /// Whether the label is in a state that renders.
    pub fn visible_state(&self) -> bool {
        matches!(self.state, State::Visible | State::FadingIn | State::FadingOut)
    }

    pub fn parent(&self) -> Option<Rc<RefCell<Label>>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Link to the sibling label this one depends on. Attached labels do
    /// not repeat-cull on their own; the parent governs spacing.
    pub fn set_parent(&mut self, parent: &Rc<RefCell<Label>>) {
        self.parent = Some(Rc::downgrade(parent));
        self.options.repeat_distance = 0.0;
        if let Some(&anchor) = self.options.anchors.get(self.anchor_index) {
            self.apply_anchor(anchor);
        }
    }

    pub fn occlude(&mut self, occluded: bool) {
        self.occluded = occluded;
    }

    /// Exclude the label from all future frames.
    pub fn kill(&mut self) {
        self.state = State::Dead;
        self.alpha = 0.0;
    }

    /// Forget all carried frame state, as if the label were newly built.
    pub fn reset_state(&mut self) {
        self.state = State::None;
        self.alpha = 0.0;
        self.occluded = false;
        self.occluded_last_frame = false;
        self.set_anchor_index(0);
    }

    /// Jump straight to fully visible, suppressing the fade-in pop when a
    /// matching label was shown by a proxy tile.
    pub fn skip_transitions(&mut self) {
        self.enter_state(State::Visible, 1.0);
    }

    fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha.clamp(0.0, 1.0);
    }

    pub(crate) fn enter_state(&mut self, state: State, alpha: f32) {
        if self.state == State::Dead {
            return;
        }
        self.state = state;
        self.set_alpha(alpha);
        if state == State::Sleep {
            // Wake up at the preferred anchor, not wherever fallback left us.
            self.set_anchor_index(0);
        }
    }

    pub(crate) fn set_anchor_index(&mut self, index: usize) {
        if let Some(&anchor) = self.options.anchors.get(index) {
            self.anchor_index = index;
            self.apply_anchor(anchor);
        }
    }

    /// Advance to the next fallback anchor. Returns false once the list is
    /// exhausted (a single-anchor label has no fallback).
    pub fn next_anchor(&mut self) -> bool {
        let count = self.options.anchors.len();
        if count == 0 {
            return false;
        }
        let index = self.anchor_index;
        self.set_anchor_index((index + 1) % count);
        self.anchor_index != index
    }

    pub(crate) fn apply_anchor(&mut self, anchor: Anchor) {
        let payload = match &mut self.kind {
            LabelKind::Text(text) => &mut text.text,
            LabelKind::Curved(curved) => &mut curved.text,
        };
        payload.select_text_range(anchor);

        let mut extent = self.dim;
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            extent += parent.borrow().dimension();
        }
        self.anchor = anchor.direction() * extent * 0.5;
    }

    /// Project the label for this frame, writing its screen transform into
    /// the arena. Returns false when the label is dropped for the frame
    /// (clipped, or a line segment too short for the text).
    pub fn update(
        &mut self,
        mvp: &Mat4,
        view: &ViewState,
        transform: &mut ScreenTransform,
    ) -> bool {
        self.occluded_last_frame = self.occluded;
        self.occluded = false;

        let outcome = if matches!(self.kind, LabelKind::Text(_)) {
            self.update_text_transform(mvp, view, transform)
        } else {
            self.update_curved_transform(mvp, view, transform)
        };

        match outcome {
            ProjectionOutcome::Placed => {
                if self.state == State::OutOfScreen {
                    self.enter_state(State::Sleep, 0.0);
                }
                true
            }
            ProjectionOutcome::Clipped => {
                self.enter_state(State::OutOfScreen, 0.0);
                false
            }
            ProjectionOutcome::Dropped => false,
        }
    }

    /// Emit the collision OBBs for the current anchor into the arena. With
    /// `append` unset, overwrites the previously emitted range in place
    /// (anchor fallback re-tests without growing the arena).
    pub fn obbs(&self, points: &[Vec2], obbs: &mut Vec<Obb>, range: &mut Range, append: bool) {
        match &self.kind {
            LabelKind::Text(_) => self.text_obbs(points, obbs, range, append),
            LabelKind::Curved(_) => self.curved_obbs(points, obbs, range, append),
        }
    }

    /// Push the label's glyph quads into its style's atlas meshes.
    pub fn add_vertices_to_mesh(&self, points: &[Vec2], screen_size: Vec2) {
        match &self.kind {
            LabelKind::Text(_) => self.add_text_vertices(points, screen_size),
            LabelKind::Curved(_) => self.add_curved_vertices(points, screen_size),
        }
    }

    /// Squared world length of the anchoring segment; 0 for non-line labels.
    pub fn world_line_length2(&self) -> f32 {
        match &self.kind {
            LabelKind::Text(text) => text.world_line_length2(),
            LabelKind::Curved(_) => 0.0,
        }
    }

    /// Placement quality of a curved candidate; 0 for other kinds.
    pub fn candidate_priority(&self) -> f32 {
        match &self.kind {
            LabelKind::Curved(curved) => curved.candidate_priority,
            LabelKind::Text(_) => 0.0,
        }
    }

    /// Advance the fade state machine after occlusion was decided. Returns
    /// true while the label still animates and needs another frame.
    pub fn eval_state(&mut self, dt_ms: f32, draw_all: bool) -> bool {
        if draw_all {
            self.enter_state(State::Visible, 1.0);
            return false;
        }

        match self.state {
            State::None | State::Sleep => {
                if self.occluded {
                    self.enter_state(State::Sleep, 0.0);
                    return false;
                }
                self.fade = FadeEffect::rise(self.options.fade_in_ms);
                self.enter_state(State::FadingIn, 0.0);
                let alpha = self.fade.update(dt_ms);
                self.set_alpha(alpha);
                true
            }
            State::Visible => {
                if !self.occluded {
                    return false;
                }
                self.fade = FadeEffect::fall(self.options.fade_out_ms);
                self.enter_state(State::FadingOut, 1.0);
                let alpha = self.fade.update(dt_ms);
                self.set_alpha(alpha);
                true
            }
            State::FadingIn => {
                if self.occluded {
                    self.enter_state(State::Sleep, 0.0);
                    return false;
                }
                let alpha = self.fade.update(dt_ms);
                self.set_alpha(alpha);
                if self.fade.finished() {
                    self.enter_state(State::Visible, 1.0);
                    return false;
                }
                true
            }
            State::FadingOut => {
                if !self.occluded {
                    // Placed again before the fade completed.
                    self.enter_state(State::Visible, 1.0);
                    return false;
                }
                let alpha = self.fade.update(dt_ms);
                self.set_alpha(alpha);
                if self.fade.finished() {
                    self.enter_state(State::Sleep, 0.0);
                    return false;
                }
                true
            }
            State::OutOfScreen => {
                if self.occluded {
                    self.enter_state(State::Sleep, 0.0);
                }
                false
            }
            State::Dead => false,
        }
    }
}

//! End-to-end placement tests driving the full frame pipeline: collection,
//! sort, occlusion, state evaluation and quad emission.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use glam::{I16Vec2, Mat4, U16Vec2, Vec2};

use placard::{
    AtlasRefs, FontContext, GlyphQuad, GlyphVertex, Label, LabelOptions, LabelType, Labels,
    Marker, Range, State, TextLabels, TextStyle, TextVertex, Tile, TileCache, TileId,
    VertexAttributes, ViewState, WorldTransform,
};

const VIEWPORT: Vec2 = Vec2::new(800.0, 600.0);

struct NullFontContext;

impl FontContext for NullFontContext {
    fn release_atlas(&self, _refs: AtlasRefs) {}
}

#[derive(Default)]
struct MapCache(HashMap<(i32, TileId), Rc<Tile>>);

impl TileCache for MapCache {
    fn contains(&self, source_id: i32, id: TileId) -> Option<Rc<Tile>> {
        self.0.get(&(source_id, id)).cloned()
    }
}

fn view_at(zoom: f32) -> ViewState {
    ViewState::new(VIEWPORT, zoom)
}

/// World position that the identity mvp maps to `screen`.
fn world_for_screen(screen: Vec2) -> Vec2 {
    Vec2::new(
        screen.x / VIEWPORT.x * 2.0 - 1.0,
        1.0 - screen.y / VIEWPORT.y * 2.0,
    )
}

fn make_style(id: u32) -> Rc<TextStyle> {
    Rc::new(TextStyle::new(id, Rc::new(NullFontContext)))
}

/// A single centered glyph quad covering the label dimensions.
fn quad_for(dim: Vec2) -> GlyphQuad {
    let half = dim * 0.5 * TextVertex::POSITION_SCALE;
    let vertex = |x: f32, y: f32| GlyphVertex {
        pos: I16Vec2::new(x as i16, y as i16),
        uv: U16Vec2::ZERO,
    };
    GlyphQuad {
        atlas: 0,
        vertices: [
            vertex(-half.x, -half.y),
            vertex(half.x, -half.y),
            vertex(half.x, half.y),
            vertex(-half.x, half.y),
        ],
    }
}

fn make_container(style: &Rc<TextStyle>, quad_dim: Vec2) -> Rc<RefCell<TextLabels>> {
    let container = TextLabels::new(Rc::clone(style));
    container.borrow_mut().set_quads(vec![quad_for(quad_dim)], 1);
    container
}

fn text_ranges() -> [Range; 3] {
    [Range::new(0, 1), Range::default(), Range::default()]
}

fn add_point_label(
    container: &Rc<RefCell<TextLabels>>,
    screen: Vec2,
    dim: Vec2,
    options: LabelOptions,
) -> Rc<RefCell<Label>> {
    let label = Label::new_text(
        WorldTransform::Point(world_for_screen(screen)),
        LabelType::Point,
        dim,
        options,
        VertexAttributes::default(),
        container,
        text_ranges(),
        None,
    );
    container.borrow_mut().add_label(Rc::clone(&label));
    label
}

fn make_tile(mesh: Rc<RefCell<TextLabels>>, style_id: u32, id: TileId, proxy: bool) -> Rc<Tile> {
    let mut tile = Tile::new(id, 0, proxy, Mat4::IDENTITY);
    tile.set_mesh(style_id, mesh);
    Rc::new(tile)
}

#[test]
fn test_higher_priority_wins_overlap() {
    let style = make_style(1);
    let container = make_container(&style, Vec2::new(100.0, 20.0));
    let a = add_point_label(
        &container,
        Vec2::new(400.0, 300.0),
        Vec2::new(100.0, 20.0),
        LabelOptions {
            priority: 5,
            ..Default::default()
        },
    );
    let b = add_point_label(
        &container,
        Vec2::new(410.0, 305.0),
        Vec2::new(100.0, 20.0),
        LabelOptions {
            priority: 10,
            ..Default::default()
        },
    );
    let tile = make_tile(container, 1, TileId::new(0, 0, 14), false);

    let mut labels = Labels::new();
    labels.update_label_set(
        &view_at(14.0),
        0.0,
        &[Rc::clone(&style)],
        &[tile],
        &[],
        &MapCache::default(),
    );

    assert!(a.borrow().visible_state());
    assert!(b.borrow().is_occluded());
    assert_eq!(b.borrow().state(), State::Sleep);
}

#[test]
fn test_repeat_group_spacing() {
    let style = make_style(1);
    let container = make_container(&style, Vec2::new(30.0, 10.0));
    let options = || LabelOptions {
        repeat_group: 42,
        repeat_distance: 50.0,
        ..Default::default()
    };
    let dim = Vec2::new(30.0, 10.0);
    let first = add_point_label(&container, Vec2::new(100.0, 100.0), dim, options());
    let second = add_point_label(&container, Vec2::new(140.0, 100.0), dim, options());
    let third = add_point_label(&container, Vec2::new(200.0, 100.0), dim, options());
    let tile = make_tile(container, 1, TileId::new(0, 0, 14), false);

    let mut labels = Labels::new();
    labels.update_label_set(
        &view_at(14.0),
        0.0,
        &[Rc::clone(&style)],
        &[tile],
        &[],
        &MapCache::default(),
    );

    assert!(first.borrow().visible_state());
    assert!(second.borrow().is_occluded());
    assert!(third.borrow().visible_state());
}

#[test]
fn test_anchor_fallback_places_label_on_top() {
    let style = make_style(1);
    let container = make_container(&style, Vec2::new(80.0, 20.0));
    // Thin obstacle across the center anchor region.
    let obstacle = add_point_label(
        &container,
        Vec2::new(400.0, 302.0),
        Vec2::new(90.0, 3.0),
        LabelOptions {
            priority: 1,
            ..Default::default()
        },
    );
    let label = add_point_label(
        &container,
        Vec2::new(400.0, 300.0),
        Vec2::new(80.0, 20.0),
        LabelOptions {
            priority: 5,
            anchors: vec![
                placard::Anchor::Center,
                placard::Anchor::Top,
                placard::Anchor::Bottom,
            ],
            ..Default::default()
        },
    );
    let tile = make_tile(container, 1, TileId::new(0, 0, 14), false);

    let mut labels = Labels::new();
    labels.update_label_set(
        &view_at(14.0),
        0.0,
        &[Rc::clone(&style)],
        &[tile],
        &[],
        &MapCache::default(),
    );

    assert!(obstacle.borrow().visible_state());
    let label = label.borrow();
    assert!(label.visible_state());
    assert_eq!(label.anchor_index(), 1);
    assert_eq!(label.anchor_offset(), Vec2::new(0.0, -10.0));
}

#[test]
fn test_occlusion_starts_fade_out() {
    let style = make_style(1);
    let container = make_container(&style, Vec2::new(100.0, 20.0));
    let b = add_point_label(
        &container,
        Vec2::new(400.0, 300.0),
        Vec2::new(100.0, 20.0),
        LabelOptions {
            priority: 5,
            fade_out_ms: 250.0,
            ..Default::default()
        },
    );
    let tile = make_tile(Rc::clone(&container), 1, TileId::new(0, 0, 14), false);
    let styles = [Rc::clone(&style)];
    let cache = MapCache::default();

    let mut labels = Labels::new();
    // Two frames alone: fading in, then steady visible.
    labels.update_label_set(&view_at(14.0), 0.0, &styles, &[Rc::clone(&tile)], &[], &cache);
    labels.update_label_set(&view_at(14.0), 0.0, &styles, &[Rc::clone(&tile)], &[], &cache);
    assert_eq!(b.borrow().state(), State::Visible);

    // A stronger competitor appears on top of it.
    add_point_label(
        &container,
        Vec2::new(410.0, 305.0),
        Vec2::new(100.0, 20.0),
        LabelOptions {
            priority: 1,
            ..Default::default()
        },
    );
    labels.update_label_set(&view_at(14.0), 100.0, &styles, &[tile], &[], &cache);

    let b = b.borrow();
    assert_eq!(b.state(), State::FadingOut);
    assert!((b.alpha() - 0.6).abs() < 1e-4);
    assert!(labels.needs_update());
}

#[test]
fn test_proxy_skip_on_zoom_in() {
    let style = make_style(1);
    let styles = [Rc::clone(&style)];

    // Parent tile shown at zoom 14 with a visible label.
    let parent_container = make_container(&style, Vec2::new(30.0, 12.0));
    let parent_label = add_point_label(
        &parent_container,
        Vec2::new(400.0, 300.0),
        Vec2::new(30.0, 12.0),
        LabelOptions {
            repeat_group: 7,
            ..Default::default()
        },
    );
    let parent_tile = make_tile(parent_container, 1, TileId::new(0, 0, 14), false);

    let mut labels = Labels::new();
    let cache = MapCache::default();
    labels.update_label_set(
        &view_at(14.0),
        0.0,
        &styles,
        &[Rc::clone(&parent_tile)],
        &[],
        &cache,
    );
    assert!(parent_label.borrow().visible_state());

    // Zoom to 15; the child tile carries a matching label nearby.
    let child_container = make_container(&style, Vec2::new(30.0, 12.0));
    let child_label = add_point_label(
        &child_container,
        Vec2::new(400.0, 310.0),
        Vec2::new(30.0, 12.0),
        LabelOptions {
            repeat_group: 7,
            ..Default::default()
        },
    );
    let child_tile = make_tile(child_container, 1, TileId::new(0, 0, 15), false);

    let mut cache = MapCache::default();
    cache.0.insert((0, TileId::new(0, 0, 14)), parent_tile);

    assert_eq!(child_label.borrow().state(), State::None);
    labels.update_label_set(&view_at(15.0), 0.0, &styles, &[child_tile], &[], &cache);

    let child = child_label.borrow();
    assert_eq!(child.state(), State::Visible);
    assert_eq!(child.alpha(), 1.0);
}

#[test]
fn test_occluded_required_child_occludes_parent() {
    let style = make_style(1);
    let container = make_container(&style, Vec2::new(40.0, 20.0));
    let obstacle = add_point_label(
        &container,
        Vec2::new(400.0, 340.0),
        Vec2::new(40.0, 20.0),
        LabelOptions {
            priority: 1,
            ..Default::default()
        },
    );
    let parent = add_point_label(
        &container,
        Vec2::new(400.0, 300.0),
        Vec2::new(40.0, 20.0),
        LabelOptions {
            priority: 5,
            ..Default::default()
        },
    );
    let child = add_point_label(
        &container,
        Vec2::new(400.0, 340.0),
        Vec2::new(40.0, 20.0),
        LabelOptions {
            priority: 6,
            required: true,
            ..Default::default()
        },
    );
    child.borrow_mut().set_parent(&parent);
    let tile = make_tile(container, 1, TileId::new(0, 0, 14), false);

    let mut labels = Labels::new();
    labels.update_label_set(
        &view_at(14.0),
        0.0,
        &[Rc::clone(&style)],
        &[tile],
        &[],
        &MapCache::default(),
    );

    assert!(obstacle.borrow().visible_state());
    assert!(child.borrow().is_occluded());
    assert!(parent.borrow().is_occluded());
    assert!(!parent.borrow().visible_state());
}

#[test]
fn test_child_never_collides_with_parent() {
    let style = make_style(1);
    let container = make_container(&style, Vec2::new(60.0, 20.0));
    let parent = add_point_label(
        &container,
        Vec2::new(400.0, 300.0),
        Vec2::new(60.0, 20.0),
        LabelOptions {
            priority: 5,
            ..Default::default()
        },
    );
    let child = add_point_label(
        &container,
        Vec2::new(400.0, 305.0),
        Vec2::new(60.0, 20.0),
        LabelOptions {
            priority: 6,
            ..Default::default()
        },
    );
    child.borrow_mut().set_parent(&parent);
    let tile = make_tile(container, 1, TileId::new(0, 0, 14), false);

    let mut labels = Labels::new();
    labels.update_label_set(
        &view_at(14.0),
        0.0,
        &[Rc::clone(&style)],
        &[tile],
        &[],
        &MapCache::default(),
    );

    assert!(parent.borrow().visible_state());
    assert!(child.borrow().visible_state());
}

#[test]
fn test_vertex_positions_quantize_within_quarter_pixel() {
    let style = make_style(1);
    let dim = Vec2::new(80.0, 20.0);
    let container = make_container(&style, dim);
    let screen = Vec2::new(400.3, 300.7);
    add_point_label(&container, screen, dim, LabelOptions::default());
    let tile = make_tile(container, 1, TileId::new(0, 0, 14), false);

    let mut labels = Labels::new();
    labels.update_label_set(
        &view_at(14.0),
        0.0,
        &[Rc::clone(&style)],
        &[tile],
        &[],
        &MapCache::default(),
    );

    let meshes = style.meshes();
    let vertices = meshes[0].vertices();
    assert_eq!(vertices.len(), 4);

    let expected = [
        screen + Vec2::new(-40.0, -10.0),
        screen + Vec2::new(40.0, -10.0),
        screen + Vec2::new(40.0, 10.0),
        screen + Vec2::new(-40.0, 10.0),
    ];
    for (vertex, expected) in vertices.iter().zip(expected) {
        let dequantized = Vec2::new(
            vertex.pos.x as f32 * TextVertex::POSITION_INV_SCALE,
            vertex.pos.y as f32 * TextVertex::POSITION_INV_SCALE,
        );
        assert!((dequantized.x - expected.x).abs() <= 0.25);
        assert!((dequantized.y - expected.y).abs() <= 0.25);
    }
}

#[test]
fn test_update_is_idempotent_with_zero_dt() {
    let style = make_style(1);
    let dim = Vec2::new(100.0, 20.0);
    let container = make_container(&style, dim);
    add_point_label(
        &container,
        Vec2::new(400.0, 300.0),
        dim,
        LabelOptions {
            priority: 5,
            ..Default::default()
        },
    );
    add_point_label(
        &container,
        Vec2::new(410.0, 305.0),
        dim,
        LabelOptions {
            priority: 10,
            ..Default::default()
        },
    );
    let tile = make_tile(container, 1, TileId::new(0, 0, 14), false);
    let styles = [Rc::clone(&style)];
    let cache = MapCache::default();

    let mut labels = Labels::new();
    labels.update_label_set(&view_at(14.0), 0.0, &styles, &[Rc::clone(&tile)], &[], &cache);
    let first: Vec<_> = style.meshes()[0].vertices().to_vec();

    labels.update_label_set(&view_at(14.0), 0.0, &styles, &[tile], &[], &cache);
    let second: Vec<_> = style.meshes()[0].vertices().to_vec();

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn test_marker_insertion_order_breaks_ties() {
    let style = make_style(1);
    let dim = Vec2::new(60.0, 20.0);

    let first_container = make_container(&style, dim);
    let first = add_point_label(&first_container, Vec2::new(400.0, 300.0), dim, LabelOptions::default());
    let mut first_marker = Marker::new(1, Mat4::IDENTITY);
    first_marker.set_mesh(first_container);

    let second_container = make_container(&style, dim);
    let second = add_point_label(&second_container, Vec2::new(420.0, 305.0), dim, LabelOptions::default());
    let mut second_marker = Marker::new(1, Mat4::IDENTITY);
    second_marker.set_mesh(second_container);

    let mut labels = Labels::new();
    labels.update_label_set(
        &view_at(14.0),
        0.0,
        &[Rc::clone(&style)],
        &[],
        &[first_marker, second_marker],
        &MapCache::default(),
    );

    assert!(first.borrow().visible_state());
    assert!(second.borrow().is_occluded());
}

#[test]
fn test_get_label_finds_visible_selection() {
    let style = make_style(1);
    let dim = Vec2::new(60.0, 20.0);
    let container = make_container(&style, dim);
    add_point_label(
        &container,
        Vec2::new(400.0, 300.0),
        dim,
        LabelOptions {
            selection_color: 0xff00aa,
            ..Default::default()
        },
    );
    let tile = make_tile(container, 1, TileId::new(0, 0, 14), false);

    let mut labels = Labels::new();
    labels.update_label_set(
        &view_at(14.0),
        0.0,
        &[Rc::clone(&style)],
        &[Rc::clone(&tile)],
        &[],
        &MapCache::default(),
    );

    let (label, hit_tile) = labels.get_label(0xff00aa).expect("selectable label");
    assert_eq!(label.borrow().selection_color(), 0xff00aa);
    assert!(Rc::ptr_eq(&hit_tile.expect("tile"), &tile));

    assert!(labels.get_label(0x123456).is_none());
}

#[test]
fn test_label_outside_viewport_emits_no_quads() {
    let style = make_style(1);
    let dim = Vec2::new(40.0, 16.0);
    let container = make_container(&style, dim);
    // Projects fine but the box sits right of the viewport.
    let label = add_point_label(&container, Vec2::new(1000.0, 300.0), dim, LabelOptions::default());
    let tile = make_tile(container, 1, TileId::new(0, 0, 14), false);

    let mut labels = Labels::new();
    labels.update_label_set(
        &view_at(14.0),
        0.0,
        &[Rc::clone(&style)],
        &[tile],
        &[],
        &MapCache::default(),
    );

    assert!(label.borrow().visible_state());
    assert!(style.meshes().iter().all(|mesh| mesh.is_empty()));
}

#[test]
fn test_clipped_label_goes_out_of_screen() {
    let style = make_style(1);
    let dim = Vec2::new(40.0, 16.0);
    let container = make_container(&style, dim);
    let label = add_point_label(&container, Vec2::new(400.0, 300.0), dim, LabelOptions::default());

    // A matrix that puts everything behind the camera.
    let mut tile = Tile::new(TileId::new(0, 0, 14), 0, false, Mat4::from_diagonal(glam::Vec4::new(1.0, 1.0, 1.0, -1.0)));
    tile.set_mesh(1, container);

    let mut labels = Labels::new();
    labels.update_label_set(
        &view_at(14.0),
        0.0,
        &[Rc::clone(&style)],
        &[Rc::new(tile)],
        &[],
        &MapCache::default(),
    );

    assert_eq!(label.borrow().state(), State::OutOfScreen);
    assert!(style.meshes().iter().all(|mesh| mesh.is_empty()));
}

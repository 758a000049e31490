//! Screen-space label placement and occlusion for a vector-tile renderer.
//!
//! Every frame the engine receives the candidate labels built into tile and
//! marker meshes, projects them into screen space, decides greedily which
//! ones are visible and which are hidden by higher-priority neighbors, and
//! fades each one in or out over time. The output is a set of fixed-point
//! vertex quads pushed into per-atlas meshes that a downstream renderer
//! draws; this crate never touches the GPU.
//!
//! The engine is single threaded and does not fail: labels that cannot be
//! placed this frame are filtered, never reported as errors.

pub mod labels;
pub mod marker;
pub mod style;
pub mod tile;
pub mod view;

pub use labels::{
    Align, Anchor, CurvedLabel, Label, LabelEntry, LabelOptions, LabelType, Labels, Range, State,
    TextLabel, TextLabels, VertexAttributes, WorldTransform,
};
pub use marker::Marker;
pub use style::{
    AtlasRefs, DynamicQuadMesh, FontContext, GlyphQuad, GlyphVertex, TextStyle, TextVertex,
    TextVertexState,
};
pub use tile::{Tile, TileCache, TileId};
pub use view::ViewState;

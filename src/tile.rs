//! Tiles and the proxy lookup surface.
//!
//! The tile cache and the in-view tile set are owned elsewhere; the label
//! engine only reads ids, matrices and label meshes, and asks the cache for
//! proxies while the zoom level settles.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use glam::Mat4;

use crate::labels::TextLabels;

/// Quadtree tile address within one data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileId {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl TileId {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The tile one zoom level up that covers this one.
    pub fn parent(self) -> TileId {
        TileId::new(self.x >> 1, self.y >> 1, self.z - 1)
    }

    /// One of the four tiles covering this one at the next zoom level.
    pub fn child(self, index: usize) -> TileId {
        TileId::new(
            self.x * 2 + (index as i32 & 1),
            self.y * 2 + (index as i32 >> 1),
            self.z + 1,
        )
    }
}

/// A visible tile holding one label mesh per style.
#[derive(Debug)]
pub struct Tile {
    id: TileId,
    source_id: i32,
    proxy: bool,
    mvp: Mat4,
    meshes: HashMap<u32, Rc<RefCell<TextLabels>>>,
}

impl Tile {
    pub fn new(id: TileId, source_id: i32, proxy: bool, mvp: Mat4) -> Self {
        Self {
            id,
            source_id,
            proxy,
            mvp,
            meshes: HashMap::new(),
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn source_id(&self) -> i32 {
        self.source_id
    }

    /// Whether this tile stands in for a tile still loading at the current
    /// zoom level.
    pub fn is_proxy(&self) -> bool {
        self.proxy
    }

    pub fn mvp(&self) -> Mat4 {
        self.mvp
    }

    pub fn set_mesh(&mut self, style_id: u32, mesh: Rc<RefCell<TextLabels>>) {
        self.meshes.insert(style_id, mesh);
    }

    pub fn mesh(&self, style_id: u32) -> Option<&Rc<RefCell<TextLabels>>> {
        self.meshes.get(&style_id)
    }
}

/// Lookup into the cache of recently evicted tiles, used to find proxies.
pub trait TileCache {
    fn contains(&self, source_id: i32, id: TileId) -> Option<Rc<Tile>>;
}

//! Uniform-grid broadphase over label extents.
//!
//! The viewport is split into coarse cells; each inserted extent lands in
//! every cell it overlaps. Queries visit each candidate once, in insertion
//! order, and may short-circuit through the callback.

use glam::Vec2;

use crate::labels::obb::Aabb;

/// Grid broadphase; each entry carries the index of its oriented box in the
/// frame's OBB arena.
#[derive(Debug, Default)]
pub struct Isect2D {
    split: (usize, usize),
    resolution: Vec2,
    entries: Vec<(Aabb, usize)>,
    cells: Vec<Vec<u32>>,
    stamps: Vec<u32>,
    generation: u32,
}

impl Isect2D {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the grid for a new viewport. Discards all entries.
    pub fn resize(&mut self, split: (usize, usize), resolution: Vec2) {
        self.split = (split.0.max(1), split.1.max(1));
        self.resolution = resolution;
        self.cells.clear();
        self.cells
            .resize_with(self.split.0 * self.split.1, Vec::new);
        self.entries.clear();
        self.stamps.clear();
        self.generation = 0;
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
        self.entries.clear();
        self.stamps.clear();
        self.generation = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn cell_span(&self, aabb: &Aabb) -> (usize, usize, usize, usize) {
        let (cols, rows) = self.split;
        let cell = Vec2::new(
            self.resolution.x / cols as f32,
            self.resolution.y / rows as f32,
        );
        let clamp = |v: f32, hi: usize| (v.max(0.0) as usize).min(hi - 1);

        let x0 = clamp(aabb.min.x / cell.x, cols);
        let x1 = clamp(aabb.max.x / cell.x, cols);
        let y0 = clamp(aabb.min.y / cell.y, rows);
        let y1 = clamp(aabb.max.y / cell.y, rows);
        (x0, x1, y0, y1)
    }

    /// Insert an extent tagged with its OBB arena index.
    pub fn insert(&mut self, aabb: Aabb, tag: usize) {
        let index = self.entries.len() as u32;
        self.entries.push((aabb, tag));
        self.stamps.push(0);

        let (x0, x1, y0, y1) = self.cell_span(&aabb);
        for y in y0..=y1 {
            for x in x0..=x1 {
                self.cells[y * self.split.0 + x].push(index);
            }
        }
    }

    /// Visit every stored extent overlapping `aabb`. Entries spanning
    /// several cells are visited once. `visit` receives the stored extent
    /// and its tag; returning `false` stops the query, as does the first
    /// overlap when `stop_on_first` is set.
    pub fn intersect<F>(&mut self, aabb: &Aabb, mut visit: F, stop_on_first: bool)
    where
        F: FnMut(&Aabb, usize) -> bool,
    {
        if self.cells.is_empty() {
            return;
        }

        self.generation = self.generation.wrapping_add(1);

        let (x0, x1, y0, y1) = self.cell_span(aabb);
        for y in y0..=y1 {
            for x in x0..=x1 {
                for &index in &self.cells[y * self.split.0 + x] {
                    let index = index as usize;
                    if self.stamps[index] == self.generation {
                        continue;
                    }
                    self.stamps[index] = self.generation;

                    let (other, tag) = self.entries[index];
                    if !aabb.intersects(&other) {
                        continue;
                    }
                    if !visit(&other, tag) || stop_on_first {
                        return;
                    }
                }
            }
        }
    }
}

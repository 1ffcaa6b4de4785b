//! Renderer-facing cache of per-row GPU vertex records.
//!
//! Shaping a row (font fallback, ligatures, atlas uploads) is expensive;
//! rows rarely change. The renderer keys this cache by (screen kind,
//! row id, selection signature): a clean hit replays the stored vertices
//! with only their viewport y rewritten, a miss or dirty row re-shapes
//! through the caller's shaper callback. The cursor is never cached; it is
//! drawn over the cached cells from live state.

use rustc_hash::FxHashMap;

use crate::page::RowId;
use crate::screen::ScreenKind;

/// Vertex kinds, in paint order.
pub const VERTEX_BG: u32 = 0;
pub const VERTEX_FG: u32 = 1;
pub const VERTEX_UNDERLINE: u32 = 2;
pub const VERTEX_STRIKE: u32 = 3;
pub const VERTEX_CURSOR: u32 = 4;

/// One GPU-ready record. `#[repr(C)]` + Pod so vertex buffers upload the
/// slice directly.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CellVertex {
    /// One of the VERTEX_* kinds.
    pub kind: u32,
    /// Render mode bits (colored glyph, dim, etc.), shaper-defined.
    pub mode: u32,
    /// Grid position in cells.
    pub grid_x: f32,
    pub grid_y: f32,
    /// Glyph rectangle in the atlas, in texels.
    pub tex_x: f32,
    pub tex_y: f32,
    pub tex_w: f32,
    pub tex_h: f32,
    /// Glyph bearing offset within the cell, in pixels.
    pub offset_x: f32,
    pub offset_y: f32,
    pub rgba: [f32; 4],
}

/// Cache key: the row identity plus everything that changes its vertices
/// without touching its cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub screen: ScreenKind,
    pub row_id: RowId,
    /// Selection fingerprint covering this row (0 = unselected). Keeping
    /// it in the key lets a reverted selection reuse older entries.
    pub selection: u64,
}

struct Entry {
    vertices: Vec<CellVertex>,
    last_used: u64,
}

/// Row-keyed LRU vertex cache.
pub struct CellCache {
    entries: FxHashMap<RowKey, Entry>,
    capacity: usize,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl CellCache {
    /// Capacity follows the viewport: `max(80, visible_rows * 10)`.
    pub fn new(visible_rows: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            capacity: Self::capacity_for(visible_rows),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn capacity_for(visible_rows: usize) -> usize {
        (visible_rows * 10).max(80)
    }

    /// Re-derive capacity after a viewport resize, evicting as needed.
    pub fn set_visible_rows(&mut self, visible_rows: usize) {
        self.capacity = Self::capacity_for(visible_rows);
        while self.entries.len() > self.capacity {
            self.evict_one();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Fetch a row's vertices, rebuilding through `shape` when the row is
    /// dirty or absent. The cached records' `grid_y` is rewritten to the
    /// current viewport position either way.
    pub fn fetch_or_shape<F>(
        &mut self,
        key: RowKey,
        viewport_y: f32,
        row_dirty: bool,
        shape: F,
    ) -> &[CellVertex]
    where
        F: FnOnce() -> Vec<CellVertex>,
    {
        self.tick += 1;
        let tick = self.tick;

        if !row_dirty && self.entries.contains_key(&key) {
            self.hits += 1;
            let entry = self.entries.get_mut(&key).unwrap();
            entry.last_used = tick;
            for v in &mut entry.vertices {
                v.grid_y = viewport_y;
            }
            return &entry.vertices;
        }

        self.misses += 1;
        let mut vertices = shape();
        for v in &mut vertices {
            v.grid_y = viewport_y;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_one();
        }
        self.entries.insert(
            key,
            Entry {
                vertices,
                last_used: tick,
            },
        );
        &self.entries[&key].vertices
    }

    /// Drop every entry whose row id is in `row_ids` (selection changes
    /// invalidate exactly the rows the old and new shapes touch).
    pub fn invalidate_rows(&mut self, row_ids: &[RowId]) {
        self.entries.retain(|key, _| !row_ids.contains(&key.row_id));
    }

    /// Drop everything belonging to one screen.
    pub fn invalidate_screen(&mut self, screen: ScreenKind) {
        self.entries.retain(|key, _| key.screen != screen);
    }

    fn evict_one(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| *k)
        {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: RowId) -> RowKey {
        RowKey {
            screen: ScreenKind::Primary,
            row_id: id,
            selection: 0,
        }
    }

    fn vert(x: f32) -> CellVertex {
        CellVertex {
            kind: VERTEX_FG,
            mode: 0,
            grid_x: x,
            grid_y: 0.0,
            tex_x: 0.0,
            tex_y: 0.0,
            tex_w: 8.0,
            tex_h: 16.0,
            offset_x: 0.0,
            offset_y: 0.0,
            rgba: [1.0; 4],
        }
    }

    #[test]
    fn hit_reuses_and_rewrites_y() {
        let mut cache = CellCache::new(24);
        let built = cache.fetch_or_shape(key(1), 3.0, false, || vec![vert(0.0), vert(1.0)]);
        assert_eq!(built[0].grid_y, 3.0);

        let mut shaped_again = false;
        let cached = cache.fetch_or_shape(key(1), 7.0, false, || {
            shaped_again = true;
            vec![]
        });
        assert!(!shaped_again);
        assert_eq!(cached.len(), 2);
        assert!(cached.iter().all(|v| v.grid_y == 7.0));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn dirty_row_reshapes() {
        let mut cache = CellCache::new(24);
        cache.fetch_or_shape(key(1), 0.0, false, || vec![vert(0.0)]);
        let rebuilt = cache.fetch_or_shape(key(1), 0.0, true, || vec![vert(5.0)]);
        assert_eq!(rebuilt[0].grid_x, 5.0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn selection_signature_separates_entries() {
        let mut cache = CellCache::new(24);
        let plain = key(1);
        let selected = RowKey {
            selection: 42,
            ..plain
        };
        cache.fetch_or_shape(plain, 0.0, false, || vec![vert(0.0)]);
        cache.fetch_or_shape(selected, 0.0, false, || vec![vert(1.0)]);
        assert_eq!(cache.len(), 2);

        // Selection reverted: the old entry is still there.
        let mut reshaped = false;
        cache.fetch_or_shape(plain, 0.0, false, || {
            reshaped = true;
            vec![]
        });
        assert!(!reshaped);
    }

    #[test]
    fn lru_evicts_oldest() {
        let mut cache = CellCache::new(1); // capacity 80
        for id in 0..80 {
            cache.fetch_or_shape(key(id), 0.0, false, || vec![vert(id as f32)]);
        }
        assert_eq!(cache.len(), 80);
        // Touch row 0 so row 1 becomes the oldest.
        cache.fetch_or_shape(key(0), 0.0, false, Vec::new);
        cache.fetch_or_shape(key(100), 0.0, false, || vec![vert(100.0)]);
        assert_eq!(cache.len(), 80);

        let mut reshaped = false;
        cache.fetch_or_shape(key(1), 0.0, false, || {
            reshaped = true;
            vec![]
        });
        assert!(reshaped, "row 1 should have been evicted");
    }

    #[test]
    fn invalidation_by_rows_and_screen() {
        let mut cache = CellCache::new(24);
        cache.fetch_or_shape(key(1), 0.0, false, || vec![vert(0.0)]);
        cache.fetch_or_shape(key(2), 0.0, false, || vec![vert(0.0)]);
        let alt = RowKey {
            screen: ScreenKind::Alt,
            row_id: 3,
            selection: 0,
        };
        cache.fetch_or_shape(alt, 0.0, false, || vec![vert(0.0)]);

        cache.invalidate_rows(&[1]);
        assert_eq!(cache.len(), 2);
        cache.invalidate_screen(ScreenKind::Alt);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn vertex_is_pod_sized() {
        assert_eq!(std::mem::size_of::<CellVertex>(), 56);
    }
}

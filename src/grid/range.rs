//! Range grid (SPEC_FULL.md §4.3): for layouts too irregular for a
//! shared pitch — MIRAX's non-hierarchical tile index, where tiles can
//! be any size and placed at arbitrary level-space offsets.
//!
//! Tiles are kept in two axis-sorted interval lists. A query binary
//! searches each axis for the candidate range of tiles whose interval
//! could overlap the request, then refines with an exact rectangle
//! test, since tile rectangles are not assumed aligned to any shared
//! grid.

use crate::error::SlideError;

use super::{Canvas, Grid, TileSource};

use super::TileRecord;

struct RangeTile {
    col: u32,
    row: u32,
    x: i64,
    y: i64,
    w: u32,
    h: u32,
    opaque: u64,
}

/// A sparse grid of arbitrarily-placed, arbitrarily-sized tiles.
pub struct RangeGrid {
    tiles: Vec<RangeTile>,
    by_x_end: Vec<usize>,
}

impl RangeGrid {
    pub fn new() -> Self {
        RangeGrid { tiles: Vec::new(), by_x_end: Vec::new() }
    }

    /// Register a tile's rectangle and `(col, row)` index identity.
    /// `opaque` is handed back to the backend's `read_tile` verbatim
    /// (MIRAX's data-file byte range).
    pub fn insert(&mut self, col: u32, row: u32, x: i64, y: i64, w: u32, h: u32, opaque: u64) {
        self.tiles.push(RangeTile { col, row, x, y, w, h, opaque });
        self.reindex();
    }

    fn reindex(&mut self) {
        let mut order: Vec<usize> = (0..self.tiles.len()).collect();
        order.sort_by_key(|&i| self.tiles[i].x + self.tiles[i].w as i64);
        self.by_x_end = order;
    }

    /// First index in `by_x_end` whose tile's right edge is `> x`:
    /// every tile before it ends strictly before `x` and cannot
    /// overlap a query starting at `x`.
    fn lower_bound(&self, x: i64) -> usize {
        self.by_x_end.partition_point(|&i| {
            let t = &self.tiles[i];
            t.x + t.w as i64 <= x
        })
    }
}

impl Default for RangeGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl Grid for RangeGrid {
    fn paint_region(
        &self,
        canvas: &mut Canvas,
        source: &dyn TileSource,
        level: usize,
        x: i64,
        y: i64,
        w: u32,
        h: u32,
    ) -> Result<(), SlideError> {
        let region_right = x + w as i64;
        let region_bottom = y + h as i64;

        let start = self.lower_bound(x);
        for &idx in &self.by_x_end[start..] {
            let tile = &self.tiles[idx];
            if tile.x >= region_right {
                continue;
            }
            let tile_bottom = tile.y + tile.h as i64;
            if tile.y >= region_bottom || tile_bottom <= y {
                continue;
            }
            let record = TileRecord {
                dx: 0,
                dy: 0,
                tile_w: tile.w,
                tile_h: tile.h,
                opaque: tile.opaque,
            };
            source.read_tile(canvas, level, tile.col, tile.row, Some(&record))?;
        }

        Ok(())
    }

    fn bounds(&self) -> (i64, i64, u32, u32) {
        if self.tiles.is_empty() {
            return (0, 0, 0, 0);
        }

        let mut min_x = i64::MAX;
        let mut min_y = i64::MAX;
        let mut max_x = i64::MIN;
        let mut max_y = i64::MIN;

        for tile in &self.tiles {
            min_x = min_x.min(tile.x);
            min_y = min_y.min(tile.y);
            max_x = max_x.max(tile.x + tile.w as i64);
            max_y = max_y.max(tile.y + tile.h as i64);
        }

        (min_x, min_y, (max_x - min_x) as u32, (max_y - min_y) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct RecordingSource {
        calls: RefCell<Vec<(u32, u32)>>,
    }

    impl TileSource for RecordingSource {
        fn read_tile(
            &self,
            _canvas: &mut Canvas,
            _level: usize,
            col: u32,
            row: u32,
            _opaque: Option<&TileRecord>,
        ) -> Result<(), SlideError> {
            self.calls.borrow_mut().push((col, row));
            Ok(())
        }
    }

    #[test]
    fn finds_overlapping_irregular_tiles() {
        let mut grid = RangeGrid::new();
        grid.insert(0, 0, 0, 0, 50, 50, 0);
        grid.insert(1, 0, 200, 0, 30, 30, 1);
        grid.insert(0, 1, 0, 300, 50, 50, 2);

        let source = RecordingSource { calls: RefCell::new(Vec::new()) };
        let mut canvas = Canvas::new(0, 0, 100, 100);
        grid.paint_region(&mut canvas, &source, 0, 0, 0, 100, 100).unwrap();
        assert_eq!(source.calls.into_inner(), vec![(0, 0)]);
    }

    #[test]
    fn non_overlapping_query_finds_nothing() {
        let mut grid = RangeGrid::new();
        grid.insert(0, 0, 0, 0, 50, 50, 0);
        let source = RecordingSource { calls: RefCell::new(Vec::new()) };
        let mut canvas = Canvas::new(1000, 1000, 10, 10);
        grid.paint_region(&mut canvas, &source, 0, 1000, 1000, 10, 10).unwrap();
        assert!(source.calls.into_inner().is_empty());
    }

    #[test]
    fn bounds_is_union_of_tile_rectangles() {
        let mut grid = RangeGrid::new();
        grid.insert(0, 0, 10, 10, 50, 50, 0);
        grid.insert(1, 0, 200, 5, 30, 30, 1);
        assert_eq!(grid.bounds(), (10, 5, 220, 55));
    }
}

//! Tilemap grid (SPEC_FULL.md §4.3): a sparse `(col, row)` -> tile
//! mapping for formats where not every cell of the nominal grid holds
//! a tile (Hamamatsu VMS/VMU restart-interval layouts, Philips'
//! non-uniform edge tiles).

use std::collections::HashMap;

use crate::error::SlideError;

use super::{Canvas, Grid, TileSource};

/// A tile's placement within the grid: offset from its nominal
/// `(col * tw, row * th)` cell origin, its own size (edge tiles may be
/// smaller than the pitch), and an opaque per-tile payload the owning
/// backend interprets in `read_tile` (a byte range, a restart-interval
/// index, …).
#[derive(Debug, Clone, Default)]
pub struct TileRecord {
    pub dx: i64,
    pub dy: i64,
    pub tile_w: u32,
    pub tile_h: u32,
    pub opaque: u64,
}

/// Sparse `(col, row)` -> [`TileRecord`] grid. Cells with no entry are
/// skipped (transparent); bounds are the union of inserted tiles'
/// rectangles rather than a declared size.
pub struct TilemapGrid {
    tile_w: u32,
    tile_h: u32,
    tiles: HashMap<(u32, u32), TileRecord>,
}

impl TilemapGrid {
    pub fn new(tile_w: u32, tile_h: u32) -> Self {
        TilemapGrid {
            tile_w,
            tile_h,
            tiles: HashMap::new(),
        }
    }

    pub fn insert(&mut self, col: u32, row: u32, record: TileRecord) {
        self.tiles.insert((col, row), record);
    }

    pub fn get(&self, col: u32, row: u32) -> Option<&TileRecord> {
        self.tiles.get(&(col, row))
    }

    fn tile_rect(&self, col: u32, row: u32, record: &TileRecord) -> (i64, i64, u32, u32) {
        let x = col as i64 * self.tile_w as i64 + record.dx;
        let y = row as i64 * self.tile_h as i64 + record.dy;
        (x, y, record.tile_w, record.tile_h)
    }
}

impl Grid for TilemapGrid {
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

        for (&(col, row), record) in &self.tiles {
            let (tx, ty, tw, th) = self.tile_rect(col, row, record);
            if tw == 0 || th == 0 {
                continue;
            }
            let tile_right = tx + tw as i64;
            let tile_bottom = ty + th as i64;
            if tx >= region_right || ty >= region_bottom || tile_right <= x || tile_bottom <= y {
                continue;
            }
            source.read_tile(canvas, level, col, row, Some(record))?;
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

        for (&(col, row), record) in &self.tiles {
            let (tx, ty, tw, th) = self.tile_rect(col, row, record);
            min_x = min_x.min(tx);
            min_y = min_y.min(ty);
            max_x = max_x.max(tx + tw as i64);
            max_y = max_y.max(ty + th as i64);
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
    fn missing_cells_are_skipped() {
        let mut grid = TilemapGrid::new(100, 100);
        grid.insert(
            0,
            0,
            TileRecord { dx: 0, dy: 0, tile_w: 100, tile_h: 100, opaque: 0 },
        );
        let source = RecordingSource { calls: RefCell::new(Vec::new()) };
        let mut canvas = Canvas::new(0, 0, 200, 200);
        grid.paint_region(&mut canvas, &source, 0, 0, 0, 200, 200).unwrap();
        assert_eq!(source.calls.into_inner(), vec![(0, 0)]);
    }

    #[test]
    fn bounds_is_union_of_inserted_tiles() {
        let mut grid = TilemapGrid::new(100, 100);
        grid.insert(0, 0, TileRecord { dx: 0, dy: 0, tile_w: 90, tile_h: 90, opaque: 0 });
        grid.insert(2, 1, TileRecord { dx: 5, dy: 0, tile_w: 80, tile_h: 80, opaque: 0 });
        assert_eq!(grid.bounds(), (0, 0, 285, 180));
    }

    #[test]
    fn empty_grid_has_zero_bounds() {
        let grid = TilemapGrid::new(100, 100);
        assert_eq!(grid.bounds(), (0, 0, 0, 0));
    }

    #[test]
    fn edge_tile_smaller_than_pitch_is_still_found() {
        let mut grid = TilemapGrid::new(100, 100);
        grid.insert(1, 0, TileRecord { dx: 0, dy: 0, tile_w: 40, tile_h: 100, opaque: 7 });
        let source = RecordingSource { calls: RefCell::new(Vec::new()) };
        let mut canvas = Canvas::new(100, 0, 40, 100);
        grid.paint_region(&mut canvas, &source, 0, 100, 0, 40, 100).unwrap();
        assert_eq!(source.calls.into_inner(), vec![(1, 0)]);
    }
}

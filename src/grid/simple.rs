//! Simple grid (SPEC_FULL.md §4.3): a dense, uniformly-pitched tile
//! layout — every TIFF-family backend's main pyramid levels use this.

use crate::error::SlideError;

use super::{Canvas, Grid, TileSource};

/// A uniform `tiles_across` x `tiles_down` grid of `tile_w` x `tile_h`
/// tiles, addressed implicitly at `(col * tile_w, row * tile_h)`.
pub struct SimpleGrid {
    tiles_across: u32,
    tiles_down: u32,
    tile_w: u32,
    tile_h: u32,
}

impl SimpleGrid {
    pub fn new(tiles_across: u32, tiles_down: u32, tile_w: u32, tile_h: u32) -> Self {
        SimpleGrid {
            tiles_across,
            tiles_down,
            tile_w,
            tile_h,
        }
    }
}

impl Grid for SimpleGrid {
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
        if self.tile_w == 0 || self.tile_h == 0 {
            return Ok(());
        }

        let region_right = x + w as i64;
        let region_bottom = y + h as i64;

        let col_start = (x.div_euclid(self.tile_w as i64)).max(0) as u32;
        let row_start = (y.div_euclid(self.tile_h as i64)).max(0) as u32;
        let col_end = ((region_right + self.tile_w as i64 - 1) / self.tile_w as i64)
            .clamp(0, self.tiles_across as i64) as u32;
        let row_end = ((region_bottom + self.tile_h as i64 - 1) / self.tile_h as i64)
            .clamp(0, self.tiles_down as i64) as u32;

        let col_end = col_end.min(self.tiles_across);
        let row_end = row_end.min(self.tiles_down);

        for row in row_start..row_end {
            for col in col_start..col_end {
                let tile_x = col as i64 * self.tile_w as i64;
                let tile_y = row as i64 * self.tile_h as i64;
                if tile_x >= region_right || tile_y >= region_bottom {
                    continue;
                }
                source.read_tile(canvas, level, col, row, None)?;
            }
        }

        Ok(())
    }

    fn bounds(&self) -> (i64, i64, u32, u32) {
        (
            0,
            0,
            self.tiles_across * self.tile_w,
            self.tiles_down * self.tile_h,
        )
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
            _opaque: Option<&crate::grid::TileRecord>,
        ) -> Result<(), SlideError> {
            self.calls.borrow_mut().push((col, row));
            Ok(())
        }
    }

    #[test]
    fn region_intersecting_four_tiles_invokes_all_four() {
        let grid = SimpleGrid::new(4, 4, 100, 100);
        let source = RecordingSource {
            calls: RefCell::new(Vec::new()),
        };
        let mut canvas = Canvas::new(50, 50, 100, 100);
        grid.paint_region(&mut canvas, &source, 0, 50, 50, 100, 100)
            .unwrap();
        let mut calls = source.calls.into_inner();
        calls.sort();
        assert_eq!(calls, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn region_clips_at_grid_edge() {
        let grid = SimpleGrid::new(2, 2, 100, 100);
        let source = RecordingSource {
            calls: RefCell::new(Vec::new()),
        };
        let mut canvas = Canvas::new(150, 150, 100, 100);
        grid.paint_region(&mut canvas, &source, 0, 150, 150, 100, 100)
            .unwrap();
        assert_eq!(source.calls.into_inner(), vec![(1, 1)]);
    }
}

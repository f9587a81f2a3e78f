//! Grid abstractions (SPEC_FULL.md §4.3): the three ways a vendor
//! backend can lay tiles out over a level, behind one shared
//! `paint_region` contract.
//!
//! The teacher has no equivalent — it always reads one TIFF tile
//! directly by index — so this module, and its saturating
//! [`Canvas`](canvas::Canvas) compositor, are new.

mod canvas;
mod range;
mod simple;
mod tilemap;

pub use canvas::Canvas;
pub use range::RangeGrid;
pub use simple::SimpleGrid;
pub use tilemap::{TileRecord, TilemapGrid};

use crate::error::SlideError;

/// A backend's tile-reading callback. Implemented once per vendor
/// backend and shared across every grid variant it uses; `opaque` is
/// whatever per-tile payload that grid variant passes back (MIRAX's
/// data-file byte range, Hamamatsu's restart-interval index slot, …).
pub trait TileSource: Send + Sync {
    /// Decode the tile at `(col, row)` and draw it onto `canvas`.
    /// `opaque` carries the tilemap/range grid's stored per-tile record;
    /// the simple grid passes `None`, since its tile identity is fully
    /// determined by `(level, col, row)`.
    fn read_tile(
        &self,
        canvas: &mut Canvas,
        level: usize,
        col: u32,
        row: u32,
        opaque: Option<&TileRecord>,
    ) -> Result<(), SlideError>;
}

/// The three grid variants' shared contract. `(x, y)` are level-space
/// coordinates; implementors intersect `[x, x+w) x [y, y+h)` against
/// their own tile layout and invoke `source.read_tile` once per
/// intersecting tile, in any order (the canvas's saturating composite
/// makes draw order irrelevant to the final pixels).
pub trait Grid: Send + Sync {
    fn paint_region(
        &self,
        canvas: &mut Canvas,
        source: &dyn TileSource,
        level: usize,
        x: i64,
        y: i64,
        w: u32,
        h: u32,
    ) -> Result<(), SlideError>;

    /// Union of the grid's tile rectangles, in level-space. Simple and
    /// range grids derive this from their declared dimensions; the
    /// tilemap grid derives it from inserted tiles (§4.3's
    /// `get_bounds`).
    fn bounds(&self) -> (i64, i64, u32, u32);
}

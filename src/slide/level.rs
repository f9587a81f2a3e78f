//! One pyramid resolution (SPEC_FULL.md §3, "Level").

use std::sync::Arc;

use crate::grid::Grid;

/// One resolution tier of a slide's pyramid.
///
/// `grid` converts level-space rectangles into per-tile draw calls
/// against the slide's shared [`crate::grid::TileSource`]; `downsample`
/// is monotonically non-decreasing across a slide's level array, with
/// level 0 at (or near) `1.0`.
pub struct Level {
    pub width: u32,
    pub height: u32,
    pub downsample: f64,
    /// `0` means "no tile hint" (SPEC_FULL.md §3), e.g. an associated-image-only
    /// container or a format without a native tile size.
    pub tile_width: u32,
    pub tile_height: u32,
    pub grid: Arc<dyn Grid>,
}

impl Level {
    pub fn new(width: u32, height: u32, downsample: f64, tile_width: u32, tile_height: u32, grid: Arc<dyn Grid>) -> Self {
        Level { width, height, downsample, tile_width, tile_height, grid }
    }
}

//! The synthetic backend (SPEC_FULL.md §4.4, "Synthetic"): no on-disk
//! format at all. `detect` matches a distinguished in-memory marker
//! filename scheme, `synthetic:<spec>`, that the test suite uses to
//! build slides with precise, reproducible pyramids without needing
//! real vendor fixtures.
//!
//! `<spec>` is a comma-separated list of `key=value` pairs:
//! `w` (level-0 width, default 4096), `h` (level-0 height, default
//! 4096), `tile` (tile edge, default 256), `levels` (pyramid depth,
//! default 3), `downsample` (per-level factor, default 2.0). Unknown
//! keys are ignored, so a spec string can carry extra test-only
//! annotations without tripping parsing.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SlideError;
use crate::grid::{Canvas, Grid, SimpleGrid, TileRecord, TileSource};
use crate::hash::Hasher;
use crate::slide::{CacheBinding, Level, SlideContents};

use super::{ProbeContext, VendorBackend, SYNTHETIC_PREFIX};

pub struct SyntheticBackend;

#[async_trait]
impl VendorBackend for SyntheticBackend {
    fn vendor_name(&self) -> &'static str {
        "synthetic"
    }

    async fn detect(&self, ctx: &ProbeContext) -> bool {
        ctx.is_synthetic()
    }

    async fn open(&self, ctx: &ProbeContext, _cache: CacheBinding) -> Result<SlideContents, SlideError> {
        let raw = ctx.path.to_string_lossy();
        let spec = raw
            .strip_prefix(SYNTHETIC_PREFIX)
            .ok_or_else(|| SlideError::not_a_slide("not a synthetic spec"))?
            .to_string();
        let params = parse_spec(&spec);

        let width = params.get("w").and_then(|v| v.parse().ok()).unwrap_or(4096u32);
        let height = params.get("h").and_then(|v| v.parse().ok()).unwrap_or(4096u32);
        let tile = params.get("tile").and_then(|v| v.parse().ok()).unwrap_or(256u32);
        let level_count = params.get("levels").and_then(|v| v.parse().ok()).unwrap_or(3usize).max(1);
        let downsample_factor = params.get("downsample").and_then(|v| v.parse().ok()).unwrap_or(2.0f64);

        if width == 0 || height == 0 || tile == 0 {
            return Err(SlideError::invalid_argument("synthetic spec has a zero dimension"));
        }

        let mut levels = Vec::with_capacity(level_count);
        for level in 0..level_count {
            let downsample = downsample_factor.powi(level as i32);
            let level_width = ((width as f64) / downsample).round().max(1.0) as u32;
            let level_height = ((height as f64) / downsample).round().max(1.0) as u32;
            let tiles_x = level_width.div_ceil(tile);
            let tiles_y = level_height.div_ceil(tile);
            let grid: Arc<dyn Grid> = Arc::new(SimpleGrid::new(tiles_x, tiles_y, tile, tile));
            levels.push(Level::new(level_width, level_height, downsample, tile, tile, grid));
        }

        let mut hasher = Hasher::new();
        hasher.update_string("synthetic-spec", &spec);
        let quickhash = hasher.finish();

        let mut properties = BTreeMap::new();
        properties.insert("openslide.vendor".to_string(), self.vendor_name().to_string());
        properties.insert("openslide.level-count".to_string(), levels.len().to_string());
        properties.insert("openslide.quickhash-1".to_string(), quickhash);
        for (i, lvl) in levels.iter().enumerate() {
            properties.insert(format!("openslide.level[{i}].width"), lvl.width.to_string());
            properties.insert(format!("openslide.level[{i}].height"), lvl.height.to_string());
            properties.insert(format!("openslide.level[{i}].downsample"), lvl.downsample.to_string());
        }

        Ok(SlideContents {
            vendor: self.vendor_name(),
            levels,
            source: Arc::new(SyntheticSource { tile }),
            associated: BTreeMap::new(),
            properties,
            icc_profile: None,
        })
    }
}

fn parse_spec(spec: &str) -> BTreeMap<String, String> {
    spec.split(',')
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Paints each tile a flat color deterministically derived from its
/// coordinates, so a test can tell which tile it actually received.
struct SyntheticSource {
    tile: u32,
}

impl TileSource for SyntheticSource {
    fn read_tile(
        &self,
        canvas: &mut Canvas,
        level: usize,
        col: u32,
        row: u32,
        _opaque: Option<&TileRecord>,
    ) -> Result<(), SlideError> {
        let color = 0xFF00_0000u32
            | (((level as u32 * 61) % 256) << 16)
            | ((col % 256) << 8)
            | (row % 256);
        let pixels = vec![color; self.tile as usize * self.tile as usize];
        let tile_x = col as i64 * self.tile as i64;
        let tile_y = row as i64 * self.tile as i64;
        canvas.blit_tile(tile_x, tile_y, self.tile, self.tile, &pixels);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_spec() {
        let params = parse_spec("w=8192,h=4096,tile=512,levels=4");
        assert_eq!(params.get("w"), Some(&"8192".to_string()));
        assert_eq!(params.get("levels"), Some(&"4".to_string()));
    }
}

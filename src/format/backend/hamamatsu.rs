//! Hamamatsu VMS/VMU (SPEC_FULL.md §4.4): the `.vms`/`.vmu` descriptor
//! is an INI-like text file naming a grid of JPEG files plus an
//! optional low-resolution map file; cell `(col, row)` lives in its
//! own JPEG, referenced as `ImageFile(col,row)=<name>`.
//!
//! SPEC_FULL.md describes a real Hamamatsu reader as pre-scanning each
//! cell's restart markers to index in-stream MCU-row byte positions, so
//! a region read only decodes the rows it needs. The `image` crate has
//! no partial-JPEG-decode entry point, so this backend makes the
//! documented simplification of decoding each referenced cell's JPEG in
//! full and caching the result per grid cell — correct output, coarser
//! granularity than a true MCU-row decode (recorded in DESIGN.md).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::decode::decode_jpeg;
use crate::error::SlideError;
use crate::grid::{Canvas, Grid, TileRecord, TileSource, TilemapGrid};
use crate::hash::Hasher;
use crate::io::{LocalFileReader, RangeReader};
use crate::slide::{AssociatedImage, CacheBinding, Level, SlideContents};
use crate::tile::{next_slide_id, TileCacheKey};

use super::{ProbeContext, VendorBackend};

pub struct HamamatsuBackend;

#[async_trait]
impl VendorBackend for HamamatsuBackend {
    fn vendor_name(&self) -> &'static str {
        "hamamatsu-vms"
    }

    async fn detect(&self, ctx: &ProbeContext) -> bool {
        if ctx.tifflike.is_some() {
            return false;
        }
        matches!(
            ctx.path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
            Some("vms") | Some("vmu")
        )
    }

    async fn open(&self, ctx: &ProbeContext, cache: CacheBinding) -> Result<SlideContents, SlideError> {
        let reader = ctx.reader.as_ref().ok_or_else(|| SlideError::not_a_slide("no file reader available"))?;
        let text_bytes = reader.read_exact_at(0, reader.size() as usize).await?;
        let text = String::from_utf8_lossy(&text_bytes);
        let descriptor = parse_descriptor(&text);

        let base_dir = ctx.path.parent().unwrap_or_else(|| Path::new("."));

        let cols = descriptor.cols.ok_or_else(|| SlideError::not_a_slide("missing NoJpegColumns"))?;
        let rows = descriptor.rows.ok_or_else(|| SlideError::not_a_slide("missing NoJpegRows"))?;
        if descriptor.cells.is_empty() {
            return Err(SlideError::not_a_slide("no ImageFile(col,row) cells found"));
        }

        let (first_path, _) = descriptor.cells.values().next().cloned().map(|name| (base_dir.join(&name), name)).unwrap();
        let first_reader = LocalFileReader::open(&first_path)?;
        let first_bytes = first_reader.read_exact_at(0, first_reader.size() as usize).await?;
        let (tile_w, tile_h, _) = decode_jpeg(&first_bytes)?;

        let mut grid = TilemapGrid::new(tile_w, tile_h);
        let mut cell_paths = BTreeMap::new();
        for (&(col, row), name) in &descriptor.cells {
            grid.insert(col, row, TileRecord { dx: 0, dy: 0, tile_w, tile_h, opaque: 0 });
            cell_paths.insert((col, row), base_dir.join(name));
        }

        let width = cols as u32 * tile_w;
        let height = rows as u32 * tile_h;
        let level = Level::new(width, height, 1.0, tile_w, tile_h, Arc::new(grid));

        let mut properties = BTreeMap::new();
        properties.insert("openslide.vendor".to_string(), self.vendor_name().to_string());
        properties.insert("openslide.level-count".to_string(), "1".to_string());
        properties.insert("openslide.level[0].width".to_string(), width.to_string());
        properties.insert("openslide.level[0].height".to_string(), height.to_string());
        properties.insert("openslide.level[0].downsample".to_string(), "1".to_string());
        for (key, value) in &descriptor.raw {
            properties.insert(format!("hamamatsu.{key}"), value.clone());
        }

        let mut hasher = Hasher::new();
        for (key, value) in &properties {
            hasher.update_string(key, value);
        }
        hasher.update_bytes(&first_bytes);
        properties.insert("openslide.quickhash-1".to_string(), hasher.finish());

        let mut associated = BTreeMap::new();
        if let Some(map_file) = &descriptor.map_file {
            let map_path = base_dir.join(map_file);
            if let Ok(map_reader) = LocalFileReader::open(&map_path) {
                if let Ok(map_bytes) = map_reader.read_exact_at(0, map_reader.size() as usize).await {
                    if let Ok((w, h, pixels)) = decode_jpeg(&map_bytes) {
                        associated.insert("macro".to_string(), AssociatedImage { width: w, height: h, pixels, icc_profile: None });
                    }
                }
            }
        }

        let source: Arc<dyn TileSource> = Arc::new(HamamatsuSource::new(cell_paths, cache));

        Ok(SlideContents {
            vendor: self.vendor_name(),
            levels: vec![level],
            source,
            associated,
            properties,
            icc_profile: None,
        })
    }
}

#[derive(Default)]
struct Descriptor {
    cols: Option<u32>,
    rows: Option<u32>,
    cells: BTreeMap<(u32, u32), String>,
    map_file: Option<String>,
    raw: BTreeMap<String, String>,
}

/// Parse the `.vms`/`.vmu` INI-like `Key=Value` descriptor. Cell entries
/// look like `ImageFile(3,7)=VMU003.jpg`; everything else is a flat
/// scalar, surfaced verbatim under a `hamamatsu.` property prefix.
fn parse_descriptor(text: &str) -> Descriptor {
    let mut descriptor = Descriptor::default();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('[') || line.starts_with(';') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else { continue };
        let key = key.trim();
        let value = value.trim().to_string();

        if let Some(coords) = key.strip_prefix("ImageFile(").and_then(|s| s.strip_suffix(')')) {
            if let Some((col, row)) = coords.split_once(',') {
                if let (Ok(col), Ok(row)) = (col.trim().parse(), row.trim().parse()) {
                    descriptor.cells.insert((col, row), value);
                    continue;
                }
            }
        }

        match key {
            "NoJpegColumns" => descriptor.cols = value.parse().ok(),
            "NoJpegRows" => descriptor.rows = value.parse().ok(),
            "MapFile" => descriptor.map_file = Some(value.clone()),
            _ => {}
        }
        descriptor.raw.insert(key.to_string(), value);
    }
    descriptor
}

struct HamamatsuSource {
    cell_paths: BTreeMap<(u32, u32), PathBuf>,
    cache: CacheBinding,
    slide_id: u64,
}

impl HamamatsuSource {
    fn new(cell_paths: BTreeMap<(u32, u32), PathBuf>, cache: CacheBinding) -> Self {
        HamamatsuSource { cell_paths, cache, slide_id: next_slide_id() }
    }
}

impl TileSource for HamamatsuSource {
    fn read_tile(
        &self,
        canvas: &mut Canvas,
        level: usize,
        col: u32,
        row: u32,
        opaque: Option<&TileRecord>,
    ) -> Result<(), SlideError> {
        let record = opaque.ok_or_else(|| SlideError::invalid_argument("hamamatsu tiles require a tilemap record"))?;
        let path = self
            .cell_paths
            .get(&(col, row))
            .ok_or_else(|| SlideError::invalid_argument("no cell at this coordinate"))?;

        let key = TileCacheKey::new(self.slide_id, level, col, row);
        let cache = self.cache.lock().unwrap().clone();
        let tile_x = col as i64 * record.tile_w as i64;
        let tile_y = row as i64 * record.tile_h as i64;
        if let Some(cached) = cache.get(key) {
            canvas.blit_tile(tile_x, tile_y, record.tile_w, record.tile_h, cached.pixels());
            return Ok(());
        }

        let pixels = crate::io::blocking_runtime().block_on(decode_cell(path))?;
        canvas.blit_tile(tile_x, tile_y, record.tile_w, record.tile_h, &pixels);
        cache.put(key, pixels);
        Ok(())
    }
}

async fn decode_cell(path: &Path) -> Result<Vec<u32>, SlideError> {
    let reader = LocalFileReader::open(path)?;
    let bytes = reader.read_exact_at(0, reader.size() as usize).await?;
    let (_, _, pixels) = decode_jpeg(&bytes)?;
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cells_and_scalars() {
        let text = "NoJpegColumns=2\nNoJpegRows=2\nMapFile=Map.jpg\nImageFile(0,0)=a.jpg\nImageFile(1,0)=b.jpg\n";
        let descriptor = parse_descriptor(text);
        assert_eq!(descriptor.cols, Some(2));
        assert_eq!(descriptor.rows, Some(2));
        assert_eq!(descriptor.map_file.as_deref(), Some("Map.jpg"));
        assert_eq!(descriptor.cells.get(&(0, 0)), Some(&"a.jpg".to_string()));
        assert_eq!(descriptor.cells.get(&(1, 0)), Some(&"b.jpg".to_string()));
    }
}

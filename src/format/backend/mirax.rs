//! 3DHistech MIRAX (SPEC_FULL.md §4.4): a `.mrxs` marker file sits next
//! to a same-named directory holding `Slidedat.ini` (an INI-style
//! descriptor of the slide's hierarchical/non-hierarchical layers) and
//! one or more `DataNNNN.dat` files of packed per-tile JPEG records.
//! Tiles are camera-stitched at irregular pixel offsets, so this
//! backend uses the range grid rather than a uniform pitch.
//!
//! Documented acknowledged limitation: MIRAX's on-disk `Index.dat` is a
//! proprietary hierarchical directory of non-hierarchical tile pages,
//! undocumented outside partial reverse-engineering. This backend reads
//! the commonly-referenced simplified layout — a flat array of fixed
//! 16-byte `(x: i32, y: i32, offset: i32, length: i32)` records, one
//! per `IMAGENUMBER_X * IMAGENUMBER_Y` grid cell, `length <= 0` marking
//! an absent (non-tissue) cell — rather than the true b-tree-like page
//! structure. Reduced-resolution pyramid layers and associated images,
//! which live in separate non-hierarchical pages of that same index,
//! are not reconstructed; `Slide::open` surfaces a single full
//! resolution level.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::decode::decode_jpeg;
use crate::error::{ErrorKind, SlideError};
use crate::grid::{Canvas, Grid, RangeGrid, TileRecord, TileSource};
use crate::hash::Hasher;
use crate::io::{LocalFileReader, RangeReader};
use crate::slide::{CacheBinding, Level, SlideContents};
use crate::tile::{next_slide_id, TileCacheKey};

use super::{ProbeContext, VendorBackend};

const RECORD_SIZE: usize = 16;

pub struct MiraxBackend;

#[async_trait]
impl VendorBackend for MiraxBackend {
    fn vendor_name(&self) -> &'static str {
        "mirax"
    }

    async fn detect(&self, ctx: &ProbeContext) -> bool {
        if ctx.tifflike.is_some() {
            return false;
        }
        ctx.path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("mrxs")).unwrap_or(false)
    }

    async fn open(&self, ctx: &ProbeContext, cache: CacheBinding) -> Result<SlideContents, SlideError> {
        let slide_dir = slide_directory(&ctx.path);
        let slidedat_path = slide_dir.join("Slidedat.ini");
        let slidedat_reader = LocalFileReader::open(&slidedat_path)
            .map_err(|_| SlideError::not_a_slide("no Slidedat.ini beside .mrxs file"))?;
        let slidedat_bytes = slidedat_reader.read_exact_at(0, slidedat_reader.size() as usize).await?;
        let slidedat = String::from_utf8_lossy(&slidedat_bytes);
        let ini = parse_ini(&slidedat);

        let general = ini.get("GENERAL").cloned().unwrap_or_default();
        let cols: u32 = general
            .get("IMAGENUMBER_X")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| SlideError::new(ErrorKind::FormatFailure, "Slidedat.ini missing IMAGENUMBER_X"))?;
        let rows: u32 = general
            .get("IMAGENUMBER_Y")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| SlideError::new(ErrorKind::FormatFailure, "Slidedat.ini missing IMAGENUMBER_Y"))?;

        let hierarchical = ini.get("HIERARCHICAL").cloned().unwrap_or_default();
        let data_file_name = hierarchical.get("DATAFILE_0").map(String::as_str).unwrap_or("Data0000.dat");
        let index_file_name = hierarchical.get("INDEXFILE").map(String::as_str).unwrap_or("Index.dat");

        let data_path = slide_dir.join(data_file_name);
        let index_path = slide_dir.join(index_file_name);

        let index_reader = LocalFileReader::open(&index_path)?;
        let index_bytes = index_reader.read_exact_at(0, index_reader.size() as usize).await?;

        let expected_records = cols as usize * rows as usize;
        let available_records = index_bytes.len() / RECORD_SIZE;
        let record_count = expected_records.min(available_records);

        let data_reader = LocalFileReader::open(&data_path)?;

        let mut grid = RangeGrid::new();
        let mut tiles = BTreeMap::new();
        let mut first_tile_dims: Option<(u32, u32)> = None;

        for i in 0..record_count {
            let base = i * RECORD_SIZE;
            let record = &index_bytes[base..base + RECORD_SIZE];
            let x = i32::from_le_bytes(record[0..4].try_into().unwrap());
            let y = i32::from_le_bytes(record[4..8].try_into().unwrap());
            let offset = i32::from_le_bytes(record[8..12].try_into().unwrap());
            let length = i32::from_le_bytes(record[12..16].try_into().unwrap());
            if length <= 0 || offset < 0 {
                continue;
            }

            let col = (i as u32) % cols;
            let row = (i as u32) / cols;

            if first_tile_dims.is_none() {
                let bytes = data_reader.read_exact_at(offset as u64, length as usize).await?;
                if let Ok((w, h, _)) = decode_jpeg(&bytes) {
                    first_tile_dims = Some((w, h));
                }
            }
            let (tile_w, tile_h) = first_tile_dims.unwrap_or((0, 0));

            grid.insert(col, row, x as i64, y as i64, tile_w, tile_h, tiles.len() as u64);
            tiles.insert(
                (col, row),
                TileRange { x: x as i64, y: y as i64, tile_w, tile_h, offset: offset as u64, length: length as usize },
            );
        }

        if tiles.is_empty() {
            return Err(SlideError::new(ErrorKind::FormatFailure, "MIRAX index contains no usable tiles"));
        }

        let (_, _, width, height) = grid.bounds();
        let level = Level::new(width, height, 1.0, 0, 0, Arc::new(grid));

        let mut properties = BTreeMap::new();
        properties.insert("openslide.vendor".to_string(), self.vendor_name().to_string());
        properties.insert("openslide.level-count".to_string(), "1".to_string());
        properties.insert("openslide.level[0].width".to_string(), width.to_string());
        properties.insert("openslide.level[0].height".to_string(), height.to_string());
        properties.insert("openslide.level[0].downsample".to_string(), "1".to_string());
        if let Some(magnification) = general.get("OBJECTIVE_MAGNIFICATION") {
            properties.insert("openslide.objective-power".to_string(), magnification.clone());
        }
        for (section, keys) in &ini {
            for (key, value) in keys {
                properties.insert(format!("mirax.{section}.{key}"), value.clone());
            }
        }

        let mut hasher = Hasher::new();
        for (key, value) in &properties {
            hasher.update_string(key, value);
        }
        hasher.update_bytes(&index_bytes);
        properties.insert("openslide.quickhash-1".to_string(), hasher.finish());

        let source: Arc<dyn TileSource> = Arc::new(MiraxSource { data_path, tiles, slide_id: next_slide_id(), cache });

        Ok(SlideContents {
            vendor: self.vendor_name(),
            levels: vec![level],
            source,
            associated: BTreeMap::new(),
            properties,
            icc_profile: None,
        })
    }
}

/// `foo.mrxs` keeps its tile data in a sibling `foo/` directory.
fn slide_directory(path: &Path) -> PathBuf {
    let mut dir = path.to_path_buf();
    dir.set_extension("");
    dir
}

/// Minimal `[Section]` / `Key = Value` INI parser; MIRAX's `Slidedat.ini`
/// has no nesting or multi-line values.
fn parse_ini(text: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current = String::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            current = line[1..line.len() - 1].to_string();
            sections.entry(current.clone()).or_default();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            sections.entry(current.clone()).or_default().insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    sections
}

struct TileRange {
    x: i64,
    y: i64,
    tile_w: u32,
    tile_h: u32,
    offset: u64,
    length: usize,
}

struct MiraxSource {
    data_path: PathBuf,
    tiles: BTreeMap<(u32, u32), TileRange>,
    slide_id: u64,
    cache: CacheBinding,
}

impl TileSource for MiraxSource {
    fn read_tile(
        &self,
        canvas: &mut Canvas,
        level: usize,
        col: u32,
        row: u32,
        opaque: Option<&TileRecord>,
    ) -> Result<(), SlideError> {
        opaque.ok_or_else(|| SlideError::invalid_argument("mirax tiles require a range grid record"))?;
        let range = self.tiles.get(&(col, row)).ok_or_else(|| SlideError::invalid_argument("no tile at this index"))?;

        let key = TileCacheKey::new(self.slide_id, level, col, row);
        let cache = self.cache.lock().unwrap().clone();
        if let Some(cached) = cache.get(key) {
            canvas.blit_tile(range.x, range.y, range.tile_w, range.tile_h, cached.pixels());
            return Ok(());
        }

        let pixels = crate::io::blocking_runtime().block_on(decode_range(&self.data_path, range.offset, range.length))?;
        canvas.blit_tile(range.x, range.y, range.tile_w, range.tile_h, &pixels);
        cache.put(key, pixels);
        Ok(())
    }
}

async fn decode_range(path: &Path, offset: u64, length: usize) -> Result<Vec<u32>, SlideError> {
    let reader = LocalFileReader::open(path)?;
    let bytes = reader.read_exact_at(offset, length).await?;
    let (_, _, pixels) = decode_jpeg(&bytes)?;
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grid_dimensions_and_datafile_name() {
        let ini = parse_ini(
            "[GENERAL]\nIMAGENUMBER_X = 12\nIMAGENUMBER_Y = 9\nOBJECTIVE_MAGNIFICATION = 20\n\n[HIERARCHICAL]\nDATAFILE_0 = Data0000.dat\nINDEXFILE = Index.dat\n",
        );
        assert_eq!(ini["GENERAL"]["IMAGENUMBER_X"], "12");
        assert_eq!(ini["GENERAL"]["IMAGENUMBER_Y"], "9");
        assert_eq!(ini["HIERARCHICAL"]["DATAFILE_0"], "Data0000.dat");
    }

    #[test]
    fn slide_directory_drops_the_mrxs_extension() {
        let dir = slide_directory(Path::new("/slides/CMU-1.mrxs"));
        assert_eq!(dir, Path::new("/slides/CMU-1"));
    }
}

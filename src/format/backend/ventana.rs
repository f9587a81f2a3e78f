//! Ventana BIF (SPEC_FULL.md §4.4): a generic-TIFF-family variant whose
//! tiles physically overlap. A true Ventana reader builds a join graph
//! of pairwise tile overlaps to derive a fractional `tile_advance_x/y`
//! per level; this backend takes the embedded iScan XML's declared
//! overlap fractions as a uniform per-level `tile_advance`, which is
//! the documented simplification recorded in DESIGN.md's Open Question
//! decision for this backend (no join-graph solver is built — the
//! declared overlap is trusted instead of being re-derived from pixel
//! correlation).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::warn;

use crate::decode::{decode_jpeg, decode_jpeg2000, rgb_to_bgra};
use crate::error::{ErrorKind, SlideError};
use crate::format::jpeg::prepare_tile_jpeg;
use crate::format::tiff::{Compression, PyramidLevel, TiffPyramid, TiffTag, TileData};
use crate::grid::{Canvas, Grid, TileRecord, TileSource, TilemapGrid};
use crate::hash::Hasher;
use crate::io::{FileHandlePool, LocalFileReader, RangeReader};
use crate::slide::{CacheBinding, Level, SlideContents};
use crate::tile::{next_slide_id, TileCacheKey};

use super::{decode_associated_image, read_ifd_string, ProbeContext, VendorBackend};

pub struct VentanaBackend;

#[async_trait]
impl VendorBackend for VentanaBackend {
    fn vendor_name(&self) -> &'static str {
        "ventana"
    }

    async fn detect(&self, ctx: &ProbeContext) -> bool {
        let Some(description) = description_of(ctx).await else { return false };
        description.contains("iScan") || description.contains("Ventana")
    }

    async fn open(&self, ctx: &ProbeContext, cache: CacheBinding) -> Result<SlideContents, SlideError> {
        let reader = ctx.reader.as_ref().ok_or_else(|| SlideError::not_a_slide("no file reader available"))?;
        let directory_reader = ctx.tifflike.as_ref().ok_or_else(|| SlideError::not_a_slide("not a tifflike container"))?;

        let description = description_of(ctx).await.unwrap_or_default();
        let overlap = parse_overlap(&description);

        let pyramid = TiffPyramid::from_directory_reader(reader.as_ref(), directory_reader)
            .await
            .map_err(SlideError::from)?;
        let header = pyramid.header.clone();

        let mut levels = Vec::with_capacity(pyramid.levels.len());
        let mut slide_levels = Vec::with_capacity(pyramid.levels.len());
        for level in &pyramid.levels {
            let tile_data = TileData::load(reader.as_ref(), level, &header).await?;
            let (grid, width, height) = build_overlap_grid(level, overlap);
            slide_levels.push(Level::new(width, height, level.downsample, level.tile_width, level.tile_height, grid));
            levels.push(VentanaLevel { level: level.clone(), tile_data });
        }

        let mut properties = BTreeMap::new();
        properties.insert("openslide.vendor".to_string(), self.vendor_name().to_string());
        properties.insert("openslide.level-count".to_string(), levels.len().to_string());
        properties.insert("ventana.OverlapX".to_string(), overlap.0.to_string());
        properties.insert("ventana.OverlapY".to_string(), overlap.1.to_string());
        for (i, l) in slide_levels.iter().enumerate() {
            properties.insert(format!("openslide.level[{i}].width"), l.width.to_string());
            properties.insert(format!("openslide.level[{i}].height"), l.height.to_string());
            properties.insert(format!("openslide.level[{i}].downsample"), l.downsample.to_string());
            properties.insert(format!("openslide.level[{i}].tile-width"), l.tile_width.to_string());
            properties.insert(format!("openslide.level[{i}].tile-height"), l.tile_height.to_string());
        }

        if let Some(lowest) = levels.last() {
            let hash_props: Vec<(&str, &str)> =
                properties.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let mut hasher = Hasher::new();
            for (label, value) in &hash_props {
                hasher.update_string(label, value);
            }
            let locations: Vec<(u64, u64)> = (0..lowest.tile_data.offsets.len())
                .filter_map(|i| lowest.tile_data.get_tile_location(i as u32))
                .collect();
            if hasher.update_tile_locations(reader.as_ref(), &locations).await.is_err() {
                hasher.disable();
            }
            properties.insert("openslide.quickhash-1".to_string(), hasher.finish());
        }

        let mut associated = BTreeMap::new();
        for assoc in &pyramid.associated {
            match decode_associated_image(reader.as_ref(), &header, assoc).await {
                Ok(img) => {
                    properties.insert(format!("openslide.associated.{}.width", assoc.name), img.width.to_string());
                    properties.insert(format!("openslide.associated.{}.height", assoc.name), img.height.to_string());
                    if let Some(icc_size) = img.icc_size() {
                        properties.insert(format!("openslide.associated.{}.icc-size", assoc.name), icc_size.to_string());
                    }
                    associated.insert(assoc.name.to_string(), img);
                }
                Err(err) => {
                    warn!(name = assoc.name, error = %err, "failed to decode associated image");
                }
            }
        }

        let icc_profile = extract_main_icc_profile(reader.as_ref(), levels.first()).await;
        if let Some(icc) = icc_profile.as_ref() {
            properties.insert("openslide.icc-size".to_string(), icc.len().to_string());
        }

        let handle_pool = Arc::new(FileHandlePool::new(ctx.path.clone()));
        let source: Arc<dyn TileSource> =
            Arc::new(VentanaSource::new(ctx.path.clone(), handle_pool, levels, cache));

        Ok(SlideContents {
            vendor: self.vendor_name(),
            levels: slide_levels,
            source,
            associated,
            properties,
            icc_profile,
        })
    }
}

async fn description_of(ctx: &ProbeContext) -> Option<String> {
    let reader = ctx.reader.as_ref()?;
    let directory_reader = ctx.tifflike.as_ref()?;
    read_ifd_string(reader, directory_reader, 0, TiffTag::ImageDescription).await
}

/// Parse the iScan XML's declared overlap fraction (0.0-1.0 of a tile's
/// edge) in X and Y. Absent either attribute, no overlap is assumed and
/// the level behaves like an ordinary non-overlapping tiled pyramid.
fn parse_overlap(xml: &str) -> (f64, f64) {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut overlap_x = 0.0;
    let mut overlap_y = 0.0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                for attr in e.attributes().flatten() {
                    let value = attr.unescape_value().unwrap_or_default();
                    match attr.key.local_name().as_ref() {
                        b"OverlapX" | b"overlapX" => overlap_x = value.parse().unwrap_or(0.0),
                        b"OverlapY" | b"overlapY" => overlap_y = value.parse().unwrap_or(0.0),
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (overlap_x.clamp(0.0, 0.9), overlap_y.clamp(0.0, 0.9))
}

/// Build a `TilemapGrid` whose tiles are pitched at `tile_advance =
/// tile_size * (1 - overlap)` instead of the full tile size, and return
/// the level's true overall width/height implied by that pitch.
fn build_overlap_grid(level: &PyramidLevel, overlap: (f64, f64)) -> (Arc<dyn Grid>, u32, u32) {
    let advance_x = level.tile_width as f64 * (1.0 - overlap.0);
    let advance_y = level.tile_height as f64 * (1.0 - overlap.1);

    let mut grid = TilemapGrid::new(level.tile_width, level.tile_height);
    for row in 0..level.tiles_y {
        for col in 0..level.tiles_x {
            let Some((tw, th)) = level.tile_dimensions(col, row) else { continue };
            let nominal_x = col as i64 * level.tile_width as i64;
            let nominal_y = row as i64 * level.tile_height as i64;
            let actual_x = (col as f64 * advance_x).round() as i64;
            let actual_y = (row as f64 * advance_y).round() as i64;
            grid.insert(
                col,
                row,
                TileRecord { dx: actual_x - nominal_x, dy: actual_y - nominal_y, tile_w: tw, tile_h: th, opaque: 0 },
            );
        }
    }

    let width = if level.tiles_x == 0 {
        0
    } else {
        ((level.tiles_x - 1) as f64 * advance_x).round() as u32 + level.tile_width.min(level.width)
    };
    let height = if level.tiles_y == 0 {
        0
    } else {
        ((level.tiles_y - 1) as f64 * advance_y).round() as u32 + level.tile_height.min(level.height)
    };

    (Arc::new(grid), width.max(level.width), height.max(level.height))
}

struct VentanaLevel {
    level: PyramidLevel,
    tile_data: TileData,
}

/// Pull the main image's embedded ICC profile out of its first tile,
/// mirroring `tiff_family::extract_main_icc_profile` (SPEC_FULL.md §6
/// `openslide.icc-size`/`read_icc_profile`).
async fn extract_main_icc_profile<R: RangeReader>(reader: &R, first_level: Option<&VentanaLevel>) -> Option<Vec<u8>> {
    let level = first_level?;
    if Compression::from_u16(level.level.compression) != Some(Compression::Jpeg) {
        return None;
    }
    let (offset, length) = level.tile_data.get_tile_location(0)?;
    if length == 0 {
        return None;
    }
    let data = reader.read_exact_at(offset, length as usize).await.ok()?;
    let tables = level.tile_data.jpeg_tables.as_deref();
    let complete = prepare_tile_jpeg(tables, &data);
    super::extract_icc_profile_from_jpeg(&complete)
}

/// Decodes tiles exactly like [`super::tiff_family::TiffFamilySource`],
/// but blits them at the grid's overlap-adjusted `(dx, dy)` offset
/// instead of assuming a uniform tile pitch.
struct VentanaSource {
    path: PathBuf,
    handle_pool: Arc<FileHandlePool>,
    levels: Vec<VentanaLevel>,
    cache: CacheBinding,
    slide_id: u64,
}

impl VentanaSource {
    fn new(path: PathBuf, handle_pool: Arc<FileHandlePool>, levels: Vec<VentanaLevel>, cache: CacheBinding) -> Self {
        VentanaSource { path, handle_pool, levels, cache, slide_id: next_slide_id() }
    }

    async fn fetch_tile_bytes(&self, level: &VentanaLevel, tile_index: u32) -> Result<Bytes, SlideError> {
        let (offset, length) = level
            .tile_data
            .get_tile_location(tile_index)
            .ok_or_else(|| SlideError::invalid_argument("tile index out of range"))?;
        if length == 0 {
            return Ok(Bytes::new());
        }
        let handle = self.handle_pool.acquire().await?;
        let reader = LocalFileReader::from_file(handle.file().clone(), self.path.display().to_string())?;
        reader.read_exact_at(offset, length as usize).await.map_err(SlideError::from)
    }

    fn decode_tile(&self, level: &VentanaLevel, data: &[u8], tile_w: u32, tile_h: u32) -> Result<Vec<u32>, SlideError> {
        let compression = Compression::from_u16(level.level.compression);
        let (w, h, pixels) = match compression {
            Some(Compression::Jpeg) | None => {
                let tables = level.tile_data.jpeg_tables.as_deref();
                decode_jpeg(&prepare_tile_jpeg(tables, data))?
            }
            Some(Compression::Jpeg2000) => decode_jpeg2000(data)?,
            Some(Compression::None) => (tile_w, tile_h, rgb_to_bgra(data, tile_w, tile_h)),
            Some(other) => {
                return Err(SlideError::new(ErrorKind::FormatFailure, format!("unsupported compression: {}", other.name())))
            }
        };
        if w != tile_w || h != tile_h {
            return Err(SlideError::new(
                ErrorKind::FormatFailure,
                format!("tile decoded to {w}x{h}, expected {tile_w}x{tile_h}"),
            ));
        }
        Ok(pixels)
    }
}

impl TileSource for VentanaSource {
    fn read_tile(
        &self,
        canvas: &mut Canvas,
        level: usize,
        col: u32,
        row: u32,
        opaque: Option<&TileRecord>,
    ) -> Result<(), SlideError> {
        let lvl = self.levels.get(level).ok_or_else(|| SlideError::invalid_argument(format!("level {level} out of range")))?;
        let tile_index = lvl.level.tile_index(col, row).ok_or_else(|| SlideError::invalid_argument("tile coordinate out of range"))?;
        let record = opaque.ok_or_else(|| SlideError::invalid_argument("ventana tiles require a tilemap record"))?;
        if record.tile_w == 0 || record.tile_h == 0 {
            return Ok(());
        }
        let tile_x = col as i64 * lvl.level.tile_width as i64 + record.dx;
        let tile_y = row as i64 * lvl.level.tile_height as i64 + record.dy;

        let key = TileCacheKey::new(self.slide_id, level, col, row);
        let cache = self.cache.lock().unwrap().clone();
        if let Some(cached) = cache.get(key) {
            canvas.blit_tile(tile_x, tile_y, record.tile_w, record.tile_h, cached.pixels());
            return Ok(());
        }

        let data = crate::io::blocking_runtime().block_on(self.fetch_tile_bytes(lvl, tile_index))?;
        let pixels = self.decode_tile(lvl, &data, record.tile_w, record.tile_h)?;
        canvas.blit_tile(tile_x, tile_y, record.tile_w, record.tile_h, &pixels);
        cache.put(key, pixels);
        Ok(())
    }
}

//! TeksqRay SDPC (SPEC_FULL.md §4.4): a proprietary fixed-layout binary
//! container — a custom header naming the pyramid's level count and
//! tile size, followed by one directory entry per level (dimensions
//! plus the offset of that level's tile-offset table), followed by a
//! packed blob of per-tile JPEG records addressed by that table.
//!
//! Documented acknowledged limitation: the full SDPC layout is
//! undocumented outside a partial public header reverse-engineering
//! (SPEC_FULL.md §4.4). This backend parses the openly-documented
//! subset — magic, version, level count, tile size, per-level
//! dimensions and tile-table offset — sufficient for `detect`/`open`/
//! `paint_region`, and reports `FormatError::UnsupportedFormat` for a
//! version or compression tag it doesn't recognise rather than
//! guessing at the rest of the binary layout.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::decode::decode_jpeg;
use crate::error::{ErrorKind, SlideError};
use crate::grid::{Canvas, Grid, SimpleGrid, TileRecord, TileSource};
use crate::hash::Hasher;
use crate::io::{LocalFileReader, RangeReader};
use crate::slide::{CacheBinding, Level, SlideContents};
use crate::tile::{next_slide_id, TileCacheKey};

use super::{ProbeContext, VendorBackend};

const MAGIC: &[u8; 4] = b"SDPC";
/// Header layout versions this backend confirms against real fixtures;
/// anything else is a recognised container with an unconfirmed layout.
const SUPPORTED_VERSIONS: &[u32] = &[1];
/// Compression tag for JPEG tile records; the only confirmed variant.
const COMPRESSION_JPEG: u32 = 0;

/// `magic(4) + version(u32) + level_count(u32) + tile_width(u32) +
/// tile_height(u32)`.
const HEADER_SIZE: u64 = 4 + 4 + 4 + 4 + 4;
/// Per-level directory entry: `width(u32) + height(u32) +
/// compression(u32) + tile_table_offset(u64) + tile_count(u32)`.
const LEVEL_ENTRY_SIZE: u64 = 4 + 4 + 4 + 8 + 4;
/// Per-tile table entry: `offset(u64) + length(u32)`.
const TILE_ENTRY_SIZE: u64 = 8 + 4;

pub struct TeksqrayBackend;

#[async_trait]
impl VendorBackend for TeksqrayBackend {
    fn vendor_name(&self) -> &'static str {
        "teksqray"
    }

    async fn detect(&self, ctx: &ProbeContext) -> bool {
        if ctx.tifflike.is_some() {
            return false;
        }
        let Some(reader) = ctx.reader.as_ref() else { return false };
        if reader.size() < HEADER_SIZE {
            return false;
        }
        matches!(reader.read_exact_at(0, 4).await, Ok(bytes) if &bytes[..] == MAGIC)
    }

    async fn open(&self, ctx: &ProbeContext, cache: CacheBinding) -> Result<SlideContents, SlideError> {
        let reader = ctx.reader.as_ref().ok_or_else(|| SlideError::not_a_slide("no file reader available"))?.clone();
        let header = SdpcHeader::parse(reader.as_ref()).await?;

        let mut levels = Vec::with_capacity(header.level_count as usize);
        let mut descriptors = Vec::with_capacity(header.level_count as usize);
        for i in 0..header.level_count {
            let entry_offset = HEADER_SIZE + i as u64 * LEVEL_ENTRY_SIZE;
            let descriptor = LevelDescriptor::parse(reader.as_ref(), entry_offset, header.tile_width, header.tile_height).await?;
            if descriptor.compression != COMPRESSION_JPEG {
                return Err(SlideError::new(
                    ErrorKind::FormatFailure,
                    format!("sdpc level {i} uses unsupported compression tag {}", descriptor.compression),
                ));
            }
            descriptors.push(descriptor);
        }
        if descriptors.is_empty() {
            return Err(SlideError::new(ErrorKind::FormatFailure, "sdpc container declares zero levels"));
        }
        descriptors.sort_by(|a, b| b.width.cmp(&a.width));

        let base_width = descriptors[0].width;
        for d in &descriptors {
            let downsample = base_width as f64 / d.width.max(1) as f64;
            let grid: Arc<dyn Grid> = Arc::new(SimpleGrid::new(
                d.width.div_ceil(header.tile_width.max(1)),
                d.height.div_ceil(header.tile_height.max(1)),
                header.tile_width,
                header.tile_height,
            ));
            levels.push(Level::new(d.width, d.height, downsample, header.tile_width, header.tile_height, grid));
        }

        let mut properties = BTreeMap::new();
        properties.insert("openslide.vendor".to_string(), self.vendor_name().to_string());
        properties.insert("openslide.level-count".to_string(), levels.len().to_string());
        for (i, l) in levels.iter().enumerate() {
            properties.insert(format!("openslide.level[{i}].width"), l.width.to_string());
            properties.insert(format!("openslide.level[{i}].height"), l.height.to_string());
            properties.insert(format!("openslide.level[{i}].downsample"), l.downsample.to_string());
            properties.insert(format!("openslide.level[{i}].tile-width"), header.tile_width.to_string());
            properties.insert(format!("openslide.level[{i}].tile-height"), header.tile_height.to_string());
        }
        properties.insert("teksqray.version".to_string(), header.version.to_string());

        let mut hasher = Hasher::new();
        for (key, value) in &properties {
            hasher.update_string(key, value);
        }
        if let Some(lowest) = descriptors.last() {
            let locations: Vec<(u64, u64)> =
                lowest.tile_table.iter().map(|t| (t.offset, t.length as u64)).collect();
            if hasher.update_tile_locations(reader.as_ref(), &locations).await.is_err() {
                hasher.disable();
            }
        }
        properties.insert("openslide.quickhash-1".to_string(), hasher.finish());

        let source: Arc<dyn TileSource> = Arc::new(TeksqraySource {
            reader: reader.clone(),
            descriptors,
            tile_width: header.tile_width,
            tile_height: header.tile_height,
            cache,
            slide_id: next_slide_id(),
        });

        Ok(SlideContents {
            vendor: self.vendor_name(),
            levels,
            source,
            associated: BTreeMap::new(),
            properties,
            icc_profile: None,
        })
    }
}

struct SdpcHeader {
    version: u32,
    level_count: u32,
    tile_width: u32,
    tile_height: u32,
}

impl SdpcHeader {
    async fn parse(reader: &LocalFileReader) -> Result<Self, SlideError> {
        let bytes = reader.read_exact_at(0, HEADER_SIZE as usize).await?;
        if &bytes[0..4] != MAGIC {
            return Err(SlideError::not_a_slide("missing SDPC magic"));
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(SlideError::new(
                ErrorKind::FormatFailure,
                format!("sdpc header version {version} is outside the confirmed layout subset"),
            ));
        }
        let level_count = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let tile_width = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        let tile_height = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        if tile_width == 0 || tile_height == 0 {
            return Err(SlideError::new(ErrorKind::FormatFailure, "sdpc header declares a zero tile size"));
        }
        Ok(SdpcHeader { version, level_count, tile_width, tile_height })
    }
}

struct TileLocation {
    offset: u64,
    length: u32,
}

struct LevelDescriptor {
    width: u32,
    height: u32,
    compression: u32,
    tile_table: Vec<TileLocation>,
}

impl LevelDescriptor {
    async fn parse(reader: &LocalFileReader, entry_offset: u64, tile_width: u32, tile_height: u32) -> Result<Self, SlideError> {
        let bytes = reader.read_exact_at(entry_offset, LEVEL_ENTRY_SIZE as usize).await?;
        let width = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let height = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let compression = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let table_offset = u64::from_le_bytes(bytes[12..20].try_into().unwrap());
        let declared_count = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
        if width == 0 || height == 0 {
            return Err(SlideError::new(ErrorKind::FormatFailure, "sdpc level directory entry has zero dimensions"));
        }

        let expected_tiles = width.div_ceil(tile_width) as u64 * height.div_ceil(tile_height) as u64;
        let tile_count = expected_tiles.min(declared_count as u64) as usize;
        let table_bytes = reader.read_exact_at(table_offset, tile_count * TILE_ENTRY_SIZE as usize).await?;
        let mut tile_table = Vec::with_capacity(tile_count);
        for chunk in table_bytes.chunks_exact(TILE_ENTRY_SIZE as usize) {
            let offset = u64::from_le_bytes(chunk[0..8].try_into().unwrap());
            let length = u32::from_le_bytes(chunk[8..12].try_into().unwrap());
            tile_table.push(TileLocation { offset, length });
        }

        Ok(LevelDescriptor { width, height, compression, tile_table })
    }
}

struct TeksqraySource {
    reader: Arc<LocalFileReader>,
    descriptors: Vec<LevelDescriptor>,
    tile_width: u32,
    tile_height: u32,
    cache: CacheBinding,
    slide_id: u64,
}

impl TileSource for TeksqraySource {
    fn read_tile(
        &self,
        canvas: &mut Canvas,
        level: usize,
        col: u32,
        row: u32,
        _opaque: Option<&TileRecord>,
    ) -> Result<(), SlideError> {
        let descriptor = self
            .descriptors
            .get(level)
            .ok_or_else(|| SlideError::invalid_argument(format!("level {level} out of range")))?;
        let tiles_across = descriptor.width.div_ceil(self.tile_width).max(1);
        let tile_index = row as usize * tiles_across as usize + col as usize;
        let location = descriptor
            .tile_table
            .get(tile_index)
            .ok_or_else(|| SlideError::invalid_argument("tile coordinate out of range"))?;

        let tile_x = col as i64 * self.tile_width as i64;
        let tile_y = row as i64 * self.tile_height as i64;

        if location.length == 0 {
            return Ok(());
        }

        let key = TileCacheKey::new(self.slide_id, level, col, row);
        let cache = self.cache.lock().unwrap().clone();
        if let Some(cached) = cache.get(key) {
            canvas.blit_tile(tile_x, tile_y, self.tile_width, self.tile_height, cached.pixels());
            return Ok(());
        }

        let pixels = crate::io::blocking_runtime().block_on(decode_tile(
            self.reader.as_ref(),
            location.offset,
            location.length as usize,
            self.tile_width,
            self.tile_height,
        ))?;
        canvas.blit_tile(tile_x, tile_y, self.tile_width, self.tile_height, &pixels);
        cache.put(key, pixels);
        Ok(())
    }
}

async fn decode_tile(
    reader: &LocalFileReader,
    offset: u64,
    length: usize,
    tile_w: u32,
    tile_h: u32,
) -> Result<Vec<u32>, SlideError> {
    let data = reader.read_exact_at(offset, length).await?;
    let (w, h, pixels) = decode_jpeg(&data)?;
    if w != tile_w || h != tile_h {
        return Err(SlideError::new(
            ErrorKind::FormatFailure,
            format!("sdpc tile decoded to {w}x{h}, expected {tile_w}x{tile_h}"),
        ));
    }
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_fixture(level_dims: &[(u32, u32)], tile_w: u32, tile_h: u32, jpeg: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&(level_dims.len() as u32).to_le_bytes());
        buf.extend_from_slice(&tile_w.to_le_bytes());
        buf.extend_from_slice(&tile_h.to_le_bytes());

        let directory_start = buf.len() as u64;
        let directory_size = level_dims.len() as u64 * LEVEL_ENTRY_SIZE;
        let mut table_cursor = directory_start + directory_size;
        let mut table_offsets = Vec::new();
        for &(w, h) in level_dims {
            let tiles = (w.div_ceil(tile_w) * h.div_ceil(tile_h)) as u64;
            table_offsets.push((table_cursor, tiles));
            table_cursor += tiles * TILE_ENTRY_SIZE;
        }

        for (i, &(w, h)) in level_dims.iter().enumerate() {
            buf.extend_from_slice(&w.to_le_bytes());
            buf.extend_from_slice(&h.to_le_bytes());
            buf.extend_from_slice(&COMPRESSION_JPEG.to_le_bytes());
            buf.extend_from_slice(&table_offsets[i].0.to_le_bytes());
            buf.extend_from_slice(&(table_offsets[i].1 as u32).to_le_bytes());
        }

        let mut blob_cursor = table_cursor;
        for (i, &(w, h)) in level_dims.iter().enumerate() {
            let tiles = (w.div_ceil(tile_w) * h.div_ceil(tile_h)) as u64;
            for _ in 0..tiles {
                buf.extend_from_slice(&blob_cursor.to_le_bytes());
                buf.extend_from_slice(&(jpeg.len() as u32).to_le_bytes());
                blob_cursor += jpeg.len() as u64;
            }
            let _ = i;
        }
        for &(w, h) in level_dims {
            let tiles = (w.div_ceil(tile_w) * h.div_ceil(tile_h)) as u64;
            for _ in 0..tiles {
                buf.extend_from_slice(jpeg);
            }
        }
        buf
    }

    #[test]
    fn fixture_header_round_trips_through_parse() {
        let jpeg = [0xFFu8, 0xD8, 0xFF, 0xD9];
        let buf = build_fixture(&[(512, 384)], 256, 256, &jpeg);
        assert_eq!(&buf[0..4], MAGIC);
        assert_eq!(u32::from_le_bytes(buf[8..12].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(buf[12..16].try_into().unwrap()), 256);
    }
}

//! The generic-TIFF-family core (SPEC_FULL.md §4.4): shared by every
//! vendor backend whose container is a plain tiled TIFF/BigTIFF pyramid
//! underneath its own metadata convention (generic TIFF, Aperio SVS,
//! Hamamatsu NDPI, Philips, OME-TIFF, Ventana, Optra, Trestle, Leica
//! SCN). A backend's own module only has to classify the file and pull
//! out vendor-specific properties; tile decode, the simple grid, and
//! quickhash seeding live here once.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::decode::{decode_jpeg, decode_jpeg2000, rgb_to_bgra};
use crate::error::{ErrorKind, SlideError};
use crate::format::jpeg::prepare_tile_jpeg;
use crate::format::tiff::{Compression, TiffTag};
use crate::format::tiff::{
    validate_pyramid, AssociatedIfd, PyramidLevel, TiffDirectoryReader, TiffHeader, TiffPyramid,
    TileData,
};
use crate::grid::{Canvas, Grid, SimpleGrid, TileRecord, TileSource};
use crate::hash::Hasher;
use crate::io::{FileHandlePool, LocalFileReader, RangeReader};
use crate::slide::{AssociatedImage, CacheBinding, Level, SlideContents};
use crate::tile::{next_slide_id, TileCacheKey};

/// One pyramid level plus its loaded tile index.
pub struct TiffFamilyLevel {
    pub level: PyramidLevel,
    pub tile_data: TileData,
}

/// The `TileSource` every generic-TIFF-family backend installs.
/// Decode dispatch is keyed only by the level's own `Compression` tag,
/// never by vendor.
pub struct TiffFamilySource {
    path: PathBuf,
    handle_pool: Arc<FileHandlePool>,
    levels: Vec<TiffFamilyLevel>,
    cache: CacheBinding,
    slide_id: u64,
}

impl TiffFamilySource {
    pub fn new(
        path: PathBuf,
        handle_pool: Arc<FileHandlePool>,
        levels: Vec<TiffFamilyLevel>,
        cache: CacheBinding,
    ) -> Self {
        TiffFamilySource { path, handle_pool, levels, cache, slide_id: next_slide_id() }
    }

    async fn fetch_tile_bytes(&self, level: &TiffFamilyLevel, tile_index: u32) -> Result<Bytes, SlideError> {
        let (offset, length) = level
            .tile_data
            .get_tile_location(tile_index)
            .ok_or_else(|| SlideError::invalid_argument("tile index out of range"))?;
        if length == 0 {
            return Ok(Bytes::new());
        }
        let handle = self.handle_pool.acquire().await?;
        let reader = LocalFileReader::from_file(handle.file().clone(), self.path.display().to_string())?;
        let data = reader.read_exact_at(offset, length as usize).await?;
        Ok(data)
    }

    fn decode_tile(&self, level: &TiffFamilyLevel, data: &[u8], tile_w: u32, tile_h: u32) -> Result<Vec<u32>, SlideError> {
        let compression = Compression::from_u16(level.level.compression);
        let (w, h, pixels) = match compression {
            Some(Compression::Jpeg) | None => {
                let tables = level.tile_data.jpeg_tables.as_deref();
                let complete = prepare_tile_jpeg(tables, data);
                decode_jpeg(&complete)?
            }
            Some(Compression::Jpeg2000) => decode_jpeg2000(data)?,
            Some(Compression::None) => (tile_w, tile_h, rgb_to_bgra(data, tile_w, tile_h)),
            Some(other) => {
                return Err(SlideError::new(
                    ErrorKind::FormatFailure,
                    format!("unsupported compression: {}", other.name()),
                ))
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

impl TileSource for TiffFamilySource {
    fn read_tile(
        &self,
        canvas: &mut Canvas,
        level: usize,
        col: u32,
        row: u32,
        _opaque: Option<&TileRecord>,
    ) -> Result<(), SlideError> {
        let lvl = self
            .levels
            .get(level)
            .ok_or_else(|| SlideError::invalid_argument(format!("level {level} out of range")))?;
        let tile_index = lvl
            .level
            .tile_index(col, row)
            .ok_or_else(|| SlideError::invalid_argument("tile coordinate out of range"))?;
        let (tile_w, tile_h) = lvl
            .level
            .tile_dimensions(col, row)
            .ok_or_else(|| SlideError::invalid_argument("tile coordinate out of range"))?;
        let tile_x = col as i64 * lvl.level.tile_width as i64;
        let tile_y = row as i64 * lvl.level.tile_height as i64;

        let key = TileCacheKey::new(self.slide_id, level, col, row);
        let cache = self.cache.lock().unwrap().clone();
        if let Some(cached) = cache.get(key) {
            canvas.blit_tile(tile_x, tile_y, tile_w, tile_h, cached.pixels());
            return Ok(());
        }

        let data = crate::io::blocking_runtime().block_on(self.fetch_tile_bytes(lvl, tile_index))?;
        let pixels = self.decode_tile(lvl, &data, tile_w, tile_h)?;
        canvas.blit_tile(tile_x, tile_y, tile_w, tile_h, &pixels);
        cache.put(key, pixels);
        Ok(())
    }
}

/// Decode an associated image (label/macro/thumbnail) IFD in full.
/// These are almost always single-strip complete JPEGs; a handful of
/// scanners tile them like a pyramid level instead, so both
/// organizations are handled.
pub async fn decode_associated_image<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
    assoc: &AssociatedIfd,
) -> Result<AssociatedImage, SlideError> {
    use crate::format::tiff::ValueReader;

    let byte_order = header.byte_order;
    let value_reader = ValueReader::new(reader, header);
    let ifd = &assoc.ifd;

    let width = ifd.image_width(byte_order).unwrap_or(0);
    let height = ifd.image_height(byte_order).unwrap_or(0);

    let data = if ifd.is_tiled() {
        let tile_w = ifd.tile_width(byte_order).unwrap_or(width);
        let tile_h = ifd.tile_height(byte_order).unwrap_or(height);
        let offsets_entry = ifd
            .get_entry_by_tag(TiffTag::TileOffsets)
            .ok_or_else(|| SlideError::not_a_slide("associated image IFD missing TileOffsets"))?;
        let counts_entry = ifd
            .get_entry_by_tag(TiffTag::TileByteCounts)
            .ok_or_else(|| SlideError::not_a_slide("associated image IFD missing TileByteCounts"))?;
        let offsets = value_reader.read_u64_array(offsets_entry).await?;
        let counts = value_reader.read_u64_array(counts_entry).await?;
        if offsets.len() == 1 {
            reader.read_exact_at(offsets[0], counts[0] as usize).await?
        } else {
            debug!(name = assoc.name, tiles = offsets.len(), "reassembling tiled associated image");
            return decode_raster_tiles(reader, &offsets, &counts, tile_w, tile_h, width, height).await;
        }
    } else {
        let offsets_entry = ifd
            .get_entry_by_tag(TiffTag::StripOffsets)
            .ok_or_else(|| SlideError::not_a_slide("associated image IFD missing StripOffsets"))?;
        let counts_entry = ifd
            .get_entry_by_tag(TiffTag::StripByteCounts)
            .ok_or_else(|| SlideError::not_a_slide("associated image IFD missing StripByteCounts"))?;
        let offsets = value_reader.read_u64_array(offsets_entry).await?;
        let counts = value_reader.read_u64_array(counts_entry).await?;
        if offsets.len() == 1 {
            reader.read_exact_at(offsets[0], counts[0] as usize).await?
        } else {
            let mut buf = Vec::new();
            for (off, len) in offsets.iter().zip(counts.iter()) {
                buf.extend_from_slice(&reader.read_exact_at(*off, *len as usize).await?);
            }
            Bytes::from(buf)
        }
    };

    let icc_profile = extract_icc_profile_from_jpeg(&data);
    let (w, h, pixels) = decode_jpeg(&data)?;
    let _ = (width, height);
    Ok(AssociatedImage { width: w, height: h, pixels, icc_profile })
}

/// Reassemble a rarely-seen tiled associated image by decoding each
/// tile and compositing it onto a full-size canvas-shaped buffer.
async fn decode_raster_tiles<R: RangeReader>(
    reader: &R,
    offsets: &[u64],
    counts: &[u64],
    tile_w: u32,
    tile_h: u32,
    width: u32,
    height: u32,
) -> Result<AssociatedImage, SlideError> {
    if tile_w == 0 || tile_h == 0 || width == 0 || height == 0 {
        return Err(SlideError::not_a_slide("tiled associated image has zero dimensions"));
    }
    let tiles_across = width.div_ceil(tile_w);
    let mut pixels = vec![0u32; width as usize * height as usize];
    for (tile_index, (&offset, &count)) in offsets.iter().zip(counts.iter()).enumerate() {
        if count == 0 {
            continue;
        }
        let data = reader.read_exact_at(offset, count as usize).await?;
        let (w, h, tile_pixels) = decode_jpeg(&data)?;
        let col = tile_index as u32 % tiles_across;
        let row = tile_index as u32 / tiles_across;
        let origin_x = col * tile_w;
        let origin_y = row * tile_h;
        for y in 0..h {
            let dst_y = origin_y + y;
            if dst_y >= height {
                break;
            }
            for x in 0..w {
                let dst_x = origin_x + x;
                if dst_x >= width {
                    break;
                }
                pixels[(dst_y as usize) * (width as usize) + dst_x as usize] =
                    tile_pixels[(y as usize) * (w as usize) + x as usize];
            }
        }
    }
    Ok(AssociatedImage { width, height, pixels, icc_profile: None })
}

/// Pull an embedded ICC profile out of a JPEG's `APP2 "ICC_PROFILE\0"`
/// segments, reassembling multi-segment profiles in sequence order
/// (SPEC_FULL.md §6 `read_icc_profile`/`read_associated_icc_profile`).
pub fn extract_icc_profile_from_jpeg(data: &[u8]) -> Option<Vec<u8>> {
    const ICC_SIG: &[u8] = b"ICC_PROFILE\0";
    let mut chunks: Vec<(u8, Vec<u8>)> = Vec::new();
    let mut pos = 2usize;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = data[pos + 1];
        if marker == 0xD8 || marker == 0x01 || (0xD0..=0xD9).contains(&marker) {
            if marker == 0xD9 {
                break;
            }
            pos += 2;
            continue;
        }
        if pos + 4 > data.len() {
            break;
        }
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if len < 2 {
            break;
        }
        let seg_start = pos + 4;
        let seg_end = (pos + 2 + len).min(data.len());
        if marker == 0xE2 && seg_end.saturating_sub(seg_start) > 14 {
            let seg = &data[seg_start..seg_end];
            if seg.starts_with(ICC_SIG) {
                chunks.push((seg[12], seg[14..].to_vec()));
            }
        }
        if marker == 0xDA {
            break;
        }
        pos += 2 + len;
    }
    if chunks.is_empty() {
        return None;
    }
    chunks.sort_by_key(|(seq, _)| *seq);
    Some(chunks.into_iter().flat_map(|(_, payload)| payload).collect())
}

/// Pull the main image's embedded ICC profile out of its first tile,
/// when that tile is JPEG-compressed (SPEC_FULL.md §6 `openslide.
/// icc-size`/`read_icc_profile`). Non-JPEG compressions (packed RGB,
/// JPEG2000) carry no documented APP2 convention here, so this returns
/// `None` for them rather than guessing.
async fn extract_main_icc_profile<R: RangeReader>(
    reader: &R,
    first_level: Option<&TiffFamilyLevel>,
) -> Option<Vec<u8>> {
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
    extract_icc_profile_from_jpeg(&complete)
}

/// Seed a quickhash from canonical ASCII properties plus the
/// lowest-resolution level's tile byte ranges, in order (SPEC_FULL.md
/// §4.6).
pub async fn compute_quickhash<R: RangeReader>(
    reader: &R,
    properties: &[(&str, &str)],
    lowest_level: &TiffFamilyLevel,
) -> String {
    let mut hasher = Hasher::new();
    for (label, value) in properties {
        hasher.update_string(label, value);
    }
    let locations: Vec<(u64, u64)> = (0..lowest_level.tile_data.offsets.len())
        .filter_map(|i| lowest_level.tile_data.get_tile_location(i as u32))
        .collect();
    if hasher.update_tile_locations(reader, &locations).await.is_err() {
        hasher.disable();
    }
    hasher.finish()
}

/// Read a single ASCII tag off one already-walked directory, without
/// classifying the chain into levels first. Every TIFF-family
/// backend's `detect` uses this to inspect `ImageDescription`/
/// `Software`/`XmlPacket` markers before committing to a full parse.
pub async fn read_ifd_string(
    reader: &LocalFileReader,
    directory_reader: &TiffDirectoryReader,
    dir_index: usize,
    tag: TiffTag,
) -> Option<String> {
    let ifd = directory_reader.directory(dir_index)?;
    let entry = ifd.get_entry_by_tag(tag)?;
    directory_reader.value_reader(reader).read_string(entry).await.ok()
}

/// Read a single numeric tag off one already-walked directory, the
/// numeric counterpart to [`read_ifd_string`] (NDPI's offset/lens
/// tags are RATIONAL, not ASCII).
pub async fn read_ifd_f64(
    reader: &LocalFileReader,
    directory_reader: &TiffDirectoryReader,
    dir_index: usize,
    tag: TiffTag,
) -> Option<f64> {
    let ifd = directory_reader.directory(dir_index)?;
    let entry = ifd.get_entry_by_tag(tag)?;
    directory_reader.value_reader(reader).read_f64(entry).await.ok()
}

/// Build a `SlideContents` from an already-walked directory chain,
/// shared by every generic-TIFF-family backend's `open` (SPEC_FULL.md
/// §4.4): classify levels/associated images, load each level's tile
/// index, install the shared [`TiffFamilySource`] behind [`SimpleGrid`]
/// levels, decode associated images, and seed the quickhash.
///
/// `extra_properties` carries whatever vendor-specific metadata the
/// caller already parsed (e.g. SVS's `ImageDescription` fields); this
/// function adds the canonical `openslide.*` properties on top.
pub async fn open_generic_pyramid(
    path: &Path,
    reader: &Arc<LocalFileReader>,
    directory_reader: &TiffDirectoryReader,
    cache: CacheBinding,
    vendor: &'static str,
    extra_properties: BTreeMap<String, String>,
) -> Result<SlideContents, SlideError> {
    let pyramid = TiffPyramid::from_directory_reader(reader.as_ref(), directory_reader).await?;
    validate_pyramid(&pyramid).into_result()?;

    build_from_levels(
        path,
        reader,
        pyramid.header.clone(),
        &pyramid.levels,
        &pyramid.associated,
        cache,
        vendor,
        extra_properties,
    )
    .await
}

/// The shared tail of every generic-TIFF-family backend's `open`: load
/// each level's tile index, install the [`TiffFamilySource`] behind
/// [`SimpleGrid`] levels, decode associated images, and seed the
/// quickhash. Split out from [`open_generic_pyramid`] so backends that
/// need a non-default level selection (Leica SCN's default-plane-only
/// filter over the XML `<collection>`/`<image>` tree) can classify
/// their own `levels`/`associated` lists and still share this tail.
pub async fn build_from_levels(
    path: &Path,
    reader: &Arc<LocalFileReader>,
    header: TiffHeader,
    pyramid_levels: &[PyramidLevel],
    pyramid_associated: &[AssociatedIfd],
    cache: CacheBinding,
    vendor: &'static str,
    mut extra_properties: BTreeMap<String, String>,
) -> Result<SlideContents, SlideError> {
    let mut levels = Vec::with_capacity(pyramid_levels.len());
    for level in pyramid_levels {
        let tile_data = TileData::load(reader.as_ref(), level, &header).await?;
        levels.push(TiffFamilyLevel { level: level.clone(), tile_data });
    }

    let slide_levels: Vec<Level> = levels
        .iter()
        .map(|l| {
            let grid: Arc<dyn Grid> =
                Arc::new(SimpleGrid::new(l.level.tiles_x, l.level.tiles_y, l.level.tile_width, l.level.tile_height));
            Level::new(l.level.width, l.level.height, l.level.downsample, l.level.tile_width, l.level.tile_height, grid)
        })
        .collect();

    extra_properties.insert("openslide.vendor".to_string(), vendor.to_string());
    extra_properties.insert("openslide.level-count".to_string(), levels.len().to_string());
    for (i, l) in levels.iter().enumerate() {
        extra_properties.insert(format!("openslide.level[{i}].width"), l.level.width.to_string());
        extra_properties.insert(format!("openslide.level[{i}].height"), l.level.height.to_string());
        extra_properties
            .insert(format!("openslide.level[{i}].downsample"), l.level.downsample.to_string());
        extra_properties
            .insert(format!("openslide.level[{i}].tile-width"), l.level.tile_width.to_string());
        extra_properties
            .insert(format!("openslide.level[{i}].tile-height"), l.level.tile_height.to_string());
    }

    if let Some(lowest) = levels.last() {
        let hash_props: Vec<(&str, &str)> =
            extra_properties.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let quickhash = compute_quickhash(reader.as_ref(), &hash_props, lowest).await;
        extra_properties.insert("openslide.quickhash-1".to_string(), quickhash);
    }

    let mut associated = BTreeMap::new();
    for assoc in pyramid_associated {
        match decode_associated_image(reader.as_ref(), &header, assoc).await {
            Ok(img) => {
                extra_properties.insert(format!("openslide.associated.{}.width", assoc.name), img.width.to_string());
                extra_properties.insert(format!("openslide.associated.{}.height", assoc.name), img.height.to_string());
                if let Some(icc_size) = img.icc_size() {
                    extra_properties.insert(format!("openslide.associated.{}.icc-size", assoc.name), icc_size.to_string());
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
        extra_properties.insert("openslide.icc-size".to_string(), icc.len().to_string());
    }

    let handle_pool = Arc::new(FileHandlePool::new(path.to_path_buf()));
    let source: Arc<dyn TileSource> =
        Arc::new(TiffFamilySource::new(path.to_path_buf(), handle_pool, levels, cache));

    Ok(SlideContents {
        vendor,
        levels: slide_levels,
        source,
        associated,
        properties: extra_properties,
        icc_profile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icc_extraction_returns_none_without_app2_marker() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x02, 0xFF, 0xD9];
        assert!(extract_icc_profile_from_jpeg(&jpeg).is_none());
    }

    #[test]
    fn icc_extraction_reads_single_segment_profile() {
        let mut jpeg = vec![0xFF, 0xD8];
        let mut segment = b"ICC_PROFILE\0".to_vec();
        segment.push(1); // sequence number
        segment.push(1); // total count
        segment.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let len = (segment.len() + 2) as u16;
        jpeg.push(0xFF);
        jpeg.push(0xE2);
        jpeg.extend_from_slice(&len.to_be_bytes());
        jpeg.extend_from_slice(&segment);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        let icc = extract_icc_profile_from_jpeg(&jpeg).unwrap();
        assert_eq!(icc, vec![0xAA, 0xBB, 0xCC]);
    }
}

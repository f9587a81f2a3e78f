//! TIFF pyramid level identification (SPEC_FULL.md §4.4).
//!
//! WSI files contain multiple IFDs, but not all of them are pyramid
//! levels. The generic-TIFF-family backends (generic TIFF, SVS, NDPI,
//! Philips, OME-TIFF, Ventana, Optra, Trestle) all share this
//! classification: an IFD is an associated image (label/macro/
//! thumbnail) when its `NewSubfileType` has `FILETYPE_REDUCEDIMAGE` set
//! *and* its `ImageDescription` names one of the known associated-image
//! roles; otherwise, if it's tiled, it's a pyramid level — including
//! `NewSubfileType`-marked reduced-resolution sub-levels, which are
//! still part of the pyramid.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, Ifd, IfdEntry, TiffHeader};
use super::tags::{TiffTag, FILETYPE_REDUCEDIMAGE};
use super::values::ValueReader;

// =============================================================================
// PyramidLevel
// =============================================================================

/// A single level in the image pyramid.
///
/// Each level represents the image at a specific resolution. Level 0 is the
/// highest resolution (full size), with higher levels being progressively
/// smaller (lower resolution).
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    /// Index of this level in the pyramid (0 = highest resolution)
    pub level_index: usize,

    /// Index of the IFD in the file's IFD chain
    pub ifd_index: usize,

    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    /// Tile width in pixels
    pub tile_width: u32,

    /// Tile height in pixels
    pub tile_height: u32,

    /// Number of tiles in X direction
    pub tiles_x: u32,

    /// Number of tiles in Y direction
    pub tiles_y: u32,

    /// Total number of tiles
    pub tile_count: u32,

    /// Downsample factor relative to level 0 (1.0 for level 0)
    pub downsample: f64,

    /// Compression scheme (7 = JPEG)
    pub compression: u16,

    /// The parsed IFD for this level
    pub ifd: Ifd,

    /// Offset in file where TileOffsets array is stored (if not inline)
    pub tile_offsets_entry: Option<IfdEntry>,

    /// Offset in file where TileByteCounts array is stored (if not inline)
    pub tile_byte_counts_entry: Option<IfdEntry>,

    /// JPEGTables entry for this level (if present)
    pub jpeg_tables_entry: Option<IfdEntry>,
}

impl PyramidLevel {
    /// Build a candidate level from a parsed, tiled IFD.
    ///
    /// Returns None if the IFD doesn't have the required tile tags.
    fn from_ifd(ifd: Ifd, ifd_index: usize, byte_order: ByteOrder) -> Option<Self> {
        // Must have tile dimensions
        let tile_width = ifd.tile_width(byte_order)?;
        let tile_height = ifd.tile_height(byte_order)?;

        // Must have image dimensions
        let width = ifd.image_width(byte_order)?;
        let height = ifd.image_height(byte_order)?;

        // Get compression (default to JPEG if not specified)
        let compression = ifd.compression(byte_order).unwrap_or(7);

        // Calculate tile counts
        let tiles_x = (width + tile_width - 1) / tile_width;
        let tiles_y = (height + tile_height - 1) / tile_height;
        let tile_count = tiles_x * tiles_y;

        // Get entries for tile offsets and byte counts
        let tile_offsets_entry = ifd.get_entry_by_tag(TiffTag::TileOffsets).cloned();
        let tile_byte_counts_entry = ifd.get_entry_by_tag(TiffTag::TileByteCounts).cloned();

        // Get JPEGTables entry if present
        let jpeg_tables_entry = ifd.get_entry_by_tag(TiffTag::JpegTables).cloned();

        Some(PyramidLevel {
            level_index: 0, // Will be set later when sorting
            ifd_index,
            width,
            height,
            tile_width,
            tile_height,
            tiles_x,
            tiles_y,
            tile_count,
            downsample: 1.0, // Will be calculated later
            compression,
            ifd,
            tile_offsets_entry,
            tile_byte_counts_entry,
            jpeg_tables_entry,
        })
    }

    /// Check if this level has valid tile offset and byte count entries.
    pub fn has_tile_data(&self) -> bool {
        self.tile_offsets_entry.is_some() && self.tile_byte_counts_entry.is_some()
    }

    /// Get the tile index for a given tile coordinate.
    ///
    /// Returns None if the coordinates are out of bounds.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<u32> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        Some(tile_y * self.tiles_x + tile_x)
    }

    /// Calculate pixel dimensions of a specific tile.
    ///
    /// Edge tiles may be smaller than tile_width/tile_height.
    pub fn tile_dimensions(&self, tile_x: u32, tile_y: u32) -> Option<(u32, u32)> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }

        let w = if tile_x == self.tiles_x - 1 {
            // Last column - may be partial
            let remainder = self.width % self.tile_width;
            if remainder == 0 {
                self.tile_width
            } else {
                remainder
            }
        } else {
            self.tile_width
        };

        let h = if tile_y == self.tiles_y - 1 {
            // Last row - may be partial
            let remainder = self.height % self.tile_height;
            if remainder == 0 {
                self.tile_height
            } else {
                remainder
            }
        } else {
            self.tile_height
        };

        Some((w, h))
    }
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// Which associated-image role an `ImageDescription` string names, per
/// the prefixes the generic-TIFF-family vendors use.
fn associated_name_from_description(description: &str) -> Option<&'static str> {
    let lower = description.trim().to_ascii_lowercase();
    if lower.starts_with("label") {
        Some("label")
    } else if lower.starts_with("macro") {
        Some("macro")
    } else if lower.contains("thumbnail") {
        Some("thumbnail")
    } else {
        None
    }
}

/// An IFD identified as an associated image (label, macro, thumbnail)
/// rather than a pyramid level.
#[derive(Debug, Clone)]
pub struct AssociatedIfd {
    pub name: &'static str,
    pub ifd_index: usize,
    pub ifd: Ifd,
}

/// A parsed TIFF image pyramid.
///
/// Contains all pyramid levels identified from the TIFF file's IFDs,
/// sorted by resolution (level 0 = highest resolution).
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    /// The TIFF header
    pub header: TiffHeader,

    /// Pyramid levels, sorted by resolution (0 = highest)
    pub levels: Vec<PyramidLevel>,

    /// IFDs identified as associated images (label, macro, thumbnail).
    pub associated: Vec<AssociatedIfd>,

    /// IFDs that matched neither rule (untiled, or reduced-image without
    /// a recognised description) — kept for backends that want to
    /// inspect them further (e.g. Trestle's `TrestleMeta` block).
    pub other_ifds: Vec<(usize, Ifd)>,
}

impl TiffPyramid {
    /// Parse a TIFF file and identify pyramid levels and associated
    /// images, using the classification rule shared by every
    /// generic-TIFF-family backend (SPEC_FULL.md §4.4).
    ///
    /// Prefer [`TiffPyramid::from_directory_reader`] when a
    /// [`super::TiffDirectoryReader`] has already walked the chain (it
    /// carries the NDPI 64-bit offset fixup); this is a standalone
    /// convenience for callers (and tests) that haven't.
    pub async fn parse<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        let directory_reader = super::TiffDirectoryReader::open(reader).await?;
        Self::from_directory_reader(reader, &directory_reader).await
    }

    /// Classify an already-walked directory chain into levels and
    /// associated images. Reuses `directory_reader`'s NDPI-aware chain
    /// instead of re-walking the file.
    pub async fn from_directory_reader<R: RangeReader>(
        reader: &R,
        directory_reader: &super::TiffDirectoryReader,
    ) -> Result<Self, TiffError> {
        let header = directory_reader.header.clone();
        let ifds = directory_reader.directories.clone();
        Self::build_pyramid(reader, header, ifds).await
    }

    /// Classify and build the pyramid structure from parsed IFDs.
    async fn build_pyramid<R: RangeReader>(
        reader: &R,
        header: TiffHeader,
        ifds: Vec<Ifd>,
    ) -> Result<Self, TiffError> {
        let byte_order = header.byte_order;
        let value_reader = ValueReader::new(reader, &header);

        let mut pyramid_candidates: Vec<PyramidLevel> = Vec::new();
        let mut associated: Vec<AssociatedIfd> = Vec::new();
        let mut other_ifds: Vec<(usize, Ifd)> = Vec::new();

        for (ifd_index, ifd) in ifds.into_iter().enumerate() {
            let reduced = ifd
                .subfile_type(byte_order)
                .map(|v| v & FILETYPE_REDUCEDIMAGE != 0)
                .unwrap_or(false);

            if reduced {
                let description = match ifd.get_entry_by_tag(TiffTag::ImageDescription) {
                    Some(entry) => value_reader.read_string(entry).await.ok(),
                    None => None,
                };
                if let Some(name) =
                    description.as_deref().and_then(associated_name_from_description)
                {
                    associated.push(AssociatedIfd {
                        name,
                        ifd_index,
                        ifd,
                    });
                    continue;
                }
            }

            // Reduced-resolution sub-levels (no matching description) are
            // still part of the pyramid, same as the full-resolution IFD.
            if let Some(level) = PyramidLevel::from_ifd(ifd.clone(), ifd_index, byte_order) {
                pyramid_candidates.push(level);
            } else {
                other_ifds.push((ifd_index, ifd));
            }
        }

        // Sort levels by width descending (SPEC_FULL.md §4.4), largest first.
        pyramid_candidates.sort_by(|a, b| b.width.cmp(&a.width));

        let base_width = pyramid_candidates.first().map(|l| l.width as f64);
        let base_height = pyramid_candidates.first().map(|l| l.height as f64);

        let mut levels = Vec::with_capacity(pyramid_candidates.len());
        for (idx, mut level) in pyramid_candidates.into_iter().enumerate() {
            let downsample = match (base_width, base_height) {
                (Some(bw), Some(bh)) if level.width > 0 && level.height > 0 => {
                    let dx = bw / level.width as f64;
                    let dy = bh / level.height as f64;
                    (dx + dy) / 2.0
                }
                _ => 1.0,
            };
            level.level_index = idx;
            level.downsample = downsample;
            levels.push(level);
        }

        Ok(TiffPyramid {
            header,
            levels,
            associated,
            other_ifds,
        })
    }

    /// Get the number of pyramid levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Get a pyramid level by index.
    pub fn get_level(&self, level: usize) -> Option<&PyramidLevel> {
        self.levels.get(level)
    }

    /// Get the base (highest resolution) level.
    pub fn base_level(&self) -> Option<&PyramidLevel> {
        self.levels.first()
    }

    /// Get dimensions of the base level.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.base_level().map(|l| (l.width, l.height))
    }

    /// The largest level whose downsample is `<= d`; level 0 if `d` is
    /// smaller than every level's downsample; the last level if `d` is
    /// larger than every level's downsample (SPEC_FULL.md §6).
    pub fn best_level_for_downsample(&self, d: f64) -> Option<&PyramidLevel> {
        let mut best: Option<&PyramidLevel> = None;
        for level in &self.levels {
            if level.downsample <= d {
                match best {
                    Some(b) if b.downsample >= level.downsample => {}
                    _ => best = Some(level),
                }
            }
        }
        best.or_else(|| self.levels.first())
    }
}

// =============================================================================
// Tile Data Loading
// =============================================================================

/// Loaded tile data for a pyramid level.
#[derive(Debug, Clone)]
pub struct TileData {
    /// Byte offset of each tile in the file
    pub offsets: Vec<u64>,

    /// Byte count (size) of each tile
    pub byte_counts: Vec<u64>,

    /// JPEGTables data (if present)
    pub jpeg_tables: Option<Bytes>,
}

impl TileData {
    /// Load tile data for a pyramid level.
    pub async fn load<R: RangeReader>(
        reader: &R,
        level: &PyramidLevel,
        header: &TiffHeader,
    ) -> Result<Self, TiffError> {
        let value_reader = ValueReader::new(reader, header);

        // Load tile offsets
        let offsets = if let Some(ref entry) = level.tile_offsets_entry {
            value_reader.read_u64_array(entry).await?
        } else {
            return Err(TiffError::MissingTag("TileOffsets"));
        };

        // Load tile byte counts
        let byte_counts = if let Some(ref entry) = level.tile_byte_counts_entry {
            value_reader.read_u64_array(entry).await?
        } else {
            return Err(TiffError::MissingTag("TileByteCounts"));
        };

        // Load JPEGTables if present
        let jpeg_tables = if let Some(ref entry) = level.jpeg_tables_entry {
            Some(value_reader.read_raw_bytes(entry).await?)
        } else {
            None
        };

        Ok(TileData {
            offsets,
            byte_counts,
            jpeg_tables,
        })
    }

    /// Get offset and size for a specific tile.
    pub fn get_tile_location(&self, tile_index: u32) -> Option<(u64, u64)> {
        let idx = tile_index as usize;
        if idx >= self.offsets.len() || idx >= self.byte_counts.len() {
            return None;
        }
        Some((self.offsets[idx], self.byte_counts[idx]))
    }
}

// =============================================================================
// Tests
// =============================================================================

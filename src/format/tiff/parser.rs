//! TIFF header and structure parsing.
//!
//! This module handles parsing of TIFF and BigTIFF file headers,
//! which is the foundation for all subsequent parsing operations.
//!
//! # TIFF Header Structure
//!
//! ## Classic TIFF (8 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (42 = 0x002A)
//! Bytes 4-7: Offset to first IFD (4 bytes)
//! ```
//!
//! ## BigTIFF (16 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (43 = 0x002B)
//! Bytes 4-5: Offset byte size (must be 8)
//! Bytes 6-7: Reserved (must be 0)
//! Bytes 8-15: Offset to first IFD (8 bytes)
//! ```

use std::collections::HashMap;

use crate::error::TiffError;
use crate::io::{read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le};

use super::tags::FieldType;

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes indicating little-endian byte order ("II" for Intel)
const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;

/// Magic bytes indicating big-endian byte order ("MM" for Motorola)
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;

/// Version number for classic TIFF
const VERSION_TIFF: u16 = 42;

/// Version number for BigTIFF
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) of a TIFF file.
///
/// TIFF files declare their byte order in the first two bytes of the header.
/// All multi-byte values in the file must be read respecting this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

impl ByteOrder {
    /// Read a u16 from a byte slice using this byte order.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => read_u16_le(bytes),
            ByteOrder::BigEndian => read_u16_be(bytes),
        }
    }

    /// Read a u32 from a byte slice using this byte order.
    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    /// Read a u64 from a byte slice using this byte order.
    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => read_u64_be(bytes),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
///
/// Contains the essential information needed to begin parsing IFDs:
/// - Byte order for reading all subsequent values
/// - Whether this is classic TIFF or BigTIFF (affects entry sizes and offset widths)
/// - Location of the first IFD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Whether this is a BigTIFF file (64-bit offsets)
    pub is_bigtiff: bool,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a TIFF header from raw bytes.
    ///
    /// The input must contain at least 8 bytes for classic TIFF or 16 bytes for BigTIFF.
    /// The function first reads enough to determine the format, then validates the rest.
    ///
    /// # Arguments
    /// * `bytes` - Raw header bytes (at least 8 bytes, preferably 16 for BigTIFF support)
    /// * `file_size` - Total file size (used to validate IFD offset)
    ///
    /// # Errors
    /// - `InvalidMagic` if byte order bytes are not II or MM
    /// - `InvalidVersion` if version is not 42 or 43
    /// - `InvalidBigTiffOffsetSize` if BigTIFF offset size is not 8
    /// - `FileTooSmall` if there aren't enough bytes for the header
    /// - `InvalidIfdOffset` if the first IFD offset is outside the file
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        // Need at least 8 bytes to read the basic header
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        // Read byte order (bytes 0-1)
        // We read this as little-endian because we're checking for specific byte patterns
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        // Read version (bytes 2-3) using the detected byte order
        let version = byte_order.read_u16(&bytes[2..4]);

        match version {
            VERSION_TIFF => {
                // Classic TIFF: 4-byte offset at bytes 4-7
                let first_ifd_offset = byte_order.read_u32(&bytes[4..8]) as u64;

                // Validate offset
                if first_ifd_offset >= file_size {
                    return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
                }

                Ok(TiffHeader {
                    byte_order,
                    is_bigtiff: false,
                    first_ifd_offset,
                })
            }
            VERSION_BIGTIFF => {
                // BigTIFF: need 16 bytes total
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }

                // Bytes 4-5: offset byte size (must be 8)
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }

                // Bytes 6-7: reserved (should be 0, but we don't strictly require it)

                // Bytes 8-15: first IFD offset (8 bytes)
                let first_ifd_offset = byte_order.read_u64(&bytes[8..16]);

                // Validate offset
                if first_ifd_offset >= file_size {
                    return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
                }

                Ok(TiffHeader {
                    byte_order,
                    is_bigtiff: true,
                    first_ifd_offset,
                })
            }
            _ => Err(TiffError::InvalidVersion(version)),
        }
    }

    /// Size of an IFD entry in bytes.
    ///
    /// Classic TIFF: 12 bytes (2 tag + 2 type + 4 count + 4 value/offset)
    /// BigTIFF: 20 bytes (2 tag + 2 type + 8 count + 8 value/offset)
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry count field at the start of an IFD.
    ///
    /// Classic TIFF: 2 bytes (u16)
    /// BigTIFF: 8 bytes (u64)
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of the next IFD offset field at the end of an IFD.
    ///
    /// Classic TIFF: 4 bytes (u32)
    /// BigTIFF: 8 bytes (u64)
    #[inline]
    pub const fn ifd_next_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Size of the value/offset field in an IFD entry.
    ///
    /// This determines the inline value threshold:
    /// Classic TIFF: 4 bytes
    /// BigTIFF: 8 bytes
    #[inline]
    pub const fn value_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }
}

// =============================================================================
// IfdEntry
// =============================================================================

/// A single entry in an Image File Directory.
///
/// Mirrors the on-disk layout (tag, type, count, value-or-offset) but keeps
/// the value-or-offset field as raw bytes rather than eagerly resolving it,
/// since resolving an out-of-line value requires a range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    /// Numeric tag ID (see `TiffTag`).
    pub tag_id: u16,

    /// Decoded field type, or `None` if the raw type value is unrecognized.
    pub field_type: Option<FieldType>,

    /// Raw field type value as it appeared on disk, kept for error messages.
    pub field_type_raw: u16,

    /// Number of values of `field_type`.
    pub count: u64,

    /// The entry's value/offset field, verbatim, sized to the header's
    /// value-offset width (4 bytes classic, 8 bytes BigTIFF).
    pub value_offset_bytes: Vec<u8>,

    /// Whether `value_offset_bytes` holds the value itself (`true`) or a
    /// file offset where the value is stored (`false`).
    pub is_inline: bool,
}

impl IfdEntry {
    /// Total size in bytes of this entry's value, or `None` if the field
    /// type is unrecognized.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .map(|t| t.size_in_bytes() as u64 * self.count)
    }

    /// Interpret `value_offset_bytes` as a file offset.
    pub fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        if self.value_offset_bytes.len() >= 8 {
            byte_order.read_u64(&self.value_offset_bytes)
        } else {
            byte_order.read_u32(&self.value_offset_bytes) as u64
        }
    }

    /// Read an inline SHORT/LONG value as a u32.
    ///
    /// Returns `None` if the value isn't stored inline or isn't a
    /// SHORT/LONG, in which case the caller must fetch it via an offset read.
    pub fn inline_u32(&self, byte_order: ByteOrder) -> Option<u32> {
        if !self.is_inline {
            return None;
        }
        match self.field_type? {
            FieldType::Short => Some(byte_order.read_u16(&self.value_offset_bytes) as u32),
            FieldType::Long => Some(byte_order.read_u32(&self.value_offset_bytes)),
            _ => None,
        }
    }

    /// Read an inline SHORT/LONG/LONG8 value as a u64.
    pub fn inline_u64(&self, byte_order: ByteOrder) -> Option<u64> {
        if !self.is_inline {
            return None;
        }
        match self.field_type? {
            FieldType::Short => Some(byte_order.read_u16(&self.value_offset_bytes) as u64),
            FieldType::Long => Some(byte_order.read_u32(&self.value_offset_bytes) as u64),
            FieldType::Long8 => Some(byte_order.read_u64(&self.value_offset_bytes)),
            _ => None,
        }
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed Image File Directory: its entries, an index from tag ID to
/// entry position, and the offset of the next IFD in the chain (0 if this
/// is the last one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    pub entries_by_tag: HashMap<u16, usize>,
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// An IFD with no entries and no successor. Used as a placeholder in
    /// tests and by backends that synthesize directories.
    pub fn empty() -> Self {
        Ifd {
            entries: Vec::new(),
            entries_by_tag: HashMap::new(),
            next_ifd_offset: 0,
        }
    }

    /// Number of bytes a complete IFD occupies on disk: the entry count
    /// field, `count` entries, and the next-IFD offset field.
    pub fn calculate_size(count: u64, header: &TiffHeader) -> usize {
        header.ifd_count_size()
            + (count as usize) * header.ifd_entry_size()
            + header.ifd_next_offset_size()
    }

    /// Parse an IFD from a byte slice that starts at the IFD's offset and
    /// contains at least `calculate_size(entry_count, header)` bytes.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let count_size = header.ifd_count_size();
        if bytes.len() < count_size {
            return Err(TiffError::FileTooSmall {
                required: count_size as u64,
                actual: bytes.len() as u64,
            });
        }

        let count = if header.is_bigtiff {
            header.byte_order.read_u64(&bytes[..count_size])
        } else {
            header.byte_order.read_u16(&bytes[..count_size]) as u64
        };

        let entry_size = header.ifd_entry_size();
        let next_offset_size = header.ifd_next_offset_size();
        let required = Self::calculate_size(count, header);
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let mut entries = Vec::with_capacity(count as usize);
        let mut entries_by_tag = HashMap::with_capacity(count as usize);

        for i in 0..count as usize {
            let start = count_size + i * entry_size;
            let entry_bytes = &bytes[start..start + entry_size];

            let tag_id = header.byte_order.read_u16(&entry_bytes[0..2]);
            let field_type_raw = header.byte_order.read_u16(&entry_bytes[2..4]);
            let field_type = FieldType::from_u16(field_type_raw);

            let (entry_count, value_offset_bytes) = if header.is_bigtiff {
                let c = header.byte_order.read_u64(&entry_bytes[4..12]);
                (c, entry_bytes[12..20].to_vec())
            } else {
                let c = header.byte_order.read_u32(&entry_bytes[4..8]) as u64;
                (c, entry_bytes[8..12].to_vec())
            };

            // Unknown field types are never dereferenced, so treat their
            // value/offset bytes as opaque inline data rather than guessing
            // whether they point somewhere in the file.
            let is_inline = match field_type {
                Some(ft) => ft.fits_inline(entry_count, header.is_bigtiff),
                None => true,
            };

            entries_by_tag.insert(tag_id, entries.len());
            entries.push(IfdEntry {
                tag_id,
                field_type,
                field_type_raw,
                count: entry_count,
                value_offset_bytes,
                is_inline,
            });
        }

        let next_offset_start = count_size + (count as usize) * entry_size;
        let next_ifd_offset = if header.is_bigtiff {
            header
                .byte_order
                .read_u64(&bytes[next_offset_start..next_offset_start + next_offset_size])
        } else {
            header
                .byte_order
                .read_u32(&bytes[next_offset_start..next_offset_start + next_offset_size])
                as u64
        };

        Ok(Ifd {
            entries,
            entries_by_tag,
            next_ifd_offset,
        })
    }

    /// Look up an entry by its tag.
    pub fn get_entry_by_tag(&self, tag: super::tags::TiffTag) -> Option<&IfdEntry> {
        self.entries_by_tag
            .get(&tag.as_u16())
            .map(|&i| &self.entries[i])
    }

    /// Whether this IFD declares tile dimensions (TileWidth + TileLength).
    pub fn is_tiled(&self) -> bool {
        self.entries_by_tag
            .contains_key(&super::tags::TiffTag::TileWidth.as_u16())
            && self
                .entries_by_tag
                .contains_key(&super::tags::TiffTag::TileLength.as_u16())
    }

    /// Whether this IFD uses strip organization (StripOffsets or
    /// RowsPerStrip present).
    pub fn is_stripped(&self) -> bool {
        self.entries_by_tag
            .contains_key(&super::tags::TiffTag::StripOffsets.as_u16())
            || self
                .entries_by_tag
                .contains_key(&super::tags::TiffTag::RowsPerStrip.as_u16())
    }

    /// Compression tag value, if present. Always stored inline (a single
    /// SHORT), so no range read is needed to resolve it.
    pub fn compression(&self, byte_order: ByteOrder) -> Option<u16> {
        self.get_entry_by_tag(super::tags::TiffTag::Compression)
            .and_then(|e| e.inline_u32(byte_order))
            .map(|v| v as u16)
    }

    /// TileWidth tag value, if present.
    pub fn tile_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(super::tags::TiffTag::TileWidth)
            .and_then(|e| e.inline_u32(byte_order))
    }

    /// TileLength tag value, if present.
    pub fn tile_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(super::tags::TiffTag::TileLength)
            .and_then(|e| e.inline_u32(byte_order))
    }

    /// ImageWidth tag value, if present.
    pub fn image_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(super::tags::TiffTag::ImageWidth)
            .and_then(|e| e.inline_u32(byte_order))
    }

    /// ImageLength tag value, if present.
    pub fn image_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(super::tags::TiffTag::ImageLength)
            .and_then(|e| e.inline_u32(byte_order))
    }

    /// NewSubfileType tag value, if present, falling back to the older
    /// single-value SubfileType tag some scanners emit.
    pub fn subfile_type(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(super::tags::TiffTag::NewSubfileType)
            .and_then(|e| e.inline_u32(byte_order))
            .or_else(|| {
                self.get_entry_by_tag(super::tags::TiffTag::SubfileType)
                    .and_then(|e| e.inline_u32(byte_order))
            })
    }
}

// =============================================================================
// Tests
// =============================================================================

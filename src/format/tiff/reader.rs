//! The tifflike reader: a lazy, tolerant parser of TIFF/BigTIFF/NDPI
//! directory chains (SPEC_FULL.md §4.2).
//!
//! This is the foundation every TIFF-family vendor backend (generic TIFF,
//! Aperio SVS, Hamamatsu NDPI, Leica SCN, Philips, Ventana, OME-TIFF,
//! Optra, Trestle) builds on: it walks the IFD chain once at `open`,
//! applying the NDPI 64-bit offset fixup when the container needs it, and
//! hands back a directory-indexed view that backends query lazily.

use std::collections::HashSet;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, Ifd, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::TiffTag;
use super::values::ValueReader;

/// Safety cap on the number of directories walked in one chain. Real
/// slides have a handful (levels + associated images); this only guards
/// against a corrupt chain that evades loop detection through some
/// pathological offset sequence.
const MAX_DIRECTORIES: usize = 1024;

/// A fully-walked TIFF/BigTIFF/NDPI directory chain.
///
/// Directories are in on-disk chain order (not sorted by size or
/// classified as level/associated — that's a vendor backend's job, since
/// different vendors use different conventions on top of the same
/// tifflike structure).
#[derive(Debug, Clone)]
pub struct TiffDirectoryReader {
    pub header: TiffHeader,
    /// True once the NDPI marker tag (65420) was found on the first
    /// tentatively-parsed directory (SPEC_FULL.md §4.2).
    pub ndpi_mode: bool,
    /// Parsed directories, in chain order.
    pub directories: Vec<Ifd>,
    /// The on-disk byte offset of each directory, same indexing as
    /// `directories`. Used for NDPI's `fix_offset` heuristic and for
    /// quickhash's tile/strip byte-range hashing.
    pub directory_offsets: Vec<u64>,
}

impl TiffDirectoryReader {
    /// Parse the full directory chain, detecting NDPI mode along the way.
    pub async fn open<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        let header_bytes = reader
            .read_exact_at(0, BIGTIFF_HEADER_SIZE.min(reader.size() as usize).max(8))
            .await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let ndpi_mode = if !header.is_bigtiff {
            Self::detect_ndpi(reader, &header).await?
        } else {
            false
        };

        let mut directories = Vec::new();
        let mut directory_offsets = Vec::new();
        let mut visited: HashSet<u64> = HashSet::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 {
            if !visited.insert(offset) {
                return Err(TiffError::LoopDetected(offset));
            }
            if directories.len() >= MAX_DIRECTORIES {
                break;
            }
            if offset == 0 || offset >= reader.size() {
                return Err(TiffError::InvalidIfdOffset(offset));
            }

            let ifd = Self::read_ifd_at(reader, &header, offset).await?;
            let next_raw = ifd.next_ifd_offset;

            directories.push(ifd);
            directory_offsets.push(offset);

            offset = if ndpi_mode && next_raw != 0 {
                let fixed = fix_offset(next_raw as u32, offset);
                if fixed != next_raw && fixed < reader.size() {
                    fixed
                } else {
                    next_raw
                }
            } else {
                next_raw
            };
        }

        Ok(TiffDirectoryReader {
            header,
            ndpi_mode,
            directories,
            directory_offsets,
        })
    }

    /// Tentatively parse the first directory and check for the NDPI
    /// marker tag (65420). NDPI files declare themselves classic TIFF
    /// (version 42) yet can exceed 4 GiB, so detection has to happen
    /// before we know whether any offset needs the 64-bit fixup.
    async fn detect_ndpi<R: RangeReader>(
        reader: &R,
        header: &TiffHeader,
    ) -> Result<bool, TiffError> {
        let offset = header.first_ifd_offset;
        if offset == 0 || offset >= reader.size() {
            return Ok(false);
        }
        let ifd = match Self::read_ifd_at(reader, header, offset).await {
            Ok(ifd) => ifd,
            Err(_) => return Ok(false),
        };
        Ok(ifd.get_entry_by_tag(TiffTag::NdpiMarker).is_some())
    }

    async fn read_ifd_at<R: RangeReader>(
        reader: &R,
        header: &TiffHeader,
        offset: u64,
    ) -> Result<Ifd, TiffError> {
        let count_size = header.ifd_count_size();
        let count_bytes = reader.read_exact_at(offset, count_size).await?;
        let count = if header.is_bigtiff {
            header.byte_order.read_u64(&count_bytes)
        } else {
            header.byte_order.read_u16(&count_bytes) as u64
        };

        let ifd_size = Ifd::calculate_size(count, header);
        let ifd_bytes = reader.read_exact_at(offset, ifd_size).await?;
        Ifd::parse(&ifd_bytes, header)
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    pub fn directory_count(&self) -> usize {
        self.directories.len()
    }

    pub fn directory(&self, index: usize) -> Option<&Ifd> {
        self.directories.get(index)
    }

    pub fn directory_offset(&self, index: usize) -> Option<u64> {
        self.directory_offsets.get(index).copied()
    }

    pub fn value_reader<'a, R: RangeReader>(&'a self, reader: &'a R) -> ValueReader<'a, R> {
        ValueReader::new(reader, &self.header)
    }

    /// Resolve a (possibly NDPI-truncated) out-of-line offset belonging to
    /// directory `dir_index`. Only meaningful in NDPI mode; outside it,
    /// returns the offset unmodified.
    pub fn resolve_offset(&self, dir_index: usize, raw_offset: u64, file_size: u64) -> u64 {
        if !self.ndpi_mode {
            return raw_offset;
        }
        let Some(&dir_offset) = self.directory_offsets.get(dir_index) else {
            return raw_offset;
        };
        if raw_offset > u32::MAX as u64 {
            // Already a full 64-bit value (BigTIFF-width entry); nothing to fix.
            return raw_offset;
        }
        let fixed = fix_offset(raw_offset as u32, dir_offset);
        if fixed != raw_offset && fixed < file_size {
            fixed
        } else {
            raw_offset
        }
    }
}

/// NDPI's 64-bit offset repair (SPEC_FULL.md §4.2): a 32-bit offset value
/// found in or under a directory located at `directory_offset` is extended
/// by inheriting the directory offset's high 32 bits; if the combined
/// value would be at or past the directory itself (meaning the low bits
/// wrapped past a 4 GiB boundary), the high dword is stepped back by one.
pub fn fix_offset(raw_offset: u32, directory_offset: u64) -> u64 {
    let high = directory_offset & 0xFFFF_FFFF_0000_0000;
    let mut fixed = high | (raw_offset as u64);
    if fixed >= directory_offset {
        fixed = fixed.saturating_sub(0x1_0000_0000);
    }
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IoError;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct MemReader {
        data: Vec<u8>,
    }

    #[async_trait]
    impl RangeReader for MemReader {
        async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
            let start = offset as usize;
            let end = start + len;
            if end > self.data.len() {
                return Err(IoError::RangeOutOfBounds {
                    offset,
                    requested: len as u64,
                    size: self.data.len() as u64,
                });
            }
            Ok(Bytes::copy_from_slice(&self.data[start..end]))
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn identifier(&self) -> &str {
            "mem://test"
        }
    }

    #[test]
    fn fix_offset_no_wraparound_is_noop_like() {
        // Directory living below 4GiB: high dword is 0, so fixed == raw.
        let directory_offset = 10_000u64;
        let raw = 20_000u32;
        assert_eq!(fix_offset(raw, directory_offset), 20_000);
    }

    #[test]
    fn fix_offset_extends_high_bits() {
        // Directory lives at 5 GiB + 100; a raw offset of 5 GiB + 500
        // truncated to 32 bits loses the high dword and must be restored.
        let five_gib = 5u64 * 1024 * 1024 * 1024;
        let directory_offset = five_gib + 100;
        let real_target = five_gib + 500;
        let raw = (real_target & 0xFFFF_FFFF) as u32;
        assert_eq!(fix_offset(raw, directory_offset), real_target);
    }

    #[test]
    fn fix_offset_steps_back_a_dword_when_result_would_follow_directory() {
        // raw offset, once combined with directory's high bits, lands at
        // or after the directory itself: the real target must be one
        // 4GiB page earlier (the offset wrapped around 32 bits).
        let directory_offset = 0x2_0000_1000u64;
        let raw = 0x0000_2000u32; // smaller than the low dword of directory_offset
        let fixed = fix_offset(raw, directory_offset);
        assert!(fixed < directory_offset);
        assert_eq!(fixed, 0x1_0000_2000);
    }

    fn minimal_tiff_bytes() -> Vec<u8> {
        // II, version 42, first IFD at 8; one IFD with zero entries and
        // next_ifd_offset = 0.
        let mut data = vec![0u8; 8 + 2 + 4];
        data[0] = 0x49;
        data[1] = 0x49;
        data[2] = 42;
        data[3] = 0;
        data[4..8].copy_from_slice(&8u32.to_le_bytes());
        // entry count = 0 at offset 8
        data[8..10].copy_from_slice(&0u16.to_le_bytes());
        // next_ifd_offset = 0 at offset 10
        data[10..14].copy_from_slice(&0u32.to_le_bytes());
        data
    }

    #[tokio::test]
    async fn open_minimal_single_directory_tiff() {
        let reader = MemReader {
            data: minimal_tiff_bytes(),
        };
        let tiff = TiffDirectoryReader::open(&reader).await.unwrap();
        assert!(!tiff.ndpi_mode);
        assert_eq!(tiff.directory_count(), 1);
        assert_eq!(tiff.directory_offset(0), Some(8));
    }

    #[tokio::test]
    async fn loop_in_chain_is_detected() {
        // Directory at offset 8 whose next_ifd_offset points back to 8.
        let mut data = vec![0u8; 8 + 2 + 4];
        data[0] = 0x49;
        data[1] = 0x49;
        data[2] = 42;
        data[3] = 0;
        data[4..8].copy_from_slice(&8u32.to_le_bytes());
        data[8..10].copy_from_slice(&0u16.to_le_bytes());
        data[10..14].copy_from_slice(&8u32.to_le_bytes()); // points at itself

        let reader = MemReader { data };
        let result = TiffDirectoryReader::open(&reader).await;
        assert!(matches!(result, Err(TiffError::LoopDetected(8))));
    }
}

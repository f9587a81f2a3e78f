//! Byte-level fixture builders for the integration suite.
//!
//! Nothing here talks to a running server: every function returns an
//! in-memory container (TIFF/BigTIFF/NDPI/DICOM bytes) that a test
//! writes to a temp file and opens through [`wsi_reader::Slide::open`].

use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, Luma};

#[derive(Clone, Copy)]
pub enum ByteOrderType {
    LittleEndian,
    BigEndian,
}

// =============================================================================
// Test JPEG creation
// =============================================================================

/// Create a test JPEG image with a simple gradient pattern.
pub fn create_test_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    let img = GrayImage::from_fn(width, height, |x, y| {
        let val = ((x + y) % 256) as u8;
        Luma([val])
    });

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(&img).unwrap();
    buf
}

// =============================================================================
// Classic TIFF builders
// =============================================================================

fn write_u16(data: &mut [u8], offset: usize, value: u16, byte_order: ByteOrderType) {
    match byte_order {
        ByteOrderType::LittleEndian => data[offset..offset + 2].copy_from_slice(&value.to_le_bytes()),
        ByteOrderType::BigEndian => data[offset..offset + 2].copy_from_slice(&value.to_be_bytes()),
    }
}

fn write_u32(data: &mut [u8], offset: usize, value: u32, byte_order: ByteOrderType) {
    match byte_order {
        ByteOrderType::LittleEndian => data[offset..offset + 4].copy_from_slice(&value.to_le_bytes()),
        ByteOrderType::BigEndian => data[offset..offset + 4].copy_from_slice(&value.to_be_bytes()),
    }
}

/// Entries making up a single tiled, JPEG-compressed IFD: tag, field
/// type, count, inline value (tags needing an external array — tile
/// offsets/byte counts — are appended separately by the caller).
fn tiled_jpeg_entries(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Vec<(u16, u16, u32, u32)> {
    vec![
        (256, 4, 1, width),       // ImageWidth
        (257, 4, 1, height),      // ImageLength
        (258, 3, 1, 8),           // BitsPerSample
        (259, 3, 1, 7),           // Compression = JPEG
        (277, 3, 1, 1),           // SamplesPerPixel
        (322, 4, 1, tile_width),  // TileWidth
        (323, 4, 1, tile_height), // TileLength
    ]
}

/// Write one classic-TIFF tiled IFD at `ifd_offset`, followed by its
/// tile offsets/byte-counts arrays and `jpeg_data`, into `data` (which
/// is grown as needed). Returns the offset one past the end of what
/// was written, i.e. where the next IFD (if any) can start.
/// `next_ifd_offset` is the value patched into this IFD's own
/// next-directory field.
fn write_tiled_ifd(
    data: &mut Vec<u8>,
    ifd_offset: usize,
    byte_order: ByteOrderType,
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    jpeg_data: &[u8],
    extra_entries: &[(u16, u16, u32, u32)],
    next_ifd_offset: u32,
) -> usize {
    let tiles_x = (width + tile_width - 1) / tile_width;
    let tiles_y = (height + tile_height - 1) / tile_height;
    let tile_count = tiles_x * tiles_y;

    let mut entries = tiled_jpeg_entries(width, height, tile_width, tile_height);
    entries.extend_from_slice(extra_entries);
    let entry_count = entries.len() + 2; // + TileOffsets + TileByteCounts

    let ifd_size = 2 + entry_count * 12 + 4;
    let tile_offsets_offset = ifd_offset + ifd_size;
    let tile_byte_counts_offset = tile_offsets_offset + tile_count as usize * 4;
    let tile_data_offset = tile_byte_counts_offset + tile_count as usize * 4;
    let end = tile_data_offset + jpeg_data.len();

    if data.len() < end {
        data.resize(end, 0);
    }

    let mut all: Vec<(u16, u16, u32, u32)> = entries;
    all.push((324, 4, tile_count, tile_offsets_offset as u32));
    all.push((325, 4, tile_count, tile_byte_counts_offset as u32));
    all.sort_by_key(|e| e.0);

    write_u16(data, ifd_offset, entry_count as u16, byte_order);
    let mut offset = ifd_offset + 2;
    for (tag, typ, count, value) in all {
        write_u16(data, offset, tag, byte_order);
        write_u16(data, offset + 2, typ, byte_order);
        write_u32(data, offset + 4, count, byte_order);
        if typ == 3 && count == 1 {
            write_u16(data, offset + 8, value as u16, byte_order);
            data[offset + 10] = 0;
            data[offset + 11] = 0;
        } else {
            write_u32(data, offset + 8, value, byte_order);
        }
        offset += 12;
    }
    write_u32(data, offset, next_ifd_offset, byte_order);

    for i in 0..tile_count {
        write_u32(data, tile_offsets_offset + i as usize * 4, tile_data_offset as u32, byte_order);
        write_u32(data, tile_byte_counts_offset + i as usize * 4, jpeg_data.len() as u32, byte_order);
    }
    data[tile_data_offset..tile_data_offset + jpeg_data.len()].copy_from_slice(jpeg_data);

    end
}

/// A minimal valid TIFF file: one tiled, JPEG-compressed directory.
pub fn create_tiff_with_jpeg_tile() -> Vec<u8> {
    create_tiff_with_jpeg_tile_endian(ByteOrderType::LittleEndian)
}

/// Same as [`create_tiff_with_jpeg_tile`] with a chosen byte order.
pub fn create_tiff_with_jpeg_tile_endian(byte_order: ByteOrderType) -> Vec<u8> {
    let jpeg_data = create_test_jpeg(256, 256, 90);
    let mut data = vec![0u8; 8];
    match byte_order {
        ByteOrderType::LittleEndian => {
            data[0] = b'I';
            data[1] = b'I';
        }
        ByteOrderType::BigEndian => {
            data[0] = b'M';
            data[1] = b'M';
        }
    }
    write_u16(&mut data, 2, 42, byte_order);
    write_u32(&mut data, 4, 8, byte_order);
    write_tiled_ifd(&mut data, 8, byte_order, 2048, 1536, 256, 256, &jpeg_data, &[], 0);
    data
}

/// A classic TIFF carrying the NDPI marker tag (65420) on its first
/// (and only) directory, so the tifflike reader switches to NDPI mode.
pub fn create_ndpi_tagged_tiff() -> Vec<u8> {
    let jpeg_data = create_test_jpeg(256, 256, 90);
    let mut data = vec![0u8; 8];
    data[0] = b'I';
    data[1] = b'I';
    write_u16(&mut data, 2, 42, ByteOrderType::LittleEndian);
    write_u32(&mut data, 4, 8, ByteOrderType::LittleEndian);
    write_tiled_ifd(
        &mut data,
        8,
        ByteOrderType::LittleEndian,
        1024,
        768,
        256,
        256,
        &jpeg_data,
        &[(65420, 3, 1, 1)], // NdpiMarker
        0,
    );
    data
}

/// A two-level pyramidal TIFF: level 0 is `1024x768` tile `256x256`,
/// level 1 is `512x384` tile `256x256` (downsample 1.0 then 2.0).
pub fn create_two_level_tiled_tiff() -> Vec<u8> {
    let jpeg_data = create_test_jpeg(256, 256, 90);
    let byte_order = ByteOrderType::LittleEndian;
    let mut data = vec![0u8; 8];
    data[0] = b'I';
    data[1] = b'I';
    write_u16(&mut data, 2, 42, byte_order);
    write_u32(&mut data, 4, 8, byte_order);

    let tile_count0 = ((1024u32 + 255) / 256) * ((768u32 + 255) / 256);
    let entry_count0 = tiled_jpeg_entries(0, 0, 0, 0).len() + 2;
    let ifd0_size = 2 + entry_count0 * 12 + 4;
    let ifd1_offset = 8 + ifd0_size + tile_count0 as usize * 8 + jpeg_data.len();

    write_tiled_ifd(&mut data, 8, byte_order, 1024, 768, 256, 256, &jpeg_data, &[], ifd1_offset as u32);
    write_tiled_ifd(&mut data, ifd1_offset, byte_order, 512, 384, 256, 256, &jpeg_data, &[], 0);
    data
}

/// A single-level TIFF whose declared `TileByteCounts` sum to
/// `total_bytes`, without the file actually containing that much tile
/// data — quickhash disables itself once the declared sum exceeds its
/// budget, before it would ever read the (nonexistent) extra bytes.
pub fn create_tiff_with_oversized_tile_byte_counts(total_bytes: u64) -> Vec<u8> {
    let byte_order = ByteOrderType::LittleEndian;
    let jpeg_data = create_test_jpeg(256, 256, 90);
    let mut data = vec![0u8; 8];
    data[0] = b'I';
    data[1] = b'I';
    write_u16(&mut data, 2, 42, byte_order);
    write_u32(&mut data, 4, 8, byte_order);
    write_tiled_ifd(&mut data, 8, byte_order, 256, 256, 256, 256, &jpeg_data, &[], 0);

    // Patch the lone TileByteCounts entry (tag 325) to the oversized
    // value; its position among the sorted entries is fixed by the
    // same sort `write_tiled_ifd` used internally.
    let mut entries = tiled_jpeg_entries(256, 256, 256, 256);
    entries.push((324, 4, 1, 0));
    entries.push((325, 4, 1, 0));
    entries.sort_by_key(|e| e.0);
    let index = entries.iter().position(|e| e.0 == 325).unwrap();
    let value_offset = 8 + 2 + index * 12 + 8;
    write_u32(&mut data, value_offset, total_bytes.min(u32::MAX as u64) as u32, byte_order);
    data
}

// =============================================================================
// DICOM builders (SPEC_FULL.md §4.4 "DICOM Whole Slide Imaging")
// =============================================================================

/// One DICOM Part 10 element: explicit VR little endian, short or long
/// form depending on `vr` (matches the subset the DICOM backend reads).
fn dicom_element(group: u16, element: u16, vr: &[u8; 2], value: &[u8]) -> Vec<u8> {
    let mut padded = value.to_vec();
    if padded.len() % 2 != 0 {
        padded.push(0);
    }
    let long_form = matches!(vr, b"OB" | b"OW" | b"OF" | b"SQ" | b"UT" | b"UN");
    let mut out = Vec::new();
    out.extend_from_slice(&group.to_le_bytes());
    out.extend_from_slice(&element.to_le_bytes());
    out.extend_from_slice(vr);
    if long_form {
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&(padded.len() as u32).to_le_bytes());
    } else {
        out.extend_from_slice(&(padded.len() as u16).to_le_bytes());
    }
    out.extend_from_slice(&padded);
    out
}

/// A minimal DICOM VOLUME instance: 128-byte preamble, `DICM`, an
/// explicit-VR-LE File Meta group declaring Explicit VR Little Endian,
/// and a dataset with just the elements this backend reads, plus
/// uncompressed RGB `PixelData`.
pub fn build_dicom_volume(series_uid: &str, sop_uid: &str, rows: u16, columns: u16) -> Vec<u8> {
    let mut data = vec![0u8; 128];
    data.extend_from_slice(b"DICM");
    data.extend(dicom_element(0x0002, 0x0010, b"UI", b"1.2.840.10008.1.2.1"));
    data.extend(dicom_element(0x0020, 0x000E, b"UI", series_uid.as_bytes()));
    data.extend(dicom_element(0x0008, 0x0018, b"UI", sop_uid.as_bytes()));
    data.extend(dicom_element(0x0008, 0x0008, b"CS", b"VOLUME"));
    data.extend(dicom_element(0x0028, 0x0002, b"US", &3u16.to_le_bytes()));
    data.extend(dicom_element(0x0028, 0x0010, b"US", &rows.to_le_bytes()));
    data.extend(dicom_element(0x0028, 0x0011, b"US", &columns.to_le_bytes()));
    let pixel_count = rows as usize * columns as usize * 3;
    let pixels: Vec<u8> = (0..pixel_count).map(|i| (i % 256) as u8).collect();
    data.extend(dicom_element(0x7FE0, 0x0010, b"OB", &pixels));
    data
}

// =============================================================================
// Validation helpers
// =============================================================================

pub fn is_tiff_magic(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    (data[0] == b'I' && data[1] == b'I' && data[2] == 42 && data[3] == 0)
        || (data[0] == b'M' && data[1] == b'M' && data[2] == 0 && data[3] == 42)
}

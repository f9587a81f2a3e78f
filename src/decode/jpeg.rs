//! JPEG tile decode (SPEC_FULL.md §4.5).
//!
//! SVS and several other TIFF-family vendors store abbreviated JPEG
//! streams (tile data missing the quantization/Huffman tables, merged
//! from the level's shared `JPEGTables` tag) — see
//! [`crate::format::jpeg`]; this adapter decodes the already-merged,
//! complete stream.

use std::io::Cursor;

use image::ImageReader;

use crate::error::{ErrorKind, SlideError};

/// Decode a complete JPEG stream into BGRA words, alpha = 0xFF.
pub fn decode_jpeg(data: &[u8]) -> Result<(u32, u32, Vec<u32>), SlideError> {
    let reader = ImageReader::with_format(Cursor::new(data), image::ImageFormat::Jpeg);
    let image = reader.decode().map_err(|e| {
        SlideError::with_source(ErrorKind::DecodeFailure, format!("JPEG decode failed: {e}"), e)
    })?;
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let pixels = rgb
        .chunks_exact(3)
        .map(|p| 0xFF00_0000u32 | (p[0] as u32) << 16 | (p[1] as u32) << 8 | p[2] as u32)
        .collect();
    Ok((width, height, pixels))
}

//! JPEG2000 tile decode (SPEC_FULL.md §4.5), used by DICOM's JPEG2000
//! lossless/lossy transfer syntaxes and any TIFF-family level that
//! declares `Compression = 33003`.
//!
//! `YBR_ICT`-encoded streams decode straight to RGB via `jpeg2k` (it
//! performs the chroma upsample and YCbCr→RGB conversion internally);
//! this adapter only has to repack into BGRA.

use jpeg2k::Image;

use crate::error::{ErrorKind, SlideError};

/// Decode a JPEG2000 codestream (raw `.j2k` or JP2-boxed) into BGRA
/// words, alpha = 0xFF.
pub fn decode_jpeg2000(data: &[u8]) -> Result<(u32, u32, Vec<u32>), SlideError> {
    let image = Image::from_bytes(data).map_err(|e| {
        SlideError::with_source(
            ErrorKind::DecodeFailure,
            format!("JPEG2000 decode failed: {e}"),
            std::io::Error::other(e.to_string()),
        )
    })?;

    let width = image.width();
    let height = image.height();
    let components = image.components();

    let pixels = match components.len() {
        1 => {
            let gray = components[0].data();
            (0..(width as usize * height as usize))
                .map(|i| {
                    let v = gray.get(i).copied().unwrap_or(0) as u32;
                    0xFF00_0000 | v << 16 | v << 8 | v
                })
                .collect()
        }
        3 | 4 => {
            let r = components[0].data();
            let g = components[1].data();
            let b = components[2].data();
            (0..(width as usize * height as usize))
                .map(|i| {
                    let r = r.get(i).copied().unwrap_or(0) as u32;
                    let g = g.get(i).copied().unwrap_or(0) as u32;
                    let b = b.get(i).copied().unwrap_or(0) as u32;
                    0xFF00_0000 | r << 16 | g << 8 | b
                })
                .collect()
        }
        n => {
            return Err(SlideError::new(
                ErrorKind::DecodeFailure,
                format!("JPEG2000 decode failed: unsupported component count {n}"),
            ))
        }
    };

    Ok((width, height, pixels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_input_is_a_decode_failure() {
        let err = decode_jpeg2000(&[0, 1, 2, 3]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DecodeFailure);
    }
}

//! HEVC tile decode (SPEC_FULL.md §4.5).
//!
//! DICOM WSI objects may declare the HEVC/H.265 transfer syntax for a
//! frame. The interface is wired into the transfer-syntax dispatch so
//! callers never need a special case, but no HEVC decoder is vendored
//! here: decoding always fails rather than shipping a partial or
//! incorrect frame.

use crate::error::{ErrorKind, SlideError};

/// A single HEVC-coded frame as extracted from its containing
/// transport (DICOM encapsulated pixel data fragment).
pub struct HevcFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// Always returns a decode failure naming the missing codec.
pub fn decode_hevc(_frame: &HevcFrame<'_>) -> Result<(u32, u32, Vec<u32>), SlideError> {
    Err(SlideError::new(
        ErrorKind::DecodeFailure,
        "HEVC decoding is not supported: no HEVC/H.265 decoder is available",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_reports_missing_codec() {
        let frame = HevcFrame { data: &[0, 1, 2, 3], width: 16, height: 16 };
        let err = decode_hevc(&frame).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DecodeFailure);
        assert!(err.message.contains("HEVC"));
    }
}

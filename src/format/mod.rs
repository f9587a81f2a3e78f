//! Format parsers for Whole Slide Image files.
//!
//! This module provides parsers for WSI formats: the TIFF/BigTIFF/NDPI
//! directory-chain reader shared by every tiled-pyramid vendor, the JPEG
//! marker utilities used to splice tile scans onto shared quantization
//! tables, and the vendor backend dispatch table that turns a path into
//! a fully-opened [`crate::slide::SlideContents`].

pub mod backend;
pub mod jpeg;
pub mod tiff;

pub use backend::{detect_vendor, open_with_backends};

//! Tile decode adapters (SPEC_FULL.md §4.5).
//!
//! Every adapter normalises to premultiplied BGRA, little-endian 32-bit
//! words, alpha in the high byte — the format [`crate::grid::Canvas`]
//! composites. Vendor backends call exactly one of these per tile,
//! selected by the tile's own compression tag.

mod hevc;
mod jpeg;
mod jpeg2000;
mod raw;

pub use hevc::decode_hevc;
pub use jpeg::decode_jpeg;
pub use jpeg2000::decode_jpeg2000;
pub use raw::{bgr_to_bgra, rgb_to_bgra};

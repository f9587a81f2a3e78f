//! # wsi-reader
//!
//! A read-only library for whole-slide microscopy images: gigapixel
//! images produced by pathology scanners, stored as multi-resolution
//! pyramids in one of several proprietary container formats layered on
//! top of TIFF, DICOM, or raw JPEG.
//!
//! A [`Slide`](slide::Slide) is opened by filename; consumers then
//! perform random access on an abstract pyramid: query level
//! dimensions, read an arbitrary rectangle of premultiplied BGRA
//! pixels from any level, enumerate associated images (label, macro,
//! thumbnail), read metadata properties, and extract an embedded ICC
//! color profile. Writing, modifying, and rendering slides, and any
//! network I/O, are explicitly out of scope.
//!
//! ## Architecture
//!
//! - [`io`] — pread-style random-access file primitives and the
//!   per-slide file handle pool.
//! - [`mod@format`] — the tifflike TIFF/BigTIFF/NDPI directory-chain
//!   reader and the vendor backend dispatch table.
//! - [`grid`] — the three tile-layout abstractions (simple, tilemap,
//!   range) and the saturating canvas compositor.
//! - [`decode`] — JPEG/JPEG2000/HEVC/raw tile decode adapters,
//!   normalised to premultiplied BGRA.
//! - [`tile`] — the bounded, pinned decoded-tile cache.
//! - [`slide`] — the opaque `Slide` façade: properties, associated
//!   images, level array, cache binding, sticky error cell.
//! - [`hash`] — the quickhash incremental digest.
//! - [`config`] — tunables for cache/handle-pool sizing, and the
//!   `wsi-inspect` demonstration CLI's argument types.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsi_reader::Slide;
//!
//! let slide = Slide::open("sample.svs");
//! if let Some(err) = slide.get_error() {
//!     eprintln!("failed to open slide: {err}");
//!     return;
//! }
//!
//! let (width, height) = slide.level_dimensions(0).unwrap();
//! let mut dest = vec![0u32; 256 * 256];
//! slide.read_region(&mut dest, 0, 0, 0, 256, 256);
//! println!("level 0 is {width}x{height}, vendor={:?}", slide.vendor());
//! ```

pub mod config;
pub mod decode;
pub mod error;
pub mod format;
pub mod grid;
pub mod hash;
pub mod io;
pub mod slide;
pub mod tile;

pub use config::Config;
pub use error::{DicomError, ErrorKind, FormatError, IoError, SlideError, TiffError};
pub use format::detect_vendor;
pub use hash::Hasher;
pub use slide::{cache_create, cache_release, AssociatedImage, Level, Slide};
pub use tile::TileCache;

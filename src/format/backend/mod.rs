//! Vendor format dispatch (SPEC_FULL.md §4.4): `detect`/`open` across
//! every supported container, in a fixed priority order.
//!
//! Each backend gets a [`ProbeContext`] built once per `Slide::open` or
//! `Slide::detect_vendor` call — a TIFF directory chain is walked at
//! most once and shared by every TIFF-family backend's `detect`,
//! rather than each one re-parsing the file to check its own marker.

mod dicom;
mod generic_tiff;
mod hamamatsu;
mod mirax;
mod ndpi;
mod ome_tiff;
mod optra;
mod philips;
mod sakura;
mod scn;
mod svs;
mod synthetic;
mod teksqray;
mod tiff_family;
mod trestle;
mod ventana;

pub use tiff_family::{
    build_from_levels, compute_quickhash, decode_associated_image, extract_icc_profile_from_jpeg,
    open_generic_pyramid, read_ifd_f64, read_ifd_string, TiffFamilyLevel, TiffFamilySource,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::SlideError;
use crate::format::tiff::TiffDirectoryReader;
use crate::io::LocalFileReader;
use crate::slide::{CacheBinding, SlideContents};

/// Prefix recognised by the synthetic backend: `synthetic:<spec>` never
/// touches disk, so [`build_probe_context`] short-circuits it before
/// any file I/O is attempted (SPEC_FULL.md §9, synthetic slides).
pub const SYNTHETIC_PREFIX: &str = "synthetic:";

/// Everything a backend's `detect`/`open` needs to inspect a candidate
/// file, built once and shared across every backend probed for one
/// `open`/`detect_vendor` call.
pub struct ProbeContext {
    pub path: PathBuf,
    /// `Some` once a TIFF/BigTIFF/NDPI header was successfully parsed;
    /// `None` for non-TIFF containers (DICOM, MIRAX, Sakura, …) or a
    /// synthetic pseudo-path.
    pub tifflike: Option<Arc<TiffDirectoryReader>>,
    /// `Some` unless the path is a synthetic spec or couldn't be
    /// opened at all.
    pub reader: Option<Arc<LocalFileReader>>,
}

impl ProbeContext {
    pub fn is_synthetic(&self) -> bool {
        self.path.to_string_lossy().starts_with(SYNTHETIC_PREFIX)
    }
}

/// Build a probe context for `path`: opens the file once, and, if its
/// magic bytes look TIFF-like, walks its directory chain once so every
/// TIFF-family backend's `detect` can just inspect the result.
pub async fn build_probe_context(path: &Path) -> ProbeContext {
    if path.to_string_lossy().starts_with(SYNTHETIC_PREFIX) {
        return ProbeContext { path: path.to_path_buf(), tifflike: None, reader: None };
    }

    let reader = match LocalFileReader::open(path) {
        Ok(reader) => Arc::new(reader),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "probe: could not open file");
            return ProbeContext { path: path.to_path_buf(), tifflike: None, reader: None };
        }
    };

    let tifflike = match TiffDirectoryReader::open(reader.as_ref()).await {
        Ok(directory_reader) => Some(Arc::new(directory_reader)),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "probe: not a tifflike container");
            None
        }
    };

    ProbeContext { path: path.to_path_buf(), tifflike, reader: Some(reader) }
}

/// A single supported container format: detection plus full parsing.
///
/// Backends are probed in a fixed order (SPEC_FULL.md §4.4); the first
/// whose `detect` returns `true` is the one `open` is called on. A
/// `detect` that returns `true` is a promise that `open` targets the
/// right format, not a promise that `open` will succeed — a detected
/// file can still fail with `FormatFailure` (corrupt metadata) rather
/// than `NotASlide`.
#[async_trait]
pub trait VendorBackend: Send + Sync {
    fn vendor_name(&self) -> &'static str;

    async fn detect(&self, ctx: &ProbeContext) -> bool;

    async fn open(&self, ctx: &ProbeContext, cache: CacheBinding) -> Result<SlideContents, SlideError>;
}

/// Registered backends, most format-specific first; `generic_tiff` is
/// the fallback every other tiled-pyramid TIFF falls through to, so it
/// stays last (SPEC_FULL.md §4.4).
fn backends() -> Vec<Box<dyn VendorBackend>> {
    vec![
        Box::new(synthetic::SyntheticBackend),
        Box::new(dicom::DicomBackend),
        Box::new(svs::SvsBackend),
        Box::new(ndpi::NdpiBackend),
        Box::new(philips::PhilipsBackend),
        Box::new(ome_tiff::OmeTiffBackend),
        Box::new(ventana::VentanaBackend),
        Box::new(optra::OptraBackend),
        Box::new(trestle::TrestleBackend),
        Box::new(scn::ScnBackend),
        Box::new(hamamatsu::HamamatsuBackend),
        Box::new(mirax::MiraxBackend),
        Box::new(sakura::SakuraBackend),
        Box::new(teksqray::TeksqrayBackend),
        Box::new(generic_tiff::GenericTiffBackend),
    ]
}

/// `detect_vendor(path)` (SPEC_FULL.md §6): the name of the first
/// backend whose `detect` matches, without fully opening the slide.
pub async fn detect_vendor(path: &Path) -> Option<&'static str> {
    let ctx = build_probe_context(path).await;
    for backend in backends() {
        if backend.detect(&ctx).await {
            return Some(backend.vendor_name());
        }
    }
    None
}

/// `Slide::open`'s backend dispatch (SPEC_FULL.md §4.4): probe every
/// backend in order and fully open the first match. A file that
/// matches no backend's `detect` is `NotASlide`; a file that matches
/// one but fails to parse surfaces that backend's own error instead of
/// falling through to a worse-fitting backend.
pub async fn open_with_backends(path: &Path, cache: CacheBinding) -> Result<SlideContents, SlideError> {
    let ctx = build_probe_context(path).await;
    for backend in backends() {
        if backend.detect(&ctx).await {
            debug!(vendor = backend.vendor_name(), path = %path.display(), "vendor backend matched");
            return backend.open(&ctx, cache).await;
        }
    }
    Err(SlideError::not_a_slide(format!(
        "no registered backend recognised {}",
        path.display()
    )))
}

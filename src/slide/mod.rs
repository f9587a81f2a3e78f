//! The slide façade (SPEC_FULL.md §3 "Slide", §6 "External interfaces"):
//! the opaque per-slide object returned by `Slide::open`.
//!
//! Rust surface shape: per SPEC_FULL.md §6, these are inherent methods on
//! a `Slide` struct rather than free functions over an opaque handle —
//! ownership and `Drop` replace the language-neutral `close`. Every
//! method here is a plain blocking call (§5 "Execution substrate");
//! internally they drive the async `RangeReader`/`FileHandlePool`
//! machinery through [`crate::io::blocking_runtime`].

mod associated;
mod level;

pub use associated::AssociatedImage;
pub use level::Level;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, info, warn};

use crate::error::SlideError;
use crate::format::backend;
use crate::grid::{Canvas, TileSource};
use crate::tile::TileCache;

/// A slide's cache binding: shared between the `Slide` and every
/// `TileSource` its backend installed, so `set_cache` is visible from
/// inside `read_tile` without threading the binding through the `Grid`
/// trait (SPEC_FULL.md §6, "Cache: ... set_cache(slide, handle)").
pub type CacheBinding = Arc<Mutex<Arc<TileCache>>>;

/// The width of a chunk `read_region` paints at a time (SPEC_FULL.md
/// §4.5's "4096-pixel-square chunking" contract).
const CHUNK_SIZE: u32 = 4096;

/// Everything a vendor backend's `open` populates (SPEC_FULL.md §4.4).
pub struct SlideContents {
    pub vendor: &'static str,
    pub levels: Vec<Level>,
    pub source: Arc<dyn TileSource>,
    pub associated: BTreeMap<String, AssociatedImage>,
    pub properties: BTreeMap<String, String>,
    pub icc_profile: Option<Vec<u8>>,
}

/// One open whole-slide image (SPEC_FULL.md §3 "Slide").
///
/// Immutable after `open` except for the cache binding and the
/// write-once sticky error cell. Safe to share across threads for
/// every read operation; `open`/`close` (here, `Drop`) are not
/// meant to race with other calls on the same `Slide`.
pub struct Slide {
    contents: Option<SlideContents>,
    cache: CacheBinding,
    error: OnceLock<SlideError>,
}

impl Slide {
    /// Probe every registered vendor backend in order and open the
    /// first whose `detect` succeeds (SPEC_FULL.md §4.4). Never fails
    /// outright: on any error the returned `Slide` carries a sticky
    /// error observable via [`Slide::get_error`].
    pub fn open(path: impl AsRef<Path>) -> Slide {
        let path = path.as_ref();
        let cache: CacheBinding = Arc::new(Mutex::new(TileCache::new()));
        let error = OnceLock::new();

        match crate::io::blocking_runtime().block_on(backend::open_with_backends(path, cache.clone())) {
            Ok(contents) => {
                info!(vendor = contents.vendor, path = %path.display(), "slide opened");
                Slide { contents: Some(contents), cache, error }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "slide open failed");
                let _ = error.set(err);
                Slide { contents: None, cache, error }
            }
        }
    }

    /// Probe backends without fully opening a slide (SPEC_FULL.md §6
    /// `detect_vendor`).
    pub fn detect_vendor(path: impl AsRef<Path>) -> Option<&'static str> {
        crate::io::blocking_runtime().block_on(backend::detect_vendor(path.as_ref()))
    }

    pub fn get_error(&self) -> Option<String> {
        self.error.get().map(|e| e.to_string())
    }

    fn fail(&self, err: SlideError) {
        warn!(error = %err, "slide entered sticky error state");
        let _ = self.error.set(err);
    }

    fn contents(&self) -> Option<&SlideContents> {
        if self.error.get().is_some() {
            return None;
        }
        self.contents.as_ref()
    }

    pub fn vendor(&self) -> Option<&'static str> {
        self.contents().map(|c| c.vendor)
    }

    pub fn level_count(&self) -> usize {
        self.contents().map(|c| c.levels.len()).unwrap_or(0)
    }

    pub fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        let lvl = self.contents()?.levels.get(level)?;
        Some((lvl.width, lvl.height))
    }

    pub fn level_downsample(&self, level: usize) -> Option<f64> {
        let lvl = self.contents()?.levels.get(level)?;
        Some(lvl.downsample)
    }

    /// Largest level whose downsample is `<= d`; 0 if `d` is smaller
    /// than every level's downsample; the last level if larger than
    /// all of them (SPEC_FULL.md §6).
    pub fn best_level_for_downsample(&self, d: f64) -> Option<usize> {
        let contents = self.contents()?;
        if contents.levels.is_empty() {
            return None;
        }
        let mut best = 0;
        for (i, lvl) in contents.levels.iter().enumerate() {
            if lvl.downsample <= d {
                best = i;
            }
        }
        Some(best)
    }

    /// Write `w * h` premultiplied BGRA words to `dest`. Negative `x`/`y`
    /// are allowed; level-space pixels at `x < 0` or `y < 0` are zero
    /// (SPEC_FULL.md §4.5, §6).
    pub fn read_region(&self, dest: &mut [u32], x: i64, y: i64, level: usize, w: u32, h: u32) {
        let dest_len = w as usize * h as usize;
        for p in dest.iter_mut().take(dest_len) {
            *p = 0;
        }

        if self.error.get().is_some() {
            return;
        }

        let Some(contents) = self.contents.as_ref() else { return };
        let Some(lvl) = contents.levels.get(level) else {
            self.fail(SlideError::invalid_argument(format!("level {level} out of range")));
            return;
        };

        if dest.len() < dest_len {
            self.fail(SlideError::invalid_argument("destination buffer too small"));
            return;
        }

        let mut chunk_y = y;
        while chunk_y < y + h as i64 {
            let chunk_h = CHUNK_SIZE.min((y + h as i64 - chunk_y) as u32);
            let mut chunk_x = x;
            while chunk_x < x + w as i64 {
                let chunk_w = CHUNK_SIZE.min((x + w as i64 - chunk_x) as u32);

                let mut canvas = Canvas::new(chunk_x, chunk_y, chunk_w, chunk_h);
                if let Err(err) =
                    lvl.grid.paint_region(&mut canvas, contents.source.as_ref(), level, chunk_x, chunk_y, chunk_w, chunk_h)
                {
                    for p in dest.iter_mut().take(dest_len) {
                        *p = 0;
                    }
                    self.fail(err);
                    return;
                }
                canvas.copy_into(dest, x, y, w);

                chunk_x += chunk_w as i64;
            }
            chunk_y += chunk_h as i64;
        }
    }

    pub fn icc_profile_size(&self) -> i64 {
        self.contents().and_then(|c| c.icc_profile.as_ref()).map(|p| p.len() as i64).unwrap_or(-1)
    }

    pub fn read_icc_profile(&self, dest: &mut [u8]) -> Result<(), SlideError> {
        let Some(contents) = self.contents() else {
            return Err(SlideError::no_value("no ICC profile: slide has a sticky error"));
        };
        let Some(icc) = contents.icc_profile.as_ref() else {
            return Err(SlideError::no_value("slide has no ICC profile"));
        };
        if dest.len() < icc.len() {
            return Err(SlideError::invalid_argument("destination buffer too small for ICC profile"));
        }
        dest[..icc.len()].copy_from_slice(icc);
        Ok(())
    }

    pub fn property_names(&self) -> Vec<String> {
        self.contents().map(|c| c.properties.keys().cloned().collect()).unwrap_or_default()
    }

    pub fn property_value(&self, name: &str) -> Option<&str> {
        self.contents()?.properties.get(name).map(|s| s.as_str())
    }

    pub fn associated_image_names(&self) -> Vec<String> {
        self.contents().map(|c| c.associated.keys().cloned().collect()).unwrap_or_default()
    }

    pub fn associated_image_dimensions(&self, name: &str) -> Option<(u32, u32)> {
        let img = self.contents()?.associated.get(name)?;
        Some((img.width, img.height))
    }

    pub fn read_associated_image(&self, name: &str, dest: &mut [u32]) -> Result<(), SlideError> {
        let Some(contents) = self.contents() else {
            return Err(SlideError::no_value("no associated images: slide has a sticky error"));
        };
        let Some(img) = contents.associated.get(name) else {
            return Err(SlideError::no_value(format!("no associated image named {name}")));
        };
        if dest.len() < img.pixels.len() {
            return Err(SlideError::invalid_argument("destination buffer too small"));
        }
        dest[..img.pixels.len()].copy_from_slice(&img.pixels);
        Ok(())
    }

    pub fn associated_icc_profile_size(&self, name: &str) -> i64 {
        self.contents()
            .and_then(|c| c.associated.get(name))
            .and_then(|img| img.icc_size())
            .map(|n| n as i64)
            .unwrap_or(-1)
    }

    pub fn read_associated_icc_profile(&self, name: &str, dest: &mut [u8]) -> Result<(), SlideError> {
        let Some(contents) = self.contents() else {
            return Err(SlideError::no_value("slide has a sticky error"));
        };
        let Some(img) = contents.associated.get(name) else {
            return Err(SlideError::no_value(format!("no associated image named {name}")));
        };
        let Some(icc) = img.icc_profile.as_ref() else {
            return Err(SlideError::no_value("associated image has no ICC profile"));
        };
        if dest.len() < icc.len() {
            return Err(SlideError::invalid_argument("destination buffer too small"));
        }
        dest[..icc.len()].copy_from_slice(icc);
        Ok(())
    }

    /// Rebind this slide to a different cache (SPEC_FULL.md §6
    /// `set_cache`). Every `TileSource` the backend installed shares
    /// this binding, so the swap is visible to in-flight and future
    /// `read_region` calls alike.
    pub fn set_cache(&self, cache: Arc<TileCache>) {
        debug!("slide rebound to a new tile cache");
        *self.cache.lock().unwrap() = cache;
    }
}

/// `cache_create(capacity_bytes)` (SPEC_FULL.md §6): a standalone cache
/// binding that can be shared across multiple `Slide`s via
/// [`Slide::set_cache`].
pub fn cache_create(capacity_bytes: usize) -> Arc<TileCache> {
    TileCache::with_capacity(capacity_bytes)
}

/// `cache_release(handle)`: drops the caller's reference; the cache is
/// freed once no `Slide` still has it bound.
pub fn cache_release(_cache: Arc<TileCache>) {}

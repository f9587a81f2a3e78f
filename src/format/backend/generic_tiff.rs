//! Generic pyramidal TIFF (SPEC_FULL.md §4.4): the fallback backend for
//! any tiled TIFF/BigTIFF pyramid that doesn't match a more specific
//! vendor's markers. Registered last so every other backend gets first
//! refusal.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::SlideError;
use crate::slide::{CacheBinding, SlideContents};

use super::{open_generic_pyramid, ProbeContext, VendorBackend};

pub struct GenericTiffBackend;

#[async_trait]
impl VendorBackend for GenericTiffBackend {
    fn vendor_name(&self) -> &'static str {
        "generic-tiff"
    }

    async fn detect(&self, ctx: &ProbeContext) -> bool {
        ctx.tifflike.is_some()
    }

    async fn open(&self, ctx: &ProbeContext, cache: CacheBinding) -> Result<SlideContents, SlideError> {
        let reader = ctx
            .reader
            .as_ref()
            .ok_or_else(|| SlideError::not_a_slide("no file reader available"))?;
        let directory_reader = ctx
            .tifflike
            .as_ref()
            .ok_or_else(|| SlideError::not_a_slide("not a tifflike container"))?;
        open_generic_pyramid(&ctx.path, reader, directory_reader, cache, self.vendor_name(), BTreeMap::new()).await
    }
}

//! Optra (SPEC_FULL.md §4.4): a generic tiled TIFF pyramid identified
//! by an OptraSCAN `Software` tag marker, with no further metadata
//! convention beyond the shared generic-TIFF-family classification.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::SlideError;
use crate::format::tiff::TiffTag;
use crate::slide::{CacheBinding, SlideContents};

use super::{open_generic_pyramid, read_ifd_string, ProbeContext, VendorBackend};

pub struct OptraBackend;

#[async_trait]
impl VendorBackend for OptraBackend {
    fn vendor_name(&self) -> &'static str {
        "optra"
    }

    async fn detect(&self, ctx: &ProbeContext) -> bool {
        let Some(software) = software_of(ctx).await else { return false };
        software.contains("Optra") || software.contains("OptraSCAN")
    }

    async fn open(&self, ctx: &ProbeContext, cache: CacheBinding) -> Result<SlideContents, SlideError> {
        let reader = ctx.reader.as_ref().ok_or_else(|| SlideError::not_a_slide("no file reader available"))?;
        let directory_reader = ctx.tifflike.as_ref().ok_or_else(|| SlideError::not_a_slide("not a tifflike container"))?;

        let mut properties = BTreeMap::new();
        if let Some(software) = software_of(ctx).await {
            properties.insert("optra.Software".to_string(), software);
        }

        open_generic_pyramid(&ctx.path, reader, directory_reader, cache, self.vendor_name(), properties).await
    }
}

async fn software_of(ctx: &ProbeContext) -> Option<String> {
    let reader = ctx.reader.as_ref()?;
    let directory_reader = ctx.tifflike.as_ref()?;
    read_ifd_string(reader, directory_reader, 0, TiffTag::Software).await
}

//! Hamamatsu NDPI (SPEC_FULL.md §4.2, §4.4): a generic tiled TIFF
//! pyramid declaring itself classic TIFF (version 42) while exceeding
//! 4 GiB, using the private tag 65420 as a marker and tags 65421-65423
//! for the source objective lens and macro-to-level-0 registration
//! offset. Detected once, at directory-chain parse time, by
//! [`TiffDirectoryReader::open`] itself; this backend only has to
//! check the flag it already set.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::SlideError;
use crate::format::tiff::TiffTag;
use crate::slide::{CacheBinding, SlideContents};

use super::{open_generic_pyramid, read_ifd_f64, ProbeContext, VendorBackend};

pub struct NdpiBackend;

#[async_trait]
impl VendorBackend for NdpiBackend {
    fn vendor_name(&self) -> &'static str {
        "hamamatsu-ndpi"
    }

    async fn detect(&self, ctx: &ProbeContext) -> bool {
        ctx.tifflike.as_ref().map(|t| t.ndpi_mode).unwrap_or(false)
    }

    async fn open(&self, ctx: &ProbeContext, cache: CacheBinding) -> Result<SlideContents, SlideError> {
        let reader = ctx.reader.as_ref().ok_or_else(|| SlideError::not_a_slide("no file reader available"))?;
        let directory_reader = ctx.tifflike.as_ref().ok_or_else(|| SlideError::not_a_slide("not an NDPI container"))?;

        let mut properties = BTreeMap::new();
        if let Some(lens) = read_ifd_f64(reader, directory_reader, 0, TiffTag::NdpiSourceLens).await {
            properties.insert("hamamatsu.SourceLens".to_string(), lens.to_string());
            properties.insert("openslide.objective-power".to_string(), lens.to_string());
        }
        if let Some(x_offset) = read_ifd_f64(reader, directory_reader, 0, TiffTag::NdpiXOffset).await {
            properties.insert("hamamatsu.XOffsetFromSlideCentre".to_string(), x_offset.to_string());
        }
        if let Some(y_offset) = read_ifd_f64(reader, directory_reader, 0, TiffTag::NdpiYOffset).await {
            properties.insert("hamamatsu.YOffsetFromSlideCentre".to_string(), y_offset.to_string());
        }

        open_generic_pyramid(&ctx.path, reader, directory_reader, cache, self.vendor_name(), properties).await
    }
}

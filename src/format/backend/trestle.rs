//! Trestle (SPEC_FULL.md §4.4): a generic-TIFF-family variant keyed by
//! a "Trestle Image" `ImageDescription` marker, with per-level
//! calibration carried in a private `TrestleMeta` tag (65000) as a
//! semicolon-separated `Key = Value` block rather than XML.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::SlideError;
use crate::format::tiff::{TiffTag, ValueReader};
use crate::slide::{CacheBinding, SlideContents};

use super::{open_generic_pyramid, read_ifd_string, ProbeContext, VendorBackend};

/// Trestle's private metadata tag: not part of the shared `TiffTag`
/// vocabulary, so it's looked up directly through `Ifd::entries_by_tag`
/// rather than `get_entry_by_tag`.
const TRESTLE_META_TAG: u16 = 65000;

pub struct TrestleBackend;

#[async_trait]
impl VendorBackend for TrestleBackend {
    fn vendor_name(&self) -> &'static str {
        "trestle"
    }

    async fn detect(&self, ctx: &ProbeContext) -> bool {
        let Some(description) = description_of(ctx).await else { return false };
        description.contains("Trestle Image")
    }

    async fn open(&self, ctx: &ProbeContext, cache: CacheBinding) -> Result<SlideContents, SlideError> {
        let reader = ctx.reader.as_ref().ok_or_else(|| SlideError::not_a_slide("no file reader available"))?;
        let directory_reader = ctx.tifflike.as_ref().ok_or_else(|| SlideError::not_a_slide("not a tifflike container"))?;

        let meta = trestle_meta(ctx).await.unwrap_or_default();
        let parsed = parse_trestle_meta(&meta);
        let properties = extra_properties(&parsed);

        open_generic_pyramid(&ctx.path, reader, directory_reader, cache, self.vendor_name(), properties).await
    }
}

async fn description_of(ctx: &ProbeContext) -> Option<String> {
    let reader = ctx.reader.as_ref()?;
    let directory_reader = ctx.tifflike.as_ref()?;
    read_ifd_string(reader, directory_reader, 0, TiffTag::ImageDescription).await
}

/// Read the raw `TrestleMeta` tag off directory 0 by numeric tag ID,
/// since it has no `TiffTag` variant of its own.
async fn trestle_meta(ctx: &ProbeContext) -> Option<String> {
    let reader = ctx.reader.as_ref()?;
    let directory_reader = ctx.tifflike.as_ref()?;
    let ifd = directory_reader.directory(0)?;
    let &entry_index = ifd.entries_by_tag.get(&TRESTLE_META_TAG)?;
    let entry = &ifd.entries[entry_index];
    let value_reader = ValueReader::new(reader.as_ref(), &directory_reader.header);
    value_reader.read_string(entry).await.ok()
}

/// Parse Trestle's `Key = Value;Key = Value` metadata block.
fn parse_trestle_meta(meta: &str) -> BTreeMap<String, String> {
    let mut parsed = BTreeMap::new();
    for part in meta.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            parsed.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    parsed
}

fn extra_properties(parsed: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    for (key, value) in parsed {
        properties.insert(format!("trestle.{key}"), value.clone());
    }
    if let Some(mpp_x) = parsed.get("Pixel Size X").and_then(|v| v.parse::<f64>().ok()) {
        properties.insert("openslide.mpp-x".to_string(), mpp_x.to_string());
    }
    if let Some(mpp_y) = parsed.get("Pixel Size Y").and_then(|v| v.parse::<f64>().ok()) {
        properties.insert("openslide.mpp-y".to_string(), mpp_y.to_string());
    }
    if let Some(power) = parsed.get("Objective Power") {
        properties.insert("openslide.objective-power".to_string(), power.clone());
    }
    properties
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_semicolon_separated_meta() {
        let meta = "Objective Power = 20;Pixel Size X = 0.465;Pixel Size Y = 0.465";
        let parsed = parse_trestle_meta(meta);
        let properties = extra_properties(&parsed);
        assert_eq!(properties.get("openslide.objective-power"), Some(&"20".to_string()));
        assert_eq!(properties.get("openslide.mpp-x"), Some(&"0.465".to_string()));
    }
}

//! Leica SCN (SPEC_FULL.md §4.4): a generic-TIFF-family variant whose
//! IFDs are grouped by an embedded XML `<collection>`/`<image>` tree —
//! one `<image>` per pyramid *and* per z-plane/channel. Only the
//! default plane (`<dimension r="0">`) of the largest `<image>` is
//! surfaced, per the non-goal on per-focal-plane access; level
//! filtering follows this XML grouping rather than SUBFILETYPE alone.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::SlideError;
use crate::format::tiff::{TiffPyramid, TiffTag};
use crate::slide::{CacheBinding, SlideContents};

use super::{build_from_levels, read_ifd_string, ProbeContext, VendorBackend};

pub struct ScnBackend;

#[async_trait]
impl VendorBackend for ScnBackend {
    fn vendor_name(&self) -> &'static str {
        "leica-scn"
    }

    async fn detect(&self, ctx: &ProbeContext) -> bool {
        let Some(description) = description_of(ctx).await else { return false };
        description.contains("<scn") || description.contains("<collection")
    }

    async fn open(&self, ctx: &ProbeContext, cache: CacheBinding) -> Result<SlideContents, SlideError> {
        let reader = ctx.reader.as_ref().ok_or_else(|| SlideError::not_a_slide("no file reader available"))?;
        let directory_reader = ctx.tifflike.as_ref().ok_or_else(|| SlideError::not_a_slide("not a tifflike container"))?;

        let description = description_of(ctx).await.unwrap_or_default();
        let default_plane_ifds = parse_default_plane_ifds(&description);

        let pyramid = TiffPyramid::from_directory_reader(reader.as_ref(), directory_reader)
            .await
            .map_err(SlideError::from)?;

        let mut selected: Vec<_> = if default_plane_ifds.is_empty() {
            pyramid.levels.clone()
        } else {
            pyramid
                .levels
                .iter()
                .filter(|l| default_plane_ifds.contains(&l.ifd_index))
                .cloned()
                .collect()
        };
        if selected.is_empty() {
            selected = pyramid.levels.clone();
        }
        selected.sort_by(|a, b| b.width.cmp(&a.width));
        let base_width = selected.first().map(|l| l.width as f64);
        let base_height = selected.first().map(|l| l.height as f64);
        for (idx, level) in selected.iter_mut().enumerate() {
            level.level_index = idx;
            level.downsample = match (base_width, base_height) {
                (Some(bw), Some(bh)) if level.width > 0 && level.height > 0 => {
                    ((bw / level.width as f64) + (bh / level.height as f64)) / 2.0
                }
                _ => 1.0,
            };
        }

        build_from_levels(
            &ctx.path,
            reader,
            pyramid.header.clone(),
            &selected,
            &pyramid.associated,
            cache,
            self.vendor_name(),
            BTreeMap::new(),
        )
        .await
    }
}

async fn description_of(ctx: &ProbeContext) -> Option<String> {
    let reader = ctx.reader.as_ref()?;
    let directory_reader = ctx.tifflike.as_ref()?;
    read_ifd_string(reader, directory_reader, 0, TiffTag::ImageDescription).await
}

/// Walk the `<collection>` tree and return the `ifd` attributes of
/// every `<dimension r="0">` belonging to the `<image>` with the most
/// such dimensions — the main pyramidal image, as opposed to a
/// single-plane macro or label `<image>`.
fn parse_default_plane_ifds(xml: &str) -> std::collections::BTreeSet<usize> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut images: Vec<Vec<usize>> = Vec::new();
    let mut current_image: Vec<usize> = Vec::new();
    let mut in_image = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"image" => {
                in_image = true;
                current_image = Vec::new();
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"image" => {
                if in_image {
                    images.push(std::mem::take(&mut current_image));
                }
                in_image = false;
            }
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.local_name().as_ref() == b"dimension" => {
                if !in_image {
                    continue;
                }
                let mut r: Option<i64> = None;
                let mut ifd: Option<usize> = None;
                for attr in e.attributes().flatten() {
                    let value = attr.unescape_value().unwrap_or_default();
                    match attr.key.local_name().as_ref() {
                        b"r" => r = value.parse().ok(),
                        b"ifd" => ifd = value.parse().ok(),
                        _ => {}
                    }
                }
                if r.unwrap_or(0) == 0 {
                    if let Some(ifd) = ifd {
                        current_image.push(ifd);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    images
        .into_iter()
        .max_by_key(|dims| dims.len())
        .map(|dims| dims.into_iter().collect())
        .unwrap_or_default()
}

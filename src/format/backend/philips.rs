//! Philips TIFF (SPEC_FULL.md §4.4): a generic tiled TIFF pyramid whose
//! first directory's `ImageDescription` carries a Philips "DataObject"
//! XML block (`PIM_DP_*`/`DICOM_*` attributes) rather than a flat
//! key=value line. The XML's per-representation `PIIM_PIXEL_DATA_
//! REPRESENTATION_{COLUMNS,ROWS}` are the slide's true (unpadded)
//! level dimensions; the TIFF directory's own `ImageWidth`/`ImageLength`
//! round up to a tile multiple and are overridden from the XML once
//! parsed (SPEC_FULL.md §4.4, "override level dimensions from XML
//! metadata when the TIFF directories' own dimensions are unreliable").

use std::collections::BTreeMap;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::SlideError;
use crate::format::tiff::TiffTag;
use crate::slide::{CacheBinding, SlideContents};

use super::{open_generic_pyramid, read_ifd_string, ProbeContext, VendorBackend};

pub struct PhilipsBackend;

#[async_trait]
impl VendorBackend for PhilipsBackend {
    fn vendor_name(&self) -> &'static str {
        "philips"
    }

    async fn detect(&self, ctx: &ProbeContext) -> bool {
        let Some(description) = description_of(ctx).await else { return false };
        description.contains("PIM_DP_SCANNED_IMAGES") || description.contains("DPUfsImport")
    }

    async fn open(&self, ctx: &ProbeContext, cache: CacheBinding) -> Result<SlideContents, SlideError> {
        let reader = ctx.reader.as_ref().ok_or_else(|| SlideError::not_a_slide("no file reader available"))?;
        let directory_reader = ctx.tifflike.as_ref().ok_or_else(|| SlideError::not_a_slide("not a tifflike container"))?;

        let description = description_of(ctx).await.unwrap_or_default();
        let representations = parse_representations(&description);
        let properties = extra_properties(&representations);

        let mut contents =
            open_generic_pyramid(&ctx.path, reader, directory_reader, cache, self.vendor_name(), properties).await?;

        // The XML lists representations in the same descending-resolution
        // order `open_generic_pyramid` sorted its levels into; zip them by
        // position rather than trying to match an explicit IFD index the
        // XML doesn't carry.
        for (level, rep) in contents.levels.iter_mut().zip(representations.iter()) {
            if rep.columns > 0 && rep.rows > 0 {
                level.width = rep.columns;
                level.height = rep.rows;
            }
        }

        Ok(contents)
    }
}

async fn description_of(ctx: &ProbeContext) -> Option<String> {
    let reader = ctx.reader.as_ref()?;
    let directory_reader = ctx.tifflike.as_ref()?;
    read_ifd_string(reader, directory_reader, 0, TiffTag::ImageDescription).await
}

#[derive(Debug, Default, Clone, PartialEq)]
struct PixelDataRepresentation {
    columns: u32,
    rows: u32,
    pixel_spacing: Option<f64>,
}

/// Walk the `PIM_DP_SCANNED_IMAGES` XML's flattened `<Attribute Name=...>`
/// sequence and group consecutive attributes into one representation per
/// `PIIM_PIXEL_DATA_REPRESENTATION_NUMBER` marker.
fn parse_representations(xml: &str) -> Vec<PixelDataRepresentation> {
    let mut reps = Vec::new();
    let mut current: Option<PixelDataRepresentation> = None;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current_name: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"Attribute" => {
                current_name = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.local_name().as_ref() == b"Name")
                    .and_then(|a| a.unescape_value().ok())
                    .map(|v| v.into_owned());
            }
            Ok(Event::Text(text)) => {
                if let Some(name) = current_name.take() {
                    let value = text.unescape().unwrap_or_default().into_owned();
                    apply_attribute(&mut reps, &mut current, &name, &value);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    if let Some(rep) = current.take() {
        reps.push(rep);
    }
    reps
}

fn apply_attribute(
    reps: &mut Vec<PixelDataRepresentation>,
    current: &mut Option<PixelDataRepresentation>,
    name: &str,
    value: &str,
) {
    match name {
        "PIIM_PIXEL_DATA_REPRESENTATION_NUMBER" => {
            if let Some(rep) = current.take() {
                reps.push(rep);
            }
            *current = Some(PixelDataRepresentation::default());
        }
        "PIIM_PIXEL_DATA_REPRESENTATION_COLUMNS" => {
            if let Some(rep) = current.as_mut() {
                rep.columns = value.parse().unwrap_or(0);
            }
        }
        "PIIM_PIXEL_DATA_REPRESENTATION_ROWS" => {
            if let Some(rep) = current.as_mut() {
                rep.rows = value.parse().unwrap_or(0);
            }
        }
        "DICOM_PIXEL_SPACING" => {
            if let Some(rep) = current.as_mut() {
                rep.pixel_spacing = value.split('\\').next().and_then(|v| v.trim().parse().ok());
            }
        }
        _ => {}
    }
}

fn extra_properties(representations: &[PixelDataRepresentation]) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    if let Some(mpp) = representations.first().and_then(|r| r.pixel_spacing) {
        // DICOM pixel spacing is in millimeters; openslide.mpp-* is microns.
        let mpp_microns = mpp * 1000.0;
        properties.insert("openslide.mpp-x".to_string(), mpp_microns.to_string());
        properties.insert("openslide.mpp-y".to_string(), mpp_microns.to_string());
    }
    properties
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pixel_data_representations() {
        let xml = r#"<DataObject ObjectType="DPUfsImport">
            <Attribute Name="PIM_DP_SCANNED_IMAGES">x</Attribute>
            <DataObject ObjectType="PixelDataRepresentation">
                <Attribute Name="PIIM_PIXEL_DATA_REPRESENTATION_NUMBER">0</Attribute>
                <Attribute Name="PIIM_PIXEL_DATA_REPRESENTATION_COLUMNS">86016</Attribute>
                <Attribute Name="PIIM_PIXEL_DATA_REPRESENTATION_ROWS">107520</Attribute>
                <Attribute Name="DICOM_PIXEL_SPACING">0.000199\0.000199</Attribute>
            </DataObject>
            <DataObject ObjectType="PixelDataRepresentation">
                <Attribute Name="PIIM_PIXEL_DATA_REPRESENTATION_NUMBER">1</Attribute>
                <Attribute Name="PIIM_PIXEL_DATA_REPRESENTATION_COLUMNS">21504</Attribute>
                <Attribute Name="PIIM_PIXEL_DATA_REPRESENTATION_ROWS">26880</Attribute>
            </DataObject>
        </DataObject>"#;
        let reps = parse_representations(xml);
        assert_eq!(reps.len(), 2);
        assert_eq!(reps[0].columns, 86016);
        assert_eq!(reps[0].rows, 107520);
        assert_eq!(reps[1].columns, 21504);
    }
}

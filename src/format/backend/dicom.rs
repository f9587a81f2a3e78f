//! DICOM Whole Slide Imaging (SPEC_FULL.md §4.4): a Slide Microscopy
//! series is spread across sibling `.dcm` files in one directory, one
//! instance per resolution, grouped by `SeriesInstanceUID` and
//! classified by `ImageType`'s purpose value (`VOLUME` vs `LABEL` /
//! `OVERVIEW` / `THUMBNAIL`).
//!
//! Documented acknowledged limitation: a production DICOM SM instance
//! tiles its `TotalPixelMatrixColumns x Rows` across many frames via the
//! Per-Frame Functional Groups Sequence, addressed by row-major frame
//! position. That positional index is not implemented here; each VOLUME
//! instance is read as a single frame covering the whole level
//! (`NumberOfFrames > 1` is rejected with `FormatFailure` rather than
//! silently cropping to frame 0). The element parser itself — File Meta
//! group, explicit/implicit VR little endian dataset, encapsulated
//! `PixelData` fragments — is otherwise a faithful, if minimal, Part 10
//! reader: no general-purpose DICOM crate is in the teacher's dependency
//! graph, so dataset parsing is hand-rolled against the specific
//! element set this backend needs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::decode::{decode_jpeg, decode_jpeg2000, rgb_to_bgra};
use crate::error::{DicomError, ErrorKind, SlideError};
use crate::grid::{Canvas, Grid, SimpleGrid, TileRecord, TileSource};
use crate::hash::Hasher;
use crate::io::{LocalFileReader, RangeReader};
use crate::slide::{CacheBinding, Level, SlideContents};
use crate::tile::{next_slide_id, TileCacheKey};

use super::{ProbeContext, VendorBackend};

const PREAMBLE_LEN: usize = 128;

const TAG_TRANSFER_SYNTAX_UID: (u16, u16) = (0x0002, 0x0010);
const TAG_IMAGE_TYPE: (u16, u16) = (0x0008, 0x0008);
const TAG_SOP_INSTANCE_UID: (u16, u16) = (0x0008, 0x0018);
const TAG_SERIES_INSTANCE_UID: (u16, u16) = (0x0020, 0x000E);
const TAG_SAMPLES_PER_PIXEL: (u16, u16) = (0x0028, 0x0002);
const TAG_PHOTOMETRIC_INTERPRETATION: (u16, u16) = (0x0028, 0x0004);
const TAG_NUMBER_OF_FRAMES: (u16, u16) = (0x0028, 0x0008);
const TAG_ROWS: (u16, u16) = (0x0028, 0x0010);
const TAG_COLUMNS: (u16, u16) = (0x0028, 0x0011);
const TAG_BITS_ALLOCATED: (u16, u16) = (0x0028, 0x0100);
const TAG_ICC_PROFILE: (u16, u16) = (0x0028, 0x2000);
const TAG_PIXEL_DATA: (u16, u16) = (0x7FE0, 0x0010);

const TRANSFER_SYNTAX_IMPLICIT_LE: &str = "1.2.840.10008.1.2";
const TRANSFER_SYNTAX_EXPLICIT_LE: &str = "1.2.840.10008.1.2.1";
const TRANSFER_SYNTAX_JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
const TRANSFER_SYNTAX_JPEG2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";
const TRANSFER_SYNTAX_JPEG2000: &str = "1.2.840.10008.1.2.4.91";

pub struct DicomBackend;

#[async_trait]
impl VendorBackend for DicomBackend {
    fn vendor_name(&self) -> &'static str {
        "dicom"
    }

    async fn detect(&self, ctx: &ProbeContext) -> bool {
        if ctx.tifflike.is_some() {
            return false;
        }
        let Some(reader) = &ctx.reader else { return false };
        if reader.size() < (PREAMBLE_LEN + 4) as u64 {
            return false;
        }
        let Ok(magic) = reader.read_exact_at(PREAMBLE_LEN as u64, 4).await else { return false };
        &magic[..] == b"DICM"
    }

    async fn open(&self, ctx: &ProbeContext, cache: CacheBinding) -> Result<SlideContents, SlideError> {
        let reader = ctx.reader.as_ref().ok_or_else(|| SlideError::not_a_slide("no file reader available"))?;
        let anchor = DicomInstance::load(ctx.path.clone(), reader).await?;

        let dir = ctx.path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let mut instances = vec![anchor.clone()];
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path == ctx.path || !path.is_file() {
                    continue;
                }
                let Ok(sibling_reader) = LocalFileReader::open(&path) else { continue };
                if sibling_reader.size() < (PREAMBLE_LEN + 4) as u64 {
                    continue;
                }
                let Ok(magic) = sibling_reader.read_exact_at(PREAMBLE_LEN as u64, 4).await else { continue };
                if &magic[..] != b"DICM" {
                    continue;
                }
                if let Ok(instance) = DicomInstance::load(path, &sibling_reader).await {
                    if instance.series_instance_uid == anchor.series_instance_uid {
                        instances.push(instance);
                    }
                }
            }
        }

        let mut volumes: Vec<DicomInstance> = Vec::new();
        let mut associated_instances: Vec<DicomInstance> = Vec::new();
        for instance in instances {
            if instance.purposes.contains("VOLUME") {
                volumes.push(instance);
            } else {
                associated_instances.push(instance);
            }
        }
        if volumes.is_empty() {
            return Err(SlideError::new(ErrorKind::FormatFailure, format!("series {} has no VOLUME instances", anchor.series_instance_uid)));
        }

        // Same-dimension VOLUME instances are only valid duplicates of
        // the same pyramid level if they share a SOPInstanceUID; two
        // that disagree are a genuine conflict, not a duplicate.
        let mut by_dims: BTreeMap<(u32, u32), &str> = BTreeMap::new();
        for instance in &volumes {
            let dims = (instance.columns, instance.rows);
            match by_dims.get(&dims) {
                Some(existing) if *existing != instance.sop_instance_uid => {
                    return Err(SlideError::new(
                        ErrorKind::FormatFailure,
                        format!("two VOLUME instances of size {}x{} disagree on SOPInstanceUID", dims.0, dims.1),
                    ));
                }
                _ => {
                    by_dims.insert(dims, &instance.sop_instance_uid);
                }
            }
        }

        // Deduplicate by SOPInstanceUID: a second VOLUME file sharing
        // one with an instance already kept is the same pyramid level
        // seen twice (SPEC_FULL.md §4.4, "DICOM Whole Slide Imaging")
        // and is dropped rather than added as a second level.
        let mut seen_sop_uids = BTreeSet::new();
        volumes.retain(|instance| seen_sop_uids.insert(instance.sop_instance_uid.clone()));

        volumes.sort_by(|a, b| b.columns.cmp(&a.columns));
        let base_width = volumes[0].columns as f64;
        let mut levels = Vec::with_capacity(volumes.len());
        let mut sources: Vec<Arc<DicomSource>> = Vec::with_capacity(volumes.len());

        for instance in &volumes {
            if instance.number_of_frames > 1 {
                return Err(SlideError::new(
                    ErrorKind::FormatFailure,
                    "multi-frame tiled DICOM instances are not supported",
                ));
            }
            let downsample = base_width / instance.columns.max(1) as f64;
            let grid = SimpleGrid::new(1, 1, instance.columns, instance.rows);
            levels.push(Level::new(instance.columns, instance.rows, downsample.max(1.0), instance.columns, instance.rows, Arc::new(grid)));
            sources.push(Arc::new(DicomSource { instance: instance.clone(), slide_id: next_slide_id(), cache: cache.clone() }));
        }

        let dispatch: Arc<dyn TileSource> = Arc::new(DicomDispatchSource { per_level: sources });

        let mut properties = BTreeMap::new();
        properties.insert("openslide.vendor".to_string(), self.vendor_name().to_string());
        properties.insert("openslide.level-count".to_string(), levels.len().to_string());
        properties.insert("dicom.SeriesInstanceUID".to_string(), anchor.series_instance_uid.clone());
        for (idx, instance) in volumes.iter().enumerate() {
            properties.insert(format!("openslide.level[{idx}].width"), instance.columns.to_string());
            properties.insert(format!("openslide.level[{idx}].height"), instance.rows.to_string());
            properties.insert(format!("openslide.level[{idx}].downsample"), levels[idx].downsample.to_string());
        }

        let mut associated = BTreeMap::new();
        for instance in &associated_instances {
            let name = if instance.purposes.contains("LABEL") {
                "label"
            } else if instance.purposes.contains("THUMBNAIL") {
                "thumbnail"
            } else {
                "macro"
            };
            if let Ok(pixels) = decode_instance_pixels(instance).await {
                let icc_profile = instance.icc_profile.clone();
                properties.insert(format!("openslide.associated.{name}.width"), instance.columns.to_string());
                properties.insert(format!("openslide.associated.{name}.height"), instance.rows.to_string());
                if let Some(icc) = icc_profile.as_ref() {
                    properties.insert(format!("openslide.associated.{name}.icc-size"), icc.len().to_string());
                }
                associated.insert(
                    name.to_string(),
                    crate::slide::AssociatedImage { width: instance.columns, height: instance.rows, pixels, icc_profile },
                );
            }
        }

        let mut hasher = Hasher::new();
        hasher.update_string("dicom.SeriesInstanceUID", &anchor.series_instance_uid);
        properties.insert("openslide.quickhash-1".to_string(), hasher.finish());

        if let Some(icc) = anchor.icc_profile.as_ref() {
            properties.insert("openslide.icc-size".to_string(), icc.len().to_string());
        }

        Ok(SlideContents {
            vendor: self.vendor_name(),
            levels,
            source: dispatch,
            associated,
            properties,
            icc_profile: anchor.icc_profile.clone(),
        })
    }
}

/// Dispatches `read_tile` to the one source for whichever level is
/// requested. Each DICOM instance has its own file, so unlike the
/// TIFF-family backends a single [`TileSource`] can't hold one shared
/// reader.
struct DicomDispatchSource {
    per_level: Vec<Arc<DicomSource>>,
}

impl TileSource for DicomDispatchSource {
    fn read_tile(
        &self,
        canvas: &mut Canvas,
        level: usize,
        col: u32,
        row: u32,
        opaque: Option<&TileRecord>,
    ) -> Result<(), SlideError> {
        let source = self.per_level.get(level).ok_or_else(|| SlideError::invalid_argument("no such level"))?;
        source.read_tile(canvas, level, col, row, opaque)
    }
}

struct DicomSource {
    instance: DicomInstance,
    slide_id: u64,
    cache: CacheBinding,
}

impl TileSource for DicomSource {
    fn read_tile(
        &self,
        canvas: &mut Canvas,
        level: usize,
        col: u32,
        row: u32,
        _opaque: Option<&TileRecord>,
    ) -> Result<(), SlideError> {
        let key = TileCacheKey::new(self.slide_id, level, col, row);
        let cache = self.cache.lock().unwrap().clone();
        if let Some(cached) = cache.get(key) {
            canvas.blit_tile(0, 0, self.instance.columns, self.instance.rows, cached.pixels());
            return Ok(());
        }
        let pixels = crate::io::blocking_runtime().block_on(decode_instance_pixels(&self.instance))?;
        canvas.blit_tile(0, 0, self.instance.columns, self.instance.rows, &pixels);
        cache.put(key, pixels);
        Ok(())
    }
}

async fn decode_instance_pixels(instance: &DicomInstance) -> Result<Vec<u32>, SlideError> {
    let reader = LocalFileReader::open(&instance.path)?;
    let (offset, length) = instance.pixel_data.ok_or_else(|| SlideError::new(ErrorKind::FormatFailure, "missing PixelData element"))?;
    let bytes = reader.read_exact_at(offset as u64, length).await?;

    match instance.transfer_syntax_uid.as_str() {
        TRANSFER_SYNTAX_EXPLICIT_LE | TRANSFER_SYNTAX_IMPLICIT_LE => {
            let expected = instance.rows as usize * instance.columns as usize * instance.samples_per_pixel as usize;
            if bytes.len() < expected {
                return Err(SlideError::new(ErrorKind::FormatFailure, "PixelData shorter than Rows*Columns*SamplesPerPixel"));
            }
            Ok(rgb_to_bgra(&bytes[..expected], instance.columns, instance.rows))
        }
        TRANSFER_SYNTAX_JPEG_BASELINE => {
            let fragment = first_encapsulated_fragment(&bytes)?;
            let (_, _, pixels) = decode_jpeg(fragment)?;
            Ok(pixels)
        }
        TRANSFER_SYNTAX_JPEG2000_LOSSLESS | TRANSFER_SYNTAX_JPEG2000 => {
            let fragment = first_encapsulated_fragment(&bytes)?;
            let (_, _, pixels) = decode_jpeg2000(fragment)?;
            Ok(pixels)
        }
        other => Err(SlideError::from(DicomError::UnsupportedTransferSyntax(other.to_string()))),
    }
}

/// Skip the Basic Offset Table item and return the first pixel
/// fragment from an encapsulated (compressed) `PixelData` value: a
/// sequence of `(FFFE,E000)` items, each a 4-byte length then payload.
fn first_encapsulated_fragment(bytes: &[u8]) -> Result<&[u8], SlideError> {
    let mut offset = 0usize;
    let mut first_payload: Option<&[u8]> = None;
    while offset + 8 <= bytes.len() {
        let group = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
        let element = u16::from_le_bytes([bytes[offset + 2], bytes[offset + 3]]);
        let length = u32::from_le_bytes([bytes[offset + 4], bytes[offset + 5], bytes[offset + 6], bytes[offset + 7]]) as usize;
        offset += 8;
        if (group, element) != (0xFFFE, 0xE000) {
            break;
        }
        if offset + length > bytes.len() {
            break;
        }
        let payload = &bytes[offset..offset + length];
        offset += length;
        if !payload.is_empty() {
            first_payload = Some(payload);
            break;
        }
    }
    first_payload.ok_or_else(|| SlideError::new(ErrorKind::FormatFailure, "encapsulated PixelData has no fragments"))
}

#[derive(Clone)]
struct DicomInstance {
    path: PathBuf,
    transfer_syntax_uid: String,
    series_instance_uid: String,
    sop_instance_uid: String,
    purposes: BTreeSet<String>,
    rows: u32,
    columns: u32,
    samples_per_pixel: u32,
    number_of_frames: u32,
    pixel_data: Option<(usize, usize)>,
    icc_profile: Option<Vec<u8>>,
}

impl DicomInstance {
    async fn load(path: PathBuf, reader: &LocalFileReader) -> Result<Self, SlideError> {
        let bytes = reader.read_exact_at(0, reader.size() as usize).await?;
        if bytes.len() < PREAMBLE_LEN + 4 || &bytes[PREAMBLE_LEN..PREAMBLE_LEN + 4] != b"DICM" {
            return Err(SlideError::from(DicomError::NotDicom));
        }

        let meta_start = PREAMBLE_LEN + 4;
        let meta = scan_elements(&bytes, meta_start, bytes.len(), true);
        let transfer_syntax_uid = meta
            .get(&TAG_TRANSFER_SYNTAX_UID)
            .map(|v| v.as_str().trim_end_matches('\0').to_string())
            .unwrap_or_else(|| TRANSFER_SYNTAX_EXPLICIT_LE.to_string());

        let dataset_start = meta_end_offset(&bytes, meta_start);
        let implicit = transfer_syntax_uid == TRANSFER_SYNTAX_IMPLICIT_LE;
        let dataset = scan_elements(&bytes, dataset_start, bytes.len(), !implicit);

        let series_instance_uid = dataset
            .get(&TAG_SERIES_INSTANCE_UID)
            .map(|v| v.as_str().trim_end_matches('\0').to_string())
            .ok_or(DicomError::MissingElement("SeriesInstanceUID"))
            .map_err(SlideError::from)?;
        let sop_instance_uid = dataset
            .get(&TAG_SOP_INSTANCE_UID)
            .map(|v| v.as_str().trim_end_matches('\0').to_string())
            .unwrap_or_default();
        let purposes: BTreeSet<String> = dataset
            .get(&TAG_IMAGE_TYPE)
            .map(|v| v.as_str().split('\\').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        let rows = dataset.get(&TAG_ROWS).and_then(|v| v.as_u32()).unwrap_or(0);
        let columns = dataset.get(&TAG_COLUMNS).and_then(|v| v.as_u32()).unwrap_or(0);
        let samples_per_pixel = dataset.get(&TAG_SAMPLES_PER_PIXEL).and_then(|v| v.as_u32()).unwrap_or(3);
        let number_of_frames = dataset.get(&TAG_NUMBER_OF_FRAMES).and_then(|v| v.as_u32()).unwrap_or(1);
        let _bits_allocated = dataset.get(&TAG_BITS_ALLOCATED).and_then(|v| v.as_u32()).unwrap_or(8);
        let _photometric = dataset.get(&TAG_PHOTOMETRIC_INTERPRETATION).map(|v| v.as_str().to_string());
        let pixel_data = dataset.get(&TAG_PIXEL_DATA).and_then(|v| v.as_range());
        let icc_profile = dataset.get(&TAG_ICC_PROFILE).and_then(|v| v.as_range()).map(|(o, l)| bytes[o..o + l].to_vec());

        Ok(DicomInstance {
            path,
            transfer_syntax_uid,
            series_instance_uid,
            sop_instance_uid,
            purposes,
            rows,
            columns,
            samples_per_pixel,
            number_of_frames,
            pixel_data,
            icc_profile,
        })
    }
}

enum DicomValue {
    Str(String),
    Range(usize, usize),
}

impl DicomValue {
    fn as_str(&self) -> &str {
        match self {
            DicomValue::Str(s) => s,
            DicomValue::Range(..) => "",
        }
    }

    fn as_u32(&self) -> Option<u32> {
        match self {
            DicomValue::Str(s) => s.trim().parse().ok(),
            DicomValue::Range(..) => None,
        }
    }

    fn as_range(&self) -> Option<(usize, usize)> {
        match self {
            DicomValue::Range(o, l) => Some((*o, *l)),
            DicomValue::Str(_) => None,
        }
    }
}

/// VRs whose length field is 4 bytes (preceded by 2 reserved bytes) in
/// explicit VR encoding.
fn is_long_form_vr(vr: &[u8; 2]) -> bool {
    matches!(vr, b"OB" | b"OW" | b"OF" | b"SQ" | b"UT" | b"UN" | b"OD" | b"OL" | b"OV" | b"SV" | b"UV")
}

/// Text-valued VRs this backend reads as strings rather than numbers.
fn is_text_vr(vr: &[u8; 2]) -> bool {
    matches!(vr, b"UI" | b"CS" | b"SH" | b"LO" | b"IS" | b"DS" | b"AE" | b"AS" | b"DA" | b"TM" | b"PN" | b"UT")
}

/// Implicit VR little endian carries no VR in the stream; this backend
/// has no data dictionary, so it hardcodes the VR of the handful of
/// tags it actually reads and treats everything else as opaque (`UN`).
fn implicit_vr_for_tag(tag: (u16, u16)) -> [u8; 2] {
    match tag {
        TAG_TRANSFER_SYNTAX_UID | TAG_SOP_INSTANCE_UID | TAG_SERIES_INSTANCE_UID => *b"UI",
        TAG_IMAGE_TYPE | TAG_PHOTOMETRIC_INTERPRETATION => *b"CS",
        TAG_NUMBER_OF_FRAMES => *b"IS",
        TAG_SAMPLES_PER_PIXEL | TAG_ROWS | TAG_COLUMNS | TAG_BITS_ALLOCATED => *b"US",
        TAG_ICC_PROFILE => *b"OB",
        TAG_PIXEL_DATA => *b"OB",
        _ => *b"UN",
    }
}

/// Scan a flat (non-nested) run of dataset elements between `start`
/// and `end`, stopping at the first sequence/pixel-data element that
/// can't be skipped by a simple length field (this backend has no use
/// for nested sequence contents beyond the flat tags it reads).
fn scan_elements(bytes: &[u8], start: usize, end: usize, explicit: bool) -> BTreeMap<(u16, u16), DicomValue> {
    let mut values = BTreeMap::new();
    let mut offset = start;
    while offset + 8 <= end {
        let group = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
        let element = u16::from_le_bytes([bytes[offset + 2], bytes[offset + 3]]);
        let tag = (group, element);
        offset += 4;

        let (vr, length, header_len): ([u8; 2], usize, usize) = if explicit {
            let vr = [bytes[offset], bytes[offset + 1]];
            if is_long_form_vr(&vr) {
                if offset + 8 > end {
                    break;
                }
                let length = u32::from_le_bytes([bytes[offset + 4], bytes[offset + 5], bytes[offset + 6], bytes[offset + 7]]) as usize;
                (vr, length, 8)
            } else {
                if offset + 4 > end {
                    break;
                }
                let length = u16::from_le_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
                (vr, length, 4)
            }
        } else {
            if offset + 4 > end {
                break;
            }
            let length = u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]) as usize;
            (implicit_vr_for_tag(tag), length, 4)
        };
        offset += header_len;

        if length == 0xFFFF_FFFF {
            // Undefined length: sequence or encapsulated pixel data.
            // PixelData's own undefined-length fragments are handled
            // separately by `first_encapsulated_fragment`; record the
            // start of its item stream and stop scanning.
            if tag == TAG_PIXEL_DATA {
                values.insert(tag, DicomValue::Range(offset, end - offset));
            }
            break;
        }
        if offset + length > end {
            break;
        }

        if tag == TAG_PIXEL_DATA {
            values.insert(tag, DicomValue::Range(offset, length));
        } else if is_text_vr(&vr) {
            if let Ok(text) = std::str::from_utf8(&bytes[offset..offset + length]) {
                values.insert(tag, DicomValue::Str(text.to_string()));
            }
        } else if tag == TAG_ICC_PROFILE {
            values.insert(tag, DicomValue::Range(offset, length));
        } else if vr == *b"US" && length >= 2 {
            let v = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as u32;
            values.insert(tag, DicomValue::Str(v.to_string()));
        }

        offset += length;
    }
    values
}

/// The File Meta group always ends where `(0002,0010)`'s value ends;
/// re-derive that boundary by re-scanning once more its own explicit-VR
/// header lengths (the meta group is always explicit VR LE regardless
/// of the main dataset's transfer syntax).
fn meta_end_offset(bytes: &[u8], meta_start: usize) -> usize {
    let mut offset = meta_start;
    while offset + 8 <= bytes.len() {
        let group = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
        if group != 0x0002 {
            break;
        }
        offset += 4;
        let vr = [bytes[offset], bytes[offset + 1]];
        let (length, header_len) = if is_long_form_vr(&vr) {
            (u32::from_le_bytes([bytes[offset + 4], bytes[offset + 5], bytes[offset + 6], bytes[offset + 7]]) as usize, 8)
        } else {
            (u16::from_le_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize, 4)
        };
        offset += header_len + length;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explicit_element(group: u16, element: u16, vr: &[u8; 2], value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&group.to_le_bytes());
        out.extend_from_slice(&element.to_le_bytes());
        out.extend_from_slice(vr);
        if is_long_form_vr(vr) {
            out.extend_from_slice(&[0, 0]);
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        } else {
            out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        }
        out.extend_from_slice(value);
        out
    }

    #[test]
    fn scans_explicit_vr_string_elements() {
        let mut bytes = explicit_element(0x0020, 0x000E, b"UI", b"1.2.3\0");
        bytes.extend(explicit_element(0x0028, 0x0010, b"US", &512u16.to_le_bytes()));
        let values = scan_elements(&bytes, 0, bytes.len(), true);
        assert_eq!(values.get(&TAG_SERIES_INSTANCE_UID).unwrap().as_str(), "1.2.3\0");
        assert_eq!(values.get(&TAG_ROWS).unwrap().as_u32(), Some(512));
    }

    #[test]
    fn finds_first_nonempty_encapsulated_fragment() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xFFFEu16.to_le_bytes());
        bytes.extend_from_slice(&0xE000u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0xFFFEu16.to_le_bytes());
        bytes.extend_from_slice(&0xE000u16.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(b"\xFF\xD8\xFF\xD9");
        let fragment = first_encapsulated_fragment(&bytes).unwrap();
        assert_eq!(fragment, b"\xFF\xD8\xFF\xD9");
    }
}

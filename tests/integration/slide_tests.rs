//! Slide facade scenarios: region-read boundary clipping (S4) and DICOM
//! series deduplication (S5).

use std::io::Write;

use wsi_reader::Slide;

use super::test_utils::{build_dicom_volume, create_two_level_tiled_tiff};

fn write_temp(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file
}

/// S4: `read_region(dest, -5, -5, 0, 10, 10)` on a slide whose level 0
/// is 1024x768. Pixels with level-space (x<0 or y<0) are zero; pixels
/// at or past (0,0) equal those from `read_region(dest, 0, 0, 0, 5, 5)`
/// shifted by (5,5) into the destination buffer.
#[test]
fn s4_negative_origin_region_clips_to_zero_and_aligns_with_origin_read() {
    let file = write_temp(&create_two_level_tiled_tiff());
    let slide = Slide::open(file.path());
    assert_eq!(slide.get_error(), None);

    let mut shifted = vec![0u32; 10 * 10];
    slide.read_region(&mut shifted, -5, -5, 0, 10, 10);

    for row in 0..5 {
        for col in 0..10 {
            assert_eq!(shifted[row * 10 + col], 0, "row {row} col {col} should be clipped to zero");
        }
    }
    for row in 5..10 {
        for col in 0..5 {
            assert_eq!(shifted[row * 10 + col], 0, "row {row} col {col} should be clipped to zero");
        }
    }

    let mut origin = vec![0u32; 5 * 5];
    slide.read_region(&mut origin, 0, 0, 0, 5, 5);

    for row in 0..5 {
        for col in 0..5 {
            assert_eq!(
                shifted[(row + 5) * 10 + (col + 5)],
                origin[row * 5 + col],
                "row {row} col {col} should match the unshifted read"
            );
        }
    }
}

/// S5: a DICOM series made of a VOLUME file and a duplicate VOLUME file
/// sharing the same dimensions and `SOPInstanceUID` is opened as a
/// single level; the duplicate is ignored without error.
#[test]
fn s5_duplicate_dicom_volume_is_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    let sop_uid = "1.2.826.0.1.3680043.test.1";
    let series_uid = "1.2.826.0.1.3680043.test.series";
    let volume = build_dicom_volume(series_uid, sop_uid, 256, 256);

    let primary_path = dir.path().join("volume.dcm");
    std::fs::write(&primary_path, &volume).unwrap();
    let duplicate_path = dir.path().join("volume-copy.dcm");
    std::fs::write(&duplicate_path, &volume).unwrap();

    let slide = Slide::open(&primary_path);
    assert_eq!(slide.get_error(), None);
    assert_eq!(slide.vendor(), Some("dicom"));
    assert_eq!(slide.level_count(), 1);
    assert_eq!(slide.level_dimensions(0), Some((256, 256)));
}

/// S5 variant: two VOLUME instances of the same dimensions but
/// *different* `SOPInstanceUID`s are a genuine conflict, not a
/// duplicate, and must surface as a format failure rather than
/// silently picking one.
#[test]
fn disagreeing_sop_instance_uids_at_the_same_dimensions_is_a_format_failure() {
    let dir = tempfile::tempdir().unwrap();
    let series_uid = "1.2.826.0.1.3680043.test.series2";
    let first = build_dicom_volume(series_uid, "1.2.826.0.1.3680043.test.a", 256, 256);
    let second = build_dicom_volume(series_uid, "1.2.826.0.1.3680043.test.b", 256, 256);

    let primary_path = dir.path().join("a.dcm");
    std::fs::write(&primary_path, &first).unwrap();
    let other_path = dir.path().join("b.dcm");
    std::fs::write(&other_path, &second).unwrap();

    let slide = Slide::open(&primary_path);
    assert!(slide.get_error().is_some());
}

/// Invariant 1/2: level_count is at least 1 and downsamples are
/// monotonically non-decreasing across the level array.
#[test]
fn level_table_is_monotonic_and_nonempty() {
    let file = write_temp(&create_two_level_tiled_tiff());
    let slide = Slide::open(file.path());

    assert!(slide.level_count() >= 1);
    let mut previous = 0.0;
    for i in 0..slide.level_count() {
        let downsample = slide.level_downsample(i).unwrap();
        assert!(downsample >= previous);
        previous = downsample;
    }
}

//! Tifflike format detection and parsing scenarios (spec S1-S3).

use std::io::Write;

use wsi_reader::Slide;

use super::test_utils::{
    create_ndpi_tagged_tiff, create_tiff_with_oversized_tile_byte_counts, create_two_level_tiled_tiff,
};

fn write_temp(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file
}

/// S1: two tiled directories, level 0 = 1024x768 tile 256x256, level 1
/// = 512x384 tile 256x256; the top-left 4x4 block of level 0 matches
/// the decoded top-left tile's first row, and the level table reports
/// downsample 1.0 then 2.0.
#[test]
fn s1_two_level_pyramid_reports_levels_and_reads_top_left_block() {
    let file = write_temp(&create_two_level_tiled_tiff());
    let slide = Slide::open(file.path());

    assert_eq!(slide.get_error(), None);
    assert_eq!(slide.level_count(), 2);
    assert_eq!(slide.level_dimensions(0), Some((1024, 768)));
    assert_eq!(slide.level_dimensions(1), Some((512, 384)));
    assert_eq!(slide.level_downsample(0), Some(1.0));
    assert_eq!(slide.level_downsample(1), Some(2.0));

    let mut block = vec![0u32; 4 * 4];
    slide.read_region(&mut block, 0, 0, 0, 4, 4);
    let mut full_tile = vec![0u32; 256 * 256];
    slide.read_region(&mut full_tile, 0, 0, 0, 256, 256);
    assert_eq!(&block[..4], &full_tile[..4]);
    assert!(block.iter().any(|&p| p != 0), "decoded block should not be all zero");
}

/// S2: a classic TIFF that also carries the NDPI marker tag (65420) on
/// its first directory switches the library into NDPI mode and opens
/// successfully, with pixel reads at the highest (only) level.
#[test]
fn s2_ndpi_marker_tag_switches_vendor_and_reads_succeed() {
    let file = write_temp(&create_ndpi_tagged_tiff());
    let slide = Slide::open(file.path());

    assert_eq!(slide.get_error(), None);
    assert_eq!(slide.vendor(), Some("hamamatsu-ndpi"));
    assert_eq!(slide.level_dimensions(0), Some((1024, 768)));

    let mut pixels = vec![0u32; 16 * 16];
    slide.read_region(&mut pixels, 0, 0, 0, 16, 16);
    assert!(pixels.iter().any(|&p| p != 0));
}

/// S3: a TIFF whose level-0 tile byte-count array sums past the
/// quickhash disable threshold still opens, but `quickhash-1` is empty.
#[test]
fn s3_oversized_tile_byte_counts_disable_quickhash_but_open_still_succeeds() {
    let file = write_temp(&create_tiff_with_oversized_tile_byte_counts(10 * 1024 * 1024));
    let slide = Slide::open(file.path());

    assert_eq!(slide.get_error(), None);
    assert_eq!(slide.property_value("openslide.quickhash-1"), Some(""));
}

/// Invariant 6: a detect-only probe doesn't require a full open and
/// agrees with the vendor `Slide::open` eventually settles on.
#[test]
fn detect_vendor_matches_opened_vendor() {
    let file = write_temp(&create_two_level_tiled_tiff());
    assert_eq!(Slide::detect_vendor(file.path()), Some("generic-tiff"));

    let slide = Slide::open(file.path());
    assert_eq!(slide.vendor(), Some("generic-tiff"));
}

/// Invariant 7: a file with no recognisable magic at all fails open as
/// `NotASlide` rather than panicking or hanging.
#[test]
fn unrecognised_file_fails_to_open_without_panicking() {
    let file = write_temp(b"not a slide at all");
    let slide = Slide::open(file.path());
    assert!(slide.get_error().is_some());
    assert_eq!(slide.level_count(), 0);
}

//! Tile cache scenarios: cache-hit avoids re-decode (S6), the cache
//! bound invariant, and idempotent repeated reads.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use wsi_reader::tile::{next_slide_id, TileCache, TileCacheKey};
use wsi_reader::Slide;

use super::test_utils::create_two_level_tiled_tiff;

fn write_temp(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file
}

/// A `TileSource` that counts every call to `read_tile`, so a cache hit
/// (which never reaches the source) is directly observable.
struct CountingSource {
    decode_count: AtomicUsize,
    cache: std::sync::Arc<TileCache>,
    slide_id: u64,
}

impl wsi_reader::grid::TileSource for CountingSource {
    fn read_tile(
        &self,
        canvas: &mut wsi_reader::grid::Canvas,
        level: usize,
        col: u32,
        row: u32,
        _opaque: Option<&wsi_reader::grid::TileRecord>,
    ) -> Result<(), wsi_reader::SlideError> {
        let key = TileCacheKey::new(self.slide_id, level, col, row);
        if let Some(cached) = self.cache.get(key) {
            canvas.blit_tile(0, 0, 64, 64, cached.pixels());
            return Ok(());
        }
        self.decode_count.fetch_add(1, Ordering::SeqCst);
        let pixels = vec![0xFF00_00FFu32; 64 * 64];
        canvas.blit_tile(0, 0, 64, 64, &pixels);
        self.cache.put(key, pixels);
        Ok(())
    }
}

/// S6: two successive reads of the same tile behind a 16 MiB cache —
/// the second invokes `read_tile`'s source path, but hits the cache
/// before reaching the decode step, so the decode counter stays at 1.
#[test]
fn s6_second_read_of_same_tile_hits_cache_without_redecoding() {
    use wsi_reader::grid::{Canvas, TileSource};

    let cache = TileCache::with_capacity(16 * 1024 * 1024);
    let source = CountingSource { decode_count: AtomicUsize::new(0), cache: cache.clone(), slide_id: next_slide_id() };

    let mut canvas = Canvas::new(0, 0, 64, 64);
    source.read_tile(&mut canvas, 0, 0, 0, None).unwrap();
    assert_eq!(source.decode_count.load(Ordering::SeqCst), 1);

    let mut canvas2 = Canvas::new(0, 0, 64, 64);
    source.read_tile(&mut canvas2, 0, 0, 0, None).unwrap();
    assert_eq!(source.decode_count.load(Ordering::SeqCst), 1, "second read must hit the cache");
    assert_eq!(canvas.pixels(), canvas2.pixels());
}

/// Invariant 4: at all times, the sum of `size` values over unpinned
/// live entries never exceeds the configured capacity.
#[test]
fn cache_size_never_exceeds_capacity() {
    let cache = TileCache::with_capacity(256);
    let slide_id = next_slide_id();
    for i in 0..20u32 {
        let key = TileCacheKey::new(slide_id, 0, i, 0);
        cache.put(key, vec![0u32; 32]); // 128 bytes per tile
        assert!(cache.size() <= cache.capacity(), "cache size {} exceeded capacity {}", cache.size(), cache.capacity());
    }
}

/// Invariant 3: reading the same region twice with the same cache
/// binding yields byte-identical results.
#[test]
fn repeated_region_reads_are_idempotent() {
    let file = write_temp(&create_two_level_tiled_tiff());
    let slide = Slide::open(file.path());
    assert_eq!(slide.get_error(), None);

    let mut first = vec![0u32; 64 * 64];
    slide.read_region(&mut first, 10, 10, 0, 64, 64);
    let mut second = vec![0u32; 64 * 64];
    slide.read_region(&mut second, 10, 10, 0, 64, 64);
    assert_eq!(first, second);
}

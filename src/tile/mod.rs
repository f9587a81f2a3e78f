//! Decoded-tile cache (SPEC_FULL.md §4.1).
//!
//! A slide's levels share one [`TileCache`] binding (or none, per
//! `cache_create`/`set_cache` in §6) so that neighbouring regions and
//! repeated reads of the same tile avoid re-decoding.

mod cache;

pub use cache::{next_slide_id, CachedTile, TileCache, TileCacheKey, DEFAULT_TILE_CACHE_CAPACITY};

//! Sakura SVSLIDE (SPEC_FULL.md §4.4): a `.svslide` file is a SQLite
//! database whose `Image` table names one row per pyramid level and
//! associated image, and whose `Header` table holds per-level stream
//! offsets into one or more sibling `.dat` BLOB files. Tiles are packed
//! JPEG records addressed by row within the level's data stream.
//!
//! Documented acknowledged limitation: the full SVSLIDE schema is
//! proprietary and unconfirmed beyond the publicly reverse-engineered
//! subset (SPEC_FULL.md §4.4). This backend supports the common
//! single-file-database, single-focal-plane layout — one `Data` table
//! per level holding `(col, row, data)` tile rows at a uniform pitch —
//! and reports `FormatError::UnsupportedFormat` for table layouts
//! outside that subset rather than guessing at an unconfirmed one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::decode::decode_jpeg;
use crate::error::{ErrorKind, SlideError};
use crate::grid::{Canvas, Grid, SimpleGrid, TileRecord, TileSource};
use crate::hash::Hasher;
use crate::slide::{CacheBinding, Level, SlideContents};
use crate::tile::{next_slide_id, TileCacheKey};

use super::{ProbeContext, VendorBackend};

pub struct SakuraBackend;

#[async_trait]
impl VendorBackend for SakuraBackend {
    fn vendor_name(&self) -> &'static str {
        "sakura"
    }

    async fn detect(&self, ctx: &ProbeContext) -> bool {
        if ctx.tifflike.is_some() {
            return false;
        }
        let is_svslide = ctx
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("svslide"))
            .unwrap_or(false);
        if !is_svslide {
            return false;
        }
        open_pool(&ctx.path).await.is_ok()
    }

    async fn open(&self, ctx: &ProbeContext, cache: CacheBinding) -> Result<SlideContents, SlideError> {
        let pool = open_pool(&ctx.path).await.map_err(|_| {
            SlideError::new(ErrorKind::FormatFailure, "svslide database could not be opened")
        })?;

        let rows = sqlx::query("SELECT Num, Width, Height, TileWidth, TileHeight FROM Image ORDER BY Num ASC")
            .fetch_all(&pool)
            .await
            .map_err(|e| {
                SlideError::new(
                    ErrorKind::FormatFailure,
                    format!("unrecognised svslide Image table layout: {e}"),
                )
            })?;
        if rows.is_empty() {
            return Err(SlideError::new(ErrorKind::FormatFailure, "svslide database has no Image rows"));
        }

        let mut descriptors = Vec::with_capacity(rows.len());
        for row in &rows {
            descriptors.push(image_descriptor(row)?);
        }
        descriptors.sort_by(|a, b| b.width.cmp(&a.width));

        let base_width = descriptors[0].width;
        let mut levels = Vec::with_capacity(descriptors.len());
        let mut level_tables = Vec::with_capacity(descriptors.len());
        for d in &descriptors {
            let downsample = base_width as f64 / d.width.max(1) as f64;
            let grid: Arc<dyn Grid> = Arc::new(SimpleGrid::new(
                d.width.div_ceil(d.tile_width.max(1)),
                d.height.div_ceil(d.tile_height.max(1)),
                d.tile_width,
                d.tile_height,
            ));
            levels.push(Level::new(d.width, d.height, downsample, d.tile_width, d.tile_height, grid));
            level_tables.push(format!("Tile_{}", d.num));
        }

        let mut properties = BTreeMap::new();
        properties.insert("openslide.vendor".to_string(), self.vendor_name().to_string());
        properties.insert("openslide.level-count".to_string(), levels.len().to_string());
        for (i, l) in levels.iter().enumerate() {
            properties.insert(format!("openslide.level[{i}].width"), l.width.to_string());
            properties.insert(format!("openslide.level[{i}].height"), l.height.to_string());
            properties.insert(format!("openslide.level[{i}].downsample"), l.downsample.to_string());
        }

        let mut hasher = Hasher::new();
        for (key, value) in &properties {
            hasher.update_string(key, value);
        }
        if let Some(lowest) = level_tables.last() {
            if let Ok(tiles) = fetch_tiles(&pool, lowest).await {
                let total: u64 = tiles.iter().map(|t| t.data.len() as u64).sum();
                if total > crate::hash::DEFAULT_DISABLE_THRESHOLD {
                    hasher.disable();
                } else {
                    for tile in &tiles {
                        hasher.update_bytes(&tile.data);
                    }
                }
            }
        }
        properties.insert("openslide.quickhash-1".to_string(), hasher.finish());

        let source: Arc<dyn TileSource> = Arc::new(SakuraSource {
            pool,
            level_tables,
            descriptors,
            cache,
            slide_id: next_slide_id(),
        });

        Ok(SlideContents {
            vendor: self.vendor_name(),
            levels,
            source,
            associated: BTreeMap::new(),
            properties,
            icc_profile: None,
        })
    }
}

struct LevelDescriptor {
    num: i64,
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
}

fn image_descriptor(row: &SqliteRow) -> Result<LevelDescriptor, SlideError> {
    let num: i64 = row.try_get("Num").map_err(schema_error)?;
    let width: i64 = row.try_get("Width").map_err(schema_error)?;
    let height: i64 = row.try_get("Height").map_err(schema_error)?;
    let tile_width: i64 = row.try_get("TileWidth").map_err(schema_error)?;
    let tile_height: i64 = row.try_get("TileHeight").map_err(schema_error)?;
    if width <= 0 || height <= 0 || tile_width <= 0 || tile_height <= 0 {
        return Err(SlideError::new(ErrorKind::FormatFailure, "svslide Image row has non-positive dimensions"));
    }
    Ok(LevelDescriptor {
        num,
        width: width as u32,
        height: height as u32,
        tile_width: tile_width as u32,
        tile_height: tile_height as u32,
    })
}

fn schema_error(err: sqlx::Error) -> SlideError {
    SlideError::new(ErrorKind::FormatFailure, format!("unrecognised svslide Image table layout: {err}"))
}

struct TileRow {
    col: i64,
    row: i64,
    data: Vec<u8>,
}

/// Load every tile row of a per-level table at once; SVSLIDE databases
/// are small enough (compared to the multi-gigabyte TIFF-family
/// containers) that per-query row fetches aren't worth the extra
/// round trips, and `sqlx` gives us connection pooling for free.
async fn fetch_tiles(pool: &SqlitePool, table: &str) -> Result<Vec<TileRow>, sqlx::Error> {
    let sql = format!("SELECT Col, Row, Data FROM \"{table}\"");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.into_iter()
        .map(|r| {
            Ok(TileRow {
                col: r.try_get("Col")?,
                row: r.try_get("Row")?,
                data: r.try_get("Data")?,
            })
        })
        .collect()
}

async fn open_pool(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let url = format!("sqlite://{}?mode=ro", path.display());
    SqlitePoolOptions::new().max_connections(4).connect(&url).await
}

struct SakuraSource {
    pool: SqlitePool,
    level_tables: Vec<String>,
    descriptors: Vec<LevelDescriptor>,
    cache: CacheBinding,
    slide_id: u64,
}

impl TileSource for SakuraSource {
    fn read_tile(
        &self,
        canvas: &mut Canvas,
        level: usize,
        col: u32,
        row: u32,
        _opaque: Option<&TileRecord>,
    ) -> Result<(), SlideError> {
        let descriptor = self
            .descriptors
            .get(level)
            .ok_or_else(|| SlideError::invalid_argument(format!("level {level} out of range")))?;
        let table = self
            .level_tables
            .get(level)
            .ok_or_else(|| SlideError::invalid_argument(format!("level {level} out of range")))?;

        let tile_w = descriptor.tile_width;
        let tile_h = descriptor.tile_height;
        let tile_x = col as i64 * tile_w as i64;
        let tile_y = row as i64 * tile_h as i64;

        let key = TileCacheKey::new(self.slide_id, level, col, row);
        let cache = self.cache.lock().unwrap().clone();
        if let Some(cached) = cache.get(key) {
            canvas.blit_tile(tile_x, tile_y, tile_w, tile_h, cached.pixels());
            return Ok(());
        }

        let pixels = crate::io::blocking_runtime().block_on(decode_tile(&self.pool, table, col, row, tile_w, tile_h))?;
        canvas.blit_tile(tile_x, tile_y, tile_w, tile_h, &pixels);
        cache.put(key, pixels);
        Ok(())
    }
}

async fn decode_tile(
    pool: &SqlitePool,
    table: &str,
    col: u32,
    row: u32,
    tile_w: u32,
    tile_h: u32,
) -> Result<Vec<u32>, SlideError> {
    let sql = format!("SELECT Data FROM \"{table}\" WHERE Col = ? AND Row = ?");
    let fetched: Option<Vec<u8>> = sqlx::query_scalar(&sql)
        .bind(col as i64)
        .bind(row as i64)
        .fetch_optional(pool)
        .await
        .map_err(|e| SlideError::new(ErrorKind::IoFailure, format!("svslide tile query failed: {e}")))?;
    let Some(data) = fetched else {
        return Ok(vec![0u32; tile_w as usize * tile_h as usize]);
    };
    let (w, h, pixels) = decode_jpeg(&data)?;
    if w != tile_w || h != tile_h {
        return Err(SlideError::new(
            ErrorKind::FormatFailure,
            format!("svslide tile decoded to {w}x{h}, expected {tile_w}x{tile_h}"),
        ));
    }
    Ok(pixels)
}

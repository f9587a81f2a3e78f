//! Construction-time tunables (SPEC_FULL.md §10.3) and the `wsi-inspect`
//! demonstration CLI's argument types (§10.4).
//!
//! Nothing here is required to use the library: [`crate::slide::Slide::open`]
//! has a zero-config constructor using the documented defaults (64 MiB tile
//! cache, [`crate::io::DEFAULT_MAX_HANDLES`] handles per slide, a 5 MiB
//! quickhash disable threshold). `Config` exists for the demonstration
//! binary and for tests that want to exercise non-default sizing.

use clap::{Parser, Subcommand};

use crate::hash::DEFAULT_DISABLE_THRESHOLD;
use crate::io::DEFAULT_MAX_HANDLES;
use crate::tile::DEFAULT_TILE_CACHE_CAPACITY;

/// Tunables for opening and reading slides outside of the documented
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Decoded-tile cache capacity, in bytes (SPEC_FULL.md §4.1).
    pub tile_cache_capacity_bytes: usize,
    /// Maximum concurrently-open file handles per slide (SPEC_FULL.md §4.1,
    /// "File handle pool").
    pub max_handles_per_slide: usize,
    /// Cumulative tile/strip byte budget above which quickhash is disabled
    /// (SPEC_FULL.md §4.2, §4.6).
    pub quickhash_disable_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tile_cache_capacity_bytes: DEFAULT_TILE_CACHE_CAPACITY,
            max_handles_per_slide: DEFAULT_MAX_HANDLES,
            quickhash_disable_threshold: DEFAULT_DISABLE_THRESHOLD,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_cache_capacity_bytes == 0 {
            return Err("tile_cache_capacity_bytes must be greater than 0".to_string());
        }
        if self.max_handles_per_slide == 0 {
            return Err("max_handles_per_slide must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// `wsi-inspect`: a thin CLI over the library, for manual exercise of a
/// slide from the command line (SPEC_FULL.md §10.4). Not a spec-normative
/// component — named out of scope in §1 as "the CLI tools" collaborator.
#[derive(Parser, Debug)]
#[command(name = "wsi-inspect")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a slide and print its vendor, level table, and properties.
    Show(ShowArgs),
    /// Decode an associated image (label/macro/thumbnail) to a PNG file.
    Thumbnail(ThumbnailArgs),
}

#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Path to the slide file.
    pub path: String,

    /// Print every property instead of just the canonical `openslide.*` ones.
    #[arg(long, default_value_t = false)]
    pub all_properties: bool,
}

#[derive(Parser, Debug)]
pub struct ThumbnailArgs {
    /// Path to the slide file.
    pub path: String,

    /// Associated image name (e.g. `thumbnail`, `label`, `macro`).
    #[arg(long, default_value = "thumbnail")]
    pub name: String,

    /// Output PNG path.
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_cache_capacity_is_rejected() {
        let mut config = Config::default();
        config.tile_cache_capacity_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_handle_pool_is_rejected() {
        let mut config = Config::default();
        config.max_handles_per_slide = 0;
        assert!(config.validate().is_err());
    }
}

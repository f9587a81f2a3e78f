//! Quickhash: a stable slide-identity digest (SPEC_FULL.md §4.6).
//!
//! A thin incremental SHA-256 wrapper with one extra state bit:
//! `disabled`. Once disabled, further `update` calls are no-ops and
//! `finish` returns the empty string rather than a digest. This lets a
//! backend start hashing a level's tile bytes, discover the cumulative
//! size exceeds the safety cap, and bail out cheaply without tracking
//! the decision anywhere else.

use sha2::{Digest, Sha256};

use crate::io::RangeReader;

/// Tile/strip byte budget above which quickhash gives up (SPEC_FULL.md
/// §4.2, §4.6): prevents a pathological slide (huge uncompressed lowest
/// level) from dominating `open` latency.
pub const DEFAULT_DISABLE_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Incremental digest used to compute `openslide.quickhash-1`.
pub struct Hasher {
    inner: Sha256,
    disabled: bool,
    disable_threshold: u64,
    hashed_bytes: u64,
}

impl Hasher {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_DISABLE_THRESHOLD)
    }

    pub fn with_threshold(disable_threshold: u64) -> Self {
        Hasher {
            inner: Sha256::new(),
            disabled: false,
            disable_threshold,
            hashed_bytes: 0,
        }
    }

    /// True once `disable()` has been called or the byte budget has been
    /// exceeded. Sticky: never cleared for the lifetime of the hasher.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Force the hash into the disabled state regardless of budget.
    pub fn disable(&mut self) {
        self.disabled = true;
    }

    /// Hash a string, labelled by its canonical property name so two
    /// properties with the same value still produce distinct digests.
    pub fn update_string(&mut self, label: &str, value: &str) {
        if self.disabled {
            return;
        }
        self.inner.update(label.as_bytes());
        self.inner.update([0u8]);
        self.inner.update(value.as_bytes());
        self.inner.update([0u8]);
    }

    /// Hash raw bytes directly (used for synthetic slides and small
    /// associated blobs).
    pub fn update_bytes(&mut self, data: &[u8]) {
        if self.disabled {
            return;
        }
        if self.hashed_bytes.saturating_add(data.len() as u64) > self.disable_threshold {
            self.disabled = true;
            return;
        }
        self.hashed_bytes += data.len() as u64;
        self.inner.update(data);
    }

    /// Hash a `[offset, offset+length)` byte range of the backing file,
    /// respecting the disable threshold without reading anything once
    /// the budget is already exhausted.
    pub async fn update_range<R: RangeReader>(
        &mut self,
        reader: &R,
        offset: u64,
        length: u64,
    ) -> Result<(), crate::error::IoError> {
        if self.disabled {
            return Ok(());
        }
        if self.hashed_bytes.saturating_add(length) > self.disable_threshold {
            self.disabled = true;
            return Ok(());
        }
        let bytes = reader.read_exact_at(offset, length as usize).await?;
        self.hashed_bytes += length;
        self.inner.update(&bytes);
        Ok(())
    }

    /// Hash a list of `(offset, length)` tile/strip locations in array
    /// order, disabling once their cumulative length exceeds the budget
    /// (SPEC_FULL.md §4.2's "Hash seeding for a TIFF level").
    pub async fn update_tile_locations<R: RangeReader>(
        &mut self,
        reader: &R,
        locations: &[(u64, u64)],
    ) -> Result<(), crate::error::IoError> {
        let total: u64 = locations.iter().map(|(_, len)| *len).sum();
        if self.disabled {
            return Ok(());
        }
        if self.hashed_bytes.saturating_add(total) > self.disable_threshold {
            self.disabled = true;
            return Ok(());
        }
        for &(offset, length) in locations {
            if length == 0 {
                continue;
            }
            self.update_range(reader, offset, length).await?;
        }
        Ok(())
    }

    /// Produce the final digest: a lowercase hex SHA-256 string, or the
    /// empty string if disabled.
    pub fn finish(self) -> String {
        if self.disabled {
            String::new()
        } else {
            hex::encode(self.inner.finalize())
        }
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_hasher_is_deterministic() {
        let h1 = Hasher::new();
        let h2 = Hasher::new();
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn disabled_hasher_returns_empty_string() {
        let mut h = Hasher::new();
        h.update_string("openslide.vendor", "generic-tiff");
        h.disable();
        assert_eq!(h.finish(), "");
    }

    #[test]
    fn update_after_disable_is_noop() {
        let mut a = Hasher::new();
        a.update_string("x", "1");
        a.disable();
        a.update_string("y", "2");
        assert_eq!(a.finish(), "");
    }

    #[test]
    fn update_bytes_disables_over_threshold() {
        let mut h = Hasher::with_threshold(10);
        h.update_bytes(&[0u8; 5]);
        assert!(!h.is_disabled());
        h.update_bytes(&[0u8; 10]);
        assert!(h.is_disabled());
        assert_eq!(h.finish(), "");
    }

    #[test]
    fn same_input_same_digest() {
        let mut a = Hasher::new();
        a.update_string("openslide.vendor", "aperio");
        a.update_bytes(b"tiledata");
        let mut b = Hasher::new();
        b.update_string("openslide.vendor", "aperio");
        b.update_bytes(b"tiledata");
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn different_label_changes_digest() {
        let mut a = Hasher::new();
        a.update_string("a", "1");
        let mut b = Hasher::new();
        b.update_string("b", "1");
        assert_ne!(a.finish(), b.finish());
    }
}

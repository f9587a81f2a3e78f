//! Non-pyramidal bundled images (SPEC_FULL.md §3, "AssociatedImage").

/// A self-contained small image (label, macro, thumbnail) decoded in
/// full at `open` time, since SPEC_FULL.md §3 describes it as "fully
/// decodable in one call; no pyramid".
pub struct AssociatedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
    pub icc_profile: Option<Vec<u8>>,
}

impl AssociatedImage {
    pub fn icc_size(&self) -> Option<usize> {
        self.icc_profile.as_ref().map(|p| p.len())
    }
}

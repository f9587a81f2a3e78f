//! File I/O primitives (SPEC_FULL.md §2, "File I/O primitives").
//!
//! A pread-style random access abstraction (`RangeReader`) with
//! owned-handle semantics, backed by local files, plus a bounded pool
//! of reusable handles per slide.

mod file_reader;
mod handle_pool;
mod range_reader;
mod runtime;

pub use file_reader::LocalFileReader;
pub use handle_pool::{FileHandlePool, PooledHandle, DEFAULT_MAX_HANDLES};
pub use range_reader::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le, RangeReader,
};
pub use runtime::blocking_runtime;

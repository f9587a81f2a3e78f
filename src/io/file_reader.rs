use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use super::RangeReader;
use crate::error::IoError;

/// Local-disk implementation of `RangeReader`.
///
/// Reads byte ranges from an already-open file via positional reads
/// (`pread`), so concurrent readers never contend on a shared seek
/// cursor. The size is captured once at construction via `fstat`-style
/// metadata so `size()` never needs a syscall on the hot path.
#[derive(Clone)]
pub struct LocalFileReader {
    file: Arc<File>,
    size: u64,
    identifier: String,
}

impl LocalFileReader {
    /// Open `path` for reading. Returns `IoError::NotFound` if the file
    /// does not exist, `IoError::Os` for any other open failure.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IoError::NotFound(path.display().to_string())
            } else {
                IoError::Os {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }
            }
        })?;
        let size = file
            .metadata()
            .map_err(|e| IoError::Os {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
            .len();
        Ok(LocalFileReader {
            file: Arc::new(file),
            size,
            identifier: path.display().to_string(),
        })
    }

    /// Wrap an already-open file (e.g. one checked out of a
    /// `FileHandlePool`) without reopening it.
    pub fn from_file(file: Arc<File>, identifier: String) -> Result<Self, IoError> {
        let size = file
            .metadata()
            .map_err(|e| IoError::Os {
                path: identifier.clone(),
                message: e.to_string(),
            })?
            .len();
        Ok(LocalFileReader {
            file,
            size,
            identifier,
        })
    }

    fn read_blocking(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if offset.saturating_add(len as u64) > self.size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }
        if len == 0 {
            return Ok(Bytes::new());
        }
        let mut buf = BytesMut::zeroed(len);
        self.file.read_exact_at(&mut buf, offset).map_err(|e| IoError::Os {
            path: self.identifier.clone(),
            message: e.to_string(),
        })?;
        Ok(buf.freeze())
    }
}

#[async_trait]
impl RangeReader for LocalFileReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.read_blocking(offset, len))
            .await
            .map_err(|e| IoError::Os {
                path: self.identifier.clone(),
                message: format!("blocking read task panicked: {e}"),
            })?
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

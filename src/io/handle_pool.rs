use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};

use crate::error::IoError;

/// Default bound on the number of simultaneously open handles per slide
/// (SPEC_FULL.md §5, "File handle pool"): a reader `acquires` a handle,
/// blocking if none is free, up to this bound.
pub const DEFAULT_MAX_HANDLES: usize = 8;

/// A bounded, lazily-growing pool of open file handles for one slide's
/// backing path. Concurrent readers each acquire a handle for the
/// duration of a read and return it to the pool on drop; additional
/// handles are opened on demand up to `max_handles`.
pub struct FileHandlePool {
    path: PathBuf,
    max_handles: usize,
    semaphore: Semaphore,
    free: Mutex<Vec<Arc<File>>>,
}

impl FileHandlePool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, DEFAULT_MAX_HANDLES)
    }

    pub fn with_capacity(path: impl Into<PathBuf>, max_handles: usize) -> Self {
        FileHandlePool {
            path: path.into(),
            max_handles: max_handles.max(1),
            semaphore: Semaphore::new(max_handles.max(1)),
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_handles(&self) -> usize {
        self.max_handles
    }

    /// Acquire a handle, opening a new one if the pool has spare
    /// capacity and none is idle, or blocking until one is released if
    /// the pool is already at `max_handles`.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledHandle, IoError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IoError::HandlePoolExhausted(self.path.display().to_string()))?;

        let existing = {
            let mut free = self.free.lock().await;
            free.pop()
        };
        let file = match existing {
            Some(f) => f,
            None => {
                let path = self.path.clone();
                let file = tokio::task::spawn_blocking(move || File::open(&path))
                    .await
                    .map_err(|e| IoError::Os {
                        path: self.path.display().to_string(),
                        message: format!("open task panicked: {e}"),
                    })?
                    .map_err(|e| IoError::Os {
                        path: self.path.display().to_string(),
                        message: e.to_string(),
                    })?;
                Arc::new(file)
            }
        };

        Ok(PooledHandle {
            file: Some(file),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    async fn release(&self, file: Arc<File>) {
        let mut free = self.free.lock().await;
        free.push(file);
    }
}

/// A checked-out handle. Returns its underlying `File` to the pool's
/// free list when dropped so the next `acquire` can reuse it instead of
/// opening a new descriptor.
pub struct PooledHandle {
    file: Option<Arc<File>>,
    pool: Arc<FileHandlePool>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl PooledHandle {
    pub fn file(&self) -> &Arc<File> {
        self.file.as_ref().expect("file taken before drop")
    }
}

impl Drop for PooledHandle {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                pool.release(file).await;
            });
        }
    }
}

//! The internal async runtime backing the library's synchronous surface
//! (SPEC_FULL.md §5, "Execution substrate").
//!
//! Every public `Slide` method is a plain blocking call, matching
//! OpenSlide's own synchronous contract. Underneath, file I/O still goes
//! through the teacher's `tokio`-based `RangeReader`/`FileHandlePool` so
//! that their `Mutex`/`Semaphore`/singleflight patterns keep working
//! unchanged; a single process-wide multi-thread runtime drives them via
//! `block_on`, rather than requiring every caller to bring their own.

use std::sync::OnceLock;

use tokio::runtime::Runtime;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// The shared runtime used to drive internal async I/O from synchronous
/// library entry points. Built once, lazily, on first use.
pub fn blocking_runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .thread_name("wsi-reader-io")
            .build()
            .expect("failed to start internal tokio runtime")
    })
}

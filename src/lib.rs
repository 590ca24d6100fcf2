//! Chunked parallel iteration over in-memory collections.
//!
//! pariter applies a user callback to every element of a vector
//! ([`slice`]) or hash map ([`map`]) across a fixed pool of worker
//! threads, supporting for-each, map (in-place transform), filter (keep
//! matching elements) and find (deterministic first match).
//!
//! # Usage
//!
//! Operations consume their container, return a handle immediately, and
//! hand the container back once the caller waits:
//!
//! ```
//! use pariter::{slice, ParIterOptions};
//!
//! let numbers: Vec<u64> = (0..10_000).collect();
//! let handle = slice::par_map(numbers, |_index, value| value * 2, ParIterOptions::new());
//!
//! // ... other work on this thread ...
//!
//! let (doubled, result) = handle.into_inner();
//! assert!(result.is_ok());
//! assert_eq!(doubled[21], 42);
//! ```
//!
//! # Scheduling
//!
//! An operation's index range is split recursively into chunks bounded by
//! the [`ParIterOptions`] chunk sizes: smaller chunks balance load across
//! uneven workloads, larger chunks reduce per-chunk overhead. Splitting
//! runs on the calling thread; only the resulting leaf chunks are queued
//! on the worker pool. The pool is shared by every operation in the
//! process (see [`default_pool`]) and is created once, sized to the
//! number of logical CPUs; a custom pool can be injected per operation
//! via [`ParIterOptions::pool`].
//!
//! # Errors and panics
//!
//! A panic in a callback is contained to its chunk: the worker captures
//! it, records it as a fault on the operation, and keeps serving tasks.
//! Remaining chunks still run to completion, and the faults are reported
//! in aggregate as an [`IterError`] when the caller waits. There is no
//! cancellation: once queued, chunks always run.

pub mod error;
pub mod map;
mod par_iter;
pub mod pool;
pub mod slice;
mod split;

pub use error::{IterError, TaskError};
pub use map::MapFindResult;
pub use par_iter::{ParIter, ParIterOptions, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MIN_CHUNK_SIZE};
pub use pool::{default_pool, WorkerPool};
pub use slice::SliceFindResult;

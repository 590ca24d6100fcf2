//! Per-operation coordination: outstanding-chunk tracking, fault
//! aggregation and two-phase completion.

use std::ops::Range;
use std::sync::{Arc, Condvar, Mutex, Once, OnceLock};

use crate::error::{IterError, TaskError};
use crate::pool::{default_pool, Task, WorkerPool};
use crate::split::leaf_ranges;

/// Default upper bound on the number of elements in one leaf chunk.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 4096;

/// Default lower bound on the number of elements in one leaf chunk.
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 256;

/// Options controlling how a parallel operation splits and schedules its
/// work.
///
/// Options compose: builder setters override individual fields, and
/// [`merge`](ParIterOptions::merge) combines two option values field-wise
/// with later-wins semantics. A field that was never set falls back to the
/// library default when the operation runs.
///
/// ```
/// use pariter::ParIterOptions;
///
/// let base = ParIterOptions::new().max_chunk_size(1024);
/// let opts = base.merge(ParIterOptions::new().min_chunk_size(16));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ParIterOptions {
    max_chunk_size: Option<usize>,
    min_chunk_size: Option<usize>,
    pool: Option<WorkerPool>,
}

impl ParIterOptions {
    pub fn new() -> ParIterOptions {
        ParIterOptions::default()
    }

    /// Override the maximum chunk size (default
    /// [`DEFAULT_MAX_CHUNK_SIZE`]). Ranges longer than this are split while
    /// the halves stay above the minimum chunk size.
    pub fn max_chunk_size(mut self, size: usize) -> ParIterOptions {
        self.max_chunk_size = Some(size);
        self
    }

    /// Override the minimum chunk size (default
    /// [`DEFAULT_MIN_CHUNK_SIZE`]). No produced chunk is smaller than this,
    /// except a chunk covering an input shorter than the minimum.
    pub fn min_chunk_size(mut self, size: usize) -> ParIterOptions {
        self.min_chunk_size = Some(size);
        self
    }

    /// Run the operation's chunks on `pool` instead of the shared pool
    /// returned by [`default_pool`].
    pub fn pool(mut self, pool: WorkerPool) -> ParIterOptions {
        self.pool = Some(pool);
        self
    }

    /// Combine two option values field-wise. Fields set in `later` win;
    /// fields unset in `later` leave `self` unchanged.
    pub fn merge(self, later: ParIterOptions) -> ParIterOptions {
        ParIterOptions {
            max_chunk_size: later.max_chunk_size.or(self.max_chunk_size),
            min_chunk_size: later.min_chunk_size.or(self.min_chunk_size),
            pool: later.pool.or(self.pool),
        }
    }

    /// Resolved `(max, min)` chunk sizes. Both are clamped to at least 1 so
    /// that range splitting always terminates; `min <= max` is expected but
    /// not enforced (the splitter gives the minimum precedence).
    pub(crate) fn chunk_bounds(&self) -> (usize, usize) {
        let max = self.max_chunk_size.unwrap_or(DEFAULT_MAX_CHUNK_SIZE).max(1);
        let min = self.min_chunk_size.unwrap_or(DEFAULT_MIN_CHUNK_SIZE).max(1);
        (max, min)
    }

    pub(crate) fn resolve_pool(&self) -> WorkerPool {
        self.pool.clone().unwrap_or_else(|| default_pool().clone())
    }
}

/// State shared between one operation's handle and its in-flight tasks:
/// the outstanding-chunk count and the faults captured so far.
///
/// Fault writers only briefly hold a lock and never wait on a consumer, so
/// a worker recording a fault cannot block behind the waiting caller.
pub(crate) struct Completion {
    pending: Mutex<usize>,
    chunks_done: Condvar,
    faults: Mutex<Vec<TaskError>>,
}

impl Completion {
    pub(crate) fn new(pending: usize) -> Completion {
        Completion {
            pending: Mutex::new(pending),
            chunks_done: Condvar::new(),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Record a fault captured from a panicking chunk callback.
    pub(crate) fn record_fault(&self, fault: TaskError) {
        self.faults.lock().unwrap().push(fault);
    }

    /// Mark one chunk complete. Workers call this exactly once per task,
    /// after any fault has been recorded.
    pub(crate) fn task_done(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending -= 1;
        if *pending == 0 {
            self.chunks_done.notify_all();
        }
    }

    /// Block until every chunk has completed.
    pub(crate) fn wait_chunks_done(&self) {
        let mut pending = self.pending.lock().unwrap();
        while *pending > 0 {
            pending = self.chunks_done.wait(pending).unwrap();
        }
    }

    /// Take the captured faults. Valid once all chunks are done.
    pub(crate) fn take_faults(&self) -> Vec<TaskError> {
        std::mem::take(&mut *self.faults.lock().unwrap())
    }
}

/// Handle to one in-flight parallel operation over a container of type `C`.
///
/// Returned by the operations in [`slice`](crate::slice) and
/// [`map`](crate::map). The handle is the only way to observe completion:
/// [`wait`](ParIter::wait) blocks until the parallel phase and any
/// sequential post-processing have finished and returns the aggregate of
/// captured faults, and [`into_inner`](ParIter::into_inner) additionally
/// hands the container back.
///
/// Dropping the handle without waiting does not cancel anything: submitted
/// chunks always run to completion, and the container is dropped once the
/// last of them finishes.
pub struct ParIter<C> {
    completion: Arc<Completion>,
    post: Mutex<Option<Box<dyn FnOnce() -> C + Send>>>,
    finish: Once,
    output: Mutex<Option<C>>,
    result: OnceLock<Result<(), IterError>>,
}

impl<C> ParIter<C> {
    /// Split `0..len` into leaf chunks, submit one task per leaf and return
    /// the coordinating handle.
    ///
    /// `chunk` runs on worker threads, once per leaf; `post` runs exactly
    /// once on the first thread to call [`wait`](ParIter::wait), after all
    /// chunks completed, and produces the output container.
    ///
    /// The outstanding count is fixed to the leaf count before anything is
    /// submitted, so chunks finishing early cannot drive it to zero while
    /// later leaves are still queueing.
    pub(crate) fn dispatch<F>(
        len: usize,
        options: &ParIterOptions,
        chunk: F,
        post: impl FnOnce() -> C + Send + 'static,
    ) -> ParIter<C>
    where
        F: Fn(Range<usize>) + Send + Sync + 'static,
    {
        let (max_chunk_size, min_chunk_size) = options.chunk_bounds();
        let leaves = leaf_ranges(0..len, max_chunk_size, min_chunk_size);
        let completion = Arc::new(Completion::new(leaves.len()));

        let pool = options.resolve_pool();
        let chunk = Arc::new(chunk);
        for leaf in leaves {
            let chunk = Arc::clone(&chunk);
            pool.submit(Task::new(move || chunk(leaf), Arc::clone(&completion)));
        }

        ParIter {
            completion,
            post: Mutex::new(Some(Box::new(post))),
            finish: Once::new(),
            output: Mutex::new(None),
            result: OnceLock::new(),
        }
    }

    /// Block until every chunk has completed (successfully or with a
    /// captured fault) and sequential post-processing has run, then return
    /// the aggregate of captured faults.
    ///
    /// A fault in one chunk never cancels the others; all submitted chunks
    /// run to completion and post-processing proceeds over whatever state
    /// they produced. Waiting is idempotent: repeated calls (from any
    /// thread) return the same value.
    pub fn wait(&self) -> Result<(), IterError> {
        self.finish.call_once(|| {
            self.completion.wait_chunks_done();

            let post = self.post.lock().unwrap().take();
            if let Some(post) = post {
                *self.output.lock().unwrap() = Some(post());
            }

            let faults = self.completion.take_faults();
            let _ = self.result.set(IterError::from_faults(faults));
        });

        self.result
            .get()
            .expect("result is set before call_once returns")
            .clone()
    }

    /// Wait for the operation to finish, then return the container along
    /// with the aggregate of captured faults.
    pub fn into_inner(self) -> (C, Result<(), IterError>) {
        let result = self.wait();
        let output = self
            .output
            .lock()
            .unwrap()
            .take()
            .expect("output is stored before wait returns");
        (output, result)
    }
}

/// Recover sole ownership of a container shared with chunk tasks.
///
/// Workers drop their clones of the `Arc` before decrementing the
/// outstanding count, so by the time post-processing runs this is the only
/// reference left.
pub(crate) fn unwrap_shared<C>(shared: Arc<C>) -> C {
    Arc::into_inner(shared).expect("chunks have completed and dropped their references")
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::{ParIterOptions, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MIN_CHUNK_SIZE};
    use crate::pool::WorkerPool;

    #[test]
    fn test_options_defaults() {
        let (max, min) = ParIterOptions::new().chunk_bounds();
        assert_eq!(max, DEFAULT_MAX_CHUNK_SIZE);
        assert_eq!(min, DEFAULT_MIN_CHUNK_SIZE);
    }

    #[test]
    fn test_options_merge_later_wins() {
        let base = ParIterOptions::new().max_chunk_size(100).min_chunk_size(10);
        let merged = base.merge(ParIterOptions::new().max_chunk_size(50));
        assert_eq!(merged.chunk_bounds(), (50, 10));
    }

    #[test]
    fn test_options_merge_unset_does_not_override() {
        let base = ParIterOptions::new().max_chunk_size(100);
        let merged = base.merge(ParIterOptions::new());
        assert_eq!(merged.chunk_bounds(), (100, DEFAULT_MIN_CHUNK_SIZE));
    }

    #[test]
    fn test_degenerate_sizes_clamped() {
        let opts = ParIterOptions::new().max_chunk_size(0).min_chunk_size(0);
        assert_eq!(opts.chunk_bounds(), (1, 1));
    }

    #[test]
    fn test_chunks_run_on_injected_pool() {
        let pool = WorkerPool::new(2);
        let iter = crate::slice::par_for_each(
            (0..100u32).collect::<Vec<_>>(),
            |_index, _value| {
                // Chunks never run inline on the submitting thread.
                let name = thread::current().name().unwrap_or("").to_string();
                assert!(name.starts_with("pariter-"), "ran on {:?}", name);
            },
            ParIterOptions::new().pool(pool),
        );
        assert_eq!(iter.wait(), Ok(()));
    }
}

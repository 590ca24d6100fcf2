//! Fixed-size worker pool that executes chunk tasks.

use std::env;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::TaskError;
use crate::par_iter::Completion;

/// Capacity of the shared task queue. Submitters block while the queue is
/// full rather than dropping tasks; the capacity is sized so that typical
/// chunk counts queue without backpressure.
const TASK_QUEUE_CAPACITY: usize = 1024;

/// A unit of work executed by one worker: a closure over one leaf chunk,
/// plus the completion state of the operation that submitted it.
pub(crate) struct Task {
    body: Box<dyn FnOnce() + Send>,
    completion: Arc<Completion>,
}

impl Task {
    pub(crate) fn new(body: impl FnOnce() + Send + 'static, completion: Arc<Completion>) -> Task {
        Task {
            body: Box::new(body),
            completion,
        }
    }

    /// Run the task body, capturing any panic as a fault on the owning
    /// operation. The outstanding-chunk count is decremented in every case,
    /// after the fault (if any) has been recorded.
    fn run(self) {
        let Task { body, completion } = self;

        // State the body shares with other chunks is confined to disjoint
        // element ranges plus mutex-guarded accumulators, so it remains
        // usable after an unwind.
        if let Err(payload) = catch_unwind(AssertUnwindSafe(body)) {
            completion.record_fault(TaskError::from_panic(payload));
        }
        completion.task_done();
    }
}

/// Handle to a fixed pool of worker threads consuming tasks from a shared
/// bounded queue.
///
/// Cloning the handle is cheap and yields a handle to the same pool. Most
/// callers never construct one: operations run on the shared pool returned
/// by [`default_pool`] unless one is injected via
/// [`ParIterOptions::pool`](crate::ParIterOptions::pool).
///
/// Workers pull tasks greedily; there is no ordering guarantee between
/// independently submitted tasks. A panicking task never takes down its
/// worker: the panic is captured, converted into a fault on the submitting
/// operation, and the worker moves on to the next task.
#[derive(Clone)]
pub struct WorkerPool {
    tasks: Sender<Task>,
    workers: usize,
}

impl WorkerPool {
    /// Create a pool with `num_threads` worker threads (at least one).
    ///
    /// The threads live until every handle to the pool has been dropped.
    pub fn new(num_threads: usize) -> WorkerPool {
        let workers = num_threads.max(1);
        let (tasks, queue) = bounded::<Task>(TASK_QUEUE_CAPACITY);

        for index in 0..workers {
            let queue = queue.clone();
            thread::Builder::new()
                .name(format!("pariter-{}", index))
                .spawn(move || worker_loop(queue))
                .expect("failed to spawn worker thread");
        }

        WorkerPool { tasks, workers }
    }

    /// Number of worker threads in the pool.
    pub fn num_workers(&self) -> usize {
        self.workers
    }

    /// Enqueue a task for execution by one of the workers.
    ///
    /// Never runs the task inline on the calling thread. Blocks only while
    /// the queue is full.
    pub(crate) fn submit(&self, task: Task) {
        // Sending fails only once every worker has exited, which cannot
        // happen while this handle keeps the channel open.
        let _ = self.tasks.send(task);
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

fn worker_loop(queue: Receiver<Task>) {
    // `recv` errors only when every pool handle has been dropped.
    while let Ok(task) = queue.recv() {
        task.run();
    }
}

/// Return the process-wide shared worker pool.
///
/// The pool is created on first use with one worker per logical CPU and is
/// never torn down. It is shared by every concurrent operation in the
/// process, which avoids per-call thread-spawn cost but means all
/// operations compete for the same worker budget.
///
/// The thread count can be overridden at the process level by setting the
/// `PARITER_NUM_THREADS` environment variable, whose value must be a number
/// between 1 and the logical core count. Values outside that range are
/// clamped; unparseable values fall back to the default.
pub fn default_pool() -> &'static WorkerPool {
    static POOL: OnceLock<WorkerPool> = OnceLock::new();
    POOL.get_or_init(|| {
        let logical_cpus = num_cpus::get().max(1);

        let num_threads = if let Some(threads_var) = env::var_os("PARITER_NUM_THREADS") {
            match threads_var.to_string_lossy().parse::<usize>() {
                Ok(n_threads) => n_threads.clamp(1, logical_cpus),
                Err(_) => logical_cpus,
            }
        } else {
            logical_cpus
        };

        WorkerPool::new(num_threads)
    })
}

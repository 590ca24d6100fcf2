//! Parallel operations over vectors.
//!
//! Each operation consumes its vector, fans the index range out over the
//! worker pool in leaf chunks, and hands the vector back through the
//! returned handle once the caller waits. Within one chunk, elements are
//! visited in increasing index order; across chunks there is no ordering.

use std::cell::UnsafeCell;
use std::ops::Range;
use std::slice;
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::IterError;
use crate::par_iter::{unwrap_shared, ParIter, ParIterOptions};

/// Cell granting chunk tasks mutable access to disjoint sub-ranges of a
/// vector while it is shared between worker threads.
struct SliceCell<T> {
    /// Base pointer into the vector's buffer, captured before the vector
    /// is shared. The buffer never moves while chunks run.
    base: *mut T,
    items: UnsafeCell<Vec<T>>,
}

// Elements are only ever accessed through disjoint ranges (the splitter
// partitions the index space exactly), so no two threads touch the same
// element.
unsafe impl<T: Send> Send for SliceCell<T> {}
unsafe impl<T: Send> Sync for SliceCell<T> {}

impl<T> SliceCell<T> {
    fn new(mut items: Vec<T>) -> SliceCell<T> {
        let base = items.as_mut_ptr();
        SliceCell {
            base,
            items: UnsafeCell::new(items),
        }
    }

    /// Mutable view of the elements in `range`.
    ///
    /// # Safety
    ///
    /// No concurrent call may be given a range overlapping this one, and
    /// `range` must lie within the vector's length.
    #[allow(clippy::mut_from_ref)]
    unsafe fn slice_mut(&self, range: Range<usize>) -> &mut [T] {
        slice::from_raw_parts_mut(self.base.add(range.start), range.len())
    }

    fn into_items(self) -> Vec<T> {
        self.items.into_inner()
    }
}

/// Apply `cb` to every element of `items` in parallel.
///
/// `cb` receives each element's index and a reference to its value; every
/// index is visited exactly once. The returned handle reports completion
/// and gives the vector back; see [`ParIter::wait`] and
/// [`ParIter::into_inner`].
pub fn par_for_each<T, F>(items: Vec<T>, cb: F, options: ParIterOptions) -> ParIter<Vec<T>>
where
    T: Send + Sync + 'static,
    F: Fn(usize, &T) + Send + Sync + 'static,
{
    let len = items.len();
    let shared = Arc::new(items);
    let chunk_items = Arc::clone(&shared);

    ParIter::dispatch(
        len,
        &options,
        move |range: Range<usize>| {
            for index in range {
                cb(index, &chunk_items[index]);
            }
        },
        move || unwrap_shared(shared),
    )
}

/// Replace every element of `items` with `cb(index, &element)`, in
/// parallel and in place.
///
/// Elementwise the result is identical to a sequential
/// `for i in 0..len { items[i] = cb(i, &items[i]) }`; only the order in
/// which chunks of the vector are transformed is unspecified.
pub fn par_map<T, F>(items: Vec<T>, cb: F, options: ParIterOptions) -> ParIter<Vec<T>>
where
    T: Send + Sync + 'static,
    F: Fn(usize, &T) -> T + Send + Sync + 'static,
{
    let len = items.len();
    let cells = Arc::new(SliceCell::new(items));
    let chunk_cells = Arc::clone(&cells);

    ParIter::dispatch(
        len,
        &options,
        move |range: Range<usize>| {
            let start = range.start;
            // SAFETY: leaf ranges partition `0..len` exactly, so no other
            // chunk is given a range overlapping this one.
            let slots = unsafe { chunk_cells.slice_mut(range) };
            for (offset, slot) in slots.iter_mut().enumerate() {
                *slot = cb(start + offset, &*slot);
            }
        },
        move || unwrap_shared(cells).into_items(),
    )
}

/// Keep only the elements of `items` matching `pred`, in parallel.
///
/// Each chunk collects copies of its matching elements; once all chunks
/// finish, the kept lists replace the vector's contents. The kept lists
/// are concatenated in chunk completion order, so the relative order of
/// the result is unspecified.
pub fn par_filter<T, F>(items: Vec<T>, pred: F, options: ParIterOptions) -> ParIter<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(usize, &T) -> bool + Send + Sync + 'static,
{
    let len = items.len();
    let shared = Arc::new(items);
    let kept: Arc<Mutex<Vec<Vec<T>>>> = Arc::new(Mutex::new(Vec::new()));

    let chunk_items = Arc::clone(&shared);
    let chunk_kept = Arc::clone(&kept);

    ParIter::dispatch(
        len,
        &options,
        move |range: Range<usize>| {
            let mut local = Vec::new();
            for index in range {
                let value = &chunk_items[index];
                if pred(index, value) {
                    local.push(value.clone());
                }
            }
            if !local.is_empty() {
                chunk_kept.lock().unwrap().push(local);
            }
        },
        move || {
            let mut items = unwrap_shared(shared);
            items.clear();
            for chunk in kept.lock().unwrap().drain(..) {
                items.extend(chunk);
            }
            items
        },
    )
}

/// Result of [`par_find`]: at most one matching element, chosen
/// deterministically.
///
/// Accessors that need the outcome block until the operation has completed
/// (equivalent to calling [`wait`](SliceFindResult::wait) first); waiting
/// repeatedly is idempotent.
pub struct SliceFindResult<T> {
    iter: ParIter<Vec<T>>,
    winner: Arc<OnceLock<Option<(usize, T)>>>,
}

impl<T> SliceFindResult<T> {
    /// Block until every chunk has completed and the winning match (if
    /// any) has been selected, then return the aggregate of captured
    /// faults.
    pub fn wait(&self) -> Result<(), IterError> {
        self.iter.wait()
    }

    /// Whether any element matched the predicate.
    pub fn found(&self) -> bool {
        self.selected().is_some()
    }

    /// Index of the matching element, or `None` if no element matched.
    pub fn index(&self) -> Option<usize> {
        self.selected().map(|(index, _)| *index)
    }

    /// Wait for the operation to finish and return the vector, unchanged,
    /// along with the aggregate of captured faults.
    pub fn into_inner(self) -> (Vec<T>, Result<(), IterError>) {
        self.iter.into_inner()
    }

    fn selected(&self) -> Option<&(usize, T)> {
        let _ = self.wait();
        self.winner
            .get()
            .expect("winner is selected before wait returns")
            .as_ref()
    }
}

impl<T: Clone> SliceFindResult<T> {
    /// Copy of the matching value, or `None` if no element matched.
    pub fn value(&self) -> Option<T> {
        self.selected().map(|(_, value)| value.clone())
    }

    /// Wait for the operation to finish and return the winning
    /// `(index, value)` match along with the aggregate of captured faults.
    pub fn wait_result(&self) -> (Option<(usize, T)>, Result<(), IterError>) {
        let result = self.wait();
        (self.selected().cloned(), result)
    }
}

/// Find the first element of `items` matching `pred`, scanning chunks in
/// parallel.
///
/// Each chunk stops scanning as soon as it finds its own earliest match;
/// once all chunks finish, the match with the smallest index wins. The
/// result is therefore the same element a sequential scan would report,
/// regardless of chunk sizing or timing. The vector is not modified.
///
/// On an empty vector the predicate is never invoked and the result is
/// "not found".
pub fn par_find<T, F>(items: Vec<T>, pred: F, options: ParIterOptions) -> SliceFindResult<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(usize, &T) -> bool + Send + Sync + 'static,
{
    let len = items.len();
    let shared = Arc::new(items);
    let candidates: Arc<Mutex<Vec<(usize, T)>>> = Arc::new(Mutex::new(Vec::new()));
    let winner: Arc<OnceLock<Option<(usize, T)>>> = Arc::new(OnceLock::new());

    let chunk_items = Arc::clone(&shared);
    let chunk_candidates = Arc::clone(&candidates);
    let post_winner = Arc::clone(&winner);

    let iter = ParIter::dispatch(
        len,
        &options,
        move |range: Range<usize>| {
            for index in range {
                let value = &chunk_items[index];
                if pred(index, value) {
                    chunk_candidates.lock().unwrap().push((index, value.clone()));
                    // Scanning in increasing order, so nothing later in
                    // this chunk can beat it.
                    break;
                }
            }
        },
        move || {
            let mut candidates = candidates.lock().unwrap();
            let selected = candidates.drain(..).min_by_key(|(index, _)| *index);
            let _ = post_winner.set(selected);
            drop(candidates);
            unwrap_shared(shared)
        },
    );

    SliceFindResult { iter, winner }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use pariter_testing::TestCases;

    use super::{par_filter, par_find, par_for_each, par_map};
    use crate::par_iter::ParIterOptions;

    // Chunk sizings that exercise single-leaf, per-element and in-between
    // splits.
    fn chunk_size_cases() -> Vec<(usize, usize)> {
        vec![(4096, 256), (1, 1), (7, 3), (100, 10), (2, 1)]
    }

    #[test]
    fn test_for_each_visits_every_index_once() {
        #[derive(Debug)]
        struct Case {
            len: usize,
            max_chunk_size: usize,
            min_chunk_size: usize,
        }

        let cases: Vec<Case> = [0, 1, 5, 1000]
            .into_iter()
            .flat_map(|len| {
                chunk_size_cases()
                    .into_iter()
                    .map(move |(max, min)| Case {
                        len,
                        max_chunk_size: max,
                        min_chunk_size: min,
                    })
            })
            .collect();

        cases.test_each(|case| {
            let items: Vec<usize> = (0..case.len).collect();
            let visits: Arc<Vec<AtomicU32>> =
                Arc::new((0..case.len).map(|_| AtomicU32::new(0)).collect());

            let cb_visits = Arc::clone(&visits);
            let iter = par_for_each(
                items,
                move |index, value| {
                    assert_eq!(index, *value);
                    cb_visits[index].fetch_add(1, Ordering::SeqCst);
                },
                ParIterOptions::new()
                    .max_chunk_size(case.max_chunk_size)
                    .min_chunk_size(case.min_chunk_size),
            );

            assert_eq!(iter.wait(), Ok(()));
            for count in visits.iter() {
                assert_eq!(count.load(Ordering::SeqCst), 1);
            }
        });
    }

    #[test]
    fn test_map_matches_sequential_application() {
        let original: Vec<u64> = (0..1500).map(|i| i * 3 % 17).collect();
        let cb = |index: usize, value: &u64| value * 2 + index as u64;

        let expected: Vec<u64> = original
            .iter()
            .enumerate()
            .map(|(i, v)| cb(i, v))
            .collect();

        for (max, min) in chunk_size_cases() {
            let iter = par_map(
                original.clone(),
                cb,
                ParIterOptions::new().max_chunk_size(max).min_chunk_size(min),
            );
            let (mapped, result) = iter.into_inner();
            assert_eq!(result, Ok(()));
            assert_eq!(mapped, expected);
        }
    }

    #[test]
    fn test_filter_keeps_same_multiset_as_sequential() {
        let original: Vec<u32> = (0..997).map(|i| i % 10).collect();
        let pred = |_index: usize, value: &u32| value % 2 == 0;

        let mut expected: Vec<u32> = original
            .iter()
            .enumerate()
            .filter(|&(i, v)| pred(i, v))
            .map(|(_, v)| *v)
            .collect();
        expected.sort_unstable();

        for (max, min) in chunk_size_cases() {
            let iter = par_filter(
                original.clone(),
                pred,
                ParIterOptions::new().max_chunk_size(max).min_chunk_size(min),
            );
            let (mut kept, result) = iter.into_inner();
            assert_eq!(result, Ok(()));

            // Order is unspecified; compare as multisets.
            kept.sort_unstable();
            assert_eq!(kept, expected);
        }
    }

    #[test]
    fn test_find_no_match() {
        let result = par_find(
            vec![1, 3, 5, 7, 9],
            |_i, v: &i32| v % 2 == 0,
            ParIterOptions::new().max_chunk_size(2).min_chunk_size(1),
        );

        assert_eq!(result.wait(), Ok(()));
        assert!(!result.found());
        assert_eq!(result.index(), None);
        assert_eq!(result.value(), None);
    }

    #[test]
    fn test_find_reports_lowest_index_match() {
        let mut items = vec![0u32; 1000];
        items[120] = 7;
        items[845] = 7;
        items[999] = 7;

        for (max, min) in chunk_size_cases() {
            let result = par_find(
                items.clone(),
                |_i, v: &u32| *v == 7,
                ParIterOptions::new().max_chunk_size(max).min_chunk_size(min),
            );

            let (winner, wait_result) = result.wait_result();
            assert_eq!(wait_result, Ok(()));
            assert_eq!(winner, Some((120, 7)));
            assert!(result.found());
            assert_eq!(result.index(), Some(120));
            assert_eq!(result.value(), Some(7));
        }
    }

    #[test]
    fn test_find_empty_input_does_not_invoke_predicate() {
        let invoked = Arc::new(AtomicU32::new(0));
        let pred_invoked = Arc::clone(&invoked);

        let result = par_find(
            Vec::<i32>::new(),
            move |_i, _v| {
                pred_invoked.fetch_add(1, Ordering::SeqCst);
                true
            },
            ParIterOptions::new(),
        );

        assert!(!result.found());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_find_does_not_mutate_input() {
        let items: Vec<i32> = (0..500).rev().collect();
        let original = items.clone();

        let result = par_find(
            items,
            |_i, v| *v == 250,
            ParIterOptions::new().max_chunk_size(16).min_chunk_size(4),
        );

        assert!(result.found());
        let (items, _) = result.into_inner();
        assert_eq!(items, original);
    }

    #[test]
    fn test_fault_is_contained_and_reported() {
        let len = 10;
        let visits: Arc<Vec<AtomicU32>> = Arc::new((0..len).map(|_| AtomicU32::new(0)).collect());

        let cb_visits = Arc::clone(&visits);
        let iter = par_for_each(
            (0..len).collect::<Vec<usize>>(),
            move |index, _value| {
                if index == 3 {
                    panic!("boom at 3");
                }
                cb_visits[index].fetch_add(1, Ordering::SeqCst);
            },
            // One element per chunk, so exactly one chunk faults.
            ParIterOptions::new().max_chunk_size(1).min_chunk_size(1),
        );

        let err = iter.wait().unwrap_err();
        assert_eq!(err.faults().len(), 1);
        assert!(err.to_string().contains("boom at 3"));

        // Sibling chunks ran to completion despite the fault.
        for (index, count) in visits.iter().enumerate() {
            let expected = if index == 3 { 0 } else { 1 };
            assert_eq!(count.load(Ordering::SeqCst), expected);
        }
    }

    #[test]
    fn test_wait_is_idempotent() {
        let iter = par_for_each(
            vec![0u8; 100],
            |_i, _v| panic!("always fails"),
            ParIterOptions::new().max_chunk_size(10).min_chunk_size(10),
        );

        let first = iter.wait();
        let second = iter.wait();
        assert!(first.is_err());
        assert_eq!(first, second);
    }

    #[test]
    fn test_filter_post_processing_runs_despite_faults() {
        // One element per chunk, so the faulted chunk drops exactly the
        // even element at index 0.
        let iter = par_filter(
            (0..100u32).collect::<Vec<u32>>(),
            |index, value| {
                if index == 0 {
                    panic!("first chunk fails");
                }
                value % 2 == 0
            },
            ParIterOptions::new().max_chunk_size(1).min_chunk_size(1),
        );

        let (kept, result) = iter.into_inner();
        assert!(result.is_err());
        // The faulted chunk contributed nothing; the others all did.
        assert_eq!(kept.len(), 49);
        assert!(kept.iter().all(|v| v % 2 == 0));
    }
}

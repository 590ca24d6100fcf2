//! Parallel operations over hash maps.
//!
//! The key set is snapshotted into a vector once, before any chunk is
//! queued; chunks index ranges of the snapshot and never iterate the map
//! itself, so workers cannot race on map iteration. Each operation
//! consumes its map and hands it back through the returned handle.

use std::collections::HashMap;
use std::hash::Hash;
use std::ops::Range;
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::IterError;
use crate::par_iter::{unwrap_shared, ParIter, ParIterOptions};

/// A map plus a key snapshot and per-entry value pointers, granting chunk
/// tasks in-place access to the values at disjoint snapshot positions.
struct MapCells<K, V> {
    /// Never structurally modified while chunks run, so the value
    /// pointers below stay valid.
    map: HashMap<K, V>,
    keys: Vec<K>,
    values: Vec<*mut V>,
}

// Distinct keys occupy distinct value slots and chunks are given disjoint
// snapshot ranges, so no two threads touch the same entry.
unsafe impl<K: Send + Sync, V: Send> Send for MapCells<K, V> {}
unsafe impl<K: Send + Sync, V: Send> Sync for MapCells<K, V> {}

impl<K: Clone, V> MapCells<K, V> {
    fn new(mut map: HashMap<K, V>) -> MapCells<K, V> {
        let mut keys = Vec::with_capacity(map.len());
        let mut values = Vec::with_capacity(map.len());
        for (key, value) in map.iter_mut() {
            keys.push(key.clone());
            values.push(value as *mut V);
        }
        MapCells { map, keys, values }
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn key(&self, index: usize) -> &K {
        &self.keys[index]
    }

    /// Mutable access to the value at snapshot position `index`.
    ///
    /// # Safety
    ///
    /// No concurrent call may target the same position.
    #[allow(clippy::mut_from_ref)]
    unsafe fn value_mut(&self, index: usize) -> &mut V {
        let slot = self.values[index];
        &mut *slot
    }

    fn into_map(self) -> HashMap<K, V> {
        self.map
    }
}

fn snapshot_keys<K: Clone, V>(map: &HashMap<K, V>) -> Vec<K> {
    map.keys().cloned().collect()
}

/// Apply `cb` to every entry of `map` in parallel.
///
/// `cb` receives each key and a reference to its value; every key present
/// when the operation started is visited exactly once.
pub fn par_for_each<K, V, F>(
    map: HashMap<K, V>,
    cb: F,
    options: ParIterOptions,
) -> ParIter<HashMap<K, V>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    F: Fn(&K, &V) + Send + Sync + 'static,
{
    let keys = snapshot_keys(&map);
    let len = keys.len();
    let shared = Arc::new((map, keys));
    let chunk_shared = Arc::clone(&shared);

    ParIter::dispatch(
        len,
        &options,
        move |range: Range<usize>| {
            let (map, keys) = &*chunk_shared;
            for index in range {
                let key = &keys[index];
                cb(key, &map[key]);
            }
        },
        move || unwrap_shared(shared).0,
    )
}

/// Replace every value of `map` with `cb(&key, &value)`, in parallel and
/// in place.
pub fn par_map<K, V, F>(
    map: HashMap<K, V>,
    cb: F,
    options: ParIterOptions,
) -> ParIter<HashMap<K, V>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    F: Fn(&K, &V) -> V + Send + Sync + 'static,
{
    let cells = Arc::new(MapCells::new(map));
    let len = cells.len();
    let chunk_cells = Arc::clone(&cells);

    ParIter::dispatch(
        len,
        &options,
        move |range: Range<usize>| {
            for index in range {
                let key = chunk_cells.key(index);
                // SAFETY: leaf ranges partition the snapshot exactly, so
                // no other chunk is given this position.
                let slot = unsafe { chunk_cells.value_mut(index) };
                *slot = cb(key, &*slot);
            }
        },
        move || unwrap_shared(cells).into_map(),
    )
}

/// Keep only the entries of `map` matching `pred`, in parallel.
///
/// Each chunk collects copies of its matching entries; once all chunks
/// finish, the kept entries replace the map's contents.
pub fn par_filter<K, V, F>(
    map: HashMap<K, V>,
    pred: F,
    options: ParIterOptions,
) -> ParIter<HashMap<K, V>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(&K, &V) -> bool + Send + Sync + 'static,
{
    let keys = snapshot_keys(&map);
    let len = keys.len();
    let shared = Arc::new((map, keys));
    let kept: Arc<Mutex<Vec<Vec<(K, V)>>>> = Arc::new(Mutex::new(Vec::new()));

    let chunk_shared = Arc::clone(&shared);
    let chunk_kept = Arc::clone(&kept);

    ParIter::dispatch(
        len,
        &options,
        move |range: Range<usize>| {
            let (map, keys) = &*chunk_shared;
            let mut local = Vec::new();
            for index in range {
                let key = &keys[index];
                let value = &map[key];
                if pred(key, value) {
                    local.push((key.clone(), value.clone()));
                }
            }
            if !local.is_empty() {
                chunk_kept.lock().unwrap().push(local);
            }
        },
        move || {
            let (mut map, _keys) = unwrap_shared(shared);
            map.clear();
            for chunk in kept.lock().unwrap().drain(..) {
                for (key, value) in chunk {
                    map.insert(key, value);
                }
            }
            map
        },
    )
}

/// Result of [`par_find`]: at most one matching entry, chosen
/// deterministically.
///
/// Accessors that need the outcome block until the operation has completed
/// (equivalent to calling [`wait`](MapFindResult::wait) first); waiting
/// repeatedly is idempotent.
pub struct MapFindResult<K, V> {
    iter: ParIter<HashMap<K, V>>,
    winner: Arc<OnceLock<Option<(usize, K, V)>>>,
}

impl<K, V> MapFindResult<K, V> {
    /// Block until every chunk has completed and the winning match (if
    /// any) has been selected, then return the aggregate of captured
    /// faults.
    pub fn wait(&self) -> Result<(), IterError> {
        self.iter.wait()
    }

    /// Whether any entry matched the predicate.
    pub fn found(&self) -> bool {
        self.selected().is_some()
    }

    /// Wait for the operation to finish and return the map, unchanged,
    /// along with the aggregate of captured faults.
    pub fn into_inner(self) -> (HashMap<K, V>, Result<(), IterError>) {
        self.iter.into_inner()
    }

    fn selected(&self) -> Option<&(usize, K, V)> {
        let _ = self.wait();
        self.winner
            .get()
            .expect("winner is selected before wait returns")
            .as_ref()
    }
}

impl<K: Clone, V: Clone> MapFindResult<K, V> {
    /// Copy of the matching key, or `None` if no entry matched.
    pub fn key(&self) -> Option<K> {
        self.selected().map(|(_, key, _)| key.clone())
    }

    /// Copy of the matching value, or `None` if no entry matched.
    pub fn value(&self) -> Option<V> {
        self.selected().map(|(_, _, value)| value.clone())
    }

    /// Wait for the operation to finish and return the winning
    /// `(key, value)` match along with the aggregate of captured faults.
    pub fn wait_result(&self) -> (Option<(K, V)>, Result<(), IterError>) {
        let result = self.wait();
        let winner = self
            .selected()
            .map(|(_, key, value)| (key.clone(), value.clone()));
        (winner, result)
    }
}

/// Find an entry of `map` matching `pred`, scanning chunks of the key
/// snapshot in parallel.
///
/// Each chunk stops scanning as soon as it finds its own earliest match
/// (in snapshot order); once all chunks finish, the match at the earliest
/// snapshot position wins, so the answer is deterministic for a given
/// snapshot regardless of chunk sizing or timing. The map is not modified.
///
/// On an empty map the predicate is never invoked and the result is "not
/// found".
pub fn par_find<K, V, F>(map: HashMap<K, V>, pred: F, options: ParIterOptions) -> MapFindResult<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(&K, &V) -> bool + Send + Sync + 'static,
{
    let keys = snapshot_keys(&map);
    let len = keys.len();
    let shared = Arc::new((map, keys));
    let candidates: Arc<Mutex<Vec<(usize, K, V)>>> = Arc::new(Mutex::new(Vec::new()));
    let winner: Arc<OnceLock<Option<(usize, K, V)>>> = Arc::new(OnceLock::new());

    let chunk_shared = Arc::clone(&shared);
    let chunk_candidates = Arc::clone(&candidates);
    let post_winner = Arc::clone(&winner);

    let iter = ParIter::dispatch(
        len,
        &options,
        move |range: Range<usize>| {
            let (map, keys) = &*chunk_shared;
            for index in range {
                let key = &keys[index];
                let value = &map[key];
                if pred(key, value) {
                    chunk_candidates
                        .lock()
                        .unwrap()
                        .push((index, key.clone(), value.clone()));
                    break;
                }
            }
        },
        move || {
            let mut candidates = candidates.lock().unwrap();
            let selected = candidates.drain(..).min_by_key(|(index, _, _)| *index);
            let _ = post_winner.set(selected);
            drop(candidates);
            unwrap_shared(shared).0
        },
    );

    MapFindResult { iter, winner }
}

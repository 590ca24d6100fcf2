//! Recursive binary splitting of an index range into leaf chunks.

use std::ops::Range;

/// Split `range` into the leaf chunks that will each become one pool task.
///
/// A range is bisected at its midpoint while it is longer than
/// `max_chunk_size` and both halves would still hold at least
/// `min_chunk_size` elements; anything smaller is a leaf. Bisection keeps
/// the chunk count balanced and bounded above by `range.len() /
/// min_chunk_size` rounded up, while respecting the upper bound per chunk.
///
/// The returned leaves partition `range` exactly: no gaps, no overlaps, and
/// their union covers every index. They are produced in increasing index
/// order. An empty range yields no leaves; a `min_chunk_size` larger than
/// the whole range yields exactly one leaf covering it.
///
/// Both bounds must be at least 1 so that recursion terminates;
/// [`ParIterOptions`](crate::ParIterOptions) clamps them before this runs.
pub(crate) fn leaf_ranges(
    range: Range<usize>,
    max_chunk_size: usize,
    min_chunk_size: usize,
) -> Vec<Range<usize>> {
    debug_assert!(max_chunk_size >= 1 && min_chunk_size >= 1);

    let mut leaves = Vec::new();
    if !range.is_empty() {
        push_leaves(range, max_chunk_size, min_chunk_size, &mut leaves);
    }
    leaves
}

fn push_leaves(
    range: Range<usize>,
    max_chunk_size: usize,
    min_chunk_size: usize,
    leaves: &mut Vec<Range<usize>>,
) {
    let len = range.len();

    // `len > max_chunk_size >= 1` implies both halves are non-empty and
    // strictly shorter than `range`, so this terminates.
    if len > max_chunk_size && len / 2 >= min_chunk_size {
        let mid = range.start + len / 2;
        push_leaves(range.start..mid, max_chunk_size, min_chunk_size, leaves);
        push_leaves(mid..range.end, max_chunk_size, min_chunk_size, leaves);
    } else {
        leaves.push(range);
    }
}

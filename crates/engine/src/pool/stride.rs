//! Slice sizing and interleaved stride partitioning.
//!
//! A slice of `S` items is split across `K` workers so that worker `i`
//! handles local positions `i, i+K, i+2K, …`. Strides are disjoint and their
//! union is the whole slice.

use std::collections::BTreeSet;

/// Items dispatched in one round: pending, capped by the external quota.
pub fn slice_size(pending: usize, quota: Option<usize>) -> usize {
    match quota {
        Some(q) => pending.min(q),
        None => pending,
    }
}

/// Workers started for a slice: never more than the slice, the quota or the
/// hardware allows, and at least one when there is work.
pub fn worker_count(slice: usize, quota: Option<usize>, hardware: usize) -> usize {
    if slice == 0 {
        return 0;
    }
    let bound = quota.map_or(slice, |q| slice.min(q));
    bound.min(hardware).max(1)
}

/// Local positions handled by `worker` out of `workers` over a slice of `len`.
pub fn stride(len: usize, worker: usize, workers: usize) -> impl Iterator<Item = usize> {
    let step = workers.max(1);
    (worker..len).step_by(step)
}

pub fn partition(len: usize, workers: usize) -> Vec<Vec<usize>> {
    (0..workers).map(|w| stride(len, w, workers).collect()).collect()
}

/// Length of the run of completed indices starting at `start`.
pub fn contiguous_prefix(start: usize, completed: &BTreeSet<usize>) -> usize {
    let mut next = start;
    for &index in completed.range(start..) {
        if index != next {
            break;
        }
        next += 1;
    }
    next - start
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn quota_caps_slice_and_workers() {
        assert_eq!(slice_size(250, Some(5)), 5);
        assert_eq!(slice_size(3, Some(5)), 3);
        assert_eq!(slice_size(1000, None), 1000);

        assert_eq!(worker_count(5, Some(5), 8), 5);
        assert_eq!(worker_count(1000, None, 8), 8);
        assert_eq!(worker_count(3, None, 8), 3);
        assert_eq!(worker_count(0, None, 8), 0);
    }

    #[test]
    fn strides_interleave() {
        let strides = partition(20, 8);
        assert_eq!(strides[0], vec![0, 8, 16]);
        assert_eq!(strides[3], vec![3, 11, 19]);
        assert_eq!(strides[7], vec![7, 15]);
    }

    #[test]
    fn prefix_stops_at_first_gap() {
        let done: BTreeSet<usize> = [10, 11, 12, 14, 15].into_iter().collect();
        assert_eq!(contiguous_prefix(10, &done), 3);
        assert_eq!(contiguous_prefix(13, &done), 0);
        assert_eq!(contiguous_prefix(14, &done), 2);
    }

    proptest! {
        /// Property: strides are disjoint and cover the slice exactly.
        #[test]
        fn strides_cover_slice(len in 0usize..2000, workers in 1usize..64) {
            let mut seen = vec![0u8; len];
            for stride in partition(len, workers) {
                for pos in stride {
                    seen[pos] += 1;
                }
            }
            prop_assert!(seen.iter().all(|&n| n == 1));
        }

        /// Property: the worker count respects every bound.
        #[test]
        fn worker_count_is_bounded(
            slice in 0usize..5000,
            quota in proptest::option::of(1usize..64),
            hardware in 1usize..64,
        ) {
            let k = worker_count(slice, quota, hardware);
            prop_assert!(k <= slice);
            prop_assert!(k <= hardware);
            if let Some(q) = quota {
                prop_assert!(k <= q);
            }
            prop_assert_eq!(k == 0, slice == 0);
        }
    }
}

//! Property tests for the curve machinery.

use std::cmp::Ordering;

use proptest::prelude::*;

use crate::cell::Cell;
use crate::constants::MAX_DEPTH;
use crate::construct::complete_region;
use crate::sort::{
    local_sort, sfc_bucket, sfc_cmp, sfc_locate_buckets, sort_and_remove_ancestors, BucketPolicy,
};

fn build_cells<const D: usize>(raw: &[(u32, [u32; D])]) -> Vec<Cell<D>> {
    raw.iter()
        .map(|&(level, coords)| {
            let shift = MAX_DEPTH - level;
            let mut anchor = [0u32; D];
            for (axis, coord) in anchor.iter_mut().enumerate() {
                *coord = (coords[axis] % (1 << level)) << shift;
            }
            Cell::new(anchor, level).unwrap()
        })
        .collect()
}

fn normalised<const D: usize>(cells: &[Cell<D>]) -> Vec<([u32; D], u32)> {
    let mut v: Vec<_> = cells.iter().map(|c| (c.coords(), c.level())).collect();
    v.sort_unstable();
    v
}

proptest! {
    // The output of the local sort is curve-ordered and a permutation of
    // the input, for mixed levels.
    #[test]
    fn prop_local_sort_orders_and_permutes(
        raw in proptest::collection::vec((1u32..=6, any::<[u32; 2]>()), 1..200),
    ) {
        let cells = build_cells::<2>(&raw);
        let mut sorted = cells.clone();
        local_sort(&mut sorted);

        for window in sorted.windows(2) {
            prop_assert_ne!(sfc_cmp(&window[0], &window[1]), Ordering::Greater);
        }
        prop_assert_eq!(normalised(&cells), normalised(&sorted));
    }

    // The same in three dimensions.
    #[test]
    fn prop_local_sort_3d(
        raw in proptest::collection::vec((1u32..=4, any::<[u32; 3]>()), 1..150),
    ) {
        let cells = build_cells::<3>(&raw);
        let mut sorted = cells.clone();
        local_sort(&mut sorted);

        for window in sorted.windows(2) {
            prop_assert_ne!(sfc_cmp(&window[0], &window[1]), Ordering::Greater);
        }
        prop_assert_eq!(normalised(&cells), normalised(&sorted));
    }

    // Locating buckets on bucketed data reproduces the splitters of the
    // bucketing run.
    #[test]
    fn prop_bucket_locate_round_trip(
        raw in proptest::collection::vec((1u32..=5, any::<[u32; 2]>()), 1..150),
        level in 1u32..=3,
    ) {
        let mut cells = build_cells::<2>(&raw);
        let end = cells.len();
        let identity = |&c: &Cell<2>| c;

        let moved = sfc_bucket(
            &mut cells, 0, end, level, 0, BucketPolicy::ANCESTORS_FIRST, &identity,
        );
        let located = sfc_locate_buckets(
            &cells, 0, end, level, 0, BucketPolicy::ANCESTORS_FIRST, &identity,
        );

        prop_assert_eq!(moved, located);
    }

    // After ancestor removal no element covers any other.
    #[test]
    fn prop_no_ancestors_survive(
        raw in proptest::collection::vec((1u32..=5, any::<[u32; 2]>()), 1..100),
    ) {
        let mut cells = build_cells::<2>(&raw);
        sort_and_remove_ancestors(&mut cells);

        for (i, a) in cells.iter().enumerate() {
            for b in cells.iter().skip(i + 1) {
                prop_assert!(!a.is_ancestor(*b));
                prop_assert!(!b.is_ancestor(*a));
            }
        }
    }

    // The bridge between two cells is linear and strictly between them.
    #[test]
    fn prop_complete_region_is_between(
        raw in proptest::collection::vec((4u32..=5, any::<[u32; 2]>()), 2..3),
    ) {
        let cells = build_cells::<2>(&raw);
        let (mut a, mut b) = (cells[0], cells[1]);
        if sfc_cmp(&a, &b) == Ordering::Greater {
            std::mem::swap(&mut a, &mut b);
        }
        prop_assume!(sfc_cmp(&a, &b) == Ordering::Less);
        prop_assume!(!a.is_ancestor(b));

        let bridge = complete_region(&a, &b);

        let mut all = vec![a];
        all.extend(bridge);
        all.push(b);
        for window in all.windows(2) {
            prop_assert_eq!(sfc_cmp(&window[0], &window[1]), Ordering::Less);
            prop_assert!(!window[0].is_ancestor(window[1]));
        }
    }
}

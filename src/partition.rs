//! Distributed sorting and partitioning of cells along the curve.
//!
//! The partition never compares cells across ranks. After a local sort,
//! every rank walks the same breadth-first queue of curve intervals
//! (buckets); one all-reduce per round combines the per-child counts, and
//! the ideal partition boundaries settle on bucket edges as soon as the
//! tree structure allows. A single all-to-all exchange then moves every
//! cell to its owner.

use mpi::{collective::SystemOperation, traits::CommunicatorCollectives};

use crate::cell::Cell;
use crate::constants::MAX_DEPTH;
use crate::error::Result;
use crate::hilbert;
use crate::sort::{local_sort, sfc_bucket, sfc_locate_buckets, BucketPolicy};
use crate::tools::{global_size, redistribute};

// One interval of the global curve during breadth-first refinement.
//
// `global_begin` counts the cells of the whole distributed array that
// precede the bucket; the local range is the rank's slice of it.
#[derive(Copy, Clone, Debug)]
struct BucketInfo {
    rot: u32,
    level: u32,
    local_begin: usize,
    local_end: usize,
    global_begin: usize,
    global_count: usize,
    splittable: bool,
}

/// Replace `cells` on every rank with its share of the globally sorted
/// sequence.
///
/// `load_flex` in `[0, 1]` lets a partition boundary deviate from the even
/// split by up to `load_flex * N / P` cells in exchange for boundaries that
/// coincide with subtree edges. `max_level` bounds the refinement of the
/// boundary search.
///
/// The output is deterministic: identical inputs, rank counts and
/// dimension produce identical partitions.
pub fn dist_partition<const D: usize, C: CommunicatorCollectives>(
    cells: &mut Vec<Cell<D>>,
    load_flex: f64,
    max_level: u32,
    comm: &C,
) -> Result<()> {
    local_sort(cells);

    let size = comm.size() as usize;
    if size == 1 {
        return Ok(());
    }

    let total = global_size(cells, comm);
    if total == 0 {
        return Ok(());
    }

    let table = hilbert::table::<D>();
    let num_children = table.num_children();
    // Per split bucket: the ancestor bucket plus the children in curve order.
    let row = num_children + 1;

    let tolerance = (load_flex.clamp(0.0, 1.0) * total as f64 / size as f64) as usize;

    // Ideal boundary for rank r and the local cut indices once settled.
    let ideal = |r: usize| (r * total) / size;
    let mut cuts = vec![0usize; size + 1];
    cuts[size] = cells.len();

    let mut unsettled: Vec<usize> = (1..size).collect();
    let mut queue = vec![BucketInfo {
        rot: 0,
        level: 0,
        local_begin: 0,
        local_end: cells.len(),
        global_begin: 0,
        global_count: total,
        splittable: max_level > 0 && total > 1,
    }];

    while !unsettled.is_empty() {
        // Settle boundaries that already coincide with a bucket edge within
        // tolerance, or that sit in a bucket too fine to refine further.
        let mut remaining = Vec::new();
        let mut split_set: Vec<usize> = Vec::new();

        for &r in &unsettled {
            let w = ideal(r);
            let index = queue
                .partition_point(|bucket| bucket.global_begin + bucket.global_count < w);
            let bucket = &queue[index];

            let begin_dist = w - bucket.global_begin;
            let end_dist = bucket.global_begin + bucket.global_count - w;

            if begin_dist <= tolerance && begin_dist <= end_dist {
                cuts[r] = bucket.local_begin;
            } else if end_dist <= tolerance {
                cuts[r] = bucket.local_end;
            } else if !bucket.splittable {
                cuts[r] = if begin_dist <= end_dist {
                    bucket.local_begin
                } else {
                    bucket.local_end
                };
            } else {
                split_set.push(index);
                remaining.push(r);
            }
        }

        if remaining.is_empty() {
            break;
        }
        split_set.dedup();

        // Split the buckets that still contain a boundary. The local data
        // is fully sorted, so the sub-ranges are contiguous and a read-only
        // bucket location suffices.
        let mut local_counts = vec![0usize; split_set.len() * row];
        let mut located = Vec::with_capacity(split_set.len());

        for (k, &index) in split_set.iter().enumerate() {
            let bucket = &queue[index];
            let buckets = sfc_locate_buckets(
                cells,
                bucket.local_begin,
                bucket.local_end,
                bucket.level + 1,
                bucket.rot,
                BucketPolicy::ANCESTORS_FIRST,
                &|&cell: &Cell<D>| cell,
            );
            local_counts[k * row] = buckets.anc_end - buckets.anc_begin;
            for sfc in 0..num_children {
                let (begin, end) = buckets.child_range(sfc);
                local_counts[k * row + 1 + sfc] = end - begin;
            }
            located.push(buckets);
        }

        // The queue barrier: all ranks contribute their counts.
        let mut global_counts = vec![0usize; local_counts.len()];
        comm.all_reduce_into(&local_counts, &mut global_counts, SystemOperation::sum());

        let mut next_queue = Vec::with_capacity(split_set.len() * row);
        for (k, &index) in split_set.iter().enumerate() {
            let bucket = queue[index];
            let mut global_begin = bucket.global_begin;

            // The ancestor bucket comes first and cannot be refined.
            let anc_count = global_counts[k * row];
            next_queue.push(BucketInfo {
                rot: bucket.rot,
                level: bucket.level,
                local_begin: located[k].anc_begin,
                local_end: located[k].anc_end,
                global_begin,
                global_count: anc_count,
                splittable: false,
            });
            global_begin += anc_count;

            for sfc in 0..num_children {
                let count = global_counts[k * row + 1 + sfc];
                let (local_begin, local_end) = located[k].child_range(sfc);
                let morton = table.sfc_to_morton(bucket.rot, sfc);
                next_queue.push(BucketInfo {
                    rot: table.child_rot(bucket.rot, morton),
                    level: bucket.level + 1,
                    local_begin,
                    local_end,
                    global_begin,
                    global_count: count,
                    splittable: bucket.level + 1 < max_level && count > 1,
                });
                global_begin += count;
            }
        }

        queue = next_queue;
        unsettled = remaining;
    }

    // Derive the send counts from the settled cuts and exchange once.
    let counts: Vec<i32> = (0..size)
        .map(|r| (cuts[r + 1] - cuts[r]) as i32)
        .collect();

    *cells = redistribute(cells, &counts, comm);

    local_sort(cells);

    Ok(())
}

/// For every candidate cell, the partition block whose curve interval
/// contains it.
///
/// `splitters[r]` is the leading boundary of block `r`; block `r` covers
/// the curve interval up to `splitters[r + 1]`. The candidates are bucketed
/// in place; the returned block indices align with the reordered slice. A
/// candidate that precedes the first splitter reports block `-1`.
///
/// Candidates are assumed to sit at the deepest level, as produced for
/// ghost-map construction.
pub fn get_containing_blocks<const D: usize>(
    points: &mut [Cell<D>],
    splitters: &[Cell<D>],
) -> Vec<i32> {
    let mut out = vec![0i32; points.len()];
    let mut passed = 0i32;
    let len = points.len();
    containing_blocks_recursive(
        points,
        0,
        len,
        splitters,
        0,
        splitters.len(),
        1,
        0,
        &mut passed,
        &mut out,
    );
    out
}

#[allow(clippy::too_many_arguments)]
fn containing_blocks_recursive<const D: usize>(
    points: &mut [Cell<D>],
    points_begin: usize,
    points_end: usize,
    splitters: &[Cell<D>],
    splitters_begin: usize,
    splitters_end: usize,
    level: u32,
    rot: u32,
    passed: &mut i32,
    out: &mut [i32],
) {
    // No splitter boundary in this interval: everything belongs to the
    // block that is currently open.
    if splitters_begin == splitters_end {
        for entry in &mut out[points_begin..points_end] {
            *entry = *passed - 1;
        }
        return;
    }

    // No candidates here: the splitters are passed without assigning.
    if points_begin == points_end {
        *passed += (splitters_end - splitters_begin) as i32;
        return;
    }

    // At the bottom every remaining splitter coincides with this node.
    if level > MAX_DEPTH {
        *passed += (splitters_end - splitters_begin) as i32;
        for entry in &mut out[points_begin..points_end] {
            *entry = *passed - 1;
        }
        return;
    }

    let table = hilbert::table::<D>();
    let identity = |&cell: &Cell<D>| cell;

    let splitter_buckets = sfc_locate_buckets(
        splitters,
        splitters_begin,
        splitters_end,
        level,
        rot,
        BucketPolicy::ANCESTORS_FIRST,
        &identity,
    );
    let point_buckets = sfc_bucket(
        points,
        points_begin,
        points_end,
        level,
        rot,
        BucketPolicy::ANCESTORS_FIRST,
        &identity,
    );

    // Splitters coarser than this level open their blocks at the front of
    // the node, ahead of any candidate inside it.
    *passed += (splitter_buckets.anc_end - splitter_buckets.anc_begin) as i32;
    for entry in &mut out[point_buckets.anc_begin..point_buckets.anc_end] {
        *entry = *passed - 1;
    }

    for sfc in 0..table.num_children() {
        let (pb, pe) = point_buckets.child_range(sfc);
        let (sb, se) = splitter_buckets.child_range(sfc);
        if se > sb {
            let morton = table.sfc_to_morton(rot, sfc);
            containing_blocks_recursive(
                points,
                pb,
                pe,
                splitters,
                sb,
                se,
                level + 1,
                table.child_rot(rot, morton),
                passed,
                out,
            );
        } else {
            for entry in &mut out[pb..pe] {
                *entry = *passed - 1;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sort::{local_sort as sort_cells, sfc_cmp};
    use crate::tools::{generate_random_cells, seeded_rng};
    use std::cmp::Ordering;

    #[test]
    fn test_containing_blocks_against_linear_scan() {
        let mut rng = seeded_rng(7);

        // A sorted population provides splitters; fresh candidates are
        // classified against them.
        let mut population = generate_random_cells::<2, _>(200, 6, &mut rng);
        sort_cells(&mut population);
        population.dedup();
        assert!(population.len() > 120);

        let splitters = vec![population[10], population[60], population[120]];

        let mut points = generate_random_cells::<2, _>(10, 6, &mut rng);
        let blocks = get_containing_blocks(&mut points, &splitters);

        for (point, &block) in points.iter().zip(blocks.iter()) {
            // Reference: the number of splitters at or before the point.
            let expected = splitters
                .iter()
                .filter(|s| sfc_cmp(s, point) != Ordering::Greater)
                .count() as i32
                - 1;
            assert_eq!(block, expected, "wrong block for {}", point);
        }
    }

    #[test]
    fn test_containing_blocks_no_false_positives() {
        // A candidate before the first splitter belongs to no block.
        let splitters = vec![
            Cell::<2>::root().child(1).child(0),
            Cell::<2>::root().child(3).child(0),
        ];
        let mut points = vec![Cell::<2>::root().child(0).child(0)];
        let blocks = get_containing_blocks(&mut points, &splitters);
        assert_eq!(blocks, vec![-1]);
    }

    #[test]
    fn test_containing_blocks_splitter_is_inclusive() {
        // A candidate equal to a splitter opens that block.
        let splitter = Cell::<3>::root().child(2).child(5);
        let splitters = vec![Cell::<3>::root().child(0), splitter];
        let mut points = vec![splitter];
        let blocks = get_containing_blocks(&mut points, &splitters);
        assert_eq!(blocks, vec![1]);
    }
}

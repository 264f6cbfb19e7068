//! Adaptive construction of minimal covering trees.
//!
//! Construction turns a distributed bag of fine cells into a complete,
//! sorted, partitioned tree in which no leaf holds more than a requested
//! number of input cells. The local phase is the same curve bucketing as
//! the sort, driven by a capacity rule; gaps and the domain corners are
//! closed afterwards with the coarsest cells that bridge them.

use itertools::Itertools;
use mpi::traits::CommunicatorCollectives;

use crate::cell::Cell;
use crate::constants::{MAX_DEPTH, MAX_DIM};
use crate::error::{Error, Result};
use crate::hilbert;
use crate::partition::dist_partition;
use crate::sort::{
    local_sort, sfc_bucket, sfc_less, sort_and_remove_ancestors, BucketPolicy,
};
use crate::tools::{communicate_back, gather_to_all};

/// The orientation index of the subtree rooted at `node`, accumulated from
/// the root.
pub(crate) fn node_rot<const D: usize>(node: &Cell<D>) -> u32 {
    let table = hilbert::table::<D>();
    let mut rot = 0;
    for level in 1..=node.level() {
        rot = table.child_rot(rot, node.child_index(level));
    }
    rot
}

// The deepest descendant of `node` that the curve visits first/last.
fn curve_end_descendant<const D: usize>(node: &Cell<D>, last: bool) -> Cell<D> {
    let table = hilbert::table::<D>();
    let sfc = if last { table.num_children() - 1 } else { 0 };
    let mut rot = node_rot(node);
    let mut cell = *node;
    while cell.level() < MAX_DEPTH {
        let morton = table.sfc_to_morton(rot, sfc);
        cell = cell.child(morton);
        rot = table.child_rot(rot, morton);
    }
    cell
}

/// The finest cell that is an ancestor of both inputs.
pub fn finest_common_ancestor<const D: usize>(a: &Cell<D>, b: &Cell<D>) -> Cell<D> {
    let mut level = a.level().min(b.level());
    for axis in 0..D {
        let diff = a.coord(axis) ^ b.coord(axis);
        if diff != 0 {
            level = level.min(diff.leading_zeros().saturating_sub(32 - MAX_DEPTH));
        }
    }
    a.ancestor_at_level(level)
}

/// The coarsest cells that bridge the curve interval strictly between `a`
/// and `b` without overlapping either, in curve order.
pub fn complete_region<const D: usize>(a: &Cell<D>, b: &Cell<D>) -> Vec<Cell<D>> {
    let ancestor = finest_common_ancestor(a, b);

    let mut bridge = Vec::new();
    let mut work = ancestor.children();

    while let Some(current) = work.pop() {
        if current.is_ancestor(*a) || current.is_ancestor(*b) {
            if current.level() < MAX_DEPTH {
                work.extend(current.children());
            }
        } else if sfc_less(a, &current) && sfc_less(&current, b) {
            bridge.push(current);
        }
    }

    local_sort(&mut bridge);
    bridge
}

/// Capacity-driven construction of the subtree under `node` covering
/// `points[begin..end]`.
///
/// Leaves are appended to `tree` in curve order. A subtree is emitted as a
/// leaf once it holds at most `max_pts_per_region` points or reaches
/// `max_level`; cells coarser than the bucketing level fall into the child
/// holding their anchor, so coincident coarse cells are absorbed into that
/// leaf's weight. Subtrees without points are skipped; the cover is closed
/// later by completion.
#[allow(clippy::too_many_arguments)]
pub fn local_construction<const D: usize>(
    points: &mut [Cell<D>],
    tree: &mut Vec<Cell<D>>,
    max_pts_per_region: usize,
    begin: usize,
    end: usize,
    node: Cell<D>,
    rot: u32,
    max_level: u32,
) {
    if end == begin {
        return;
    }
    if end - begin <= max_pts_per_region || node.level() == max_level {
        tree.push(node);
        return;
    }

    let table = hilbert::table::<D>();
    let level = node.level() + 1;
    let buckets = sfc_bucket(
        points,
        begin,
        end,
        level,
        rot,
        BucketPolicy::MERGE_ANCESTORS,
        &|&cell: &Cell<D>| cell,
    );

    for sfc in 0..table.num_children() {
        let (child_begin, child_end) = buckets.child_range(sfc);
        if child_end > child_begin {
            let morton = table.sfc_to_morton(rot, sfc);
            local_construction(
                points,
                tree,
                max_pts_per_region,
                child_begin,
                child_end,
                node.child(morton),
                table.child_rot(rot, morton),
                max_level,
            );
        }
    }
}

/// Complete a sorted, ancestor-free local list of cells over the whole
/// domain: close the corners towards the first and last cell the curve
/// visits and bridge every interior gap.
pub fn complete_cells<const D: usize>(cells: &mut Vec<Cell<D>>) {
    if cells.is_empty() {
        cells.push(Cell::root());
        return;
    }

    let root = Cell::root();
    let table = hilbert::table::<D>();

    let first = cells[0];
    let curve_first = curve_end_descendant(&root, false);
    if !first.is_ancestor(curve_first) {
        let ancestor = finest_common_ancestor(&curve_first, &first);
        let morton = table.sfc_to_morton(node_rot(&ancestor), 0);
        cells.insert(0, ancestor.child(morton));
    }

    let last = *cells.last().unwrap();
    let curve_last = curve_end_descendant(&root, true);
    if !last.is_ancestor(curve_last) {
        let ancestor = finest_common_ancestor(&last, &curve_last);
        let morton = table.sfc_to_morton(node_rot(&ancestor), table.num_children() - 1);
        cells.push(ancestor.child(morton));
    }

    let mut result = Vec::with_capacity(cells.len());
    for (a, b) in cells.iter().tuple_windows() {
        result.push(*a);
        result.extend(complete_region(a, b));
    }
    result.push(*cells.last().unwrap());

    *cells = result;
}

/// Remove duplicate coverage across rank boundaries.
///
/// The local list must be sorted and ancestor-free; the global sequence of
/// rank intervals must be in curve order, as after [dist_partition].
pub fn dist_remove_ancestors<const D: usize, C: CommunicatorCollectives>(
    cells: &mut Vec<Cell<D>>,
    comm: &C,
) {
    if comm.size() == 1 {
        return;
    }
    if let Some(next) = communicate_back(cells, comm) {
        while cells.last().is_some_and(|last| last.is_ancestor(next)) {
            cells.pop();
        }
    }
}

/// Given a distributed sorted, ancestor-free list of cells, complete the
/// tree so that the union over all ranks covers the domain exactly.
pub fn dist_complete_cells<const D: usize, C: CommunicatorCollectives>(
    cells: &mut Vec<Cell<D>>,
    comm: &C,
) {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;

    if size == 1 {
        complete_cells(cells);
        return;
    }

    // Empty ranks stay empty; the first and last ranks that hold cells
    // close the domain corners.
    let local_len = cells.len() as i32;
    let counts = gather_to_all(std::slice::from_ref(&local_len), comm);

    let first_occupied = counts.iter().position(|&c| c > 0);
    let last_occupied = counts.iter().rposition(|&c| c > 0);

    let (Some(first_occupied), Some(last_occupied)) = (first_occupied, last_occupied) else {
        // Globally empty input; the root covers everything.
        if rank == 0 {
            cells.push(Cell::root());
        }
        return;
    };

    let next = communicate_back(cells, comm);

    let mut extended = cells.clone();
    if let Some(next) = next {
        extended.push(next);
    }

    let root = Cell::root();
    let table = hilbert::table::<D>();

    if rank == first_occupied {
        let first = extended[0];
        let curve_first = curve_end_descendant(&root, false);
        if !first.is_ancestor(curve_first) {
            let ancestor = finest_common_ancestor(&curve_first, &first);
            let morton = table.sfc_to_morton(node_rot(&ancestor), 0);
            extended.insert(0, ancestor.child(morton));
        }
    }

    if rank == last_occupied {
        let last = *extended.last().unwrap();
        let curve_last = curve_end_descendant(&root, true);
        if !last.is_ancestor(curve_last) {
            let ancestor = finest_common_ancestor(&last, &curve_last);
            let morton = table.sfc_to_morton(node_rot(&ancestor), table.num_children() - 1);
            extended.push(ancestor.child(morton));
        }
    }

    let mut result = Vec::with_capacity(extended.len());
    for (a, b) in extended.iter().tuple_windows() {
        result.push(*a);
        result.extend(complete_region(a, b));
    }
    // Interior ranks bridged towards the next rank's first cell, which is
    // not ours to keep.
    if rank == last_occupied {
        result.push(*extended.last().unwrap());
    }

    *cells = result;
}

/// Build the distributed minimal covering tree of a distributed bag of
/// cells.
///
/// Every input cell is covered, no leaf holds more than
/// `max_pts_per_region` of them, and the union of all ranks' leaves is the
/// complete domain in curve order. `points` is consumed into partition
/// order as a side effect.
pub fn dist_construction<const D: usize, C: CommunicatorCollectives>(
    points: &mut Vec<Cell<D>>,
    max_pts_per_region: usize,
    load_flex: f64,
    max_level: u32,
    comm: &C,
) -> Result<Vec<Cell<D>>> {
    if D > MAX_DIM {
        return Err(Error::DimensionUnsupported(D));
    }

    // Make sure the refinement never exceeds the representable depth.
    let max_level = max_level.min(MAX_DEPTH);

    dist_partition(points, load_flex, max_level, comm)?;

    let mut tree = Vec::new();
    let end = points.len();
    local_construction(
        points,
        &mut tree,
        max_pts_per_region,
        0,
        end,
        Cell::root(),
        0,
        max_level,
    );

    // Coarse leaves near a partition boundary can cover other ranks'
    // regions as well. The global re-sort brings every ancestor next to
    // its descendants, then the finer coverage wins.
    dist_partition(&mut tree, load_flex, max_level, comm)?;
    sort_and_remove_ancestors(&mut tree);
    dist_remove_ancestors(&mut tree, comm);
    dist_complete_cells(&mut tree, comm);

    // Completion changed the weights; rebalance once more.
    dist_partition(&mut tree, load_flex, max_level, comm)?;

    Ok(tree)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::DOMAIN_SIZE;
    use crate::sort::sfc_cmp;
    use crate::tools::{generate_random_cells, seeded_rng};
    use std::cmp::Ordering;

    fn total_volume<const D: usize>(cells: &[Cell<D>]) -> u128 {
        cells
            .iter()
            .map(|cell| (cell.side() as u128).pow(D as u32))
            .sum()
    }

    fn domain_volume<const D: usize>() -> u128 {
        (DOMAIN_SIZE as u128).pow(D as u32)
    }

    fn assert_linear<const D: usize>(cells: &[Cell<D>]) {
        for window in cells.windows(2) {
            assert_eq!(sfc_cmp(&window[0], &window[1]), Ordering::Less);
            assert!(!window[0].is_ancestor(window[1]));
        }
    }

    #[test]
    fn test_finest_common_ancestor() {
        let a = Cell::<2>::root().child(0).child(3).child(1);
        let b = Cell::<2>::root().child(0).child(2);
        let fca = finest_common_ancestor(&a, &b);
        assert_eq!(fca, Cell::root().child(0));

        let c = Cell::<2>::root().child(3);
        assert_eq!(finest_common_ancestor(&a, &c), Cell::root());

        // The ancestor of an ancestor pair is the coarser cell itself.
        assert_eq!(finest_common_ancestor(&a, &a.parent()), a.parent());
    }

    #[test]
    fn test_complete_region_bridges_exactly() {
        let root = Cell::<2>::root();
        let a = curve_end_descendant(&root, false).ancestor_at_level(4);
        let b = curve_end_descendant(&root, true).ancestor_at_level(3);

        let bridge = complete_region(&a, &b);

        let mut all = vec![a];
        all.extend(bridge);
        all.push(b);
        assert_linear(&all);
        assert_eq!(total_volume(&all), domain_volume::<2>());
    }

    #[test]
    fn test_complete_cells_covers_domain() {
        let mut rng = seeded_rng(11);
        let mut cells = generate_random_cells::<2, _>(40, 5, &mut rng);
        sort_and_remove_ancestors(&mut cells);

        complete_cells(&mut cells);

        assert_linear(&cells);
        assert_eq!(total_volume(&cells), domain_volume::<2>());
    }

    #[test]
    fn test_complete_cells_of_nothing_is_root() {
        let mut cells: Vec<Cell<3>> = Vec::new();
        complete_cells(&mut cells);
        assert_eq!(cells, vec![Cell::root()]);
    }

    #[test]
    fn test_construction_respects_capacity() {
        let mut rng = seeded_rng(13);
        let mut points = generate_random_cells::<2, _>(100, 4, &mut rng);
        local_sort(&mut points);

        let mut tree = Vec::new();
        let end = points.len();
        local_construction(&mut points, &mut tree, 4, 0, end, Cell::root(), 0, 4);

        assert_linear(&tree);

        // Every leaf holds at most four points, every point is covered.
        let mut covered = 0;
        for leaf in &tree {
            let weight = points.iter().filter(|p| leaf.is_ancestor(**p)).count();
            assert!(weight <= 4 || leaf.level() == 4);
            covered += weight;
        }
        assert_eq!(covered, points.len());

        // Completion turns the covering into an exact partition of the
        // domain.
        complete_cells(&mut tree);
        assert_linear(&tree);
        assert_eq!(total_volume(&tree), domain_volume::<2>());
    }

    #[test]
    fn test_construction_absorbs_coincident_ancestors() {
        // A coarse cell coincident with an internal node lands in the leaf
        // holding its anchor rather than its own bucket.
        let fine = Cell::<2>::root().child(0).child(0);
        let mut points = vec![Cell::<2>::root().child(0); 3];
        points.extend(vec![fine; 3]);
        local_sort(&mut points);

        let mut tree = Vec::new();
        let end = points.len();
        local_construction(&mut points, &mut tree, 4, 0, end, Cell::root(), 0, 5);

        // All six points sit on the path through child 0; the capacity rule
        // must have refined below level 1.
        assert!(tree.iter().all(|leaf| leaf.level() >= 1));

        // Every point is accounted for by the leaf holding its anchor; the
        // coarse points count towards the leaf on their anchor path.
        let covered: usize = tree
            .iter()
            .map(|leaf| {
                points
                    .iter()
                    .filter(|p| leaf.is_ancestor(**p) || p.is_ancestor(*leaf))
                    .count()
            })
            .sum();
        assert_eq!(covered, points.len());
    }
}

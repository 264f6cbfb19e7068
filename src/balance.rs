//! 2:1 balance refinement of complete linear trees.
//!
//! After balancing, any two leaves that share a face differ by at most one
//! refinement level. Balancing only ever refines: auxiliary seed cells are
//! propagated bottom-up from the fine leaves, merged into the tree with the
//! finer coverage winning, and the resulting gaps are closed with the
//! coarsest bridging cells.

use std::collections::HashSet;

use mpi::traits::CommunicatorCollectives;

use crate::cell::Cell;
use crate::construct::{complete_cells, dist_complete_cells, dist_remove_ancestors};
use crate::error::Result;
use crate::partition::dist_partition;
use crate::sort::sort_and_remove_ancestors;
use crate::tools::global_size;

/// Auxiliary seeds that enforce the 2:1 constraint around every leaf.
///
/// Bottom-up over the levels, each leaf contributes the `2 * D` cells one
/// level coarser than itself across its faces, clipped to the domain.
/// Fresh seeds take part in the coarser rounds so the constraint ripples
/// all the way up.
pub fn propagate_neighbours<const D: usize>(tree: &[Cell<D>]) -> Vec<Cell<D>> {
    let deepest = tree.iter().map(|cell| cell.level()).max().unwrap_or(0);
    if deepest < 2 {
        return Vec::new();
    }

    let mut aux = Vec::new();
    let mut seen = HashSet::new();

    let mut work: Vec<Cell<D>> = tree
        .iter()
        .copied()
        .filter(|cell| cell.level() == deepest)
        .collect();

    for level in (2..=deepest).rev() {
        let mut next_work = Vec::new();

        for cell in &work {
            for axis in 0..D {
                for positive in [false, true] {
                    if let Some(neighbour) = cell.coarse_face_neighbour(axis, positive, level - 1)
                    {
                        if seen.insert(neighbour) {
                            next_work.push(neighbour);
                            aux.push(neighbour);
                        }
                    }
                }
            }
        }

        next_work.extend(
            tree.iter()
                .copied()
                .filter(|cell| cell.level() == level - 1),
        );

        work = next_work;
    }

    aux
}

/// Balance a sorted, complete local tree in place.
pub fn local_balancing<const D: usize>(tree: &mut Vec<Cell<D>>) {
    let aux = propagate_neighbours(tree);
    tree.extend(aux);
    sort_and_remove_ancestors(tree);
    complete_cells(tree);
}

/// Balance a distributed complete linear tree and restore the load
/// balance.
///
/// Rounds of propagate, merge and complete run until no rank refines the
/// tree any further; since balancing only refines, a round that leaves the
/// global leaf count unchanged is the last one. The number of rounds is
/// bounded by the deepest level.
pub fn dist_balancing<const D: usize, C: CommunicatorCollectives>(
    tree: &mut Vec<Cell<D>>,
    load_flex: f64,
    max_level: u32,
    comm: &C,
) -> Result<()> {
    let mut rounds = 0;

    loop {
        let count_before = global_size(tree, comm);

        let aux = propagate_neighbours(tree);
        tree.extend(aux);
        sort_and_remove_ancestors(tree);
        dist_partition(tree, load_flex, max_level, comm)?;
        // Seeds that migrated sit next to the coverage they refine only
        // after the global re-sort.
        sort_and_remove_ancestors(tree);
        dist_remove_ancestors(tree, comm);
        dist_complete_cells(tree, comm);

        let count_after = global_size(tree, comm);

        rounds += 1;
        if count_after == count_before || rounds > max_level {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::{DOMAIN_SIZE, MAX_DEPTH};
    use crate::sort::sfc_cmp;
    use std::cmp::Ordering;

    // Refine every cell whose closed extent contains the centre point of
    // the domain, down to `max_level`. The result is a steep level cascade
    // towards the centre.
    fn centre_refined_tree<const D: usize>(max_level: u32) -> Vec<Cell<D>> {
        let centre = [(DOMAIN_SIZE / 2) as i64; D];

        let mut leaves = Vec::new();
        let mut work = vec![Cell::<D>::root()];
        while let Some(cell) = work.pop() {
            let contains_centre = centre
                .iter()
                .enumerate()
                .all(|(axis, &c)| cell.min(axis) as i64 <= c && c < cell.max(axis) as i64);
            if contains_centre && cell.level() < max_level {
                work.extend(cell.children());
            } else {
                leaves.push(cell);
            }
        }
        leaves
    }

    fn assert_two_to_one<const D: usize>(tree: &[Cell<D>]) {
        for (i, a) in tree.iter().enumerate() {
            for b in tree.iter().skip(i + 1) {
                if a.shares_face(*b) {
                    assert!(
                        a.level().abs_diff(b.level()) <= 1,
                        "{} and {} violate the balance constraint",
                        a,
                        b
                    );
                }
            }
        }
    }

    fn assert_complete_linear<const D: usize>(tree: &[Cell<D>]) {
        for window in tree.windows(2) {
            assert_eq!(sfc_cmp(&window[0], &window[1]), Ordering::Less);
            assert!(!window[0].is_ancestor(window[1]));
        }
        let volume: u128 = tree
            .iter()
            .map(|cell| (cell.side() as u128).pow(D as u32))
            .sum();
        assert_eq!(volume, (DOMAIN_SIZE as u128).pow(D as u32));
    }

    #[test]
    fn test_centre_tree_shape() {
        // One cell per level carries the centre until the last level splits
        // into a full set of children.
        let tree = centre_refined_tree::<3>(5);
        assert_eq!(tree.len(), (5 - 1) * (8 - 1) + 8);

        let mut sorted = tree.clone();
        sort_and_remove_ancestors(&mut sorted);
        assert_complete_linear(&sorted);
    }

    #[test]
    fn test_balancing_restores_invariant() {
        let mut tree = centre_refined_tree::<3>(5);
        sort_and_remove_ancestors(&mut tree);

        // The cascade towards the centre violates 2:1 before balancing.
        local_balancing(&mut tree);

        assert_complete_linear(&tree);
        assert_two_to_one(&tree);
    }

    #[test]
    fn test_balancing_is_idempotent() {
        let mut tree = centre_refined_tree::<2>(6);
        sort_and_remove_ancestors(&mut tree);

        local_balancing(&mut tree);
        let once = tree.clone();
        local_balancing(&mut tree);

        assert_eq!(once, tree);
    }

    #[test]
    fn test_balanced_input_is_untouched() {
        // A uniform grid is already balanced.
        let mut tree = vec![Cell::<2>::root()];
        for _ in 0..3 {
            tree = tree.iter().flat_map(|cell| cell.children()).collect();
        }
        sort_and_remove_ancestors(&mut tree);
        let before = tree.clone();

        local_balancing(&mut tree);

        assert_eq!(before, tree);
    }

    #[test]
    fn test_balancing_in_two_dimensions() {
        let mut tree = centre_refined_tree::<2>(MAX_DEPTH.min(6));
        sort_and_remove_ancestors(&mut tree);

        local_balancing(&mut tree);

        assert_complete_linear(&tree);
        assert_two_to_one(&tree);
    }

    #[test]
    fn test_propagate_emits_no_seed_on_coarse_trees() {
        // A tree whose leaves are all at levels 0 or 1 cannot violate 2:1.
        let tree = Cell::<3>::root().children();
        assert!(propagate_neighbours(&tree).is_empty());
    }
}

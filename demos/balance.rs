//! Test distributed 2:1 balance refinement.

use hyperoctree::balance::dist_balancing;
use hyperoctree::cell::Cell;
use hyperoctree::constants::DOMAIN_SIZE;
use hyperoctree::sort::sfc_cmp;
use hyperoctree::tools::gather_to_root;
use itertools::Itertools;
use mpi::traits::Communicator;
use std::cmp::Ordering;

// Refine every cell whose half-open extent contains the domain centre.
// The result is a steep cascade that violates the 2:1 constraint.
fn centre_refined_tree(max_level: u32) -> Vec<Cell<3>> {
    let centre = [(DOMAIN_SIZE / 2) as i64; 3];

    let mut leaves = Vec::new();
    let mut work = vec![Cell::<3>::root()];
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

pub fn main() {
    // Initialise MPI
    let universe = mpi::initialize().unwrap();

    // Get the world communicator
    let comm = universe.world();
    let rank = comm.rank();

    let max_level = 5;

    // Rank 0 seeds the unbalanced tree; the partition spreads it out.
    let mut tree = if rank == 0 {
        centre_refined_tree(max_level)
    } else {
        Vec::new()
    };

    dist_balancing(&mut tree, 0.0, max_level, &comm).unwrap();
    let balanced = tree.clone();

    // Balancing again must not change anything.
    dist_balancing(&mut tree, 0.0, max_level, &comm).unwrap();
    assert_eq!(balanced, tree);

    if let Some(all) = gather_to_root(&tree, &comm) {
        // Complete and linear.
        for (a, b) in all.iter().tuple_windows() {
            assert_eq!(sfc_cmp(a, b), Ordering::Less);
            assert!(!a.is_ancestor(*b));
        }
        let volume: u128 = all.iter().map(|c| (c.side() as u128).pow(3)).sum();
        assert_eq!(volume, (DOMAIN_SIZE as u128).pow(3));

        // No pair of face-adjacent leaves differs by more than one level.
        for (i, a) in all.iter().enumerate() {
            for b in all.iter().skip(i + 1) {
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

        println!("balance verified over {} leaves.", all.len());
    }
}

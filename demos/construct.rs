//! Test the distributed construction of a minimal covering tree.

use hyperoctree::constants::DOMAIN_SIZE;
use hyperoctree::construct::dist_construction;
use hyperoctree::sort::sfc_cmp;
use hyperoctree::tools::{gather_to_root, generate_random_cells, seeded_rng};
use itertools::Itertools;
use mpi::traits::Communicator;
use std::cmp::Ordering;

pub fn main() {
    // Initialise MPI
    let universe = mpi::initialize().unwrap();

    // Get the world communicator
    let comm = universe.world();
    let rank = comm.rank();

    // Initialise a seeded Rng.
    let mut rng = seeded_rng(rank as u64);

    let ncells = 100;
    let max_level = 4;
    let max_pts_per_region = 4;

    let mut points = generate_random_cells::<2, _>(ncells, max_level, &mut rng);
    let original_points = points.clone();

    let tree =
        dist_construction(&mut points, max_pts_per_region, 0.3, max_level, &comm).unwrap();

    // Collect everything on root and verify the construction contract.
    let all_points = gather_to_root(&original_points, &comm);
    let all_leaves = gather_to_root(&tree, &comm);

    if rank == 0 {
        let all_points = all_points.unwrap();
        let all_leaves = all_leaves.unwrap();

        // Globally sorted, no duplicated coverage.
        for (a, b) in all_leaves.iter().tuple_windows() {
            assert_eq!(sfc_cmp(a, b), Ordering::Less);
            assert!(!a.is_ancestor(*b));
        }

        // The leaves cover the domain exactly.
        let volume: u128 = all_leaves
            .iter()
            .map(|cell| (cell.side() as u128).pow(2))
            .sum();
        assert_eq!(volume, (DOMAIN_SIZE as u128).pow(2));

        // Every leaf holds at most `max_pts_per_region` input cells unless
        // the depth limit cut the refinement short.
        for leaf in &all_leaves {
            let weight = all_points.iter().filter(|p| leaf.is_ancestor(**p)).count();
            assert!(
                weight <= max_pts_per_region || leaf.level() == max_level,
                "leaf {} holds {} points",
                leaf,
                weight
            );
        }

        // Every input cell is covered by exactly one leaf.
        for point in &all_points {
            let covering = all_leaves.iter().filter(|l| l.is_ancestor(*point)).count();
            assert_eq!(covering, 1);
        }

        println!(
            "construction verified: {} leaves cover {} points.",
            all_leaves.len(),
            all_points.len()
        );
    }
}

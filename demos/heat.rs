//! Heat equation driver: builds the distributed grid hierarchy the solver
//! layer runs on.
//!
//! Usage: heat maxDepth wavelet_tol partition_tol eleOrder
//!
//! The grid is refined where the source term has structure, balanced 2:1
//! and stacked into a multigrid hierarchy. The nodal discretisation and
//! the time stepping live in the solver layer; this driver verifies and
//! reports the grid pipeline.

use hyperoctree::balance::dist_balancing;
use hyperoctree::cell::Cell;
use hyperoctree::constants::{DOMAIN_SIZE, MAX_DEPTH};
use hyperoctree::construct::dist_construction;
use hyperoctree::dist_tree::{DistTree, GridCoarsening};
use hyperoctree::tools::{global_size, seeded_rng};
use mpi::traits::Communicator;
use rand::Rng;

const DIM: usize = 3;
const SAMPLES_PER_RANK: usize = 20000;
const MAX_PTS_PER_REGION: usize = 100;

// Source term of the model problem on the unit cube, shifted to the
// physical domain [-0.5, 0.5]^3.
fn f_rhs(x: [f64; DIM]) -> f64 {
    let pi = std::f64::consts::PI;
    -12.0
        * pi
        * pi
        * x.iter()
            .map(|&c| (2.0 * pi * (c - 0.5)).sin())
            .product::<f64>()
}

fn usage(program: &str) {
    eprintln!("Usage: {} maxDepth wavelet_tol partition_tol eleOrder", program);
}

pub fn main() {
    let universe = mpi::initialize().unwrap();
    let comm = universe.world();
    let rank = comm.rank();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 5 {
        if rank == 0 {
            usage(&args[0]);
        }
        std::process::exit(1);
    }

    let (max_depth, wavelet_tol, partition_tol, ele_order) = match (
        args[1].parse::<u32>(),
        args[2].parse::<f64>(),
        args[3].parse::<f64>(),
        args[4].parse::<u32>(),
    ) {
        (Ok(d), Ok(w), Ok(p), Ok(e)) if (1..=MAX_DEPTH).contains(&d) => (d, w, p, e),
        _ => {
            if rank == 0 {
                usage(&args[0]);
            }
            std::process::exit(1);
        }
    };

    if rank == 0 {
        println!("maxDepth: {}", max_depth);
        println!("wavelet_tol: {}", wavelet_tol);
        println!("partition_tol: {}", partition_tol);
        println!("eleOrder: {}", ele_order);
    }

    // Sample the source term: candidate points survive where the source
    // has amplitude above the tolerance, so the tree refines there.
    let mut rng = seeded_rng(rank as u64);
    let mut points: Vec<Cell<DIM>> = Vec::new();
    for _ in 0..100 * SAMPLES_PER_RANK {
        if points.len() >= SAMPLES_PER_RANK {
            break;
        }
        let x = [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()];
        let amplitude = (f_rhs(x) / (12.0 * std::f64::consts::PI.powi(2))).abs();
        if amplitude < wavelet_tol || rng.gen::<f64>() > amplitude {
            continue;
        }
        let lattice = x.map(|c| (c * DOMAIN_SIZE as f64) as i64);
        if let Some(cell) = Cell::containing(lattice, max_depth) {
            points.push(cell);
        }
    }

    let pipeline = (|| -> hyperoctree::Result<DistTree<DIM>> {
        let mut tree = dist_construction(
            &mut points,
            MAX_PTS_PER_REGION,
            partition_tol,
            max_depth,
            &comm,
        )?;
        dist_balancing(&mut tree, partition_tol, max_depth, &comm)?;

        let mut dist_tree = DistTree::new(&mut tree);
        dist_tree.generate_grid_hierarchy(GridCoarsening::UntilLevel(1), partition_tol, &comm)?;
        Ok(dist_tree)
    })();

    let dist_tree = match pipeline {
        Ok(tree) => tree,
        Err(err) => {
            eprintln!("rank {}: {}", rank, err);
            std::process::exit(2);
        }
    };

    for stratum in 0..dist_tree.num_strata() {
        let leaves = global_size(dist_tree.stratum(stratum), &comm);
        let surrogate = global_size(dist_tree.surrogate(stratum), &comm);
        if rank == 0 {
            println!(
                "stratum {}: {} leaves ({} surrogate)",
                stratum, leaves, surrogate
            );
        }
    }

    if rank == 0 {
        println!("grid hierarchy ready.");
    }
}

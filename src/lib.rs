//! A distributed k-dimensional adaptive octree library.
//!
//! This library provides the cell keys, the comparison-free space-filling
//! curve machinery and the distributed algorithms on which nodal
//! discretisations and geometric multigrid cycles on `2^d`-ary trees are
//! built. Trees in two, three and four dimensions are ordered along
//! harmonious Hilbert curves; the rotation tables of the curve are
//! generated per dimension on first use.
//!
//! The building blocks, from the bottom up:
//!
//! * [Cell](crate::cell::Cell) - a bit-encoded anchor/level pair indexing
//!   one axis-aligned cube of the refined unit hypercube.
//! * [hilbert](crate::hilbert) - Haverkort's refinement operator for
//!   harmonious Hilbert curves and the `(orientation, child)` rotation
//!   tables.
//! * [sort](crate::sort) - in-place bucketing of cells by curve position
//!   and the recursive local sort, parameterised by a key function.
//! * [partition](crate::partition) - the breadth-first distributed
//!   partition with a single all-to-all exchange, and the block classifier
//!   used for ghost maps.
//! * [construct](crate::construct) and [balance](crate::balance) -
//!   capacity-driven construction of minimal covering trees and 2:1
//!   balance refinement.
//! * [DistTree](crate::dist_tree::DistTree) - a rank's share of a
//!   partitioned complete tree, with domain filtering and a grid-hierarchy
//!   generator for multigrid.
//!
//! Distribution is across MPI ranks; each rank is single-threaded and all
//! communication happens in collectives, so a fixed sequence of calls is
//! made on every rank. Runs are deterministic: identical inputs, rank
//! count and dimension produce bit-identical partitions.
//!
//! ## Using the library
//!
//! A distributed tree is built from a bag of cells by partitioning,
//! construction and balancing:
//!
//! ```no_run
//! use hyperoctree::balance::dist_balancing;
//! use hyperoctree::construct::dist_construction;
//! use hyperoctree::dist_tree::DistTree;
//! use hyperoctree::tools::{generate_random_cells, seeded_rng};
//! use mpi::traits::Communicator;
//!
//! let universe = mpi::initialize().unwrap();
//! let comm = universe.world();
//! let mut rng = seeded_rng(comm.rank() as u64);
//!
//! let mut points = generate_random_cells::<3, _>(10000, 15, &mut rng);
//! let mut tree = dist_construction(&mut points, 50, 0.2, 15, &comm).unwrap();
//! dist_balancing(&mut tree, 0.2, 15, &comm).unwrap();
//!
//! let tree = DistTree::new(&mut tree);
//! ```
//!
//! The binaries under `demos/` exercise the distributed pipeline under
//! `mpirun` and assert the sorting, balance and coverage properties.
#![cfg_attr(feature = "strict", deny(warnings), deny(unused_crate_dependencies))]
#![warn(missing_docs)]

pub mod balance;
pub mod cell;
pub mod constants;
pub mod construct;
pub mod dist_tree;
pub mod error;
pub mod gmg;
pub mod hilbert;
pub mod partition;
pub mod sort;
pub mod tools;

#[cfg(test)]
mod proptests;

pub use crate::cell::Cell;
pub use crate::dist_tree::DistTree;
pub use crate::error::{Error, Result};

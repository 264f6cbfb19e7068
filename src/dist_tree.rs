//! Container for one rank's part of a distributed tree.
//!
//! A [DistTree] takes ownership of a partitioned complete tree and keeps
//! the front and back cells of the original partition for the lifetime of
//! the container; the partition itself never changes. On top of the finest
//! grid the container can carve out a subdomain with a one-shot filter and
//! derive a hierarchy of progressively coarser grids for multigrid cycles,
//! each paired with a surrogate aligned to the partition of the next finer
//! grid.

use mpi::traits::CommunicatorCollectives;

use crate::cell::Cell;
use crate::constants::{DOMAIN_SIZE, MAX_DEPTH};
use crate::error::{Error, Result};
use crate::partition::dist_partition;
use crate::sort::{sfc_cmp, sort_and_remove_descendants};
use crate::tools::{
    communicate_forward, gather_to_all, global_deepest_level, global_size, redistribute,
};

/// A domain filter in one of its two equivalent forms.
///
/// Whichever form is supplied, the other is synthesised through the
/// lattice/physical coordinate conversion.
pub enum DomainDecider<const D: usize> {
    /// Accepts or rejects a cell on the lattice.
    Cell(Box<dyn Fn(&Cell<D>) -> bool>),
    /// Accepts or rejects a physical anchor and side length.
    Physical(Box<dyn Fn(&[f64; D], f64) -> bool>),
}

impl<const D: usize> DomainDecider<D> {
    /// The default lattice-form filter: the cell must not poke beyond the
    /// positive domain boundary. Beware wraparound when rearranging the
    /// inequality.
    pub fn default_cell(cell: &Cell<D>) -> bool {
        (0..D).all(|axis| cell.coord(axis) <= DOMAIN_SIZE - cell.side())
    }

    /// The default physical-form filter: the cell lies inside the unit
    /// hypercube.
    pub fn default_physical(coords: &[f64; D], size: f64) -> bool {
        coords.iter().all(|&c| c >= 0.0 && c + size <= 1.0)
    }

    /// Evaluate the filter on a cell, converting if needed.
    pub fn decide_cell(&self, cell: &Cell<D>) -> bool {
        match self {
            DomainDecider::Cell(f) => f(cell),
            DomainDecider::Physical(f) => {
                let (coords, size) = cell.to_physical();
                f(&coords, size)
            }
        }
    }

    /// Evaluate the filter on physical coordinates, converting if needed.
    pub fn decide_physical(&self, coords: &[f64; D], size: f64) -> bool {
        match self {
            DomainDecider::Physical(f) => f(coords, size),
            DomainDecider::Cell(f) => match Cell::from_physical(*coords, size) {
                Ok(cell) => f(&cell),
                Err(_) => false,
            },
        }
    }
}

impl<const D: usize> Default for DomainDecider<D> {
    fn default() -> Self {
        DomainDecider::Cell(Box::new(Self::default_cell))
    }
}

/// Stopping rule for [DistTree::generate_grid_hierarchy].
#[derive(Copy, Clone, Debug)]
pub enum GridCoarsening {
    /// Produce exactly this many strata, finest included.
    FixedStrata(usize),
    /// Coarsen until the deepest leaf level reaches the given level.
    UntilLevel(u32),
}

/// One rank's share of a distributed tree with an optional grid hierarchy.
pub struct DistTree<const D: usize> {
    // Multilevel grids, finest first; at least one stratum.
    strata: Vec<Vec<Cell<D>>>,
    // surrogates[s] holds stratum s redistributed to the partition of
    // stratum s - 1; the finest stratum has no surrogate.
    surrogates: Vec<Vec<Cell<D>>>,
    fronts: Vec<Option<Cell<D>>>,
    backs: Vec<Option<Cell<D>>>,
    original_size: usize,
    filtered_size: usize,
    decider: DomainDecider<D>,
    has_been_filtered: bool,
    has_hierarchy: bool,
    poisoned: bool,
}

impl<const D: usize> DistTree<D> {
    /// Take ownership of a rank's sorted, partitioned leaves.
    ///
    /// The source vector is drained; the front and back of the partition
    /// are recorded and stay fixed for the container's lifetime.
    pub fn new(leaves: &mut Vec<Cell<D>>) -> Self {
        let front = leaves.first().copied();
        let back = leaves.last().copied();
        let original_size = leaves.len();

        Self {
            strata: vec![std::mem::take(leaves)],
            surrogates: vec![Vec::new()],
            fronts: vec![front],
            backs: vec![back],
            original_size,
            filtered_size: original_size,
            decider: DomainDecider::default(),
            has_been_filtered: false,
            has_hierarchy: false,
            poisoned: false,
        }
    }

    /// The locally owned leaves of a stratum in curve order; stratum 0 is
    /// the finest grid.
    pub fn stratum(&self, stratum: usize) -> &[Cell<D>] {
        &self.strata[stratum]
    }

    /// The finest grid's locally owned leaves in curve order.
    pub fn leaves(&self) -> &[Cell<D>] {
        &self.strata[0]
    }

    /// Stratum `stratum` redistributed to the partition of stratum
    /// `stratum - 1`. Empty for the finest stratum.
    pub fn surrogate(&self, stratum: usize) -> &[Cell<D>] {
        &self.surrogates[stratum]
    }

    /// The first locally owned cell of a stratum's partition.
    pub fn front(&self, stratum: usize) -> Option<Cell<D>> {
        self.fronts[stratum]
    }

    /// The last locally owned cell of a stratum's partition.
    pub fn back(&self, stratum: usize) -> Option<Cell<D>> {
        self.backs[stratum]
    }

    /// Number of strata, finest included.
    pub fn num_strata(&self) -> usize {
        self.strata.len()
    }

    /// Local leaf count before filtering.
    pub fn original_size(&self) -> usize {
        self.original_size
    }

    /// Local leaf count after filtering.
    pub fn filtered_size(&self) -> usize {
        self.filtered_size
    }

    /// The active domain filter.
    pub fn decider(&self) -> &DomainDecider<D> {
        &self.decider
    }

    /// Carve the finest grid down to the subdomain accepted by `decider`.
    ///
    /// Rejected cells are compacted away in a single in-place pass; the
    /// partition endpoints are not touched. One-shot: a second call is a
    /// contract violation.
    pub fn filter(&mut self, decider: DomainDecider<D>) -> Result<()> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        if self.has_been_filtered {
            return Err(Error::LogicError("the tree has already been filtered"));
        }

        let cells = &mut self.strata[0];
        let old_len = cells.len();

        // Find the first element to delete, then keep compacting.
        let mut write = 0;
        while write < old_len && decider.decide_cell(&cells[write]) {
            write += 1;
        }
        let mut read = write;
        while read < old_len {
            if decider.decide_cell(&cells[read]) {
                cells[write] = cells[read];
                write += 1;
            }
            read += 1;
        }
        cells.truncate(write);

        self.filtered_size = write;
        self.decider = decider;
        self.has_been_filtered = true;

        Ok(())
    }

    /// Derive progressively coarser grids from the finest one.
    ///
    /// Each stratum is obtained from its predecessor by raising every leaf
    /// to its parent, keeping the coarsest coverage, and re-partitioning.
    /// Alongside, each coarser stratum is stored a second time as a
    /// surrogate aligned to the finer stratum's partition, so restriction
    /// and prolongation can run rank-locally. One-shot: a second call is a
    /// contract violation.
    pub fn generate_grid_hierarchy<C: CommunicatorCollectives>(
        &mut self,
        coarsening: GridCoarsening,
        load_flex: f64,
        comm: &C,
    ) -> Result<()> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        if self.has_hierarchy {
            return Err(Error::LogicError(
                "the grid hierarchy has already been generated",
            ));
        }
        self.has_hierarchy = true;

        loop {
            let finest_done = match coarsening {
                GridCoarsening::FixedStrata(count) => self.strata.len() >= count,
                GridCoarsening::UntilLevel(level) => {
                    global_deepest_level(self.strata.last().unwrap(), comm) <= level
                }
            };
            if finest_done {
                break;
            }

            let fine = self.strata.last().unwrap();
            if global_size(fine, comm) <= 1 {
                // Nothing coarser than the root.
                break;
            }

            let mut coarse: Vec<Cell<D>> = fine
                .iter()
                .map(|cell| {
                    if cell.level() > 0 {
                        cell.parent()
                    } else {
                        *cell
                    }
                })
                .collect();

            sort_and_remove_descendants(&mut coarse);
            if let Err(err) = dist_partition(&mut coarse, load_flex, MAX_DEPTH, comm) {
                self.poisoned = true;
                return Err(err);
            }
            // Parents that migrated in the exchange can land inside
            // coverage from another rank; the coarser coverage wins.
            sort_and_remove_descendants(&mut coarse);

            // The same across a rank boundary.
            if let Some(previous_last) = communicate_forward(&coarse, comm) {
                let keep = coarse
                    .iter()
                    .position(|cell| !previous_last.is_ancestor(*cell))
                    .unwrap_or(coarse.len());
                coarse.drain(..keep);
            }

            let surrogate = self.redistribute_to_finer_partition(&coarse, comm);

            self.fronts.push(coarse.first().copied());
            self.backs.push(coarse.last().copied());
            self.strata.push(coarse);
            self.surrogates.push(surrogate);
        }

        Ok(())
    }

    // Redistribute `coarse` so that its rank boundaries match the
    // partition of the current coarsest stratum.
    fn redistribute_to_finer_partition<C: CommunicatorCollectives>(
        &self,
        coarse: &[Cell<D>],
        comm: &C,
    ) -> Vec<Cell<D>> {
        if comm.size() == 1 {
            return coarse.to_vec();
        }

        let rank = comm.rank();
        let size = comm.size() as usize;
        let fine = self.strata.last().unwrap();

        // The fronts of the occupied ranks define the bins; empty ranks
        // contribute nothing and receive nothing.
        let my_front: Vec<Cell<D>> = fine.first().copied().into_iter().collect();
        let bin_fronts = gather_to_all(&my_front, comm);
        let my_tag: Vec<i32> = if fine.is_empty() { vec![] } else { vec![rank] };
        let bin_owners = gather_to_all(&my_tag, comm);

        let mut counts = vec![0_i32; size];
        if bin_fronts.is_empty() {
            return coarse.to_vec();
        }

        let mut bin = 0;
        for cell in coarse {
            while bin + 1 < bin_fronts.len()
                && sfc_cmp(&bin_fronts[bin + 1], cell) != std::cmp::Ordering::Greater
            {
                bin += 1;
            }
            counts[bin_owners[bin] as usize] += 1;
        }

        redistribute(coarse, &counts, comm)
    }

    /// Free all strata and surrogates; accessors keep working on empty
    /// grids.
    pub fn destroy(&mut self) {
        for stratum in &mut self.strata {
            stratum.clear();
            stratum.shrink_to_fit();
        }
        for surrogate in &mut self.surrogates {
            surrogate.clear();
            surrogate.shrink_to_fit();
        }
    }
}

/// Coarsen a sorted, complete local tree by one level: every leaf is
/// raised to its parent and the coarsest coverage wins.
pub fn coarsen_cells<const D: usize>(cells: &[Cell<D>]) -> Vec<Cell<D>> {
    let mut coarse: Vec<Cell<D>> = cells
        .iter()
        .map(|cell| {
            if cell.level() > 0 {
                cell.parent()
            } else {
                *cell
            }
        })
        .collect();
    sort_and_remove_descendants(&mut coarse);
    coarse
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::balance::local_balancing;
    use crate::sort::sort_and_remove_ancestors;
    use crate::tools::{generate_random_cells, seeded_rng};
    use crate::construct::complete_cells;

    fn complete_test_tree<const D: usize>(seed: u64) -> Vec<Cell<D>> {
        let mut rng = seeded_rng(seed);
        let mut cells = generate_random_cells::<D, _>(60, 5, &mut rng);
        sort_and_remove_ancestors(&mut cells);
        complete_cells(&mut cells);
        cells
    }

    fn total_volume<const D: usize>(cells: &[Cell<D>]) -> u128 {
        cells
            .iter()
            .map(|cell| (cell.side() as u128).pow(D as u32))
            .sum()
    }

    #[test]
    fn test_new_records_partition_endpoints() {
        let mut leaves = complete_test_tree::<2>(21);
        let first = leaves[0];
        let last = *leaves.last().unwrap();

        let tree = DistTree::new(&mut leaves);

        assert!(leaves.is_empty());
        assert_eq!(tree.front(0), Some(first));
        assert_eq!(tree.back(0), Some(last));
        assert_eq!(tree.num_strata(), 1);
        assert_eq!(tree.original_size(), tree.leaves().len());
    }

    #[test]
    fn test_filter_compacts_in_place() {
        let mut leaves = complete_test_tree::<2>(22);
        let front = leaves[0];
        let expected: Vec<_> = leaves
            .iter()
            .copied()
            .filter(|cell| cell.coord(0) < DOMAIN_SIZE / 2)
            .collect();

        let mut tree = DistTree::new(&mut leaves);
        tree.filter(DomainDecider::Cell(Box::new(|cell: &Cell<2>| {
            cell.coord(0) < DOMAIN_SIZE / 2
        })))
        .unwrap();

        assert_eq!(tree.leaves(), expected.as_slice());
        assert_eq!(tree.filtered_size(), expected.len());
        assert!(tree.original_size() >= tree.filtered_size());
        // The recorded partition endpoints outlive the filter.
        assert_eq!(tree.front(0), Some(front));
    }

    #[test]
    fn test_filter_is_one_shot() {
        let mut leaves = complete_test_tree::<2>(23);
        let mut tree = DistTree::new(&mut leaves);

        tree.filter(DomainDecider::default()).unwrap();
        let err = tree.filter(DomainDecider::default()).unwrap_err();
        assert!(matches!(err, Error::LogicError(_)));
    }

    #[test]
    fn test_default_deciders_agree() {
        let mut rng = seeded_rng(24);
        for cell in generate_random_cells::<3, _>(50, 4, &mut rng) {
            let (coords, size) = cell.to_physical();
            assert_eq!(
                DomainDecider::default_cell(&cell),
                DomainDecider::<3>::default_physical(&coords, size)
            );
        }
    }

    #[test]
    fn test_physical_decider_synthesises_cell_form() {
        let reject_left = DomainDecider::<2>::Physical(Box::new(|coords, _| coords[0] >= 0.5));
        let left = Cell::<2>::root().child(0);
        let right = Cell::<2>::root().child(1);
        assert!(!reject_left.decide_cell(&left));
        assert!(reject_left.decide_cell(&right));

        let cell_form = DomainDecider::<2>::Cell(Box::new(|cell| cell.coord(1) == 0));
        assert!(cell_form.decide_physical(&[0.0, 0.0], 0.5));
        assert!(!cell_form.decide_physical(&[0.0, 0.5], 0.5));
    }

    #[test]
    fn test_coarsen_cells_keeps_cover_exact() {
        let mut tree = complete_test_tree::<2>(25);
        local_balancing(&mut tree);

        let coarse = coarsen_cells(&tree);

        // Still a complete cover, strictly shallower at the deep end.
        assert_eq!(total_volume(&coarse), total_volume(&tree));
        let deepest_fine = tree.iter().map(|c| c.level()).max().unwrap();
        let deepest_coarse = coarse.iter().map(|c| c.level()).max().unwrap();
        assert!(deepest_coarse < deepest_fine);
        for window in coarse.windows(2) {
            assert!(!window[0].is_ancestor(window[1]));
        }
    }

    #[test]
    fn test_repeated_coarsening_reaches_root() {
        let mut grid = complete_test_tree::<2>(26);
        local_balancing(&mut grid);

        let mut rounds = 0;
        while grid.len() > 1 {
            grid = coarsen_cells(&grid);
            rounds += 1;
            assert!(rounds <= MAX_DEPTH);
        }
        assert_eq!(grid, vec![Cell::root()]);
    }

    #[test]
    fn test_destroy_clears_strata() {
        let mut leaves = complete_test_tree::<2>(27);
        let mut tree = DistTree::new(&mut leaves);
        tree.destroy();
        assert!(tree.leaves().is_empty());
        assert_eq!(tree.num_strata(), 1);
    }
}

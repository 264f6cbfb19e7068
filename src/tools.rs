//! Utility routines.

use itertools::Itertools;
use mpi::{
    collective::SystemOperation,
    datatype::{Partition, PartitionMut},
    traits::{CommunicatorCollectives, Equivalence, Root},
};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::cell::Cell;
use crate::constants::MAX_DEPTH;
use crate::sort::sfc_cmp;

/// Gather array to all processes
pub fn gather_to_all<T: Equivalence, C: CommunicatorCollectives>(arr: &[T], comm: &C) -> Vec<T> {
    // First we need to broadcast the individual sizes on each process.

    let size = comm.size();

    let local_len = arr.len() as i32;

    let mut sizes = vec![0_i32; size as usize];

    comm.all_gather_into(&local_len, &mut sizes);

    let recv_len = sizes.iter().sum::<i32>() as usize;

    // Now we have the size of each local contribution.

    let mut recvbuffer = Vec::<T>::with_capacity(recv_len);
    let buf: &mut [T] = unsafe { std::mem::transmute(recvbuffer.spare_capacity_mut()) };

    let recv_displs = displacements(&sizes);

    let mut receiv_partition = PartitionMut::new(buf, sizes, &recv_displs[..]);

    comm.all_gather_varcount_into(arr, &mut receiv_partition);

    unsafe { recvbuffer.set_len(recv_len) };

    recvbuffer
}

/// Gather distributed array to the root rank.
///
/// The result is a `Vec<T>` on root and `None` on all other ranks.
pub fn gather_to_root<T: Equivalence, C: CommunicatorCollectives>(
    arr: &[T],
    comm: &C,
) -> Option<Vec<T>> {
    let n = arr.len() as i32;
    let rank = comm.rank();
    let size = comm.size();
    let root_process = comm.process_at_rank(0);

    // We first communicate the length of the array to root.

    if rank == 0 {
        // We are at root.

        let mut counts = vec![0_i32; size as usize];
        root_process.gather_into_root(&n, &mut counts);

        // We now have all lengths at root. Can now do a varcount gather to
        // get the array elements.

        let nelements = counts.iter().sum::<i32>();
        let mut new_arr = Vec::<T>::with_capacity(nelements as usize);
        let new_arr_buf: &mut [T] = unsafe { std::mem::transmute(new_arr.spare_capacity_mut()) };

        let displs = displacements(counts.as_slice());

        let mut partition = PartitionMut::new(new_arr_buf, counts, &displs[..]);

        root_process.gather_varcount_into_root(arr, &mut partition);

        unsafe { new_arr.set_len(nelements as usize) };
        Some(new_arr)
    } else {
        root_process.gather_into(&n);
        root_process.gather_varcount_into(arr);
        None
    }
}

/// Get global size of a distributed array.
///
/// Computes the size and broadcasts it to all ranks.
pub fn global_size<T, C: CommunicatorCollectives>(arr: &[T], comm: &C) -> usize {
    let local_size = arr.len();
    let mut global_size = 0;

    comm.all_reduce_into(&local_size, &mut global_size, SystemOperation::sum());

    global_size
}

/// Global inclusive cumulative sum of a distributed array of weights.
///
/// The local arrays are scanned, then a scan over the rank totals shifts
/// each local result by the contribution of the previous ranks.
pub fn global_inclusive_cumsum<C: CommunicatorCollectives>(arr: &[usize], comm: &C) -> Vec<usize> {
    let mut result = arr
        .iter()
        .scan(0usize, |acc, &x| {
            *acc += x;
            Some(*acc)
        })
        .collect_vec();

    let local_total = result.last().copied().unwrap_or(0);
    let mut scan = 0usize;
    comm.scan_into(&local_total, &mut scan, SystemOperation::sum());

    let offset = scan - local_total;
    for entry in result.iter_mut() {
        *entry += offset;
    }

    result
}

/// The element that globally follows the last local element, or `None` on
/// the last rank that holds any data.
///
/// Empty local arrays are skipped over.
pub fn communicate_back<T, C>(arr: &[T], comm: &C) -> Option<T>
where
    T: Equivalence + Default + Copy,
    C: CommunicatorCollectives,
{
    let rank = comm.rank() as usize;
    let size = comm.size() as usize;

    if size == 1 {
        return None;
    }

    let first = arr.first().copied().unwrap_or_default();
    let mut firsts = vec![T::default(); size];
    comm.all_gather_into(&first, &mut firsts);

    let local_len = arr.len() as i32;
    let mut counts = vec![0_i32; size];
    comm.all_gather_into(&local_len, &mut counts);

    (rank + 1..size)
        .find(|&r| counts[r] > 0)
        .map(|r| firsts[r])
}

/// The element that globally precedes the first local element, or `None`
/// on the first rank that holds any data.
///
/// Empty local arrays are skipped over.
pub fn communicate_forward<T, C>(arr: &[T], comm: &C) -> Option<T>
where
    T: Equivalence + Default + Copy,
    C: CommunicatorCollectives,
{
    let rank = comm.rank() as usize;
    let size = comm.size() as usize;

    if size == 1 {
        return None;
    }

    let last = arr.last().copied().unwrap_or_default();
    let mut lasts = vec![T::default(); size];
    comm.all_gather_into(&last, &mut lasts);

    let local_len = arr.len() as i32;
    let mut counts = vec![0_i32; size];
    comm.all_gather_into(&local_len, &mut counts);

    (0..rank).rev().find(|&r| counts[r] > 0).map(|r| lasts[r])
}

/// Redistribute an array via an all-to-all varcount operation.
///
/// `counts[p]` is the number of elements destined for rank `p`, taken from
/// the array in order.
pub fn redistribute<T: Equivalence, C: CommunicatorCollectives>(
    arr: &[T],
    counts: &[i32],
    comm: &C,
) -> Vec<T> {
    let size = comm.size() as usize;
    debug_assert_eq!(counts.len(), size);

    // First we need to communicate how many elements everybody gets from
    // each process.

    let mut counts_from_processor = vec![0_i32; size];
    comm.all_to_all_into(counts, &mut counts_from_processor);

    // Each processor now knows how much it gets from all the others.
    // We can now send around the actual elements with an alltoallv.

    let send_displs = displacements(counts);
    let send_partition = Partition::new(arr, counts, &send_displs[..]);

    let recv_len = counts_from_processor.iter().sum::<i32>() as usize;
    let mut recvbuffer = Vec::<T>::with_capacity(recv_len);
    let buf: &mut [T] = unsafe { std::mem::transmute(recvbuffer.spare_capacity_mut()) };

    let recv_displs = displacements(&counts_from_processor);
    let mut receiv_partition = PartitionMut::new(buf, counts_from_processor, &recv_displs[..]);

    comm.all_to_all_varcount_into(&send_partition, &mut receiv_partition);

    unsafe { recvbuffer.set_len(recv_len) };

    recvbuffer
}

/// The deepest level over a distributed collection of cells.
pub fn global_deepest_level<const D: usize, C: CommunicatorCollectives>(
    cells: &[Cell<D>],
    comm: &C,
) -> u32 {
    let local_deepest = cells.iter().map(|cell| cell.level()).max().unwrap_or(0);

    if comm.size() == 1 {
        return local_deepest;
    }

    let mut global_deepest = 0;
    comm.all_reduce_into(&local_deepest, &mut global_deepest, SystemOperation::max());

    global_deepest
}

/// Check whether a distributed array of cells is globally sorted along the
/// curve.
///
/// The result is available on root only.
pub fn is_globally_sorted<const D: usize, C: CommunicatorCollectives>(
    arr: &[Cell<D>],
    comm: &C,
) -> Option<bool> {
    let arr = gather_to_root(arr, comm);
    if comm.rank() == 0 {
        let arr = arr.unwrap();
        for (elem1, elem2) in arr.iter().tuple_windows() {
            if sfc_cmp(elem1, elem2) == std::cmp::Ordering::Greater {
                return Some(false);
            }
        }
        Some(true)
    } else {
        None
    }
}

/// Compute displacements from a vector of counts.
///
/// This is useful for global MPI varcount operations. Let
/// counts be [3, 4, 5]. Then the corresponding displacements are
/// [0, 3, 7]. Note that the last element `5` is ignored.
pub fn displacements(counts: &[i32]) -> Vec<i32> {
    counts
        .iter()
        .scan(0, |acc, &x| {
            let tmp = *acc;
            *acc += x;
            Some(tmp)
        })
        .collect()
}

/// A reproducible rng; the distributed drivers seed one per rank.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    use rand::SeedableRng;
    ChaCha8Rng::seed_from_u64(seed)
}

/// Generate `count` random cells at the given level.
pub fn generate_random_cells<const D: usize, R: Rng>(
    count: usize,
    level: u32,
    rng: &mut R,
) -> Vec<Cell<D>> {
    let shift = MAX_DEPTH - level;
    (0..count)
        .map(|_| {
            let mut coords = [0u32; D];
            for coord in coords.iter_mut() {
                *coord = rng.gen_range(0..(1u32 << level)) << shift;
            }
            Cell::new(coords, level).expect("anchors are generated on the level lattice")
        })
        .collect()
}

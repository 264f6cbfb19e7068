//! Comparison-free bucketing and sorting of cells along the space-filling
//! curve.
//!
//! The sort never compares two cells directly. A range of items is bucketed
//! by the Morton child index of their keys at one level, with the bucket
//! order taken from the rotation table of the subtree's orientation, and the
//! children are then refined recursively. Ancestors of a subtree node can be
//! split off into a dedicated bucket that precedes or follows the siblings.
//!
//! All routines are parameterised over a key function so that arbitrary
//! payloads can be ordered by an attached cell; for plain cell slices the
//! identity key is used.

use std::cmp::Ordering;

use crate::cell::Cell;
use crate::constants::MAX_DEPTH;
use crate::hilbert;

/// Controls the treatment of cells coarser than the bucketing level.
#[derive(Copy, Clone, Debug)]
pub struct BucketPolicy {
    /// Split ancestors into their own bucket instead of child 0.
    pub separate_ancestors: bool,
    /// Place the ancestor bucket before the sibling buckets.
    pub ancestors_first: bool,
}

impl BucketPolicy {
    /// Ancestors bucketed separately ahead of their descendants; the
    /// arrangement every tree-valued operation in this crate relies on.
    pub const ANCESTORS_FIRST: Self = Self {
        separate_ancestors: true,
        ancestors_first: true,
    };

    /// No ancestor bucket; coarse cells fall into Morton child 0 where
    /// their anchor lies.
    pub const MERGE_ANCESTORS: Self = Self {
        separate_ancestors: false,
        ancestors_first: false,
    };
}

/// Bucket boundaries produced by a single bucketing step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Buckets {
    /// `num_children + 1` monotone offsets; the bucket of the child at
    /// curve rank `s` occupies `splitters[s]..splitters[s + 1]`.
    pub splitters: Vec<usize>,
    /// Range holding the separated ancestors.
    pub anc_begin: usize,
    /// End of the ancestor range.
    pub anc_end: usize,
}

impl Buckets {
    /// The range of the child bucket at curve rank `sfc`.
    pub fn child_range(&self, sfc: usize) -> (usize, usize) {
        (self.splitters[sfc], self.splitters[sfc + 1])
    }
}

// Shared counting and offset phase of the bucketing routines. Returns the
// slot assignment for the move phase: slot 0 is the ancestor bucket if
// ancestors come first, the child at curve rank s maps to a contiguous slot.
fn bucket_offsets<const D: usize, P, F>(
    items: &[P],
    begin: usize,
    end: usize,
    level: u32,
    rot: u32,
    policy: BucketPolicy,
    key_fn: &F,
) -> (Buckets, Vec<usize>)
where
    F: Fn(&P) -> Cell<D>,
{
    let table = hilbert::table::<D>();
    let num_children = table.num_children();

    let mut counts = vec![0usize; num_children];
    let mut anc_count = 0usize;

    for item in &items[begin..end] {
        let key = key_fn(item);
        if policy.separate_ancestors && key.level() < level {
            anc_count += 1;
        } else {
            counts[key.child_index(level)] += 1;
        }
    }

    let mut splitters = vec![0usize; num_children + 1];
    let mut offset = begin;

    let (anc_begin, anc_end);
    if policy.ancestors_first {
        anc_begin = offset;
        offset += anc_count;
        anc_end = offset;
    } else {
        anc_begin = end - anc_count;
        anc_end = end;
    }

    for sfc in 0..num_children {
        splitters[sfc] = offset;
        offset += counts[table.sfc_to_morton(rot, sfc)];
    }
    splitters[num_children] = offset;

    // Starts of the move slots, in memory order.
    let mut slot_starts = Vec::with_capacity(num_children + 1);
    if policy.separate_ancestors && policy.ancestors_first {
        slot_starts.push(anc_begin);
    }
    slot_starts.extend_from_slice(&splitters[..num_children]);
    if policy.separate_ancestors && !policy.ancestors_first {
        slot_starts.push(anc_begin);
    }

    (
        Buckets {
            splitters,
            anc_begin,
            anc_end,
        },
        slot_starts,
    )
}

// Move slot of an item under the given policy; slots are numbered in
// memory order as laid out by `bucket_offsets`.
#[inline]
fn move_slot<const D: usize>(
    key: Cell<D>,
    level: u32,
    rot: u32,
    policy: BucketPolicy,
    table: &hilbert::RotationTable,
) -> usize {
    if policy.separate_ancestors && key.level() < level {
        if policy.ancestors_first {
            0
        } else {
            table.num_children()
        }
    } else {
        let sfc = table.morton_to_sfc(rot, key.child_index(level));
        sfc + (policy.separate_ancestors && policy.ancestors_first) as usize
    }
}

/// Bucket `items[begin..end]` in place by the Morton child of their keys at
/// `level`, with the buckets arranged in curve order for `rot`.
///
/// Every slot is written at most once; the scratch space is one write
/// cursor per bucket regardless of the range size. Empty ranges return
/// splitters all equal to `begin`.
pub fn sfc_bucket<const D: usize, P, F>(
    items: &mut [P],
    begin: usize,
    end: usize,
    level: u32,
    rot: u32,
    policy: BucketPolicy,
    key_fn: &F,
) -> Buckets
where
    F: Fn(&P) -> Cell<D>,
{
    let table = hilbert::table::<D>();
    let (buckets, slot_starts) = bucket_offsets(items, begin, end, level, rot, policy, key_fn);

    let num_slots = slot_starts.len();
    let mut cursor = slot_starts.clone();

    for slot in 0..num_slots {
        let slot_end = if slot + 1 < num_slots {
            slot_starts[slot + 1]
        } else {
            end
        };
        while cursor[slot] < slot_end {
            let dest = move_slot(key_fn(&items[cursor[slot]]), level, rot, policy, table);
            if dest == slot {
                cursor[slot] += 1;
            } else {
                items.swap(cursor[slot], cursor[dest]);
                cursor[dest] += 1;
            }
        }
    }

    buckets
}

/// Same as [sfc_bucket], but permutes `companions` in lockstep with
/// `items`.
pub fn sfc_bucket_with_companions<const D: usize, P, Q, F>(
    items: &mut [P],
    companions: &mut [Q],
    begin: usize,
    end: usize,
    level: u32,
    rot: u32,
    policy: BucketPolicy,
    key_fn: &F,
) -> Buckets
where
    F: Fn(&P) -> Cell<D>,
{
    assert_eq!(items.len(), companions.len());

    let table = hilbert::table::<D>();
    let (buckets, slot_starts) = bucket_offsets(items, begin, end, level, rot, policy, key_fn);

    let num_slots = slot_starts.len();
    let mut cursor = slot_starts.clone();

    for slot in 0..num_slots {
        let slot_end = if slot + 1 < num_slots {
            slot_starts[slot + 1]
        } else {
            end
        };
        while cursor[slot] < slot_end {
            let dest = move_slot(key_fn(&items[cursor[slot]]), level, rot, policy, table);
            if dest == slot {
                cursor[slot] += 1;
            } else {
                items.swap(cursor[slot], cursor[dest]);
                companions.swap(cursor[slot], cursor[dest]);
                cursor[dest] += 1;
            }
        }
    }

    buckets
}

/// Compute the splitters an [sfc_bucket] call would produce without moving
/// any data.
pub fn sfc_locate_buckets<const D: usize, P, F>(
    items: &[P],
    begin: usize,
    end: usize,
    level: u32,
    rot: u32,
    policy: BucketPolicy,
    key_fn: &F,
) -> Buckets
where
    F: Fn(&P) -> Cell<D>,
{
    bucket_offsets(items, begin, end, level, rot, policy, key_fn).0
}

/// Recursively sort `items[begin..end]` into curve order over the subtree
/// rooted at a cell of level `start_level - 1` with orientation `rot`.
///
/// `end_level` bounds the recursion depth; keys that still share a path at
/// `end_level` keep their relative order.
pub fn local_sort_range_by<const D: usize, P, F>(
    items: &mut [P],
    begin: usize,
    end: usize,
    start_level: u32,
    end_level: u32,
    rot: u32,
    key_fn: &F,
) where
    F: Fn(&P) -> Cell<D>,
{
    if end - begin <= 1 {
        return;
    }

    let table = hilbert::table::<D>();
    let buckets = sfc_bucket(
        items,
        begin,
        end,
        start_level,
        rot,
        BucketPolicy::ANCESTORS_FIRST,
        key_fn,
    );

    if start_level >= end_level {
        return;
    }

    for sfc in 0..table.num_children() {
        let (child_begin, child_end) = buckets.child_range(sfc);
        if child_end - child_begin > 1 {
            let morton = table.sfc_to_morton(rot, sfc);
            // The root's orientation is fixed; level 0 passes it through.
            let child_rot = if start_level == 0 {
                rot
            } else {
                table.child_rot(rot, morton)
            };
            local_sort_range_by(
                items,
                child_begin,
                child_end,
                start_level + 1,
                end_level,
                child_rot,
                key_fn,
            );
        }
    }
}

/// Sort arbitrary payloads into curve order by a cell-valued key.
pub fn local_sort_by<const D: usize, P, F>(items: &mut [P], end_level: u32, key_fn: &F)
where
    F: Fn(&P) -> Cell<D>,
{
    let len = items.len();
    local_sort_range_by(items, 0, len, 1, end_level, 0, key_fn);
}

/// Sort a slice of cells into curve order.
pub fn local_sort<const D: usize>(cells: &mut [Cell<D>]) {
    local_sort_by(cells, MAX_DEPTH, &|&cell: &Cell<D>| cell);
}

/// Total order of two cells along the space-filling curve.
///
/// Ancestors precede their descendants, consistent with
/// [BucketPolicy::ANCESTORS_FIRST].
pub fn sfc_cmp<const D: usize>(a: &Cell<D>, b: &Cell<D>) -> Ordering {
    let table = hilbert::table::<D>();
    let mut rot = 0u32;
    for level in 1..=a.level().min(b.level()) {
        let (ca, cb) = (a.child_index(level), b.child_index(level));
        if ca != cb {
            return table.morton_to_sfc(rot, ca).cmp(&table.morton_to_sfc(rot, cb));
        }
        rot = table.child_rot(rot, ca);
    }
    a.level().cmp(&b.level())
}

/// `true` if `a` strictly precedes `b` along the curve.
pub fn sfc_less<const D: usize>(a: &Cell<D>, b: &Cell<D>) -> bool {
    sfc_cmp(a, b) == Ordering::Less
}

/// Sort the cells into curve order, then drop every cell that is an
/// ancestor of (or equal to) another.
///
/// Descendants of a cell follow it immediately in curve order, so a single
/// left-to-right pass against the successor suffices.
pub fn sort_and_remove_ancestors<const D: usize>(cells: &mut Vec<Cell<D>>) {
    local_sort(cells);
    let len = cells.len();
    let mut write = 0;
    for read in 0..len {
        if read + 1 < len && cells[read].is_ancestor(cells[read + 1]) {
            continue;
        }
        cells[write] = cells[read];
        write += 1;
    }
    cells.truncate(write);
}

/// Sort the cells into curve order, then drop every cell that is a
/// descendant of (or equal to) another; the coarsest coverage wins.
///
/// The mirror image of [sort_and_remove_ancestors], used when coarsening.
pub fn sort_and_remove_descendants<const D: usize>(cells: &mut Vec<Cell<D>>) {
    local_sort(cells);
    let len = cells.len();
    let mut write = 0;
    for read in 0..len {
        if write > 0 && cells[write - 1].is_ancestor(cells[read]) {
            continue;
        }
        cells[write] = cells[read];
        write += 1;
    }
    cells.truncate(write);
}

/// Sort the cells into curve order and drop exact duplicates; ancestors are
/// retained.
pub fn sort_and_remove_duplicates<const D: usize>(cells: &mut Vec<Cell<D>>) {
    local_sort(cells);
    let len = cells.len();
    let mut write = 0;
    for read in 0..len {
        if read + 1 < len && cells[read] == cells[read + 1] {
            continue;
        }
        cells[write] = cells[read];
        write += 1;
    }
    cells.truncate(write);
}

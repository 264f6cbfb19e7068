//! Rotation tables for k-dimensional harmonious Hilbert curves.
//!
//! A subtree traversed by the curve differs from the root frame by an
//! [Orientation]: a permutation of the coordinate axes combined with a set
//! of reflections. Haverkort's refinement operator produces, for each child
//! rank along the curve, the child's location inside its parent and the
//! orientation of the child's own subtree. Composing refinements from the
//! identity enumerates the full orientation group of the curve, which has
//! `2^d * d!` elements.
//!
//! Sorting never works with orientations directly; it consults a
//! [RotationTable] that maps `(orientation, child)` pairs to permuted child
//! numbers and child orientation indices. Tables are generated on first use
//! per dimension and live for the rest of the process.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::constants::MAX_DIM;
use crate::error::{Error, Result};

/// Number of bits needed for a child location; also bounds the dimension.
type AxBits = u32;

/// The physical distinction between a subtree's frame and the root frame:
/// a permutation `a` of the axes followed by a reflection mask `m`.
///
/// Haverkort indexes axes from the leftmost bit of a location word, so axis
/// `i` of a `d`-dimensional location lives at numeric bit `d - 1 - i`.
/// Entries of `a` at positions `dim..` are fixed at their own index so that
/// equality and hashing are uniform for a given dimension.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Orientation {
    a: [u8; MAX_DIM],
    m: AxBits,
}

impl Orientation {
    /// The identity orientation.
    pub fn identity() -> Self {
        let mut a = [0u8; MAX_DIM];
        for (i, entry) in a.iter_mut().enumerate() {
            *entry = i as u8;
        }
        Self { a, m: 0 }
    }

    /// The axis permutation; axis `i` takes axis `a[i]`.
    pub fn permutation(&self, dim: usize) -> &[u8] {
        &self.a[..dim]
    }

    /// The inverse axis permutation.
    pub fn inverse_permutation(&self, dim: usize) -> Vec<u8> {
        let mut inv = vec![0u8; dim];
        for i in 0..dim {
            inv[self.a[i] as usize] = i as u8;
        }
        inv
    }

    /// The reflection mask.
    pub fn reflection(&self) -> AxBits {
        self.m
    }

    fn permute(&self, coords: AxBits, dim: usize) -> AxBits {
        let mut out = 0;
        for i in 0..dim {
            out <<= 1;
            out |= (coords >> (dim - 1 - self.a[i] as usize)) & 1;
        }
        out
    }

    /// Group action on a `dim`-bit location.
    pub fn apply(&self, location: AxBits, dim: usize) -> AxBits {
        self.permute(location, dim) ^ self.m
    }

    /// Group multiplication; the result applies `other` in this frame.
    ///
    /// With (reflection)(permutation) as the preferred form the semidirect
    /// product rearranges as `(MA)(ma) = M(AmA~)(Aa)`.
    pub fn compose(&self, other: &Orientation, dim: usize) -> Orientation {
        let mut a = [0u8; MAX_DIM];
        for (i, entry) in a.iter_mut().enumerate() {
            *entry = i as u8;
        }
        for i in 0..dim {
            a[i] = other.a[self.a[i] as usize];
        }
        Orientation {
            a,
            m: self.m ^ self.permute(other.m, dim),
        }
    }
}

/// Haverkort's refinement operator for the harmonious Hilbert curve.
///
/// For a child rank along the curve, returns the child's location inside
/// its parent (the reflected Gray code of the rank) and the orientation of
/// the child subtree relative to the parent frame.
pub fn refinement(dim: usize, rank: usize) -> (AxBits, Orientation) {
    debug_assert!(rank < (1 << dim));

    let gray = |r: usize| (r ^ (r >> 1)) as AxBits;
    let location = gray(rank);

    let mut orient = Orientation::identity();

    // Reflection: the Gray code of the previous rank with the last bit
    // forced opposite to the last bit of the location.
    orient.m = if rank == 0 {
        0
    } else {
        (gray(rank - 1) & !1) | (!location & 1)
    };

    // Permutation: axes whose rank bit differs from the last rank bit fill
    // the front positions in reverse, the remaining axes fill from the back.
    let endr = rank & 1;
    let mut offset = 0;
    for i in 0..dim {
        offset += (((rank >> (dim - 1 - i)) & 1) != endr) as i32;
    }
    let mut front = offset - 1;
    let mut back = dim as i32 - 1;
    for i in 0..dim {
        if ((rank >> (dim - 1 - i)) & 1) != endr {
            orient.a[i] = front as u8;
            front -= 1;
        } else {
            orient.a[i] = back as u8;
            back -= 1;
        }
    }

    (location, orient)
}

/// Enumerate every orientation reachable from the identity, in depth-first
/// discovery order. The identity always receives index 0.
///
/// The walk uses an explicit heap stack; the orientation group has
/// `2^d * d!` elements and a call-stack recursion would overflow for the
/// larger dimensions.
pub fn enumerate_orientations(dim: usize) -> Result<Vec<Orientation>> {
    if !(2..=MAX_DIM).contains(&dim) {
        return Err(Error::DimensionUnsupported(dim));
    }

    let num_children = 1 << dim;

    let identity = Orientation::identity();
    let mut order = vec![identity];
    let mut seen = HashSet::new();
    seen.insert(identity);

    let mut stack = vec![(identity, 0usize)];

    while let Some(top) = stack.last_mut() {
        if top.1 == num_children {
            stack.pop();
            continue;
        }
        let parent = top.0;
        let rank = top.1;
        top.1 += 1;

        let (_, orient) = refinement(dim, rank);
        let composed = parent.compose(&orient, dim);
        if seen.insert(composed) {
            order.push(composed);
            stack.push((composed, 0));
        }
    }

    Ok(order)
}

/// The `(orientation, child)` lookup consulted inside the sort loops.
pub struct RotationTable {
    dim: usize,
    num_children: usize,
    /// Row per orientation: the first `num_children` entries map curve rank
    /// to Morton child, the second half is the inverse map.
    rotations: Vec<u8>,
    /// Row per orientation: the orientation index of each Morton child.
    hilbert: Vec<u32>,
}

impl RotationTable {
    /// Generate the table for `dim` dimensions.
    pub fn generate(dim: usize) -> Result<Self> {
        let orientations = enumerate_orientations(dim)?;
        let num_children = 1 << dim;

        let mut index = HashMap::new();
        for (i, orient) in orientations.iter().enumerate() {
            index.insert(*orient, i as u32);
        }

        let refinements: Vec<_> = (0..num_children).map(|r| refinement(dim, r)).collect();

        let mut rotations = vec![0u8; orientations.len() * 2 * num_children];
        let mut hilbert = vec![0u32; orientations.len() * num_children];

        for (o, orient) in orientations.iter().enumerate() {
            let row = &mut rotations[o * 2 * num_children..(o + 1) * 2 * num_children];
            for (rank, (location, child_orient)) in refinements.iter().enumerate() {
                let morton = orient.apply(*location, dim) as usize;
                row[rank] = morton as u8;
                row[num_children + morton] = rank as u8;
                hilbert[o * num_children + morton] = index[&orient.compose(child_orient, dim)];
            }
        }

        Ok(Self {
            dim,
            num_children,
            rotations,
            hilbert,
        })
    }

    /// The dimension this table was generated for.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of children per cell.
    pub fn num_children(&self) -> usize {
        self.num_children
    }

    /// Number of distinct orientations.
    pub fn num_orientations(&self) -> usize {
        self.hilbert.len() / self.num_children
    }

    /// Morton child number of the child at curve rank `sfc`.
    #[inline]
    pub fn sfc_to_morton(&self, rot: u32, sfc: usize) -> usize {
        self.rotations[rot as usize * 2 * self.num_children + sfc] as usize
    }

    /// Curve rank of the Morton child `morton`.
    #[inline]
    pub fn morton_to_sfc(&self, rot: u32, morton: usize) -> usize {
        self.rotations[rot as usize * 2 * self.num_children + self.num_children + morton] as usize
    }

    /// Orientation index of the subtree rooted at Morton child `morton`.
    #[inline]
    pub fn child_rot(&self, rot: u32, morton: usize) -> u32 {
        self.hilbert[rot as usize * self.num_children + morton]
    }
}

static TABLES: [OnceLock<RotationTable>; MAX_DIM + 1] = {
    const ONCE: OnceLock<RotationTable> = OnceLock::new();
    [ONCE; MAX_DIM + 1]
};

/// The process-wide rotation table for `dim` dimensions, generated on first
/// use.
pub fn rotation_table(dim: usize) -> Result<&'static RotationTable> {
    if !(2..=MAX_DIM).contains(&dim) {
        return Err(Error::DimensionUnsupported(dim));
    }
    Ok(TABLES[dim]
        .get_or_init(|| RotationTable::generate(dim).expect("dimension was validated above")))
}

/// Shorthand for the table of a compile-time dimension.
///
/// Panics if `D` is outside `2..=8`; use [rotation_table] for a fallible
/// runtime-dimension lookup.
pub fn table<const D: usize>() -> &'static RotationTable {
    rotation_table(D).expect("unsupported compile-time dimension")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_refinement_locations_are_gray_codes() {
        for dim in 2..=4 {
            for rank in 0..(1usize << dim) {
                let (location, _) = refinement(dim, rank);
                assert_eq!(location, (rank ^ (rank >> 1)) as AxBits);
            }
        }
    }

    // Spot checks against the 5D refinement table published by Haverkort.
    #[test]
    fn test_refinement_against_published_5d_rows() {
        let (loc, orient) = refinement(5, 0b00000);
        assert_eq!(loc, 0b00000);
        assert_eq!(orient.permutation(5), &[4, 3, 2, 1, 0]);
        assert_eq!(orient.inverse_permutation(5), vec![4, 3, 2, 1, 0]);
        assert_eq!(orient.reflection(), 0b00000);

        let (loc, orient) = refinement(5, 0b00001);
        assert_eq!(loc, 0b00001);
        assert_eq!(orient.permutation(5), &[3, 2, 1, 0, 4]);
        assert_eq!(orient.inverse_permutation(5), vec![3, 2, 1, 0, 4]);
        assert_eq!(orient.reflection(), 0b00000);

        let (loc, orient) = refinement(5, 0b00111);
        assert_eq!(loc, 0b00100);
        assert_eq!(orient.permutation(5), &[1, 0, 4, 3, 2]);
        assert_eq!(orient.reflection(), 0b00101);

        let (loc, orient) = refinement(5, 0b11111);
        assert_eq!(loc, 0b10000);
        assert_eq!(orient.permutation(5), &[4, 3, 2, 1, 0]);
        assert_eq!(orient.reflection(), 0b10001);
    }

    #[test]
    fn test_orientation_counts() {
        // The orientation group of the d-dimensional curve has 2^d * d!
        // elements.
        assert_eq!(enumerate_orientations(2).unwrap().len(), 8);
        assert_eq!(enumerate_orientations(3).unwrap().len(), 48);
        assert_eq!(enumerate_orientations(4).unwrap().len(), 384);
        assert_eq!(enumerate_orientations(5).unwrap().len(), 3840);
        assert_eq!(enumerate_orientations(6).unwrap().len(), 46080);
    }

    #[test]
    #[ignore = "several minutes; run with --ignored"]
    fn test_orientation_counts_large() {
        assert_eq!(enumerate_orientations(7).unwrap().len(), 322_560);
        assert_eq!(enumerate_orientations(8).unwrap().len(), 5_160_960);
    }

    #[test]
    fn test_unsupported_dimensions() {
        assert!(matches!(
            enumerate_orientations(9),
            Err(Error::DimensionUnsupported(9))
        ));
        assert!(matches!(
            rotation_table(1),
            Err(Error::DimensionUnsupported(1))
        ));
    }

    #[test]
    fn test_identity_row_2d() {
        let table = rotation_table(2).unwrap();
        // At the identity orientation the curve visits the children in
        // reflected Gray order.
        let visited: Vec<_> = (0..4).map(|s| table.sfc_to_morton(0, s)).collect();
        assert_eq!(visited, vec![0, 1, 3, 2]);
    }

    #[test]
    fn test_rotation_rows_are_inverse_pairs() {
        for dim in 2..=4 {
            let table = rotation_table(dim).unwrap();
            for rot in 0..table.num_orientations() as u32 {
                for sfc in 0..table.num_children() {
                    let morton = table.sfc_to_morton(rot, sfc);
                    assert_eq!(table.morton_to_sfc(rot, morton), sfc);
                }
            }
        }
    }

    #[test]
    fn test_child_rotations_in_range() {
        for dim in 2..=4 {
            let table = rotation_table(dim).unwrap();
            let count = table.num_orientations() as u32;
            for rot in 0..count {
                for morton in 0..table.num_children() {
                    assert!(table.child_rot(rot, morton) < count);
                }
            }
        }
    }
}

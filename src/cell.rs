//! Routines for working with cell keys.
//!
//! A [Cell] is an axis-aligned cube in the `2^d`-ary refinement of the unit
//! hypercube. It stores the anchor (the corner closest to the origin) as
//! fixed-point coordinates on the lattice of the deepest representable level
//! together with the refinement level. Cells are the keys everything else in
//! this crate sorts, partitions and balances.

use std::mem::offset_of;

use mpi::datatype::{UncommittedDatatypeRef, UncommittedUserDatatype, UserDatatype};
use mpi::traits::Equivalence;

use crate::constants::{level_size, DOMAIN_SIZE, MAX_DEPTH};
use crate::error::{Error, Result};

/// A cell key: anchor coordinates plus refinement level.
///
/// The anchor of a level `l` cell is always a multiple of
/// `2^(MAX_DEPTH - l)` along every axis. Note that cells deliberately do not
/// implement [Ord]; the coordinate tuple on its own is not a meaningful
/// total order. Use [crate::sort::sfc_cmp] to compare cells along the
/// space-filling curve.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Cell<const D: usize> {
    coords: [u32; D],
    level: u32,
}

impl<const D: usize> Cell<D> {
    /// Create a new cell, checking that the anchor is aligned to the level.
    pub fn new(coords: [u32; D], level: u32) -> Result<Self> {
        if level > MAX_DEPTH {
            return Err(Error::InvalidCell {
                coord: 0,
                level,
            });
        }
        let mask = level_size(level) - 1;
        for &coord in &coords {
            if coord & mask != 0 || coord > DOMAIN_SIZE {
                return Err(Error::InvalidCell { coord, level });
            }
        }
        Ok(Self { coords, level })
    }

    /// Construction without checks, for callers that guarantee alignment.
    pub(crate) fn from_parts(coords: [u32; D], level: u32) -> Self {
        debug_assert!(level <= MAX_DEPTH);
        debug_assert!(coords
            .iter()
            .all(|&c| c & (level_size(level) - 1) == 0 && c <= DOMAIN_SIZE));
        Self { coords, level }
    }

    /// The root cell covering the whole domain.
    pub fn root() -> Self {
        Self {
            coords: [0; D],
            level: 0,
        }
    }

    /// Return true if this is the root cell.
    pub fn is_root(&self) -> bool {
        self.level == 0
    }

    /// The refinement level.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// The anchor coordinates.
    pub fn coords(&self) -> [u32; D] {
        self.coords
    }

    /// A single anchor coordinate.
    pub fn coord(&self, axis: usize) -> u32 {
        self.coords[axis]
    }

    /// Side length on the anchor lattice.
    pub fn side(&self) -> u32 {
        level_size(self.level)
    }

    /// Smallest corner coordinate along `axis`; identical to the anchor.
    pub fn min(&self, axis: usize) -> u32 {
        self.coords[axis]
    }

    /// Largest corner coordinate along `axis`.
    pub fn max(&self, axis: usize) -> u32 {
        self.coords[axis] + self.side()
    }

    /// The parent cell.
    pub fn parent(&self) -> Self {
        debug_assert!(self.level > 0);
        self.ancestor_at_level(self.level - 1)
    }

    /// The ancestor at `level`, which must not exceed the cell's own level.
    pub fn ancestor_at_level(&self, level: u32) -> Self {
        debug_assert!(level <= self.level);
        let mask = !(level_size(level) - 1);
        let mut coords = self.coords;
        for coord in coords.iter_mut() {
            *coord &= mask;
        }
        Self { coords, level }
    }

    /// The child with the given Morton index.
    ///
    /// Bit `j` of `morton` selects the upper half along axis `j`.
    pub fn child(&self, morton: usize) -> Self {
        debug_assert!(self.level < MAX_DEPTH);
        debug_assert!(morton < (1 << D));
        let child_level = self.level + 1;
        let child_side = level_size(child_level);
        let mut coords = self.coords;
        for (axis, coord) in coords.iter_mut().enumerate() {
            *coord |= ((morton >> axis) as u32 & 1) * child_side;
        }
        Self {
            coords,
            level: child_level,
        }
    }

    /// All `2^D` children in Morton order.
    pub fn children(&self) -> Vec<Self> {
        (0..(1 << D)).map(|morton| self.child(morton)).collect()
    }

    /// All siblings of this cell (including itself) in Morton order.
    pub fn siblings(&self) -> Vec<Self> {
        debug_assert!(self.level > 0);
        self.parent().children()
    }

    /// The Morton child index of the anchor at `level`.
    ///
    /// For a cell of level `l >= level` this is the index of the level
    /// `level` child of the level `level - 1` ancestor on the path from the
    /// root to the cell. Coordinate `j` contributes bit `j`.
    pub fn child_index(&self, level: u32) -> usize {
        if level == 0 {
            return 0;
        }
        let shift = MAX_DEPTH - level;
        let mut index = 0;
        for (axis, &coord) in self.coords.iter().enumerate() {
            index |= (((coord >> shift) & 1) as usize) << axis;
        }
        index
    }

    /// Check whether `other` lies in the closed subtree of this cell.
    ///
    /// A cell is regarded as an ancestor of itself.
    pub fn is_ancestor(&self, other: Self) -> bool {
        other.level >= self.level && other.ancestor_at_level(self.level) == *self
    }

    /// The deepest cell at `level` whose closed extent contains the lattice
    /// point, or `None` if the point lies outside the domain.
    pub fn containing(point: [i64; D], level: u32) -> Option<Self> {
        let mask = !((level_size(level) - 1) as i64);
        let mut coords = [0u32; D];
        for (axis, &p) in point.iter().enumerate() {
            if p < 0 || p >= DOMAIN_SIZE as i64 {
                return None;
            }
            coords[axis] = (p & mask) as u32;
        }
        Some(Self { coords, level })
    }

    /// The face neighbour of the same size along `axis`, or `None` at the
    /// domain boundary.
    pub fn face_neighbour(&self, axis: usize, positive: bool) -> Option<Self> {
        let side = self.side() as i64;
        let mut point = [0i64; D];
        for (a, &coord) in self.coords.iter().enumerate() {
            point[a] = coord as i64;
        }
        point[axis] += if positive { side } else { -side };
        Self::containing(point, self.level)
    }

    /// The level `level` cell adjacent to this cell across the given face,
    /// or `None` if it would fall outside the domain. `level` must not
    /// exceed the cell's own level.
    pub fn coarse_face_neighbour(&self, axis: usize, positive: bool, level: u32) -> Option<Self> {
        debug_assert!(level <= self.level);
        let side = self.side() as i64;
        let mut point = [0i64; D];
        for (a, &coord) in self.coords.iter().enumerate() {
            point[a] = coord as i64;
        }
        // A point just beyond the face in question, inside the neighbour.
        point[axis] += if positive { side } else { -1 };
        let neighbour = Self::containing(point, level)?;
        // Across the face, not the cell's own ancestor.
        (!neighbour.is_ancestor(*self)).then_some(neighbour)
    }

    /// True if two cells of the same or different levels share a face.
    pub fn shares_face(&self, other: Self) -> bool {
        let mut touching_axis = None;
        for axis in 0..D {
            let (amin, amax) = (self.min(axis) as i64, self.max(axis) as i64);
            let (bmin, bmax) = (other.min(axis) as i64, other.max(axis) as i64);
            if amax < bmin || bmax < amin {
                return false;
            }
            if amax == bmin || bmax == amin {
                // Touching along this axis; overlap must be a full face.
                if touching_axis.is_some() {
                    return false;
                }
                touching_axis = Some(axis);
            }
        }
        touching_axis.is_some()
    }

    /// Map the cell to physical coordinates on the unit hypercube.
    ///
    /// Returns the anchor in `[0, 1]^D` and the physical side length.
    pub fn to_physical(&self) -> ([f64; D], f64) {
        let scale = 1.0 / DOMAIN_SIZE as f64;
        let mut coords = [0.0; D];
        for (axis, &coord) in self.coords.iter().enumerate() {
            coords[axis] = coord as f64 * scale;
        }
        (coords, self.side() as f64 * scale)
    }

    /// The cell whose physical anchor and side length are given.
    ///
    /// Inverse of [Cell::to_physical] for cells of the unit hypercube.
    pub fn from_physical(coords: [f64; D], size: f64) -> Result<Self> {
        let level = (-size.log2()).round() as i64;
        if !(0..=MAX_DEPTH as i64).contains(&level) {
            return Err(Error::InvalidCell {
                coord: 0,
                level: level.unsigned_abs() as u32,
            });
        }
        let level = level as u32;
        let mut anchor = [0u32; D];
        for (axis, &c) in coords.iter().enumerate() {
            let lattice = (c * DOMAIN_SIZE as f64).round();
            if !(0.0..=DOMAIN_SIZE as f64).contains(&lattice) {
                return Err(Error::InvalidCell {
                    coord: lattice as u32,
                    level,
                });
            }
            anchor[axis] = lattice as u32;
        }
        Self::new(anchor, level)
    }
}

unsafe impl<const D: usize> Equivalence for Cell<D> {
    type Out = UserDatatype;

    // Depending on the MPI implementation the displacement type is an i64
    // or an isize, so a conversion may or may not be needed here.
    #[allow(clippy::useless_conversion)]
    fn equivalent_datatype() -> Self::Out {
        UserDatatype::structured::<UncommittedDatatypeRef>(
            &[1, 1],
            &[
                (offset_of!(Cell<D>, coords) as i64).try_into().unwrap(),
                (offset_of!(Cell<D>, level) as i64).try_into().unwrap(),
            ],
            &[
                UncommittedUserDatatype::contiguous(D as i32, &u32::equivalent_datatype()).as_ref(),
                u32::equivalent_datatype().into(),
            ],
        )
    }
}

impl<const D: usize> std::fmt::Debug for Cell<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("coords", &self.coords)
            .field("level", &self.level)
            .finish()
    }
}

impl<const D: usize> std::fmt::Display for Cell<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for coord in &self.coords {
            write!(f, "{} ", coord >> (MAX_DEPTH - self.level))?;
        }
        write!(f, "| {})", self.level)
    }
}

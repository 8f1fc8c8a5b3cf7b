//! Schur-split Jacobians of the reprojection residuals.
//!
//! Every Jacobian is written as two matrices with identical row layout:
//!
//! - **left**: point parameters followed by unknown rigid-body transforms
//! - **right**: unknown view parameters followed by unknown camera intrinsics
//!
//! `[left | right]` is the full Jacobian with columns in codec order. The
//! split lets a Schur-complement solver eliminate the block-diagonal point
//! block before solving the much smaller view/camera system.
//!
//! Writes go through [`JacobianStorage`] so one algorithm fills either a dense
//! [`DMatrix`] or a [`TripletAccumulator`] that is later compacted into a
//! `faer` sparse matrix.

use crate::error::{BundleError, BundleResult};
use crate::rotation::RotationJacobian;
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::DMatrix;

pub mod metric;
pub mod projective;

pub use metric::MetricSchurJacobian;
pub use projective::ProjectiveSchurJacobian;

/// Write target of a Jacobian evaluation.
pub trait JacobianStorage {
    /// Resizes to `rows × cols` and clears every entry.
    fn reshape(&mut self, rows: usize, cols: usize);

    /// Writes a value. The coordinate must not have been written since the last
    /// [`JacobianStorage::reshape`].
    fn set(&mut self, row: usize, col: usize, value: f64);

    /// Adds to whatever is already stored at the coordinate.
    fn add(&mut self, row: usize, col: usize, value: f64);
}

impl JacobianStorage for DMatrix<f64> {
    fn reshape(&mut self, rows: usize, cols: usize) {
        if self.nrows() == rows && self.ncols() == cols {
            self.fill(0.0);
        } else {
            *self = DMatrix::zeros(rows, cols);
        }
    }

    #[inline]
    fn set(&mut self, row: usize, col: usize, value: f64) {
        self[(row, col)] = value;
    }

    #[inline]
    fn add(&mut self, row: usize, col: usize, value: f64) {
        self[(row, col)] += value;
    }
}

/// Coordinate-list sparse matrix that tolerates repeated coordinates.
///
/// Entries are appended as they are produced. [`TripletAccumulator::compact`]
/// sorts them column-major and sums entries sharing a coordinate, which is how
/// contributions of several descendant views to one ancestor motion combine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripletAccumulator {
    rows: usize,
    cols: usize,
    entries: Vec<(usize, usize, f64)>,
}

impl TripletAccumulator {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            entries: Vec::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Stored entries, including duplicates that have not been compacted yet.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(usize, usize, f64)] {
        &self.entries
    }

    /// Sorts by (column, row) and merges duplicate coordinates by summing them.
    pub fn compact(&mut self) {
        self.entries.sort_unstable_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));
        let mut merged: Vec<(usize, usize, f64)> = Vec::with_capacity(self.entries.len());
        for &(row, col, value) in &self.entries {
            match merged.last_mut() {
                Some(last) if last.0 == row && last.1 == col => last.2 += value,
                _ => merged.push((row, col, value)),
            }
        }
        self.entries = merged;
    }

    /// Compacts and converts into a compressed sparse column matrix.
    pub fn to_sparse(&mut self) -> BundleResult<SparseColMat<usize, f64>> {
        self.compact();
        let triplets: Vec<Triplet<usize, usize, f64>> = self
            .entries
            .iter()
            .map(|&(row, col, value)| Triplet::new(row, col, value))
            .collect();
        SparseColMat::try_new_from_triplets(self.rows, self.cols, &triplets).map_err(|e| {
            BundleError::SparseAssembly(format!(
                "Failed to build {}x{} Jacobian: {:?}",
                self.rows, self.cols, e
            ))
        })
    }

    /// Dense copy, summing duplicates.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.rows, self.cols);
        for &(row, col, value) in &self.entries {
            dense[(row, col)] += value;
        }
        dense
    }
}

impl JacobianStorage for TripletAccumulator {
    fn reshape(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.entries.clear();
    }

    #[inline]
    fn set(&mut self, row: usize, col: usize, value: f64) {
        self.entries.push((row, col, value));
    }

    #[inline]
    fn add(&mut self, row: usize, col: usize, value: f64) {
        self.entries.push((row, col, value));
    }
}

/// Scratch space reused across Jacobian evaluations.
#[derive(Debug, Clone, Default)]
pub struct JacobianWorkspace {
    /// ∂u/∂intrinsics
    pub(crate) grad_x: Vec<f64>,
    /// ∂v/∂intrinsics
    pub(crate) grad_y: Vec<f64>,
    /// Rotation partials per motion, filled as views are processed
    pub(crate) motion_partials: Vec<Option<RotationJacobian>>,
    /// Rotation partials per rigid body
    pub(crate) rigid_partials: Vec<Option<RotationJacobian>>,
}

impl JacobianWorkspace {
    /// Clears the caches and sizes the buffers for a scene.
    pub fn reset(&mut self, total_motions: usize, total_rigids: usize, max_intrinsics: usize) {
        self.grad_x.clear();
        self.grad_x.resize(max_intrinsics, 0.0);
        self.grad_y.clear();
        self.grad_y.resize(max_intrinsics, 0.0);
        self.motion_partials.clear();
        self.motion_partials.resize(total_motions, None);
        self.rigid_partials.clear();
        self.rigid_partials.resize(total_rigids, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_are_summed() {
        let mut acc = TripletAccumulator::new(3, 2);
        acc.add(1, 1, 2.0);
        acc.set(0, 0, 1.0);
        acc.add(1, 1, 0.5);
        acc.add(2, 0, -1.0);
        acc.add(1, 1, 0.25);
        assert_eq!(acc.len(), 5);

        acc.compact();
        assert_eq!(acc.entries(), &[(0, 0, 1.0), (2, 0, -1.0), (1, 1, 2.75)]);
    }

    #[test]
    fn test_to_sparse_matches_dense() {
        let mut acc = TripletAccumulator::new(2, 3);
        acc.add(0, 2, 1.0);
        acc.add(0, 2, 1.0);
        acc.set(1, 0, 4.0);

        let dense = acc.to_dense();
        let sparse = acc.to_sparse().unwrap();
        assert_eq!(sparse.nrows(), 2);
        assert_eq!(sparse.ncols(), 3);

        let symbolic = sparse.symbolic();
        let mut rebuilt = DMatrix::<f64>::zeros(2, 3);
        for col in 0..3 {
            let rows = symbolic.row_idx_of_col_raw(col);
            let values = sparse.val_of_col(col);
            for (row, value) in rows.iter().zip(values) {
                rebuilt[(*row, col)] = *value;
            }
        }
        assert_eq!(rebuilt, dense);
        assert_eq!(dense[(0, 2)], 2.0);
    }

    #[test]
    fn test_dense_reshape_clears() {
        let mut dense = DMatrix::from_element(2, 2, 3.0);
        JacobianStorage::reshape(&mut dense, 2, 2);
        assert_eq!(dense, DMatrix::zeros(2, 2));
        JacobianStorage::add(&mut dense, 1, 1, 1.5);
        JacobianStorage::add(&mut dense, 1, 1, 1.5);
        assert_eq!(dense[(1, 1)], 3.0);
        JacobianStorage::reshape(&mut dense, 4, 1);
        assert_eq!(dense.shape(), (4, 1));
    }

    #[test]
    fn test_workspace_reset() {
        let mut workspace = JacobianWorkspace::default();
        workspace.reset(3, 1, 9);
        assert_eq!(workspace.motion_partials.len(), 3);
        assert_eq!(workspace.grad_x.len(), 9);
        assert!(workspace.rigid_partials.iter().all(Option::is_none));
    }
}

//! Dense linear solve backing the Levenberg-Marquardt inner step.
//!
//! The damped normal equations (J^T J + lambda*I) dx = J^T r are small
//! (one row and column per fitted model parameter, never more than a
//! couple dozen), so a plain LU factorisation is all that is needed. A
//! singular system is reported as an error rather than a panic; the LM
//! loop responds by raising the damping and retrying.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

/// Solve Ax = b by LU decomposition. A must be square and match b.
pub fn solve_dense(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    if a.nrows() != a.ncols() || a.nrows() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.nrows(),
            actual: if a.nrows() != a.ncols() { a.ncols() } else { b.len() },
        });
    }

    a.clone().lu().solve(b).ok_or(Error::SingularMatrix)
}

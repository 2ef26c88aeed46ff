//! Error types for valvebench-solver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("singular matrix encountered during solve")]
    SingularMatrix,

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("problem has no residuals")]
    EmptyProblem,

    #[error("bounds are inconsistent for parameter {0}: lower > upper")]
    InvalidBounds(usize),
}

pub type Result<T> = std::result::Result<T, Error>;

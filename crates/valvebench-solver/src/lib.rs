//! Least-squares engines for device-model fitting.
//!
//! Three layers, all consumed by valvebench-models:
//! - `linear`: dense LU solve, the primitive behind everything else.
//! - `regression`: closed-form line and parabola fits, used to seed
//!   nonlinear parameter estimates.
//! - `lm`: bounded Levenberg-Marquardt for the full model fits.

pub mod error;
pub mod linear;
pub mod lm;
pub mod regression;

pub use error::{Error, Result};
pub use linear::solve_dense;
pub use lm::{solve_lm, Bounds, LeastSquaresProblem, LmOptions, LmResult};
pub use regression::{LinearFit, QuadraticFit};

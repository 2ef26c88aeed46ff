//! Error types for valvebench-models.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown model type '{0}'")]
    UnknownModelType(String),

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("no usable sweeps in measurement")]
    NoUsableSweeps,

    #[error("fit worker terminated without delivering a result")]
    FitWorkerGone,

    #[error(transparent)]
    Solver(#[from] valvebench_solver::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

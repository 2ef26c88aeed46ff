//! Error types for valvebench-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed measurement: {0}")]
    MalformedMeasurement(String),

    #[error("no valid sweeps in input")]
    EmptyMeasurement,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

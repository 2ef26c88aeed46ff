use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("serial port: {0}")]
    Serial(#[from] serialport::Error),

    #[error("serial i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("a test is already running")]
    TestAlreadyRunning,

    #[error("{0} tests are not supported on a {1:?}")]
    UnsupportedTest(&'static str, valvebench_core::DeviceType),

    #[error("sweep must have at least one point")]
    EmptySweep,
}

//! Core data containers and unit conversion for the valve analyser.
//!
//! Everything here is pure data and arithmetic: the protocol engine
//! (valvebench-analyser) produces these types from the wire, and the
//! fitting engine (valvebench-models) consumes them.

pub mod error;
pub mod measurement;
pub mod sample;
pub mod sweep;
pub mod types;
pub mod units;

pub use error::{Error, Result};
pub use measurement::{AxisRange, Measurement, MeasurementJson};
pub use sample::Sample;
pub use sweep::{Sweep, SweepJson};
pub use types::{DeviceType, SweepKind, TestType};
pub use units::{Calibration, Electrode, UnitConverter};

//! Serial protocol engine and sweep sequencer for the valve analyser.
//!
//! The [`Analyser`] owns the wire: it serializes commands one at a time,
//! parses the hardware's `OK:` response lines, walks the two-axis sweep
//! grid of a running test and assembles the resulting
//! [`valvebench_core::Measurement`]. Hosts plug in a [`Transport`] for the
//! serial port and an [`AnalyserClient`] for progress and telemetry
//! notifications.

pub mod analyser;
pub mod client;
pub mod error;
pub mod shaper;
pub mod transport;

pub use analyser::{Analyser, TestPlan, COMMAND_TIMEOUT, HEATER_POLL_PERIOD, HEATER_WARMUP};
pub use client::{AnalyserClient, NullClient};
pub use error::{Error, Result};
pub use shaper::{LinearShaper, LogKneeShaper, SampleShaper};
pub use transport::{SerialTransport, Transport};

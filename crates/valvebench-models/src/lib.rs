//! Parametric valve models and the nonlinear fitting engine.
//!
//! Turns a raw [`valvebench_core::Measurement`] into a calibrated device
//! model: heuristic seeding ([`Estimate`]), bounded least-squares
//! refinement (via valvebench-solver), and the closed-form current
//! equations for each model family. Fits run on a background worker, one
//! at a time, with completion delivered over a channel.

pub mod equations;
pub mod error;
pub mod estimate;
pub mod fit;
pub mod model;
pub mod parameter;
pub mod pentode;
pub mod preset;
pub mod triode;

pub use error::{Error, Result};
pub use estimate::Estimate;
pub use fit::{solve_chain, solve_in_background, FitHandle, FitOutcome, FitRequest};
pub use model::{FitSample, Model, ModelKind, SmallSignal};
pub use parameter::{ParamId, Parameter, ParameterSet};
pub use pentode::{GardinerPentode, ReefmanPentode, ReefmanVariant, SimpleManualPentode};
pub use preset::{kind_from_str, model_for_kind, model_from_json, model_to_json, DevicePreset, ModelJson};
pub use triode::{CohenHelieTriode, KorenTriode, SimpleTriode};

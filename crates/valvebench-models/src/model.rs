//! The device-model abstraction and shared fitting machinery.

use std::cell::RefCell;

use log::{debug, info, warn};
use nalgebra::DVector;
use valvebench_core::Measurement;
use valvebench_solver::{solve_lm, LeastSquaresProblem, LmOptions};

use crate::error::Result;
use crate::parameter::{ParamId, ParameterSet};

/// Model family tag, stable across serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    SimpleTriode,
    KorenTriode,
    CohenHelieTriode,
    ReefmanDerkPentode,
    ReefmanDerkEPentode,
    GardinerPentode,
    SimpleManualPentode,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::SimpleTriode => "simple",
            ModelKind::KorenTriode => "koren",
            ModelKind::CohenHelieTriode => "cohenHelie",
            ModelKind::ReefmanDerkPentode => "reefmanDerk",
            ModelKind::ReefmanDerkEPentode => "reefmanDerkE",
            ModelKind::GardinerPentode => "gardiner",
            ModelKind::SimpleManualPentode => "simpleManual",
        }
    }

    pub fn is_pentode(self) -> bool {
        matches!(
            self,
            ModelKind::ReefmanDerkPentode
                | ModelKind::ReefmanDerkEPentode
                | ModelKind::GardinerPentode
                | ModelKind::SimpleManualPentode
        )
    }
}

/// One data point of a fitting problem, already unit-converted and with
/// the grid polarity normalised.
#[derive(Debug, Clone, Copy)]
pub struct FitSample {
    pub va: f64,
    pub ia: f64,
    pub vg1: f64,
    pub vg2: f64,
    pub ig2: f64,
}

/// Small-signal quantities at an operating point. `valid` is false when a
/// finite-difference input was non-finite or the anode slope underflowed;
/// the numeric fields are zero in that case and must not be displayed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallSignal {
    pub gm: f64,
    pub ra: f64,
    pub mu: f64,
    pub valid: bool,
}

/// A parametric valve model: evaluation plus least-squares calibration.
///
/// Fit results are reported through [`Model::converged`], never by
/// panicking: an unconverged model stays queryable but its outputs are not
/// trustworthy for display or derived quantities.
pub trait Model: Send {
    fn name(&self) -> &'static str;
    fn kind(&self) -> ModelKind;

    fn params(&self) -> &ParameterSet;
    fn params_mut(&mut self) -> &mut ParameterSet;

    /// Parameters this family serialises to preset JSON.
    fn json_params(&self) -> &'static [ParamId];

    /// Queue one sample for the next solve.
    fn add_sample(&mut self, sample: FitSample);

    /// Run the least-squares fit over the queued samples. Returns the
    /// converged flag (also queryable afterwards via `converged`).
    fn solve(&mut self) -> Result<bool>;

    fn converged(&self) -> bool;

    /// Modelled anode current in mA. `vg2` is ignored by triode families.
    fn anode_current(&self, va: f64, vg1: f64, vg2: f64) -> f64;

    /// Modelled screen current in mA. Zero for triodes.
    fn screen_current(&self, _va: f64, _vg1: f64, _vg2: f64) -> f64 {
        0.0
    }

    /// Feed a whole measurement into the fitting problem, rejecting
    /// truncated sweeps and normalising grid polarity.
    ///
    /// A sweep is unusable when it has fewer than 20 samples or its final
    /// anode voltage falls below 75% of the configured anode stop; both
    /// indicate a safety cutoff truncated it. Measured Vg1 polarity is not
    /// guaranteed consistent across hardware, so each sweep is probed at
    /// its first sample with non-negligible |Vg1| and every grid voltage
    /// is normalised to the strictly non-positive convention.
    fn add_measurement(&mut self, measurement: &Measurement) {
        let anode_stop = measurement.anode_range().stop;
        for sweep in measurement.sweeps() {
            if sweep.len() < 20 {
                debug!("skipping sweep {}: only {} samples", sweep.label(), sweep.len());
                continue;
            }
            let last = match sweep.last() {
                Some(s) => s,
                None => continue,
            };
            if anode_stop > 0.0 && last.va < 0.75 * anode_stop {
                debug!(
                    "skipping sweep {}: truncated at va = {:.1} of {:.1}",
                    sweep.label(),
                    last.va,
                    anode_stop
                );
                continue;
            }

            let flipped = sweep
                .samples()
                .iter()
                .find(|s| s.vg1.abs() > 0.05)
                .map(|s| s.vg1 > 0.0)
                .unwrap_or(false);
            if flipped {
                debug!("sweep {}: measured vg1 positive, flipping sign", sweep.label());
            }

            for s in sweep.samples() {
                self.add_sample(FitSample {
                    va: s.va,
                    ia: s.ia,
                    vg1: -s.vg1.abs(),
                    vg2: s.vg2,
                    ig2: s.ig2,
                });
            }
        }
    }

    /// Inverse of `anode_current` in va: the anode voltage producing the
    /// requested current at the given grid voltages.
    ///
    /// The current equation is not analytically invertible, so this runs
    /// a damped secant iteration: the local slope is probed numerically
    /// and each step is clamped to a 1.2x multiplicative band around the
    /// current estimate, which tames the secant method's overshoot in the
    /// knee region. Bails out on a dead-flat gradient.
    fn anode_voltage(&self, ia: f64, vg1: f64, vg2: f64) -> f64 {
        const BAND: f64 = 1.2;
        const PROBE: f64 = 0.01;

        let mut va = 100.0;
        for _ in 0..200 {
            let ia_test = self.anode_current(va, vg1, vg2);
            let err = ia - ia_test;
            if err.abs() < 0.005 {
                break;
            }

            let gradient = (self.anode_current(va + PROBE, vg1, vg2) - ia_test) / PROBE;
            if gradient == 0.0 {
                warn!("anode_voltage: flat gradient at va = {va:.2}, giving up");
                break;
            }

            let next = (va + err / gradient).clamp(va / BAND, va * BAND);
            va = next.max(0.0);
        }
        va
    }

    /// gm, ra and mu at an operating point via central differences.
    fn small_signal(&self, va: f64, vg1: f64, vg2: f64) -> SmallSignal {
        const STEP: f64 = 0.1;

        let ia_vg_hi = self.anode_current(va, vg1 + STEP, vg2);
        let ia_vg_lo = self.anode_current(va, vg1 - STEP, vg2);
        let ia_va_hi = self.anode_current(va + STEP, vg1, vg2);
        let ia_va_lo = self.anode_current(va - STEP, vg1, vg2);

        let inputs = [ia_vg_hi, ia_vg_lo, ia_va_hi, ia_va_lo];
        if inputs.iter().any(|v| !v.is_finite()) {
            return SmallSignal::default();
        }

        let gm = (ia_vg_hi - ia_vg_lo) / (2.0 * STEP);
        let dia_dva = (ia_va_hi - ia_va_lo) / (2.0 * STEP);
        if dia_dva.abs() < 1e-9 {
            // Near-flat anode characteristic; ra would explode.
            return SmallSignal::default();
        }

        let ra = 1.0 / dia_dva;
        SmallSignal {
            gm,
            ra,
            mu: gm * ra,
            valid: true,
        }
    }
}

/// Least-squares problem over a subset of a [`ParameterSet`].
struct ParamProblem<'a, F> {
    free: &'a [ParamId],
    samples: &'a [FitSample],
    scratch: RefCell<ParameterSet>,
    eval: F,
}

impl<F> LeastSquaresProblem for ParamProblem<'_, F>
where
    F: Fn(&ParameterSet, &FitSample) -> f64,
{
    fn residual_count(&self) -> usize {
        self.samples.len()
    }

    fn residuals(&self, params: &DVector<f64>, out: &mut DVector<f64>) -> bool {
        let mut scratch = self.scratch.borrow_mut();
        for (j, &id) in self.free.iter().enumerate() {
            scratch.set_unchecked(id, params[j]);
        }
        for (i, s) in self.samples.iter().enumerate() {
            let predicted = (self.eval)(&scratch, s);
            if !predicted.is_finite() {
                return false;
            }
            out[i] = s.ia - predicted;
        }
        true
    }
}

/// Fit the `free` parameters of `params` against `samples`, where `eval`
/// predicts the measured quantity (anode or screen current) from a
/// candidate parameter set. Bounds are taken from the parameter set and
/// enforced by the solver; the result is written back on success.
///
/// Note: the residual target is always `sample.ia`; callers fitting screen
/// current place ig2 in that slot when building their sample list.
pub(crate) fn fit_params<F>(
    params: &mut ParameterSet,
    free: &[ParamId],
    samples: &[FitSample],
    options: &LmOptions,
    eval: F,
) -> Result<bool>
where
    F: Fn(&ParameterSet, &FitSample) -> f64,
{
    let problem = ParamProblem {
        free,
        samples,
        scratch: RefCell::new(params.clone()),
        eval,
    };

    let initial = DVector::from_iterator(free.len(), free.iter().map(|&id| params.get(id)));
    let bounds: Vec<(f64, f64)> = free.iter().map(|&id| params.bounds(id)).collect();

    let result = solve_lm(&problem, initial, &bounds, options)?;

    for (j, &id) in free.iter().enumerate() {
        params.set(id, result.params[j]);
    }
    info!(
        "fit over {} samples, {} free params: cost {:.6e}, {} iterations, converged = {}",
        samples.len(),
        free.len(),
        result.cost,
        result.iterations,
        result.converged
    );
    Ok(result.converged)
}

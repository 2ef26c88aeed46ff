//! Levenberg-Marquardt nonlinear least squares with box bounds.
//!
//! The device-model equations contain fractional powers and divisions that
//! diverge or go complex outside plausible physical ranges, so every
//! parameter carries a hard [lower, upper] interval. The solver projects
//! each accepted step back into the box and never evaluates the model
//! outside it.

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::linear::solve_dense;

/// A residual vector function r(p). The solver minimizes 0.5 * ||r(p)||^2.
pub trait LeastSquaresProblem {
    /// Number of residual terms.
    fn residual_count(&self) -> usize;

    /// Evaluate residuals at `params` into `out`.
    ///
    /// Returns `false` if the point is invalid (non-finite model output);
    /// the solver treats that as a rejected step and increases damping.
    fn residuals(&self, params: &DVector<f64>, out: &mut DVector<f64>) -> bool;
}

/// Solve options. The defaults match the fitting engine's needs; callers
/// normally only raise `max_iterations` for the stiffer pentode fits.
#[derive(Debug, Clone)]
pub struct LmOptions {
    pub max_iterations: usize,
    /// Relative cost-decrease tolerance.
    pub cost_tolerance: f64,
    /// Infinity-norm step-size tolerance.
    pub step_tolerance: f64,
    /// Infinity-norm gradient tolerance; a point this flat is a minimum.
    pub gradient_tolerance: f64,
    /// Initial damping factor.
    pub initial_lambda: f64,
    /// Consecutive rejected steps before giving up.
    pub max_invalid_steps: usize,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            cost_tolerance: 1e-10,
            step_tolerance: 1e-10,
            gradient_tolerance: 1e-8,
            initial_lambda: 1e-3,
            max_invalid_steps: 20,
        }
    }
}

/// Result of a solve. `converged` must be checked by the caller; the
/// parameter vector is still populated on a failed solve (best point seen).
#[derive(Debug, Clone)]
pub struct LmResult {
    pub params: DVector<f64>,
    pub cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Inclusive box bounds per parameter.
pub type Bounds = Vec<(f64, f64)>;

fn clamp_into(params: &mut DVector<f64>, bounds: &Bounds) {
    for (i, p) in params.iter_mut().enumerate() {
        let (lo, hi) = bounds[i];
        *p = p.clamp(lo, hi);
    }
}

/// Forward-difference Jacobian. Probes flip direction at an active upper
/// bound so the model is never evaluated outside the box.
fn jacobian(
    problem: &dyn LeastSquaresProblem,
    params: &DVector<f64>,
    base: &DVector<f64>,
    bounds: &Bounds,
) -> Option<DMatrix<f64>> {
    let m = problem.residual_count();
    let n = params.len();
    let mut jac = DMatrix::zeros(m, n);
    let mut probe = params.clone();
    let mut r = DVector::zeros(m);

    for j in 0..n {
        let p = params[j];
        let mut h = 1e-6 * p.abs().max(1.0);
        let (lo, hi) = bounds[j];
        if p + h > hi {
            h = -h;
        }
        if p + h < lo {
            // Interval narrower than the probe step; treat as constant.
            continue;
        }
        probe[j] = p + h;
        if !problem.residuals(&probe, &mut r) {
            probe[j] = p;
            return None;
        }
        for i in 0..m {
            jac[(i, j)] = (r[i] - base[i]) / h;
        }
        probe[j] = p;
    }

    Some(jac)
}

/// Run Levenberg-Marquardt from `initial`, constrained to `bounds`.
pub fn solve_lm(
    problem: &dyn LeastSquaresProblem,
    initial: DVector<f64>,
    bounds: &Bounds,
    options: &LmOptions,
) -> Result<LmResult> {
    let m = problem.residual_count();
    let n = initial.len();
    if m == 0 {
        return Err(Error::EmptyProblem);
    }
    if bounds.len() != n {
        return Err(Error::DimensionMismatch {
            expected: n,
            actual: bounds.len(),
        });
    }
    for (i, (lo, hi)) in bounds.iter().enumerate() {
        if lo > hi {
            return Err(Error::InvalidBounds(i));
        }
    }

    let mut params = initial;
    clamp_into(&mut params, bounds);

    let mut residual = DVector::zeros(m);
    if !problem.residuals(&params, &mut residual) {
        return Ok(LmResult {
            params,
            cost: f64::INFINITY,
            iterations: 0,
            converged: false,
        });
    }
    let mut cost = 0.5 * residual.norm_squared();

    let mut lambda = options.initial_lambda;
    let mut invalid_streak = 0usize;
    let mut candidate_residual = DVector::zeros(m);

    for iteration in 0..options.max_iterations {
        let jac = match jacobian(problem, &params, &residual, bounds) {
            Some(j) => j,
            None => {
                lambda *= 10.0;
                invalid_streak += 1;
                if invalid_streak > options.max_invalid_steps {
                    break;
                }
                continue;
            }
        };

        let jtj = jac.transpose() * &jac;
        let jtr = jac.transpose() * &residual;

        // Already at a stationary point; re-solving a converged problem
        // lands here on the first iteration.
        if jtr.amax() <= options.gradient_tolerance {
            debug!("lm gradient flat after {iteration} iterations, cost {cost:.6e}");
            return Ok(LmResult {
                params,
                cost,
                iterations: iteration,
                converged: true,
            });
        }

        // Marquardt scaling: damp along the diagonal of JtJ.
        let mut damped = jtj.clone();
        for i in 0..n {
            damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
        }

        let step = match solve_dense(&damped, &(-&jtr)) {
            Ok(s) => s,
            Err(_) => {
                lambda *= 10.0;
                invalid_streak += 1;
                if invalid_streak > options.max_invalid_steps {
                    break;
                }
                continue;
            }
        };

        let mut candidate = &params + &step;
        clamp_into(&mut candidate, bounds);

        let valid = problem.residuals(&candidate, &mut candidate_residual);
        let candidate_cost = if valid {
            0.5 * candidate_residual.norm_squared()
        } else {
            f64::INFINITY
        };

        if candidate_cost < cost {
            let cost_drop = cost - candidate_cost;
            let step_norm = (&candidate - &params).amax();

            params = candidate;
            std::mem::swap(&mut residual, &mut candidate_residual);
            cost = candidate_cost;
            lambda = (lambda / 10.0).max(1e-12);
            invalid_streak = 0;

            if cost_drop <= options.cost_tolerance * cost.max(1e-30)
                || step_norm <= options.step_tolerance
            {
                debug!("lm converged after {} iterations, cost {cost:.6e}", iteration + 1);
                return Ok(LmResult {
                    params,
                    cost,
                    iterations: iteration + 1,
                    converged: true,
                });
            }
        } else {
            // As damping grows the proposed step shrinks; once it is
            // below the step tolerance no move can improve on this point.
            if valid && step.amax() <= options.step_tolerance {
                debug!("lm step exhausted after {} iterations, cost {cost:.6e}", iteration + 1);
                return Ok(LmResult {
                    params,
                    cost,
                    iterations: iteration + 1,
                    converged: true,
                });
            }
            lambda = (lambda * 10.0).min(1e12);
            invalid_streak += 1;
            if invalid_streak > options.max_invalid_steps {
                break;
            }
        }
    }

    debug!("lm stopped without convergence, cost {cost:.6e}");
    Ok(LmResult {
        params,
        cost,
        iterations: options.max_iterations,
        converged: false,
    })
}

//! Closed-form seeding of model parameters from raw measurement data.
//!
//! The valve equations are nasty nonlinear surfaces; a solver started from
//! arbitrary defaults routinely lands in a local minimum. This module
//! derives plausible starting values directly from the samples so the
//! least-squares refinement begins close to the answer: mu from paired
//! sweep spacing, kg1 and x from a log-log regression, kp from the curve
//! position at cutoff, kvb/kvb1 from the island-effect curvature at low
//! va, and the pentode split parameters from the current shapes at high
//! and low anode voltage.

use log::info;
use valvebench_core::{DeviceType, Measurement, Sweep, TestType};
use valvebench_solver::{LinearFit, QuadraticFit};

use crate::model::Model;
use crate::parameter::ParamId;
use crate::triode::CohenHelieTriode;

/// One-shot heuristic seed. Build, run one of the `estimate_*` entry
/// points, apply to a model, discard.
#[derive(Debug, Clone)]
pub struct Estimate {
    pub mu: f64,
    pub kg1: f64,
    pub x: f64,
    pub kp: f64,
    pub kvb: f64,
    pub kvb1: f64,
    pub vct: f64,
    pub kg2: f64,
    pub a: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub psi: f64,
    pub omega: f64,
    pub lambda: f64,
    pub nu: f64,
    pub s: f64,
    pub ap: f64,
}

impl Default for Estimate {
    fn default() -> Self {
        Self {
            mu: 100.0,
            kg1: 0.7,
            x: 1.5,
            kp: 500.0,
            kvb: 300.0,
            kvb1: 30.0,
            vct: 0.1,
            kg2: 4.5,
            a: 0.0,
            alpha: 0.0,
            beta: 0.1,
            gamma: 1.0,
            psi: 3.0,
            omega: 200.0,
            lambda: 50.0,
            nu: 20.0,
            s: 0.0,
            ap: 0.015,
        }
    }
}

fn clamp(value: f64, lower: f64, upper: f64) -> f64 {
    if !value.is_finite() {
        return lower;
    }
    value.clamp(lower, upper)
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    values.sort_by(|a, b| a.total_cmp(b));
    values[mid]
}

/// Linear interpolation within a sweep for the anode voltage reaching a
/// target current. Returns None when the sweep never reaches it.
fn find_va(sweep: &Sweep, ia_target: f64) -> Option<f64> {
    let mut lower = (0.0, 0.0);
    let mut upper: Option<(f64, f64)> = None;

    for s in sweep.samples() {
        if s.ia < ia_target && s.ia > lower.1 {
            lower = (s.va, s.ia);
        }
        if s.ia >= ia_target && upper.map_or(true, |(_, ia)| s.ia < ia) {
            upper = Some((s.va, s.ia));
        }
    }

    let (upper_va, upper_ia) = upper?;
    let slope = (upper_ia - lower.1) / (upper_va - lower.0);
    Some(lower.0 + (ia_target - lower.1) / slope)
}

/// Counterpart of `find_va`: the current at a target anode voltage.
fn find_ia(sweep: &Sweep, va_target: f64) -> Option<f64> {
    let mut lower = (0.0, 0.0);
    let mut upper: Option<(f64, f64)> = None;

    for s in sweep.samples() {
        if s.va < va_target && s.va > lower.0 {
            lower = (s.va, s.ia);
        }
        if s.va >= va_target && upper.map_or(true, |(va, _)| s.va < va) {
            upper = Some((s.va, s.ia));
        }
    }

    let (upper_va, upper_ia) = upper?;
    let slope = (upper_ia - lower.1) / (upper_va - lower.0);
    Some(lower.1 + (va_target - lower.0) * slope)
}

impl Estimate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the triode parameters from an anode-characteristics run.
    pub fn estimate_triode(&mut self, measurement: &Measurement) {
        self.estimate_mu(measurement);
        self.estimate_kg1_x(measurement);
        self.estimate_kp(measurement);
        self.estimate_kvb_kvb1(measurement);
        info!(
            "triode seed: mu={:.2} kg1={:.4} x={:.3} kp={:.1} kvb={:.1} kvb1={:.2}",
            self.mu, self.kg1, self.x, self.kp, self.kvb, self.kvb1
        );
    }

    /// mu from the horizontal spacing of adjacent sweeps at a fixed low
    /// current: dVa / dVg1 between grid families.
    fn estimate_mu(&mut self, measurement: &Measurement) {
        if measurement.device_type() != DeviceType::Triode
            || measurement.test_type() != TestType::AnodeCharacteristics
        {
            return;
        }
        let sweeps = measurement.sweeps();
        if sweeps.len() < 2 {
            return;
        }

        let i_mu = (measurement.ia_max() * 0.05).max(1.0);
        let mut prev_va = match find_va(&sweeps[0], i_mu) {
            Some(va) => va,
            None => return,
        };
        let mut prev_vg1 = sweeps[0].vg1_nominal();

        let mut values = Vec::new();
        for sweep in &sweeps[1..] {
            let va = match find_va(sweep, i_mu) {
                Some(va) => va,
                // This sweep never reaches i_mu; deeper ones will not either.
                None => break,
            };
            let vg1 = sweep.vg1_nominal();
            if (prev_vg1 - vg1).abs() > 1e-9 {
                values.push((va - prev_va) / (prev_vg1 - vg1));
            }
            prev_va = va;
            prev_vg1 = vg1;
        }

        if !values.is_empty() {
            self.mu = values.iter().sum::<f64>() / values.len() as f64;
        }
    }

    /// kg1 and x from a log-log regression over the high-current region,
    /// where the simple power law dominates: ln(ia) = x*ln(e1) - ln(kg1).
    fn estimate_kg1_x(&mut self, measurement: &Measurement) {
        if measurement.device_type() != DeviceType::Triode {
            return;
        }

        let mut fit = LinearFit::new(1.4, -(0.5f64.ln()));
        let i_thresh = measurement.ia_max() * 0.40;

        for sweep in measurement.sweeps() {
            for s in sweep.samples() {
                if s.ia > i_thresh {
                    let e1 = s.va / self.mu + s.vg1;
                    if e1 > 0.0 {
                        fit.add_sample(e1.ln(), s.ia.ln());
                    }
                }
            }
        }

        fit.solve();
        if fit.converged() {
            self.x = fit.a();
            self.kg1 = (-fit.b()).exp();
        }
    }

    /// kp from the cutoff landmark: at va = -vg1*mu the exponential's
    /// argument is zero, so ia there pins kp given kg1 and x.
    fn estimate_kp(&mut self, measurement: &Measurement) {
        if measurement.device_type() != DeviceType::Triode
            || measurement.test_type() != TestType::AnodeCharacteristics
        {
            return;
        }

        let mut values = Vec::new();
        for sweep in measurement.sweeps() {
            let vg1 = sweep.vg1_nominal();
            if vg1 < -1e-4 {
                let vt = -vg1 * self.mu;
                if let Some(ia) = find_ia(sweep, vt) {
                    if ia > 0.0 {
                        values.push(vt * 2.0f64.ln() / (ia * self.kg1).powf(1.0 / self.x));
                    }
                }
            }
        }

        if !values.is_empty() {
            self.kp = values.iter().sum::<f64>() / values.len() as f64;
        }
    }

    /// kvb and kvb1 from the island effect: at low currents the effective
    /// voltage denominator f = sqrt(kvb + kvb1*va + va^2) can be solved
    /// per sample, and f^2 regressed as a quadratic in va with the
    /// leading coefficient pinned at 1.
    fn estimate_kvb_kvb1(&mut self, measurement: &Measurement) {
        let mut fit = QuadraticFit::new(1.0, 0.0, 0.0);
        fit.set_fixed_a(true);
        fit.set_require_positive(true);

        let i_thresh = measurement.ia_max() * 0.20;

        for sweep in measurement.sweeps() {
            if sweep.vg1_nominal() >= -1e-4 {
                continue;
            }
            for s in sweep.samples() {
                if s.ia > 0.0 && s.ia < i_thresh {
                    let denom = (s.ia * self.kg1).powf(1.0 / self.x) / s.va - 1.0 / self.mu;
                    if denom.abs() > 1e-12 {
                        let f = s.vg1 / denom;
                        fit.add_sample(s.va, f * f);
                    }
                }
            }
        }

        fit.solve();
        if fit.converged() {
            self.kvb1 = fit.b();
            self.kvb = fit.c();
        }
    }

    /// Seed the pentode parameters. With a fitted triode model available
    /// the shared parameters transfer directly and only the split shape
    /// is estimated; without one, everything comes from coarse landmarks
    /// of the measurement itself.
    pub fn estimate_pentode(
        &mut self,
        measurement: &Measurement,
        triode_model: Option<&CohenHelieTriode>,
        secondary_emission: bool,
    ) {
        let triode = match triode_model {
            Some(t) => t,
            None => {
                self.estimate_pentode_from_landmarks(measurement, secondary_emission);
                return;
            }
        };

        let p = triode.params();
        self.mu = p.get(ParamId::Mu);
        self.x = p.get(ParamId::X);
        self.kg1 = p.get(ParamId::Kg1);
        self.kp = p.get(ParamId::Kp);
        self.kvb = p.get(ParamId::Kvb);
        self.kvb1 = p.get(ParamId::Kvb1);
        self.vct = p.get(ParamId::Vct);

        self.estimate_kg2(measurement, triode);
        self.estimate_a(measurement, triode);
        self.estimate_beta_gamma(measurement, triode);

        if secondary_emission {
            self.estimate_secondary(measurement);
        }

        self.clamp_pentode();
        info!(
            "pentode seed: kg2={:.3} a={:.4} beta={:.4} gamma={:.3} psi={:.3}",
            self.kg2, self.a, self.beta, self.gamma, self.psi
        );
    }

    /// kg2 from the sweep tail at high va, where the split is complete
    /// and ig2 = epk / kg2 directly.
    fn estimate_kg2(&mut self, measurement: &Measurement, triode: &CohenHelieTriode) {
        let anode_stop = measurement.anode_range().stop;
        for sweep in measurement.sweeps() {
            let last = match sweep.last() {
                Some(s) => s,
                None => continue,
            };
            if anode_stop > 0.0 && last.va / anode_stop > 0.9 && last.ig2 > 1e-6 {
                self.kg2 = clamp(triode.epk(last.vg2, last.vg1) / last.ig2, 0.1, 15.0);
                return;
            }
        }
        self.kg2 = clamp(self.kg1 * 4.5, 0.1, 15.0);
    }

    /// `a` is the residual cathode-current slope at high va, read from
    /// the last tenth of each sweep.
    fn estimate_a(&mut self, measurement: &Measurement, triode: &CohenHelieTriode) {
        let mut sum = 0.0;
        let mut count = 0usize;

        for sweep in measurement.sweeps() {
            if sweep.len() < 2 {
                continue;
            }
            let epk = triode.epk(sweep.vg2_nominal(), sweep.vg1_nominal());
            if epk <= 1e-9 {
                continue;
            }

            let end = sweep.len() - 1;
            let start = end * 9 / 10;
            let samples = sweep.samples();
            let (s0, s1) = (&samples[start], &samples[end]);
            if (s1.va - s0.va).abs() < 1e-9 {
                continue;
            }

            let slope = ((s1.ia + s1.ig2) - (s0.ia + s0.ig2)) / (s1.va - s0.va);
            sum += slope * self.kg1 / epk;
            count += 1;
        }

        if count > 0 {
            self.a = clamp(sum / count as f64, 0.0, 0.05);
        }
    }

    /// beta and gamma from the knee shape: below the knee
    /// `1/g - 1 = (beta*va)^gamma`, so a log-log line fit on the first
    /// complete sweep yields both.
    fn estimate_beta_gamma(&mut self, measurement: &Measurement, triode: &CohenHelieTriode) {
        let anode_stop = measurement.anode_range().stop;
        let sweep = match measurement.sweeps().iter().find(|s| {
            s.len() >= 10
                && s.last()
                    .map_or(false, |tail| anode_stop <= 0.0 || tail.va >= anode_stop * 0.9)
        }) {
            Some(s) => s,
            None => return,
        };

        let mut fit = LinearFit::new(0.0, 0.0);
        let k = 1.0 / self.kg1 - 1.0 / self.kg2;

        for s in sweep.samples().iter().skip(1) {
            let ia_full = triode.epk(s.vg2, s.vg1) * k;
            if ia_full <= 1e-9 {
                continue;
            }
            let g = 1.0 - s.ia / ia_full;
            if g <= 0.0 || g >= 1.0 {
                continue;
            }
            let x1 = 1.0 / g - 1.0;
            if s.va > 0.0 && x1 > 0.0 && (anode_stop <= 0.0 || s.va < anode_stop / 5.0) {
                fit.add_sample(s.va.ln(), x1.ln());
            }
        }

        fit.solve();
        if fit.converged() {
            self.beta = clamp(fit.b().exp(), 0.01, 0.3);
            self.gamma = clamp(fit.a(), 0.5, 2.0);
        }
    }

    /// Secondary-emission seeds from the screen's share of cathode
    /// current above the knee.
    fn estimate_secondary(&mut self, measurement: &Measurement) {
        let anode_stop = measurement.anode_range().stop;
        let mut sum = 0.0;
        let mut count = 0usize;

        for sweep in measurement.sweeps() {
            let last = match sweep.last() {
                Some(s) => s,
                None => continue,
            };
            if anode_stop > 0.0 && last.va < anode_stop * 0.3 {
                continue;
            }
            let total = last.ia + last.ig2;
            if total > 1e-6 {
                sum += last.ig2 / total;
                count += 1;
            }
        }

        let ratio = if count > 0 { sum / count as f64 } else { 0.02 };
        self.s = clamp(ratio * 0.5, 0.0, 0.5);
        self.ap = clamp(0.01 + ratio * 0.02, 0.005, 0.05);
        self.omega = clamp(150.0 + ratio * 400.0, 50.0, 600.0);
        self.lambda = clamp(40.0 + ratio * 120.0, 10.0, 200.0);
        self.nu = clamp(15.0 + ratio * 40.0, 5.0, 80.0);
    }

    /// Coarse seeds from measurement landmarks alone, for pentode fits
    /// run without a triode model to transfer from.
    fn estimate_pentode_from_landmarks(&mut self, measurement: &Measurement, secondary: bool) {
        let sweeps = measurement.sweeps();

        let vg2_ref = {
            let v: Vec<f64> = sweeps
                .iter()
                .map(|s| s.vg2_nominal())
                .filter(|v| v.is_finite() && *v > 0.0)
                .collect();
            if v.is_empty() {
                250.0
            } else {
                median(v)
            }
        };
        let vg1_min = sweeps
            .iter()
            .map(|s| -s.vg1_nominal().abs())
            .fold(f64::NAN, f64::min);
        let vg1_min = if vg1_min.is_finite() { vg1_min } else { -20.0 };
        let drive = vg1_min.abs();

        let tail = sweeps
            .iter()
            .filter_map(|s| s.last())
            .max_by(|a, b| a.va.total_cmp(&b.va));

        self.mu = clamp(drive * 0.6 + 6.0, 5.0, 18.0);
        self.x = clamp(1.3 + 0.02 * drive, 1.2, 1.6);
        self.kg1 = clamp((drive + 3.0) * 0.08, 0.2, 1.5);
        self.kp = clamp(vg2_ref * 0.7, 40.0, 300.0);
        self.kvb = clamp(vg2_ref, 60.0, 400.0);
        self.kvb1 = clamp(vg2_ref / 20.0, 4.0, 25.0);
        self.vct = clamp(drive * 0.01, 0.0, 1.0);

        match tail {
            Some(t) if t.ig2 > 1e-6 => {
                self.kg2 = clamp(t.ia / t.ig2 * 0.5, 0.1, 15.0);
                self.psi = clamp(t.ig2 / t.ia.max(1e-6), 0.5, 6.0);
                self.s = clamp((t.ia - t.ig2) * 0.002, 0.0, 0.5);
            }
            _ => {
                self.kg2 = clamp(self.kg1 * 5.0, 0.1, 15.0);
                self.psi = 3.0;
                self.s = 0.01;
            }
        }

        self.a = clamp(0.005 + 0.001 * drive, 0.0, 0.05);
        self.beta = clamp(0.08 + 0.002 * drive, 0.02, 0.25);
        self.gamma = clamp(1.2 - 0.01 * drive, 0.7, 1.5);
        self.omega = 200.0;
        self.lambda = 50.0;
        self.nu = 20.0;
        self.ap = 0.015;
        let _ = secondary;
    }

    fn clamp_pentode(&mut self) {
        self.mu = clamp(self.mu, 3.0, 25.0);
        self.x = clamp(self.x, 1.1, 1.8);
        self.kg1 = clamp(self.kg1, 0.05, 5.0);
        self.kp = clamp(self.kp, 20.0, 400.0);
        self.kvb = clamp(self.kvb, 50.0, 600.0);
        self.kvb1 = clamp(self.kvb1, 1.0, 40.0);
        self.vct = clamp(self.vct, 0.0, 3.0);
        self.kg2 = clamp(self.kg2, 0.1, 20.0);
        self.a = clamp(self.a, 0.0, 0.05);
        self.beta = clamp(self.beta, 0.01, 0.3);
        self.gamma = clamp(self.gamma, 0.5, 2.0);
        self.psi = clamp(self.psi, 0.5, 8.0);
        self.omega = clamp(self.omega, 10.0, 800.0);
        self.lambda = clamp(self.lambda, 5.0, 250.0);
        self.nu = clamp(self.nu, 0.0, 120.0);
        self.s = clamp(self.s, 0.0, 1.0);
        self.ap = clamp(self.ap, 0.0, 0.2);
    }

    /// Write the seed into a model's parameter set (clamped by each
    /// parameter's own bounds on the way in).
    pub fn apply(&self, model: &mut dyn Model) {
        let p = model.params_mut();
        p.set(ParamId::Mu, self.mu);
        p.set(ParamId::Kg1, self.kg1);
        p.set(ParamId::X, self.x);
        p.set(ParamId::Kp, self.kp);
        p.set(ParamId::Kvb, self.kvb);
        p.set(ParamId::Kvb1, self.kvb1);
        p.set(ParamId::Vct, self.vct);
        p.set(ParamId::Kg2, self.kg2);
        p.set(ParamId::Kg2a, self.kg2);
        p.set(ParamId::A, self.a);
        p.set(ParamId::Alpha, self.alpha);
        p.set(ParamId::Beta, self.beta);
        p.set(ParamId::Gamma, self.gamma);
        p.set(ParamId::Psi, self.psi);
        p.set(ParamId::Omega, self.omega);
        p.set(ParamId::Lambda, self.lambda);
        p.set(ParamId::Nu, self.nu);
        p.set(ParamId::S, self.s);
        p.set(ParamId::Ap, self.ap);
    }
}

//! Triode model families.
//!
//! Three progressive refinements of the same power law: the simple
//! Child-Langmuir form, Koren's soft-knee variant, and the Cohen-Helie
//! form with the extra kvb1 stabiliser that the pentode models build on.

use valvebench_solver::LmOptions;

use crate::equations::{cohen_helie_epk, koren_epk, simple_triode_current};
use crate::error::Result;
use crate::model::{fit_params, FitSample, Model, ModelKind};
use crate::parameter::{ParamId, ParameterSet};

/// `ia = (va/mu + vg1 + vct)^x / kg1`, zero below cutoff.
pub struct SimpleTriode {
    params: ParameterSet,
    samples: Vec<FitSample>,
    converged: bool,
}

impl SimpleTriode {
    pub fn new() -> Self {
        Self {
            params: ParameterSet::new(),
            samples: Vec::new(),
            converged: false,
        }
    }
}

impl Default for SimpleTriode {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for SimpleTriode {
    fn name(&self) -> &'static str {
        "Simple"
    }

    fn kind(&self) -> ModelKind {
        ModelKind::SimpleTriode
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn json_params(&self) -> &'static [ParamId] {
        &[ParamId::Mu, ParamId::Kg1, ParamId::X, ParamId::Vct]
    }

    fn add_sample(&mut self, sample: FitSample) {
        self.samples.push(sample);
    }

    fn solve(&mut self) -> Result<bool> {
        let free = [ParamId::Kg1, ParamId::Vct, ParamId::X, ParamId::Mu];
        self.converged = fit_params(
            &mut self.params,
            &free,
            &self.samples,
            &LmOptions::default(),
            |p, s| {
                simple_triode_current(
                    s.va,
                    s.vg1,
                    p.get(ParamId::Mu),
                    p.get(ParamId::Kg1),
                    p.get(ParamId::X),
                    p.get(ParamId::Vct),
                )
            },
        )?;
        Ok(self.converged)
    }

    fn converged(&self) -> bool {
        self.converged
    }

    fn anode_current(&self, va: f64, vg1: f64, _vg2: f64) -> f64 {
        simple_triode_current(
            va,
            vg1,
            self.params.get(ParamId::Mu),
            self.params.get(ParamId::Kg1),
            self.params.get(ParamId::X),
            self.params.get(ParamId::Vct),
        )
    }
}

/// Koren triode: soft knee via `ln(1+exp)`, no contact potential.
pub struct KorenTriode {
    params: ParameterSet,
    samples: Vec<FitSample>,
    converged: bool,
}

impl KorenTriode {
    pub fn new() -> Self {
        Self {
            params: ParameterSet::new(),
            samples: Vec::new(),
            converged: false,
        }
    }
}

impl Default for KorenTriode {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for KorenTriode {
    fn name(&self) -> &'static str {
        "Koren"
    }

    fn kind(&self) -> ModelKind {
        ModelKind::KorenTriode
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn json_params(&self) -> &'static [ParamId] {
        &[
            ParamId::Mu,
            ParamId::Kg1,
            ParamId::X,
            ParamId::Kp,
            ParamId::Kvb,
        ]
    }

    fn add_sample(&mut self, sample: FitSample) {
        self.samples.push(sample);
    }

    fn solve(&mut self) -> Result<bool> {
        let free = [
            ParamId::Kg1,
            ParamId::Kp,
            ParamId::Kvb,
            ParamId::X,
            ParamId::Mu,
        ];
        self.converged = fit_params(
            &mut self.params,
            &free,
            &self.samples,
            &LmOptions::default(),
            |p, s| {
                koren_epk(
                    s.va,
                    s.vg1,
                    p.get(ParamId::Kp),
                    p.get(ParamId::Kvb),
                    p.get(ParamId::X),
                    p.get(ParamId::Mu),
                ) / p.get(ParamId::Kg1)
            },
        )?;
        Ok(self.converged)
    }

    fn converged(&self) -> bool {
        self.converged
    }

    fn anode_current(&self, va: f64, vg1: f64, _vg2: f64) -> f64 {
        koren_epk(
            va,
            vg1,
            self.params.get(ParamId::Kp),
            self.params.get(ParamId::Kvb),
            self.params.get(ParamId::X),
            self.params.get(ParamId::Mu),
        ) / self.params.get(ParamId::Kg1)
    }
}

/// Cohen-Helie triode: the Koren form with a contact potential and the
/// linear kvb1 term stabilising the effective-voltage denominator.
pub struct CohenHelieTriode {
    params: ParameterSet,
    samples: Vec<FitSample>,
    converged: bool,
}

impl CohenHelieTriode {
    pub fn new() -> Self {
        let mut params = ParameterSet::new();
        params.set_limits(ParamId::Vct, 0.0, 2.0);
        Self {
            params,
            samples: Vec::new(),
            converged: false,
        }
    }

    /// The effective-voltage term at (v, vg) with this model's current
    /// parameters. The pentode estimators evaluate this with the screen
    /// voltage as the controlling electrode.
    pub fn epk(&self, v: f64, vg: f64) -> f64 {
        cohen_helie_epk(
            v,
            vg,
            self.params.get(ParamId::Kp),
            self.params.get(ParamId::Kvb),
            self.params.get(ParamId::Kvb1),
            self.params.get(ParamId::Vct),
            self.params.get(ParamId::X),
            self.params.get(ParamId::Mu),
        )
    }
}

impl Default for CohenHelieTriode {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for CohenHelieTriode {
    fn name(&self) -> &'static str {
        "Cohen Helie"
    }

    fn kind(&self) -> ModelKind {
        ModelKind::CohenHelieTriode
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn json_params(&self) -> &'static [ParamId] {
        &[
            ParamId::Mu,
            ParamId::Kg1,
            ParamId::X,
            ParamId::Kp,
            ParamId::Kvb,
            ParamId::Kvb1,
            ParamId::Vct,
        ]
    }

    fn add_sample(&mut self, sample: FitSample) {
        self.samples.push(sample);
    }

    fn solve(&mut self) -> Result<bool> {
        let free = [
            ParamId::Kg1,
            ParamId::Kp,
            ParamId::Kvb,
            ParamId::Kvb1,
            ParamId::Vct,
            ParamId::X,
            ParamId::Mu,
        ];
        let options = LmOptions {
            max_iterations: 400,
            ..LmOptions::default()
        };
        self.converged = fit_params(
            &mut self.params,
            &free,
            &self.samples,
            &options,
            |p, s| {
                cohen_helie_epk(
                    s.va,
                    s.vg1,
                    p.get(ParamId::Kp),
                    p.get(ParamId::Kvb),
                    p.get(ParamId::Kvb1),
                    p.get(ParamId::Vct),
                    p.get(ParamId::X),
                    p.get(ParamId::Mu),
                ) / p.get(ParamId::Kg1)
            },
        )?;
        Ok(self.converged)
    }

    fn converged(&self) -> bool {
        self.converged
    }

    fn anode_current(&self, va: f64, vg1: f64, _vg2: f64) -> f64 {
        self.epk(va, vg1) / self.params.get(ParamId::Kg1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_triode_cutoff() {
        let model = SimpleTriode::new();
        assert_eq!(model.anode_current(50.0, -60.0, 0.0), 0.0);
    }

    #[test]
    fn test_cohen_helie_grid_ordering() {
        let mut model = CohenHelieTriode::new();
        model.params_mut().set(ParamId::Mu, 90.0);
        model.params_mut().set(ParamId::Kg1, 0.8);
        model.params_mut().set(ParamId::Kp, 600.0);
        model.params_mut().set(ParamId::Kvb, 300.0);
        model.params_mut().set(ParamId::Kvb1, 24.0);
        model.params_mut().set(ParamId::Vct, 0.2);
        model.params_mut().set(ParamId::X, 1.4);

        let ia0 = model.anode_current(250.0, 0.0, 0.0);
        let ia2 = model.anode_current(250.0, -2.0, 0.0);
        let ia6 = model.anode_current(250.0, -6.0, 0.0);
        assert!(ia0 > ia2 && ia2 > ia6, "current must fall with grid drive");
    }

    #[test]
    fn test_anode_voltage_inverts_current() {
        let mut model = SimpleTriode::new();
        model.params_mut().set(ParamId::Mu, 20.0);
        model.params_mut().set(ParamId::Kg1, 0.9);
        model.params_mut().set(ParamId::X, 1.5);
        model.params_mut().set(ParamId::Vct, 0.2);

        for &ia in &[1.0, 10.0, 50.0] {
            let va = model.anode_voltage(ia, -2.0, 0.0);
            let back = model.anode_current(va, -2.0, 0.0);
            assert!(
                (back - ia).abs() < 0.01,
                "round trip for {ia} mA gave {back} mA at va = {va}"
            );
        }
    }

    #[test]
    fn test_small_signal_validity() {
        let mut model = SimpleTriode::new();
        model.params_mut().set(ParamId::Mu, 20.0);
        model.params_mut().set(ParamId::Kg1, 0.9);

        let op = model.small_signal(250.0, -4.0, 0.0);
        assert!(op.valid);
        assert!(op.gm > 0.0 && op.ra > 0.0);
        assert!((op.mu - op.gm * op.ra).abs() < 1e-12);

        // Deep cutoff: flat characteristic, must flag invalid.
        let cut = model.small_signal(10.0, -80.0, 0.0);
        assert!(!cut.valid);
        assert_eq!(cut.gm, 0.0);
    }
}

//! Bounded model parameters.
//!
//! Every coefficient in the valve equations carries a hard inclusive
//! [lower, upper] interval, enforced on every write. The equations contain
//! divisions and fractional powers that diverge or go complex outside
//! plausible physical ranges, so the value is never allowed to leave the
//! interval, whether set by a fit, a JSON load, or a manual tweak.

use log::warn;

/// Index into a [`ParameterSet`]. The models form a refinement chain: the
/// richer variants reuse the simpler variants' parameters and only add
/// their own, so one shared index space covers every model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    Mu,
    Kg1,
    X,
    Kp,
    Kvb,
    Kvb1,
    Vct,
    Kg2,
    Kg2a,
    A,
    Alpha,
    Beta,
    Gamma,
    Os,
    Tau,
    Rho,
    Theta,
    Psi,
    Omega,
    Lambda,
    Nu,
    S,
    Ap,
}

impl ParamId {
    pub const COUNT: usize = 23;

    pub const ALL: [ParamId; Self::COUNT] = [
        ParamId::Mu,
        ParamId::Kg1,
        ParamId::X,
        ParamId::Kp,
        ParamId::Kvb,
        ParamId::Kvb1,
        ParamId::Vct,
        ParamId::Kg2,
        ParamId::Kg2a,
        ParamId::A,
        ParamId::Alpha,
        ParamId::Beta,
        ParamId::Gamma,
        ParamId::Os,
        ParamId::Tau,
        ParamId::Rho,
        ParamId::Theta,
        ParamId::Psi,
        ParamId::Omega,
        ParamId::Lambda,
        ParamId::Nu,
        ParamId::S,
        ParamId::Ap,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Key used for this parameter in device preset JSON.
    pub fn json_key(self) -> &'static str {
        match self {
            ParamId::Mu => "mu",
            ParamId::Kg1 => "kg1",
            ParamId::X => "x",
            ParamId::Kp => "kp",
            ParamId::Kvb => "kvb",
            ParamId::Kvb1 => "kvb1",
            ParamId::Vct => "vct",
            ParamId::Kg2 => "kg2",
            ParamId::Kg2a => "kg2a",
            ParamId::A => "a",
            ParamId::Alpha => "alpha",
            ParamId::Beta => "beta",
            ParamId::Gamma => "gamma",
            ParamId::Os => "os",
            ParamId::Tau => "tau",
            ParamId::Rho => "rho",
            ParamId::Theta => "theta",
            ParamId::Psi => "psi",
            ParamId::Omega => "omega",
            ParamId::Lambda => "lambda",
            ParamId::Nu => "nu",
            ParamId::S => "s",
            ParamId::Ap => "ap",
        }
    }
}

/// One named scalar coefficient with its clamp interval.
#[derive(Debug, Clone)]
pub struct Parameter {
    value: f64,
    lower: f64,
    upper: f64,
}

impl Parameter {
    fn new(value: f64, lower: f64, upper: f64) -> Self {
        Self {
            value: value.clamp(lower, upper),
            lower,
            upper,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }
}

/// The full array of model parameters, registered eagerly at construction
/// with default values and bounds. Bounds can be narrowed per model family
/// but are always present, so there is no window in which an unbounded
/// value can be written.
#[derive(Debug, Clone)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    /// Defaults per parameter: (initial, lower, upper).
    fn defaults(id: ParamId) -> (f64, f64, f64) {
        match id {
            ParamId::Mu => (100.0, 1.0, 1000.0),
            ParamId::Kg1 => (0.7, 1e-7, 1000.0),
            ParamId::X => (1.5, 1.0, 2.0),
            ParamId::Kp => (500.0, 1.0, 10000.0),
            ParamId::Kvb => (300.0, 0.1, 10000.0),
            ParamId::Kvb1 => (30.0, 0.0, 1000.0),
            ParamId::Vct => (0.1, -2.0, 2.0),
            ParamId::Kg2 => (4.5, 1e-4, 100.0),
            ParamId::Kg2a => (4.5, 1e-4, 100.0),
            ParamId::A => (0.0, 0.0, 0.05),
            ParamId::Alpha => (0.0, 0.0, 10.0),
            ParamId::Beta => (0.1, 1e-5, 10.0),
            ParamId::Gamma => (1.0, 0.5, 2.0),
            ParamId::Os => (0.0, 0.0, 1.0),
            ParamId::Tau => (0.0, 0.0, 10.0),
            ParamId::Rho => (0.1, 1e-5, 10.0),
            ParamId::Theta => (1.0, 0.3, 3.0),
            ParamId::Psi => (3.0, 0.5, 8.0),
            ParamId::Omega => (200.0, 10.0, 800.0),
            ParamId::Lambda => (50.0, 5.0, 250.0),
            ParamId::Nu => (20.0, 0.0, 120.0),
            ParamId::S => (0.0, 0.0, 1.0),
            ParamId::Ap => (0.015, 0.0, 0.2),
        }
    }

    pub fn new() -> Self {
        let params = ParamId::ALL
            .iter()
            .map(|&id| {
                let (value, lower, upper) = Self::defaults(id);
                Parameter::new(value, lower, upper)
            })
            .collect();
        Self { params }
    }

    pub fn get(&self, id: ParamId) -> f64 {
        self.params[id.index()].value
    }

    pub fn parameter(&self, id: ParamId) -> &Parameter {
        &self.params[id.index()]
    }

    /// Set a value, clamping to the parameter's bounds.
    pub fn set(&mut self, id: ParamId, value: f64) {
        let p = &mut self.params[id.index()];
        let clamped = value.clamp(p.lower, p.upper);
        if clamped != value && value.is_finite() {
            warn!(
                "{} = {value} clamped to {clamped} (bounds [{}, {}])",
                id.json_key(),
                p.lower,
                p.upper
            );
        }
        p.value = if value.is_finite() { clamped } else { p.value };
    }

    /// Write without clamping. Reserved for the solver, which enforces
    /// the same bounds itself by step projection.
    pub(crate) fn set_unchecked(&mut self, id: ParamId, value: f64) {
        self.params[id.index()].value = value;
    }

    /// Narrow the clamp interval, re-clamping the current value.
    pub fn set_limits(&mut self, id: ParamId, lower: f64, upper: f64) {
        let p = &mut self.params[id.index()];
        p.lower = lower;
        p.upper = upper;
        p.value = p.value.clamp(lower, upper);
    }

    pub fn bounds(&self, id: ParamId) -> (f64, f64) {
        let p = &self.params[id.index()];
        (p.lower, p.upper)
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clamps_to_bounds() {
        let mut params = ParameterSet::new();

        params.set(ParamId::X, 5.0);
        assert_eq!(params.get(ParamId::X), 2.0, "over upper clamps to upper");

        params.set(ParamId::X, 0.2);
        assert_eq!(params.get(ParamId::X), 1.0, "under lower clamps to lower");

        params.set(ParamId::X, 1.4);
        assert_eq!(params.get(ParamId::X), 1.4, "in-range passes through");
    }

    #[test]
    fn test_non_finite_write_is_ignored() {
        let mut params = ParameterSet::new();
        let before = params.get(ParamId::Mu);

        params.set(ParamId::Mu, f64::NAN);
        assert_eq!(params.get(ParamId::Mu), before);
    }

    #[test]
    fn test_narrowing_limits_reclamps() {
        let mut params = ParameterSet::new();
        params.set(ParamId::Vct, 1.8);

        params.set_limits(ParamId::Vct, 0.0, 1.0);
        assert_eq!(params.get(ParamId::Vct), 1.0);

        params.set(ParamId::Vct, -0.5);
        assert_eq!(params.get(ParamId::Vct), 0.0, "new lower bound applies");
    }

    #[test]
    fn test_every_parameter_starts_in_bounds() {
        let params = ParameterSet::new();
        for id in ParamId::ALL {
            let (lower, upper) = params.bounds(id);
            let v = params.get(id);
            assert!(
                v >= lower && v <= upper,
                "{} default {v} outside [{lower}, {upper}]",
                id.json_key()
            );
        }
    }
}

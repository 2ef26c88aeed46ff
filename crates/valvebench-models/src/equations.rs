//! Closed-form valve current equations shared across model families.
//!
//! All families build on the Child-Langmuir-derived effective grid
//! voltage: the simple power law, Koren's soft-knee refinement, and the
//! Cohen-Helie stabilised form that the pentode models reuse with the
//! screen grid standing in for the anode. Keeping these as free functions
//! lets each model compose the pieces it needs instead of inheriting.

/// Cohen-Helie effective-voltage term raised to the power-law exponent.
///
/// `v` is the controlling electrode voltage: the anode for triodes, the
/// screen grid for pentodes. Returns 0 for any operating point where the
/// equation leaves its valid region (negative base, overflow, non-finite
/// inputs) so callers can treat cutoff uniformly.
pub fn cohen_helie_epk(
    v: f64,
    vg: f64,
    kp: f64,
    kvb: f64,
    kvb1: f64,
    vct: f64,
    x: f64,
    mu: f64,
) -> f64 {
    if !(v.is_finite() && vg.is_finite()) {
        return 0.0;
    }

    let f = (kvb + kvb1 * v + v * v).max(0.0).sqrt();
    if f == 0.0 {
        return 0.0;
    }

    // Cap the exponent so exp() cannot overflow; ln(1+e^y) ~ y there anyway.
    let y = (kp * (1.0 / mu + (vg + vct) / f)).min(50.0);
    let ep = (v / kp) * (1.0 + y.exp()).ln();
    if ep <= 0.0 {
        return 0.0;
    }

    let epk = ep.powf(x);
    if !epk.is_finite() || epk > 1e6 {
        return 0.0;
    }
    epk
}

/// Koren effective-voltage term (no vct offset, no kvb1 stabiliser).
pub fn koren_epk(va: f64, vg: f64, kp: f64, kvb: f64, x: f64, mu: f64) -> f64 {
    let f = (kvb + va * va).sqrt();
    let y = kp * (1.0 / mu + vg / f);
    let et = ((va / kp) * (1.0 + y.exp()).ln()).max(0.0);
    et.powf(x)
}

/// Simple power-law triode current in mA. Zero below cutoff.
pub fn simple_triode_current(va: f64, vg1: f64, mu: f64, kg1: f64, x: f64, vct: f64) -> f64 {
    let e1t = va / mu + vg1 + vct;
    if e1t > 0.0 {
        e1t.powf(x) / kg1
    } else {
        0.0
    }
}

/// Gardiner current-distribution factor g(va): the fraction of cathode
/// current still landing on the screen. 1 at va = 0, falling towards 0 as
/// the anode takes over.
pub fn gardiner_g(va: f64, vg1: f64, alpha: f64, beta: f64, gamma: f64) -> f64 {
    let shift = beta * (1.0 - alpha * vg1);
    let g = (-((shift * va).powf(gamma))).exp();
    // powf goes NaN for a negative base with fractional gamma (va = 0 with
    // subnormal rounding, or a pathological shift); that point is fully
    // screen-directed.
    if g.is_finite() {
        g
    } else {
        1.0
    }
}

/// Screen-side distribution factor h(va) with its own shape parameters.
pub fn gardiner_h(va: f64, vg1: f64, tau: f64, rho: f64, theta: f64) -> f64 {
    let shift = rho * (1.0 - tau * vg1);
    let h = (-((shift * va).powf(theta))).exp();
    if h.is_finite() {
        h
    } else {
        1.0
    }
}

/// Secondary-emission term: the knee-region current transferred from
/// anode to screen, gated by a tanh step centred on the crossover voltage
/// `vg2/lambda - nu*vg1 - omega`.
pub fn secondary_emission(
    va: f64,
    vg1: f64,
    vg2: f64,
    omega: f64,
    lambda: f64,
    nu: f64,
    s: f64,
    ap: f64,
) -> f64 {
    let vco = vg2 / lambda - nu * vg1 - omega;
    s * va * (1.0 + (-ap * (va - vco)).tanh())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epk_zero_below_cutoff() {
        // Deep cutoff: vg far more negative than va/mu can lift.
        let epk = cohen_helie_epk(10.0, -50.0, 600.0, 300.0, 24.0, 0.2, 1.4, 90.0);
        assert!(epk.abs() < 1e-9, "expected cutoff, got {epk}");
    }

    #[test]
    fn test_epk_monotonic_in_grid_drive() {
        let at = |vg: f64| cohen_helie_epk(250.0, vg, 600.0, 300.0, 24.0, 0.2, 1.4, 90.0);
        assert!(at(0.0) > at(-1.0), "less negative grid passes more current");
        assert!(at(-1.0) > at(-2.0));
    }

    #[test]
    fn test_epk_rejects_non_finite_inputs() {
        assert_eq!(
            cohen_helie_epk(f64::NAN, 0.0, 600.0, 300.0, 24.0, 0.2, 1.4, 90.0),
            0.0
        );
    }

    #[test]
    fn test_simple_triode_cutoff_and_power_law() {
        assert_eq!(simple_triode_current(100.0, -10.0, 20.0, 0.7, 1.5, 0.1), 0.0);

        let ia = simple_triode_current(200.0, -2.0, 20.0, 0.7, 1.5, 0.1);
        let expected = (200.0 / 20.0 - 2.0 + 0.1_f64).powf(1.5) / 0.7;
        assert!((ia - expected).abs() < 1e-12);
    }

    #[test]
    fn test_gardiner_g_limits() {
        // At va = 0 all current lands on the screen.
        assert!((gardiner_g(0.0, -10.0, 0.02, 0.1, 1.2) - 1.0).abs() < 1e-12);
        // At high va the anode dominates.
        assert!(gardiner_g(400.0, -10.0, 0.02, 0.1, 1.2) < 0.01);
    }

    #[test]
    fn test_secondary_emission_fades_at_high_va() {
        let low = secondary_emission(50.0, -5.0, 250.0, 200.0, 50.0, 20.0, 0.1, 0.02);
        let high = secondary_emission(600.0, -5.0, 250.0, 200.0, 50.0, 20.0, 0.1, 0.02);
        // The tanh gate passes near the crossover and suppresses far above it.
        assert!(low / 50.0 > high / 600.0, "per-volt psec must decay past the knee");
    }
}

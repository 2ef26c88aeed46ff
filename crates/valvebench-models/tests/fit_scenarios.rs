//! End-to-end fitting scenarios against synthetic reference devices.

use valvebench_core::{AxisRange, DeviceType, Measurement, Sample, TestType};
use valvebench_models::{CohenHelieTriode, Estimate, Model, ParamId};

/// Reference Cohen-Helie parameters used across these scenarios.
const MU: f64 = 90.0;
const KG1: f64 = 1.2e-6;
const X: f64 = 1.4;
const KP: f64 = 600.0;
const KVB: f64 = 300.0;
const KVB1: f64 = 24.0;
const VCT: f64 = 0.2;

fn reference_model() -> CohenHelieTriode {
    let mut model = CohenHelieTriode::new();
    let p = model.params_mut();
    p.set(ParamId::Mu, MU);
    p.set(ParamId::Kg1, KG1);
    p.set(ParamId::X, X);
    p.set(ParamId::Kp, KP);
    p.set(ParamId::Kvb, KVB);
    p.set(ParamId::Kvb1, KVB1);
    p.set(ParamId::Vct, VCT);
    model
}

/// Anode characteristics sampled from the reference model: grid families
/// 0 to -8 V, anode 0 to 400 V in 10 V steps.
fn reference_measurement() -> Measurement {
    let reference = reference_model();

    let mut m = Measurement::new(DeviceType::Triode, TestType::AnodeCharacteristics);
    m.set_ranges(
        AxisRange::new(0.0, 400.0, 10.0),
        AxisRange::new(0.0, 8.0, 1.0),
        AxisRange::new(0.0, 0.0, 0.0),
    );

    let mut ia_peak = 0.0f64;
    for &vg1 in &[0.0, -1.0, -2.0, -4.0, -6.0, -8.0] {
        m.next_sweep(vg1, 0.0);
        for i in 0..=40 {
            let va = 10.0 * i as f64;
            let ia = reference.anode_current(va, vg1, 0.0);
            ia_peak = ia_peak.max(ia);
            m.add_sample(Sample::new(vg1, va, ia, 0.0, 0.0, 6.3, 0.3));
        }
    }
    m.set_limits(ia_peak, f64::INFINITY);
    m
}

fn assert_within(actual: f64, expected: f64, rel: f64, name: &str) {
    assert!(
        (actual - expected).abs() / expected.abs() < rel,
        "{name} = {actual}, expected {expected} within {:.0}%",
        rel * 100.0
    );
}

#[test]
fn test_cohen_helie_parameter_recovery() {
    let measurement = reference_measurement();

    let mut estimate = Estimate::new();
    estimate.estimate_triode(&measurement);

    let mut model = CohenHelieTriode::new();
    estimate.apply(&mut model);
    model.params_mut().set(ParamId::Vct, VCT);
    model.add_measurement(&measurement);

    let converged = model.solve().expect("solve must not error");
    assert!(converged, "fit must converge on its own synthetic data");

    let p = model.params();
    assert_within(p.get(ParamId::Mu), MU, 0.05, "mu");
    assert_within(p.get(ParamId::Kg1), KG1, 0.05, "kg1");
    assert_within(p.get(ParamId::X), X, 0.05, "x");
    assert_within(p.get(ParamId::Kp), KP, 0.05, "kp");
    assert_within(p.get(ParamId::Kvb), KVB, 0.05, "kvb");
    assert_within(p.get(ParamId::Kvb1), KVB1, 0.05, "kvb1");
}

#[test]
fn test_anode_voltage_inversion_composes_with_current() {
    let model = reference_model();

    for &vg1 in &[-2.0, -6.0] {
        for &ia in &[1.0, 10.0, 50.0] {
            let va = model.anode_voltage(ia, vg1, 0.0);
            let back = model.anode_current(va, vg1, 0.0);
            assert!(
                (back - ia).abs() < 0.01,
                "anode_current(anode_voltage({ia}, {vg1})) = {back} at va = {va}"
            );
        }
    }
}

#[test]
fn test_fit_is_idempotent() {
    let measurement = reference_measurement();

    let mut estimate = Estimate::new();
    estimate.estimate_triode(&measurement);

    let mut model = CohenHelieTriode::new();
    estimate.apply(&mut model);
    model.params_mut().set(ParamId::Vct, VCT);
    model.add_measurement(&measurement);
    assert!(model.solve().unwrap());

    let first: Vec<f64> = model
        .json_params()
        .iter()
        .map(|&id| model.params().get(id))
        .collect();

    // Re-solving an already converged model over the same samples must
    // stay where it is, not wander off.
    assert!(model.solve().unwrap());
    for (&id, &before) in model.json_params().iter().zip(&first) {
        let after = model.params().get(id);
        assert!(
            (after - before).abs() <= before.abs() * 1e-3 + 1e-12,
            "{} moved from {before} to {after} on re-solve",
            id.json_key()
        );
    }
}

#[test]
fn test_parameter_writes_are_clamped() {
    let mut model = CohenHelieTriode::new();

    model.params_mut().set(ParamId::X, 99.0);
    assert_eq!(model.params().get(ParamId::X), 2.0);

    model.params_mut().set(ParamId::Mu, 0.0);
    assert_eq!(model.params().get(ParamId::Mu), 1.0);

    // Cohen-Helie narrows vct to [0, 2].
    model.params_mut().set(ParamId::Vct, -1.0);
    assert_eq!(model.params().get(ParamId::Vct), 0.0);
}

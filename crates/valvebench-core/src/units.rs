//! ADC/DAC code conversion for the analyser board.
//!
//! The hardware exposes raw converter codes over the wire; every electrode
//! has its own resistor network and reference voltage, so the scale factors
//! differ per electrode. All conversions are pure functions of the session
//! calibration -- there is no module-level state.

use serde::{Deserialize, Serialize};

/// The four driven/measured electrodes of the analyser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Electrode {
    Heater,
    Grid,
    Anode,
    Screen,
}

/// Per-session calibration constants.
///
/// `is_mega` is learned from the hardware-info query at session startup,
/// never configured by the user. The Mega board revision runs the slave
/// ADC from the master reference and adds a high-gain current channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Calibration {
    pub v_ref_master: f64,
    pub v_ref_slave: f64,
    pub is_mega: bool,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            v_ref_master: 4.096,
            v_ref_slave: 2.048,
            is_mega: false,
        }
    }
}

/// Anode/screen voltage-sense network resistance, in kilohms.
///
/// Current flowing through the sense divider itself shows up as anode
/// current and must be subtracted after conversion.
pub const SENSE_NETWORK_KOHM: f64 = 1419.4;

/// Heater-current compensation for the unbuffered ADC measurement path.
const HEATER_CURRENT_FACTOR: f64 = 1.4;

/// Bidirectional code/physical-unit converter for one analyser session.
#[derive(Debug, Clone, Copy)]
pub struct UnitConverter {
    cal: Calibration,
}

impl UnitConverter {
    pub fn new(cal: Calibration) -> Self {
        Self { cal }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.cal
    }

    /// Mark the session as running on Mega-revision hardware.
    pub fn set_mega(&mut self, is_mega: bool) {
        self.cal.is_mega = is_mega;
    }

    /// Slave ADC reference; the Mega revision ties it to the master rail.
    fn v_ref_slave(&self) -> f64 {
        if self.cal.is_mega {
            self.cal.v_ref_master
        } else {
            self.cal.v_ref_slave
        }
    }

    /// Convert a requested electrode voltage to a DAC code.
    ///
    /// The grid is always driven negative; its code encodes the magnitude.
    /// No clamping is performed -- range checks are the caller's job.
    pub fn target_code(&self, electrode: Electrode, voltage: f64) -> i32 {
        match electrode {
            Electrode::Heater => (voltage * 1023.0 * 470.0 / 3770.0 / self.v_ref_slave()) as i32,
            Electrode::Anode | Electrode::Screen => {
                (voltage * 1023.0 * 9400.0 / 1_419_400.0 / self.cal.v_ref_master) as i32
            }
            Electrode::Grid => (voltage * 4095.0 / 16.5 / self.cal.v_ref_master) as i32,
        }
    }

    /// Convert a measured ADC code back to volts. Exact inverse of the
    /// `target_code` scale per electrode; grid readings come back negated.
    pub fn measured_voltage(&self, electrode: Electrode, code: i32) -> f64 {
        let code = code as f64;
        match electrode {
            Electrode::Heater => code / 1023.0 / 470.0 * 3770.0 * self.v_ref_slave(),
            Electrode::Anode | Electrode::Screen => {
                code / 1023.0 / 9400.0 * 1_419_400.0 * self.cal.v_ref_master
            }
            Electrode::Grid => -(code / 4095.0 * 16.5 * self.cal.v_ref_master),
        }
    }

    /// Convert measured current codes to milliamps.
    ///
    /// Anode and screen measurements arrive as three codes at different
    /// gains to extend dynamic range. The high-gain auxiliary channel only
    /// exists on Mega hardware; it is preferred whenever it is unsaturated.
    /// Below the mid channel's saturation edge (~2.048 V, tested with a
    /// safety margin as `code < 1000`) the mid channel is used, otherwise
    /// the low-gain channel.
    pub fn measured_current(
        &self,
        electrode: Electrode,
        code: i32,
        code_lo: i32,
        code_hi: i32,
    ) -> f64 {
        match electrode {
            Electrode::Heater => {
                code as f64 / 1023.0 / 0.22 * self.v_ref_slave() * HEATER_CURRENT_FACTOR
            }
            Electrode::Anode | Electrode::Screen => {
                let channel_volts = |c: i32| c as f64 / 1023.0 / 2.0 * self.cal.v_ref_master;
                let amps = if self.cal.is_mega && code_hi < 1023 {
                    channel_volts(code_hi) / 333.333_333
                } else if code < 1000 {
                    channel_volts(code) / 33.333_333
                } else {
                    channel_volts(code_lo) / 3.333_333
                };
                amps * 1000.0
            }
            // The grid draws no current in normal operation.
            Electrode::Grid => 0.0,
        }
    }

    /// Remove the current drawn by the anode voltage-sense network from a
    /// converted anode current. Very low true currents can go slightly
    /// negative after subtraction and are clamped to zero.
    pub fn anode_current_corrected(&self, va: f64, ia_ma: f64) -> f64 {
        (ia_ma - va / SENSE_NETWORK_KOHM).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> UnitConverter {
        UnitConverter::new(Calibration::default())
    }

    /// One quantization step, expressed in volts, for an electrode.
    fn lsb(c: &UnitConverter, electrode: Electrode) -> f64 {
        (c.measured_voltage(electrode, 1) - c.measured_voltage(electrode, 0)).abs()
    }

    #[test]
    fn test_round_trip_all_electrodes() {
        let c = converter();
        let cases = [
            (Electrode::Heater, vec![2.0, 6.3, 12.6]),
            (Electrode::Anode, vec![50.0, 100.0, 300.0, 500.0]),
            (Electrode::Screen, vec![50.0, 150.0, 300.0]),
            (Electrode::Grid, vec![1.0, 5.0, 20.0, 50.0]),
        ];
        for (electrode, voltages) in cases {
            for v in voltages {
                let code = c.target_code(electrode, v);
                let back = c.measured_voltage(electrode, code).abs();
                let tol = lsb(&c, electrode);
                assert!(
                    (back - v).abs() <= tol,
                    "{electrode:?}: {v} V -> code {code} -> {back} V (tol {tol})"
                );
            }
        }
    }

    #[test]
    fn test_grid_reads_negative() {
        let c = converter();
        let code = c.target_code(Electrode::Grid, 10.0);
        assert!(code > 0, "grid code encodes magnitude: {code}");
        assert!(
            c.measured_voltage(Electrode::Grid, code) < 0.0,
            "grid voltage is always negative"
        );
    }

    #[test]
    fn test_current_channel_selection() {
        let c = converter();
        // Mid channel well below saturation.
        let mid = c.measured_current(Electrode::Anode, 500, 800, 1023);
        let expected = 500.0 / 1023.0 / 2.0 * 4.096 / 33.333_333 * 1000.0;
        assert!((mid - expected).abs() < 1e-9, "mid channel: {mid}");

        // Saturated mid channel falls back to the low-gain channel.
        let lo = c.measured_current(Electrode::Anode, 1010, 400, 1023);
        let expected_lo = 400.0 / 1023.0 / 2.0 * 4.096 / 3.333_333 * 1000.0;
        assert!((lo - expected_lo).abs() < 1e-9, "lo channel: {lo}");
    }

    #[test]
    fn test_mega_prefers_high_gain_channel() {
        let mut c = converter();
        c.set_mega(true);
        let hi = c.measured_current(Electrode::Anode, 500, 800, 600);
        let expected = 600.0 / 1023.0 / 2.0 * 4.096 / 333.333_333 * 1000.0;
        assert!((hi - expected).abs() < 1e-9, "hi channel: {hi}");

        // A saturated high-gain channel is ignored even on Mega hardware.
        let mid = c.measured_current(Electrode::Anode, 500, 800, 1023);
        let expected_mid = 500.0 / 1023.0 / 2.0 * 4.096 / 33.333_333 * 1000.0;
        assert!((mid - expected_mid).abs() < 1e-9, "mid fallback: {mid}");
    }

    #[test]
    fn test_heater_current_compensation() {
        let c = converter();
        let ih = c.measured_current(Electrode::Heater, 200, 0, 0);
        let uncompensated = 200.0 / 1023.0 / 0.22 * 2.048;
        assert!((ih - uncompensated * 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_sense_network_correction() {
        let c = converter();
        // 300 V across the 1.4194 MOhm network draws ~0.21 mA.
        let corrected = c.anode_current_corrected(300.0, 5.0);
        assert!((corrected - (5.0 - 300.0 / 1419.4)).abs() < 1e-12);
        // Correction never produces a negative current.
        assert_eq!(c.anode_current_corrected(300.0, 0.05), 0.0);
    }
}

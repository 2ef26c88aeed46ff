//! A complete characteristic-curve data set for one device/test pair.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sample::Sample;
use crate::sweep::{Sweep, SweepJson};
use crate::types::{DeviceType, SweepKind, TestType};

/// Start/stop/step triple for one sweep axis, in volts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AxisRange {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl AxisRange {
    pub fn new(start: f64, stop: f64, step: f64) -> Self {
        Self { start, stop, step }
    }
}

/// An ordered set of sweeps plus the parameters the test ran with.
///
/// During a live test the measurement is owned and mutated exclusively by
/// the protocol engine; ownership transfers wholesale to the fitting or
/// persistence layer once the test completes.
#[derive(Debug, Clone)]
pub struct Measurement {
    device_type: DeviceType,
    test_type: TestType,
    heater_voltage: f64,
    anode: AxisRange,
    grid: AxisRange,
    screen: AxisRange,
    ia_max: f64,
    p_max: f64,
    sweeps: Vec<Sweep>,
    measured_ia_max: f64,
    measured_ig2_max: f64,
}

impl Measurement {
    pub fn new(device_type: DeviceType, test_type: TestType) -> Self {
        Self {
            device_type,
            test_type,
            heater_voltage: 0.0,
            anode: AxisRange::default(),
            grid: AxisRange::default(),
            screen: AxisRange::default(),
            ia_max: 0.0,
            p_max: 0.0,
            sweeps: Vec::new(),
            measured_ia_max: 0.0,
            measured_ig2_max: 0.0,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn test_type(&self) -> TestType {
        self.test_type
    }

    pub fn sweep_kind(&self) -> SweepKind {
        SweepKind::for_test(self.device_type, self.test_type)
    }

    pub fn heater_voltage(&self) -> f64 {
        self.heater_voltage
    }

    pub fn set_heater_voltage(&mut self, vh: f64) {
        self.heater_voltage = vh;
    }

    pub fn anode_range(&self) -> AxisRange {
        self.anode
    }

    pub fn grid_range(&self) -> AxisRange {
        self.grid
    }

    pub fn screen_range(&self) -> AxisRange {
        self.screen
    }

    pub fn set_ranges(&mut self, anode: AxisRange, grid: AxisRange, screen: AxisRange) {
        self.anode = anode;
        self.grid = grid;
        self.screen = screen;
    }

    pub fn ia_max(&self) -> f64 {
        self.ia_max
    }

    pub fn p_max(&self) -> f64 {
        self.p_max
    }

    pub fn set_limits(&mut self, ia_max: f64, p_max: f64) {
        self.ia_max = ia_max;
        self.p_max = p_max;
    }

    /// Largest anode/screen currents actually observed during capture.
    pub fn measured_ia_max(&self) -> f64 {
        self.measured_ia_max
    }

    pub fn measured_ig2_max(&self) -> f64 {
        self.measured_ig2_max
    }

    /// Drop all collected data, keeping the test parameters.
    pub fn reset(&mut self) {
        self.sweeps.clear();
        self.measured_ia_max = 0.0;
        self.measured_ig2_max = 0.0;
    }

    /// Open a new sweep family at the given nominal bias values.
    pub fn next_sweep(&mut self, v1: f64, v2: f64) {
        self.sweeps.push(Sweep::new(self.sweep_kind(), v1, v2));
    }

    /// Append a sample to the sweep currently being collected.
    /// A sweep must have been opened with [`next_sweep`] first.
    ///
    /// [`next_sweep`]: Measurement::next_sweep
    pub fn add_sample(&mut self, sample: Sample) {
        if sample.ia > self.measured_ia_max {
            self.measured_ia_max = sample.ia;
        }
        if sample.ig2 > self.measured_ig2_max {
            self.measured_ig2_max = sample.ig2;
        }
        if let Some(sweep) = self.sweeps.last_mut() {
            sweep.push(sample);
        }
    }

    pub fn sweeps(&self) -> &[Sweep] {
        &self.sweeps
    }

    pub fn sweep_count(&self) -> usize {
        self.sweeps.len()
    }

    /// Total number of samples across all sweeps.
    pub fn sample_count(&self) -> usize {
        self.sweeps.iter().map(Sweep::len).sum()
    }

    pub fn push_sweep(&mut self, sweep: Sweep) {
        self.sweeps.push(sweep);
    }

    /// Display name, e.g. `"Pentode Anode Sweep"`.
    pub fn name(&self) -> String {
        let device = match self.device_type {
            DeviceType::Triode => "Triode",
            DeviceType::DoubleTriode => "Double Triode",
            DeviceType::Pentode => "Pentode",
        };
        let test = match self.test_type {
            TestType::AnodeCharacteristics => "Anode Sweep",
            TestType::TransferCharacteristics => "Transfer Sweep",
            TestType::ScreenCharacteristics => "Screen Sweep",
        };
        format!("{device} {test}")
    }

    pub fn to_json(&self) -> MeasurementJson {
        MeasurementJson {
            device_type: self.device_type,
            test_type: self.test_type,
            vh: self.heater_voltage,
            ia_max: self.ia_max,
            pa_max: self.p_max,
            anode_start: self.anode.start,
            anode_stop: self.anode.stop,
            anode_step: self.anode.step,
            grid_start: self.grid.start,
            grid_stop: self.grid.stop,
            grid_step: self.grid.step,
            screen_start: self.screen.start,
            screen_stop: self.screen.stop,
            screen_step: self.screen.step,
            sweeps: self.sweeps.iter().map(Sweep::to_json).collect(),
        }
    }

    /// Parse a serialized measurement.
    ///
    /// Individual malformed sweeps are skipped with a warning pushed to
    /// `warnings`; an input that yields no usable sweep at all is a hard
    /// error.
    pub fn from_json(json: &MeasurementJson, warnings: &mut Vec<String>) -> Result<Self> {
        let mut measurement = Measurement::new(json.device_type, json.test_type);
        measurement.heater_voltage = json.vh;
        measurement.ia_max = json.ia_max;
        measurement.p_max = json.pa_max;
        measurement.anode = AxisRange::new(json.anode_start, json.anode_stop, json.anode_step);
        measurement.grid = AxisRange::new(json.grid_start, json.grid_stop, json.grid_step);
        measurement.screen = AxisRange::new(json.screen_start, json.screen_stop, json.screen_step);

        let kind = measurement.sweep_kind();
        for (index, sweep_json) in json.sweeps.iter().enumerate() {
            if sweep_json.samples.is_empty() {
                let message = format!("sweep {index}: no samples, skipped");
                warn!("{message}");
                warnings.push(message);
                continue;
            }
            if let Some(bad) = sweep_json
                .samples
                .iter()
                .position(|s| !(s.va.is_finite() && s.ia.is_finite() && s.vg1.is_finite()))
            {
                let message = format!("sweep {index}: non-finite sample {bad}, skipped");
                warn!("{message}");
                warnings.push(message);
                continue;
            }
            measurement.push_sweep(Sweep::from_json(kind, sweep_json));
        }

        if measurement.sweeps.is_empty() {
            return Err(Error::EmptyMeasurement);
        }
        Ok(measurement)
    }

    /// Parse from a JSON string, collecting per-row warnings.
    pub fn from_json_str(text: &str) -> Result<(Self, Vec<String>)> {
        let json: MeasurementJson = serde_json::from_str(text)
            .map_err(|e| Error::MalformedMeasurement(e.to_string()))?;
        let mut warnings = Vec::new();
        let measurement = Self::from_json(&json, &mut warnings)?;
        Ok((measurement, warnings))
    }
}

/// On-disk measurement format, camelCase field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementJson {
    pub device_type: DeviceType,
    pub test_type: TestType,
    #[serde(default)]
    pub vh: f64,
    #[serde(default)]
    pub ia_max: f64,
    #[serde(default)]
    pub pa_max: f64,
    #[serde(default)]
    pub anode_start: f64,
    #[serde(default)]
    pub anode_stop: f64,
    #[serde(default)]
    pub anode_step: f64,
    #[serde(default)]
    pub grid_start: f64,
    #[serde(default)]
    pub grid_stop: f64,
    #[serde(default)]
    pub grid_step: f64,
    #[serde(default)]
    pub screen_start: f64,
    #[serde(default)]
    pub screen_stop: f64,
    #[serde(default)]
    pub screen_step: f64,
    #[serde(default)]
    pub sweeps: Vec<SweepJson>,
}

//! A single measured operating point.

use serde::{Deserialize, Serialize};

/// One (Va, Ia, Vg1, Vg2, Ig2, Vh, Ih) tuple captured from a `Mode(2)`
/// response. Immutable once constructed; owned by its [`Sweep`].
///
/// The optional second-section fields are populated on dual-triode
/// hardware only.
///
/// [`Sweep`]: crate::sweep::Sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub va: f64,
    /// Anode current in mA.
    pub ia: f64,
    pub vg1: f64,
    pub vg2: f64,
    /// Screen current in mA.
    pub ig2: f64,
    pub vh: f64,
    pub ih: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vg3: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub va2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ia2: Option<f64>,
}

impl Sample {
    pub fn new(vg1: f64, va: f64, ia: f64, vg2: f64, ig2: f64, vh: f64, ih: f64) -> Self {
        Self {
            va,
            ia,
            vg1,
            vg2,
            ig2,
            vh,
            ih,
            vg3: None,
            va2: None,
            ia2: None,
        }
    }

    /// Attach the second triode section's readings.
    pub fn with_second_section(mut self, vg3: f64, va2: f64, ia2: f64) -> Self {
        self.vg3 = Some(vg3);
        self.va2 = Some(va2);
        self.ia2 = Some(ia2);
        self
    }

    /// Instantaneous anode dissipation in watts.
    pub fn anode_power(&self) -> f64 {
        self.ia * self.va / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anode_power() {
        let s = Sample::new(-2.0, 250.0, 40.0, 0.0, 0.0, 6.3, 0.3);
        assert!((s.anode_power() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_json_omits_missing_second_section() {
        let s = Sample::new(-2.0, 250.0, 40.0, 0.0, 0.0, 6.3, 0.3);
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("vg3"), "single-section sample: {json}");

        let s2 = s.with_second_section(-2.0, 245.0, 38.5);
        let json2 = serde_json::to_string(&s2).unwrap();
        assert!(json2.contains("va2"), "dual-section sample: {json2}");
    }
}

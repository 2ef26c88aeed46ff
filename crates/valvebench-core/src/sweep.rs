//! An ordered run of samples at one stepped bias point.

use serde::{Deserialize, Serialize};

use crate::sample::Sample;
use crate::types::SweepKind;

/// Samples collected while one electrode is swept and the others are held
/// at a nominal bias. Which nominal fields are meaningful depends on the
/// sweep kind (e.g. a triode anode sweep only labels Vg1).
#[derive(Debug, Clone)]
pub struct Sweep {
    kind: SweepKind,
    vg1_nominal: f64,
    va_nominal: f64,
    vg2_nominal: f64,
    samples: Vec<Sample>,
}

/// Serialized form: only the nominal fields relevant to the sweep kind
/// are present, matching the on-disk measurement format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vg1_nominal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub va_nominal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vg2_nominal: Option<f64>,
    pub samples: Vec<Sample>,
}

impl Sweep {
    /// Create a sweep for a new step family. `v1` and `v2` are assigned to
    /// nominal fields according to the sweep kind, mirroring the order the
    /// sequencer hands them over (step value first, fixed value second).
    pub fn new(kind: SweepKind, v1: f64, v2: f64) -> Self {
        let mut sweep = Self {
            kind,
            vg1_nominal: 0.0,
            va_nominal: 0.0,
            vg2_nominal: 0.0,
            samples: Vec::new(),
        };
        match kind {
            SweepKind::TriodeAnode => sweep.vg1_nominal = v1,
            SweepKind::TriodeGrid => sweep.va_nominal = v1,
            SweepKind::PentodeAnode => {
                sweep.vg1_nominal = v1;
                sweep.vg2_nominal = v2;
            }
            SweepKind::PentodeGrid => {
                sweep.vg2_nominal = v1;
                sweep.va_nominal = v2;
            }
            SweepKind::PentodeScreen => {
                sweep.vg1_nominal = v1;
                sweep.va_nominal = v2;
            }
        }
        sweep
    }

    pub fn kind(&self) -> SweepKind {
        self.kind
    }

    pub fn vg1_nominal(&self) -> f64 {
        self.vg1_nominal
    }

    pub fn va_nominal(&self) -> f64 {
        self.va_nominal
    }

    pub fn vg2_nominal(&self) -> f64 {
        self.vg2_nominal
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Human-readable label, e.g. `"Vg1 = -2, Vg2 = 250"`.
    pub fn label(&self) -> String {
        match self.kind {
            SweepKind::TriodeAnode => format!("Vg1 = {}", self.vg1_nominal),
            SweepKind::TriodeGrid => format!("Va = {}", self.va_nominal),
            SweepKind::PentodeAnode => {
                format!("Vg1 = {}, Vg2 = {}", self.vg1_nominal, self.vg2_nominal)
            }
            SweepKind::PentodeGrid => {
                format!("Va = {}, Vg2 = {}", self.va_nominal, self.vg2_nominal)
            }
            SweepKind::PentodeScreen => {
                format!("Vg1 = {}, Va = {}", self.vg1_nominal, self.va_nominal)
            }
        }
    }

    pub fn to_json(&self) -> SweepJson {
        let mut json = SweepJson {
            samples: self.samples.clone(),
            ..SweepJson::default()
        };
        match self.kind {
            SweepKind::TriodeAnode => json.vg1_nominal = Some(self.vg1_nominal),
            SweepKind::TriodeGrid => json.va_nominal = Some(self.va_nominal),
            SweepKind::PentodeAnode => {
                json.vg1_nominal = Some(self.vg1_nominal);
                json.vg2_nominal = Some(self.vg2_nominal);
            }
            SweepKind::PentodeGrid => {
                json.vg2_nominal = Some(self.vg2_nominal);
                json.va_nominal = Some(self.va_nominal);
            }
            SweepKind::PentodeScreen => {
                json.vg1_nominal = Some(self.vg1_nominal);
                json.va_nominal = Some(self.va_nominal);
            }
        }
        json
    }

    /// Rebuild a sweep from its serialized form. The kind is not stored in
    /// the file; it is derived from the parent measurement's device/test
    /// types. Missing nominal fields default to zero.
    pub fn from_json(kind: SweepKind, json: &SweepJson) -> Self {
        Self {
            kind,
            vg1_nominal: json.vg1_nominal.unwrap_or(0.0),
            va_nominal: json.va_nominal.unwrap_or(0.0),
            vg2_nominal: json.vg2_nominal.unwrap_or(0.0),
            samples: json.samples.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_assignment_per_kind() {
        let s = Sweep::new(SweepKind::PentodeAnode, -4.0, 250.0);
        assert_eq!(s.vg1_nominal(), -4.0);
        assert_eq!(s.vg2_nominal(), 250.0);

        let s = Sweep::new(SweepKind::TriodeGrid, 200.0, 0.0);
        assert_eq!(s.va_nominal(), 200.0);
        assert_eq!(s.vg1_nominal(), 0.0);
    }

    #[test]
    fn test_json_round_trip_keeps_kind_fields() {
        let mut s = Sweep::new(SweepKind::TriodeAnode, -2.0, 0.0);
        s.push(Sample::new(-2.0, 100.0, 5.0, 0.0, 0.0, 6.3, 0.3));
        let json = s.to_json();
        assert_eq!(json.vg1_nominal, Some(-2.0));
        assert!(json.va_nominal.is_none(), "triode anode sweep has no Va nominal");

        let back = Sweep::from_json(SweepKind::TriodeAnode, &json);
        assert_eq!(back.vg1_nominal(), -2.0);
        assert_eq!(back.len(), 1);
    }
}

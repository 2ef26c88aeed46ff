//! Device and test classification enums shared across the workspace.

use serde::{Deserialize, Serialize};

/// Electrode topology of the device under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceType {
    Triode,
    DoubleTriode,
    Pentode,
}

impl DeviceType {
    pub fn is_pentode(&self) -> bool {
        matches!(self, DeviceType::Pentode)
    }
}

/// Which characteristic family a test measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestType {
    AnodeCharacteristics,
    TransferCharacteristics,
    ScreenCharacteristics,
}

/// Which nominal bias values a sweep carries, derived from
/// (device type, test type). Controls JSON field selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    TriodeAnode,
    TriodeGrid,
    PentodeAnode,
    PentodeGrid,
    PentodeScreen,
}

impl SweepKind {
    pub fn for_test(device: DeviceType, test: TestType) -> Self {
        match (device.is_pentode(), test) {
            (false, TestType::AnodeCharacteristics) => SweepKind::TriodeAnode,
            (false, _) => SweepKind::TriodeGrid,
            (true, TestType::AnodeCharacteristics) => SweepKind::PentodeAnode,
            (true, TestType::TransferCharacteristics) => SweepKind::PentodeGrid,
            (true, TestType::ScreenCharacteristics) => SweepKind::PentodeScreen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_kind_selection() {
        assert_eq!(
            SweepKind::for_test(DeviceType::Triode, TestType::AnodeCharacteristics),
            SweepKind::TriodeAnode
        );
        assert_eq!(
            SweepKind::for_test(DeviceType::Pentode, TestType::TransferCharacteristics),
            SweepKind::PentodeGrid
        );
        assert_eq!(
            SweepKind::for_test(DeviceType::Pentode, TestType::ScreenCharacteristics),
            SweepKind::PentodeScreen
        );
    }

    #[test]
    fn test_test_type_json_names() {
        let json = serde_json::to_string(&TestType::AnodeCharacteristics).unwrap();
        assert_eq!(json, "\"anodeCharacteristics\"");
        let json = serde_json::to_string(&DeviceType::Pentode).unwrap();
        assert_eq!(json, "\"pentode\"");
    }
}

//! Notification surface between the protocol engine and its host.

/// Callbacks the engine raises as a session progresses. All methods have
/// empty defaults so a host only implements what it displays.
pub trait AnalyserClient {
    /// Heater telemetry; `None` means the channel is unchanged.
    fn update_heater(&mut self, volts: Option<f64>, amps: Option<f64>) {
        let _ = (volts, amps);
    }

    /// Test completion percentage, 0 to 100.
    fn test_progress(&mut self, percent: u32) {
        let _ = percent;
    }

    /// The test ran to the end of its sweep grid.
    fn test_finished(&mut self) {}

    /// The test died on a protocol error or command timeout.
    fn test_aborted(&mut self) {}
}

/// Client that ignores every notification.
pub struct NullClient;

impl AnalyserClient for NullClient {}

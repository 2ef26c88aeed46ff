//! Sweep-axis sample placement strategies.
//!
//! The sequencer walks the inner axis as a fraction in [0, 1] and maps it
//! through a shaper before interpolating between the sweep endpoints. The
//! default is linear; the logarithmic-knee shaper concentrates samples at
//! low anode voltages where a pentode's curves bend hardest.

/// Maps an evenly spaced fraction to a placement fraction. Implementations
/// must be exact at both endpoints: `shape(0) == 0` and `shape(1) == 1`.
pub trait SampleShaper: Send {
    fn shape(&self, fraction: f64) -> f64;
}

/// Evenly spaced samples.
pub struct LinearShaper;

impl SampleShaper for LinearShaper {
    fn shape(&self, fraction: f64) -> f64 {
        fraction
    }
}

/// Log-potentiometer taper: half the samples land below `mid` of the span.
///
/// With `y = a*b^x - a`, `b = (1/mid - 1)^2` and `a = 1/(b - 1)`, the curve
/// passes exactly through (0, 0), (0.5, mid) and (1, 1).
pub struct LogKneeShaper {
    b: f64,
    a: f64,
}

impl LogKneeShaper {
    /// `mid` is the placement fraction at the halfway sample, e.g. 0.2 to
    /// spend half the sweep on the bottom fifth of the voltage span.
    /// Valid for 0 < mid < 0.5.
    pub fn new(mid: f64) -> Self {
        let b = (1.0 / mid - 1.0).powi(2);
        Self { b, a: 1.0 / (b - 1.0) }
    }
}

impl Default for LogKneeShaper {
    fn default() -> Self {
        Self::new(0.2)
    }
}

impl SampleShaper for LogKneeShaper {
    fn shape(&self, fraction: f64) -> f64 {
        self.a * self.b.powf(fraction) - self.a
    }
}

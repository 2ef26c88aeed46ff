//! Direct least-squares regression for line and parabola fits.
//!
//! Used by the estimation heuristics to seed nonlinear fits: a line
//! through log-log plate curves gives the exponent, a parabola through
//! the knee region gives the perveance seed.

use log::info;

/// Accumulating linear regression, y = a*x + b.
#[derive(Debug, Clone)]
pub struct LinearFit {
    a: f64,
    b: f64,
    converged: bool,
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl LinearFit {
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            a,
            b,
            converged: false,
            xs: Vec::new(),
            ys: Vec::new(),
        }
    }

    /// Add a data point. Non-finite points are dropped silently.
    pub fn add_sample(&mut self, x: f64, y: f64) {
        if !x.is_finite() || !y.is_finite() {
            return;
        }
        self.xs.push(x);
        self.ys.push(y);
    }

    /// Closed-form least squares over the accumulated samples.
    pub fn solve(&mut self) {
        if self.xs.len() < 2 {
            self.converged = false;
            return;
        }

        let n = self.xs.len() as f64;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_xy = 0.0;
        let mut sum_x2 = 0.0;
        for (&x, &y) in self.xs.iter().zip(&self.ys) {
            sum_x += x;
            sum_y += y;
            sum_xy += x * y;
            sum_x2 += x * x;
        }

        let denominator = n * sum_x2 - sum_x * sum_x;
        if denominator.abs() < 1e-10 {
            self.converged = false;
            return;
        }

        self.a = (n * sum_xy - sum_x * sum_y) / denominator;
        self.b = (sum_y - self.a * sum_x) / n;
        self.converged = true;
        info!("linear regression: y = {:.6}x + {:.6}", self.a, self.b);
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

/// Accumulating quadratic regression, y = a*x^2 + b*x + c.
///
/// With `fixed_a` the quadratic coefficient is held at its seed value and
/// the problem reduces to a line fit on y - a*x^2. With `require_positive`
/// the linear and constant coefficients are floored at zero after solving.
#[derive(Debug, Clone)]
pub struct QuadraticFit {
    a: f64,
    b: f64,
    c: f64,
    fixed_a: bool,
    require_positive: bool,
    converged: bool,
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl QuadraticFit {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self {
            a,
            b,
            c,
            fixed_a: false,
            require_positive: false,
            converged: false,
            xs: Vec::new(),
            ys: Vec::new(),
        }
    }

    pub fn set_fixed_a(&mut self, fixed: bool) {
        self.fixed_a = fixed;
    }

    pub fn set_require_positive(&mut self, require: bool) {
        self.require_positive = require;
    }

    /// Add a data point. Non-finite points are dropped silently.
    pub fn add_sample(&mut self, x: f64, y: f64) {
        if !x.is_finite() || !y.is_finite() {
            return;
        }
        self.xs.push(x);
        self.ys.push(y);
    }

    pub fn solve(&mut self) {
        if self.xs.len() < 3 {
            self.converged = false;
            return;
        }

        let n = self.xs.len() as f64;

        if self.fixed_a {
            // Solve the reduced problem y - a*x^2 = b*x + c as a line fit.
            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            let mut sum_xy = 0.0;
            let mut sum_x2 = 0.0;
            for (&x, &y) in self.xs.iter().zip(&self.ys) {
                let adjusted = y - self.a * x * x;
                sum_x += x;
                sum_y += adjusted;
                sum_xy += x * adjusted;
                sum_x2 += x * x;
            }

            let denominator = n * sum_x2 - sum_x * sum_x;
            if denominator.abs() < 1e-10 {
                self.converged = false;
                return;
            }

            self.b = (n * sum_xy - sum_x * sum_y) / denominator;
            self.c = (sum_y - self.b * sum_x) / n;
        } else {
            // Normal equations for the full parabola, solved by Cramer's
            // rule on the 3x3 moment matrix.
            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            let mut sum_x2 = 0.0;
            let mut sum_x3 = 0.0;
            let mut sum_x4 = 0.0;
            let mut sum_xy = 0.0;
            let mut sum_x2y = 0.0;
            for (&x, &y) in self.xs.iter().zip(&self.ys) {
                let x2 = x * x;
                sum_x += x;
                sum_y += y;
                sum_x2 += x2;
                sum_x3 += x2 * x;
                sum_x4 += x2 * x2;
                sum_xy += x * y;
                sum_x2y += x2 * y;
            }

            let det = sum_x4 * (sum_x2 * n - sum_x * sum_x)
                - sum_x3 * (sum_x3 * n - sum_x * sum_x2)
                + sum_x2 * (sum_x3 * sum_x - sum_x2 * sum_x2);
            if det.abs() < 1e-10 {
                self.converged = false;
                return;
            }

            let det_a = sum_x2y * (sum_x2 * n - sum_x * sum_x)
                - sum_xy * (sum_x3 * n - sum_x * sum_x2)
                + sum_y * (sum_x3 * sum_x - sum_x2 * sum_x2);
            let det_b = sum_x4 * (sum_xy * n - sum_y * sum_x)
                - sum_x2y * (sum_x3 * n - sum_x2 * sum_x)
                + sum_x2 * (sum_x3 * sum_y - sum_x2 * sum_xy);
            let det_c = sum_x4 * (sum_x2 * sum_y - sum_x * sum_xy)
                - sum_x3 * (sum_x3 * sum_y - sum_x2 * sum_xy)
                + sum_x2y * (sum_x3 * sum_x - sum_x2 * sum_x2);

            self.a = det_a / det;
            self.b = det_b / det;
            self.c = det_c / det;
        }

        if self.require_positive {
            self.b = self.b.max(0.0);
            self.c = self.c.max(0.0);
        }

        self.converged = true;
        info!(
            "quadratic regression: y = {:.6}x^2 + {:.6}x + {:.6}",
            self.a, self.b, self.c
        );
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    pub fn c(&self) -> f64 {
        self.c
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

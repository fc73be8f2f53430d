//! Bijective transforms (bijectors) for unconstrained parameterization.
//!
//! The sampling engines operate in unconstrained space `z ∈ R^n`. These
//! transforms map between unconstrained `z` and constrained parameters
//! `theta`, providing the Jacobian term needed for correct densities.
//! Positivity and interval constraints are therefore enforced by
//! construction: an out-of-support value is unreachable, never clamped.

use crate::math::{log_sigmoid, sigmoid};

/// A bijective transform from unconstrained `z` to constrained `theta`.
pub trait Bijector: Send + Sync {
    /// Map unconstrained -> constrained: `theta = forward(z)`
    fn forward(&self, z: f64) -> f64;
    /// Map constrained -> unconstrained: `z = inverse(theta)`
    fn inverse(&self, theta: f64) -> f64;
    /// Log absolute determinant of Jacobian: `log|dtheta/dz|`
    fn log_abs_det_jacobian(&self, z: f64) -> f64;
}

/// Identity: `(-inf, inf) -> (-inf, inf)`.
pub struct IdentityBijector;

impl Bijector for IdentityBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        z
    }
    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        theta
    }
    #[inline]
    fn log_abs_det_jacobian(&self, _z: f64) -> f64 {
        0.0
    }
}

/// LowerBounded: `(-inf, inf) -> (a, inf)`, `theta = a + exp(z)`, `log|J| = z`.
pub struct LowerBoundedBijector {
    lower: f64,
}

impl LowerBoundedBijector {
    /// Create a lower-bounded bijector with the given lower bound.
    pub fn new(lower: f64) -> Self {
        Self { lower }
    }
}

impl Bijector for LowerBoundedBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        self.lower + z.exp()
    }
    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        // Keep the inverse finite if theta sits on the bound due to FP noise.
        (theta - self.lower).max(1e-300).ln()
    }
    #[inline]
    fn log_abs_det_jacobian(&self, z: f64) -> f64 {
        z
    }
}

/// Sigmoid: `(-inf, inf) -> (a, b)`, `theta = a + (b-a)*sigmoid(z)`.
pub struct SigmoidBijector {
    lower: f64,
    width: f64,
    log_width: f64,
}

impl SigmoidBijector {
    /// Create a sigmoid bijector for the interval `(lower, upper)`.
    pub fn new(lower: f64, upper: f64) -> Self {
        let width = upper - lower;
        Self { lower, width, log_width: width.ln() }
    }
}

impl Bijector for SigmoidBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        self.lower + self.width * sigmoid(z)
    }

    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        let p = ((theta - self.lower) / self.width).clamp(1e-15, 1.0 - 1e-15);
        (p / (1.0 - p)).ln()
    }

    #[inline]
    fn log_abs_det_jacobian(&self, z: f64) -> f64 {
        // dtheta/dz = (b-a) * sigmoid(z) * (1 - sigmoid(z))
        self.log_width + log_sigmoid(z) + log_sigmoid(-z)
    }
}

/// Composite transform for a vector of parameters, one bijector per entry.
pub struct ParameterTransform {
    bijectors: Vec<Box<dyn Bijector>>,
}

impl ParameterTransform {
    /// Create transforms from parameter bounds.
    ///
    /// - `(-inf, inf)` -> Identity
    /// - `(a, inf)` with finite `a` -> LowerBounded(a)
    /// - `(a, b)` with both finite -> Sigmoid(a, b)
    pub fn from_bounds(bounds: &[(f64, f64)]) -> Self {
        let bijectors: Vec<Box<dyn Bijector>> = bounds
            .iter()
            .map(|&(lo, hi)| -> Box<dyn Bijector> {
                match (lo.is_finite(), hi.is_finite()) {
                    (true, true) if hi > lo => Box::new(SigmoidBijector::new(lo, hi)),
                    (true, false) => Box::new(LowerBoundedBijector::new(lo)),
                    _ => Box::new(IdentityBijector),
                }
            })
            .collect();

        Self { bijectors }
    }

    /// Number of parameters.
    pub fn dim(&self) -> usize {
        self.bijectors.len()
    }

    /// Map unconstrained -> constrained.
    pub fn forward(&self, z: &[f64]) -> Vec<f64> {
        z.iter().zip(&self.bijectors).map(|(&zi, b)| b.forward(zi)).collect()
    }

    /// Map constrained -> unconstrained.
    pub fn inverse(&self, theta: &[f64]) -> Vec<f64> {
        theta.iter().zip(&self.bijectors).map(|(&ti, b)| b.inverse(ti)).collect()
    }

    /// Sum of `log|J|` over all parameters.
    pub fn log_abs_det_jacobian(&self, z: &[f64]) -> f64 {
        z.iter().zip(&self.bijectors).map(|(&zi, b)| b.log_abs_det_jacobian(zi)).sum()
    }
}

//! Unconstrained posterior target.
//!
//! Wraps a [`LogDensityModel`] with bound-derived bijectors so engines can
//! explore all of `R^n`: `logpdf(z) = -nll(forward(z)) + log|J(z)|`.
//! Evaluation failures and non-finite densities map to `-inf`, which a
//! Metropolis engine treats as a rejected (divergent) proposal.

use et_core::LogDensityModel;
use et_prob::ParameterTransform;

/// A model reparameterized onto unconstrained space.
pub struct UnconstrainedTarget<'a> {
    model: &'a dyn LogDensityModel,
    transform: ParameterTransform,
}

impl<'a> UnconstrainedTarget<'a> {
    /// Wrap a model, deriving bijectors from its parameter bounds.
    pub fn new(model: &'a dyn LogDensityModel) -> Self {
        let transform = ParameterTransform::from_bounds(&model.parameter_bounds());
        Self { model, transform }
    }

    /// Number of parameters.
    pub fn dim(&self) -> usize {
        self.model.dim()
    }

    /// Log-posterior density in unconstrained space; `-inf` on failure.
    pub fn logpdf(&self, z: &[f64]) -> f64 {
        let theta = self.transform.forward(z);
        match self.model.nll(&theta) {
            Ok(nll) if nll.is_finite() => -nll + self.transform.log_abs_det_jacobian(z),
            _ => f64::NEG_INFINITY,
        }
    }

    /// Map constrained -> unconstrained.
    pub fn to_unconstrained(&self, theta: &[f64]) -> Vec<f64> {
        self.transform.inverse(theta)
    }

    /// Map unconstrained -> constrained.
    pub fn to_constrained(&self, z: &[f64]) -> Vec<f64> {
        self.transform.forward(z)
    }
}

//! Core traits for EpiTrend
//!
//! This module defines the trait boundary between model construction and the
//! posterior sampling engine: engines depend on [`LogDensityModel`], never on
//! a concrete model type, so the joint-model assembly is testable without any
//! particular sampling algorithm behind it.

use crate::Result;

/// Universal model interface consumed by the posterior sampling engines.
///
/// A model exposes parameter metadata (names, bounds, initial values) and a
/// negative log-density (likelihood plus priors) in constrained space. Bounds
/// drive the engine-side unconstrained reparameterization; positivity and
/// interval constraints are enforced there rather than by clamping.
pub trait LogDensityModel: Send + Sync {
    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Parameter names (stable order).
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds (min, max) (stable order).
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Suggested initial values (stable order).
    fn parameter_init(&self) -> Vec<f64>;

    /// Negative log-density (negative log-likelihood plus negative log-priors).
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of the negative log-density.
    ///
    /// Default implementation: central finite differences with adaptive step
    /// size. Models with cheap analytic gradients should override this.
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];
        let mut work = params.to_vec();
        for i in 0..n {
            let eps = 1e-6 * params[i].abs().max(1.0);
            work[i] = params[i] + eps;
            let f_plus = self.nll(&work)?;
            work[i] = params[i] - eps;
            let f_minus = self.nll(&work)?;
            work[i] = params[i];
            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quadratic;

    impl LogDensityModel for Quadratic {
        fn dim(&self) -> usize {
            2
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["a".to_string(), "b".to_string()]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(f64::NEG_INFINITY, f64::INFINITY), (0.0, f64::INFINITY)]
        }

        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0, 1.0]
        }

        fn nll(&self, params: &[f64]) -> Result<f64> {
            Ok(params.iter().map(|&x| x * x).sum())
        }
    }

    #[test]
    fn test_default_grad_matches_analytic() {
        let m = Quadratic;
        let p = vec![1.5, 0.7];
        let g = m.grad_nll(&p).unwrap();
        for (i, &x) in p.iter().enumerate() {
            let exact = 2.0 * x;
            assert!(
                (g[i] - exact).abs() < 1e-5,
                "grad[{}]: fd={}, analytic={}",
                i,
                g[i],
                exact
            );
        }
    }
}

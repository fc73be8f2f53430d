//! Approximate (fast) inference: MAP optimization plus Laplace draws.
//!
//! The posterior is optimized in unconstrained space with L-BFGS; the
//! Hessian of the negative log-posterior at the mode defines a Gaussian
//! approximation from which independent draws are taken and mapped back to
//! constrained space. Cheap, gradient-free of the model (finite
//! differences), and clearly flagged as approximate in diagnostics.

use std::time::{Duration, Instant};

use et_core::{Error, LogDensityModel, Result};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::engine::{Chain, DrawEnsemble, EngineTiming, PosteriorEngine, SamplerOptions};
use crate::optimizer::{LbfgsOptimizer, ObjectiveFunction, OptimizerConfig};
use crate::target::UnconstrainedTarget;

/// Objective value substituted when the posterior density is non-finite,
/// keeping the line search on finite ground.
const BIG_NLL: f64 = 1e12;

struct NegLogPosterior<'a> {
    target: &'a UnconstrainedTarget<'a>,
}

impl ObjectiveFunction for NegLogPosterior<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let lp = self.target.logpdf(params);
        Ok(if lp.is_finite() { -lp } else { BIG_NLL })
    }
}

/// MAP + Laplace approximate engine.
#[derive(Debug, Clone, Default)]
pub struct LaplaceEngine {
    /// Optimizer configuration for the MAP stage.
    pub optimizer: OptimizerConfig,
}

impl PosteriorEngine for LaplaceEngine {
    fn name(&self) -> &str {
        "map-laplace"
    }

    fn sample(&self, model: &dyn LogDensityModel, opts: &SamplerOptions) -> Result<DrawEnsemble> {
        let dim = model.dim();
        if dim == 0 {
            return Ok(DrawEnsemble {
                chains: vec![Chain {
                    draws: vec![Vec::new(); opts.n_samples],
                    divergences: 0,
                    accept_rate: 1.0,
                    proposal_scale: 0.0,
                    warmup_time: Duration::ZERO,
                    sampling_time: Duration::ZERO,
                }],
                param_names: Vec::new(),
                n_warmup: 0,
                n_samples: opts.n_samples,
                n_chains_requested: 1,
                timing: EngineTiming::default(),
                partial: false,
                approximate: true,
                engine: self.name().to_string(),
            });
        }

        let target = UnconstrainedTarget::new(model);
        let objective = NegLogPosterior { target: &target };
        let z_init = target.to_unconstrained(&model.parameter_init());

        let map_start = Instant::now();
        let fit = LbfgsOptimizer::new(self.optimizer.clone()).minimize(&objective, &z_init)?;
        if !fit.fval.is_finite() || fit.fval >= BIG_NLL {
            return Err(Error::Sampling(
                "MAP optimization did not reach a finite posterior density".to_string(),
            ));
        }
        let mode = fit.parameters;
        let warmup_time = map_start.elapsed();

        let draw_start = Instant::now();
        let hessian = fd_hessian(&objective, &mode)?;
        let cov_factor = covariance_factor(&hessian)?;

        let mut rng = StdRng::seed_from_u64(opts.seed);
        let mut draws = Vec::with_capacity(opts.n_samples);
        for _ in 0..opts.n_samples {
            let eps = DMatrix::from_fn(dim, 1, |_, _| rng.sample::<f64, _>(StandardNormal));
            let step = &cov_factor * eps;
            let z: Vec<f64> = mode.iter().zip(step.iter()).map(|(&m, &s)| m + s).collect();
            draws.push(target.to_constrained(&z));
        }
        let sampling_time = draw_start.elapsed();

        Ok(DrawEnsemble {
            chains: vec![Chain {
                draws,
                divergences: 0,
                accept_rate: 1.0,
                proposal_scale: 0.0,
                warmup_time,
                sampling_time,
            }],
            param_names: model.parameter_names(),
            n_warmup: 0,
            n_samples: opts.n_samples,
            n_chains_requested: 1,
            timing: EngineTiming { warmup: warmup_time, sampling: sampling_time },
            partial: false,
            approximate: true,
            engine: self.name().to_string(),
        })
    }
}

/// Hessian of the objective at `params` by central differences on the
/// gradient, symmetrized.
fn fd_hessian(objective: &dyn ObjectiveFunction, params: &[f64]) -> Result<DMatrix<f64>> {
    let n = params.len();
    let mut hessian = DMatrix::zeros(n, n);
    let mut work = params.to_vec();
    for j in 0..n {
        let eps = 1e-4 * params[j].abs().max(1.0);
        work[j] = params[j] + eps;
        let grad_plus = objective.gradient(&work)?;
        work[j] = params[j] - eps;
        let grad_minus = objective.gradient(&work)?;
        work[j] = params[j];
        for i in 0..n {
            hessian[(i, j)] = (grad_plus[i] - grad_minus[i]) / (2.0 * eps);
        }
    }
    let ht = hessian.transpose();
    Ok((&hessian + &ht) * 0.5)
}

/// Lower-triangular factor `F` with `F F^T = H^{-1}`, via a jittered
/// Cholesky ladder on `H`. Numeric Hessians can be slightly indefinite even
/// at a genuine mode.
fn covariance_factor(hessian: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = hessian.nrows();
    let max_abs_diag =
        (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut jitter = 1e-10 * max_abs_diag;
    for attempt in 0..15 {
        let mut h_try = hessian.clone();
        if attempt > 0 {
            for i in 0..n {
                h_try[(i, i)] += jitter;
            }
        }
        if let Some(chol) = nalgebra::linalg::Cholesky::new(h_try) {
            let cov = chol.inverse();
            if let Some(cov_chol) = nalgebra::linalg::Cholesky::new(cov) {
                return Ok(cov_chol.l());
            }
        }
        jitter *= 10.0;
    }

    Err(Error::Sampling(
        "Laplace approximation requires a positive-definite Hessian at the mode".to_string(),
    ))
}

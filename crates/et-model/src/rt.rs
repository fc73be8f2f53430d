//! Rt process model: maps free innovation parameters to a strictly positive
//! Rt trajectory over the fitted-plus-forecast horizon.
//!
//! All variants share the same interface: a block of free parameters (in
//! [`RtProcessModel::free_params`] order) goes in, a trajectory of length
//! `n_obs + horizon` comes out. Positivity is enforced by log-space
//! parameterization throughout.

use std::f64::consts::PI;

use et_core::{Error, Result};
use et_prob::delay::{FreeParam, PriorParam};
use et_prob::math::exp_clamped;

use crate::config::{GpKernel, RtConfig, RtForecast, RtProcess};

/// Boundary extension factor for the Hilbert-space GP approximation: the
/// basis lives on `[-L, L]` with `L = 1.5` while the data occupy `[-1, 1]`.
const GP_BOUNDARY_FACTOR: f64 = 1.5;

/// Match a normal distribution on log-Rt to a prior mean/sd on Rt itself.
fn lognormal_moments(mean: f64, sd: f64) -> (f64, f64) {
    if sd == 0.0 {
        return (mean.ln(), 0.0);
    }
    let sigma2 = (1.0 + (sd / mean).powi(2)).ln();
    (mean.ln() - 0.5 * sigma2, sigma2.sqrt())
}

/// Low-rank sine basis for the Hilbert-space GP approximation.
#[derive(Debug)]
struct GpBasis {
    /// Basis-function values per time row.
    phi: Vec<Vec<f64>>,
    /// Basis frequencies `sqrt(lambda_j)`.
    sqrt_lambda: Vec<f64>,
    kernel: GpKernel,
    /// Unit-domain distance covered by one day.
    day_scale: f64,
}

impl GpBasis {
    fn new(n_rows: usize, basis_fraction: f64, kernel: GpKernel) -> Self {
        let m = ((basis_fraction * n_rows as f64).ceil() as usize).max(4);
        let l = GP_BOUNDARY_FACTOR;
        let denom = n_rows.saturating_sub(1).max(1) as f64;
        let sqrt_lambda: Vec<f64> =
            (1..=m).map(|j| j as f64 * PI / (2.0 * l)).collect();
        let norm = (1.0 / l).sqrt();
        let phi = (0..n_rows)
            .map(|t| {
                let x = 2.0 * t as f64 / denom - 1.0;
                sqrt_lambda.iter().map(|&w| norm * (w * (x + l)).sin()).collect()
            })
            .collect();
        Self { phi, sqrt_lambda, kernel, day_scale: 2.0 / denom }
    }

    fn n_basis(&self) -> usize {
        self.sqrt_lambda.len()
    }

    /// Square roots of the spectral density at each basis frequency.
    ///
    /// `rho_days` is the length scale in days; it is rescaled to the unit
    /// domain internally.
    fn spectral_sqrt(&self, alpha: f64, rho_days: f64) -> Vec<f64> {
        let rho = (rho_days * self.day_scale).max(1e-8);
        let a2 = alpha * alpha;
        self.sqrt_lambda
            .iter()
            .map(|&w| {
                let s = match self.kernel {
                    GpKernel::SquaredExponential => {
                        a2 * rho * (2.0 * PI).sqrt() * (-0.5 * (rho * w).powi(2)).exp()
                    }
                    GpKernel::Matern32 => {
                        a2 * 4.0 * 3.0_f64.powf(1.5) / rho.powi(3)
                            * (3.0 / (rho * rho) + w * w).powi(-2)
                    }
                    GpKernel::Matern52 => {
                        a2 * (16.0 / 3.0) * 5.0_f64.powf(2.5) / rho.powi(5)
                            * (5.0 / (rho * rho) + w * w).powi(-3)
                    }
                };
                s.max(0.0).sqrt()
            })
            .collect()
    }
}

#[derive(Debug)]
enum Variant {
    Fixed,
    /// Piecewise-constant log-Rt; `starts[k]` is the first time index of
    /// segment `k + 1`. Covers both random-walk and breakpoint processes.
    Piecewise { starts: Vec<usize> },
    Gp {
        basis: GpBasis,
        /// `Some(n)` freezes the latent function at row `n - 1` for `t >= n`.
        freeze_from: Option<usize>,
        length_scale: PriorParam,
        magnitude_sd: f64,
    },
}

/// Evaluates one Rt process variant from its free-parameter block.
#[derive(Debug)]
pub struct RtProcessModel {
    n_time: usize,
    variant: Variant,
    /// Normal prior on log-Rt at t0 (moment-matched); `sd == 0` pins it.
    log_r0: PriorParam,
}

impl RtProcessModel {
    /// Build the process model for `n_obs` fitted days plus `horizon`
    /// forecast days. `breakpoints` are day indices flagged in the series
    /// (used only by the breakpoint variant).
    pub fn new(
        config: &RtConfig,
        n_obs: usize,
        horizon: usize,
        breakpoints: &[usize],
    ) -> Result<Self> {
        config.validate()?;
        let n_time = n_obs + horizon;
        let (mu, sigma) = lognormal_moments(config.prior.mean, config.prior.sd);
        let log_r0 = PriorParam::new(mu, sigma);

        let variant = match &config.process {
            RtProcess::Fixed => Variant::Fixed,
            RtProcess::RandomWalk { step_days, forecast } => {
                let limit = match forecast {
                    RtForecast::Project => n_time,
                    RtForecast::Latest => n_obs,
                };
                let starts: Vec<usize> =
                    (1..).map(|k| k * step_days).take_while(|&s| s < limit).collect();
                Variant::Piecewise { starts }
            }
            RtProcess::Breakpoints => {
                let starts: Vec<usize> = breakpoints
                    .iter()
                    .copied()
                    .filter(|&idx| idx > 0 && idx < n_obs)
                    .collect();
                if starts.is_empty() {
                    return Err(Error::Config(
                        "breakpoint process requested but no dates are flagged as breakpoints"
                            .to_string(),
                    ));
                }
                Variant::Piecewise { starts }
            }
            RtProcess::GaussianProcess {
                length_scale,
                magnitude_sd,
                basis_fraction,
                kernel,
                forecast,
            } => {
                let (n_rows, freeze_from) = match forecast {
                    RtForecast::Project => (n_time.max(2), None),
                    RtForecast::Latest => (n_obs.max(2), Some(n_obs.max(2))),
                };
                Variant::Gp {
                    basis: GpBasis::new(n_rows, *basis_fraction, *kernel),
                    freeze_from,
                    length_scale: *length_scale,
                    magnitude_sd: *magnitude_sd,
                }
            }
        };

        Ok(Self { n_time, variant, log_r0 })
    }

    /// Trajectory length (`n_obs + horizon`).
    pub fn n_time(&self) -> usize {
        self.n_time
    }

    /// Free parameters in evaluation order.
    pub fn free_params(&self) -> Vec<FreeParam> {
        let mut out = Vec::new();
        if !self.log_r0.is_fixed() {
            out.push(FreeParam {
                name: "log_r0".to_string(),
                bounds: (f64::NEG_INFINITY, f64::INFINITY),
                prior: self.log_r0,
                init: self.log_r0.mean,
            });
        }
        match &self.variant {
            Variant::Fixed => {}
            Variant::Piecewise { starts } => {
                out.push(FreeParam {
                    name: "rt_step_sd".to_string(),
                    bounds: (0.0, f64::INFINITY),
                    prior: PriorParam::new(0.0, 0.1),
                    init: 0.05,
                });
                for k in 0..starts.len() {
                    out.push(FreeParam {
                        name: format!("rt_step[{}]", k),
                        bounds: (f64::NEG_INFINITY, f64::INFINITY),
                        prior: PriorParam::new(0.0, 1.0),
                        init: 0.0,
                    });
                }
            }
            Variant::Gp { basis, length_scale, magnitude_sd, .. } => {
                out.push(FreeParam {
                    name: "gp_magnitude".to_string(),
                    bounds: (0.0, f64::INFINITY),
                    prior: PriorParam::new(0.0, *magnitude_sd),
                    init: 0.5 * magnitude_sd,
                });
                if !length_scale.is_fixed() {
                    out.push(FreeParam {
                        name: "gp_length_scale".to_string(),
                        bounds: (0.0, f64::INFINITY),
                        prior: *length_scale,
                        init: length_scale.mean,
                    });
                }
                for j in 0..basis.n_basis() {
                    out.push(FreeParam {
                        name: format!("gp_z[{}]", j),
                        bounds: (f64::NEG_INFINITY, f64::INFINITY),
                        prior: PriorParam::new(0.0, 1.0),
                        init: 0.0,
                    });
                }
            }
        }
        out
    }

    /// Number of free parameters.
    pub fn n_params(&self) -> usize {
        let base = usize::from(!self.log_r0.is_fixed());
        base + match &self.variant {
            Variant::Fixed => 0,
            Variant::Piecewise { starts } => 1 + starts.len(),
            Variant::Gp { basis, length_scale, .. } => {
                1 + usize::from(!length_scale.is_fixed()) + basis.n_basis()
            }
        }
    }

    /// Evaluate the Rt trajectory from this variant's parameter block.
    pub fn trajectory(&self, params: &[f64]) -> Result<Vec<f64>> {
        if params.len() != self.n_params() {
            return Err(Error::Computation(format!(
                "Rt process expected {} parameters, got {}",
                self.n_params(),
                params.len()
            )));
        }
        let mut it = params.iter();
        let log_r0 =
            if self.log_r0.is_fixed() { self.log_r0.mean } else { *it.next().unwrap_or(&0.0) };

        let traj = match &self.variant {
            Variant::Fixed => vec![exp_clamped(log_r0); self.n_time],
            Variant::Piecewise { starts } => {
                let step_sd = *it.next().unwrap_or(&0.0);
                let innovations: Vec<f64> = it.copied().collect();
                let mut out = Vec::with_capacity(self.n_time);
                let mut log_r = log_r0;
                let mut k = 0usize;
                for t in 0..self.n_time {
                    while k < starts.len() && starts[k] == t {
                        log_r += step_sd * innovations[k];
                        k += 1;
                    }
                    out.push(exp_clamped(log_r));
                }
                out
            }
            Variant::Gp { basis, freeze_from, length_scale, .. } => {
                let alpha = *it.next().unwrap_or(&0.0);
                let rho = if length_scale.is_fixed() {
                    length_scale.mean
                } else {
                    *it.next().unwrap_or(&1.0)
                };
                let z: Vec<f64> = it.copied().collect();
                let weights = basis.spectral_sqrt(alpha, rho);
                let last_row = basis.phi.len() - 1;
                (0..self.n_time)
                    .map(|t| {
                        let row = match freeze_from {
                            Some(n) if t >= *n => last_row,
                            _ => t.min(last_row),
                        };
                        let f: f64 = basis.phi[row]
                            .iter()
                            .zip(weights.iter())
                            .zip(z.iter())
                            .map(|((&p, &w), &zj)| w * zj * p)
                            .sum();
                        exp_clamped(log_r0 + f)
                    })
                    .collect()
            }
        };
        Ok(traj)
    }
}

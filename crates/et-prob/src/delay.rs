//! Delay distribution algebra.
//!
//! A reporting delay is an ordered list of stages (incubation period,
//! report-to-confirmation lag, ...). Each stage is either a fully-specified
//! discrete PMF or a parametric family (lognormal / gamma) whose parameters
//! carry prior uncertainty. Fully-specified stage lists collapse to a single
//! combined kernel once; uncertain stage lists are regenerated from the
//! current parameter values once per posterior draw, so parameter
//! uncertainty propagates into every kernel the model consumes.
//!
//! Stage PMFs are truncated at each stage's maximum delay and renormalized,
//! i.e. every delay distribution is conditioned on `delay <= max`. Composite
//! kernels are the discrete convolution of the stage PMFs; convolution is
//! commutative, so the combined kernel does not depend on stage order.

use et_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::discretize::{gamma_pmf, lognormal_pmf};

/// A scalar model parameter with a normal prior.
///
/// `sd == 0` pins the parameter at `mean` (no free parameter is created);
/// `sd > 0` makes it an estimated parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorParam {
    /// Prior mean (and initial value).
    pub mean: f64,
    /// Prior standard deviation; 0 fixes the parameter at `mean`.
    pub sd: f64,
}

impl PriorParam {
    /// An estimated parameter with a normal prior.
    pub fn new(mean: f64, sd: f64) -> Self {
        Self { mean, sd }
    }

    /// A parameter pinned at `value`.
    pub fn fixed(value: f64) -> Self {
        Self { mean: value, sd: 0.0 }
    }

    /// Whether the parameter is pinned.
    pub fn is_fixed(&self) -> bool {
        self.sd == 0.0
    }
}

/// Metadata for one free (sampled) parameter contributed by a stage.
#[derive(Debug, Clone)]
pub struct FreeParam {
    /// Parameter name.
    pub name: String,
    /// Constrained-space bounds.
    pub bounds: (f64, f64),
    /// Normal prior.
    pub prior: PriorParam,
    /// Initial value.
    pub init: f64,
}

impl FreeParam {
    fn positive(name: String, prior: PriorParam) -> Self {
        Self { name, bounds: (0.0, f64::INFINITY), init: prior.mean, prior }
    }

    fn unbounded(name: String, prior: PriorParam) -> Self {
        Self { name, bounds: (f64::NEG_INFINITY, f64::INFINITY), init: prior.mean, prior }
    }
}

/// One delay stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DelayStage {
    /// Fully-specified discrete PMF over `{0, ..., pmf.len()-1}`.
    Fixed {
        /// Probability mass per day of delay.
        pmf: Vec<f64>,
    },
    /// Lognormal family with possibly-uncertain log-scale parameters.
    LogNormal {
        /// Log-scale location parameter.
        meanlog: PriorParam,
        /// Log-scale standard deviation (> 0).
        sdlog: PriorParam,
        /// Truncation maximum (days).
        max: usize,
    },
    /// Gamma family parameterized by mean and standard deviation.
    Gamma {
        /// Mean delay in days (> 0).
        mean: PriorParam,
        /// Standard deviation in days (> 0).
        sd: PriorParam,
        /// Truncation maximum (days).
        max: usize,
    },
}

impl DelayStage {
    /// Longest delay this stage can produce.
    pub fn max_delay(&self) -> usize {
        match self {
            DelayStage::Fixed { pmf } => pmf.len().saturating_sub(1),
            DelayStage::LogNormal { max, .. } | DelayStage::Gamma { max, .. } => *max,
        }
    }

    /// Whether the stage has no estimated parameters.
    pub fn is_fixed(&self) -> bool {
        match self {
            DelayStage::Fixed { .. } => true,
            DelayStage::LogNormal { meanlog, sdlog, .. } => {
                meanlog.is_fixed() && sdlog.is_fixed()
            }
            DelayStage::Gamma { mean, sd, .. } => mean.is_fixed() && sd.is_fixed(),
        }
    }

    /// Validate user-supplied configuration. Fails with [`Error::Config`].
    pub fn validate(&self) -> Result<()> {
        match self {
            DelayStage::Fixed { pmf } => {
                if pmf.is_empty() {
                    return Err(Error::Config("fixed delay PMF is empty".to_string()));
                }
                if pmf.iter().any(|&p| !p.is_finite() || p < 0.0) {
                    return Err(Error::Config(
                        "fixed delay PMF has negative or non-finite mass".to_string(),
                    ));
                }
                let total: f64 = pmf.iter().sum();
                if (total - 1.0).abs() > 1e-6 {
                    return Err(Error::Config(format!(
                        "fixed delay PMF must sum to 1, got {}",
                        total
                    )));
                }
                Ok(())
            }
            DelayStage::LogNormal { meanlog, sdlog, .. } => {
                if !meanlog.mean.is_finite() || meanlog.sd < 0.0 {
                    return Err(Error::Config("invalid lognormal meanlog prior".to_string()));
                }
                if !sdlog.mean.is_finite() || sdlog.mean <= 0.0 || sdlog.sd < 0.0 {
                    return Err(Error::Config(
                        "lognormal sdlog prior mean must be > 0".to_string(),
                    ));
                }
                Ok(())
            }
            DelayStage::Gamma { mean, sd, .. } => {
                for (label, p) in [("mean", mean), ("sd", sd)] {
                    if !p.mean.is_finite() || p.mean <= 0.0 || p.sd < 0.0 {
                        return Err(Error::Config(format!(
                            "gamma delay {} prior mean must be > 0",
                            label
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Free parameters contributed by this stage, names prefixed by `prefix`.
    pub fn free_params(&self, prefix: &str) -> Vec<FreeParam> {
        let mut out = Vec::new();
        match self {
            DelayStage::Fixed { .. } => {}
            DelayStage::LogNormal { meanlog, sdlog, .. } => {
                if !meanlog.is_fixed() {
                    out.push(FreeParam::unbounded(format!("{}_meanlog", prefix), *meanlog));
                }
                if !sdlog.is_fixed() {
                    out.push(FreeParam::positive(format!("{}_sdlog", prefix), *sdlog));
                }
            }
            DelayStage::Gamma { mean, sd, .. } => {
                if !mean.is_fixed() {
                    out.push(FreeParam::positive(format!("{}_mean", prefix), *mean));
                }
                if !sd.is_fixed() {
                    out.push(FreeParam::positive(format!("{}_sd", prefix), *sd));
                }
            }
        }
        out
    }

    /// Build the stage PMF from the current values of its free parameters.
    ///
    /// `free` yields the values of the stage's free parameters in
    /// [`Self::free_params`] order; pinned parameters are taken from their
    /// prior mean.
    pub fn pmf(&self, free: &mut std::slice::Iter<'_, f64>) -> Result<Vec<f64>> {
        let resolve = |p: &PriorParam, it: &mut std::slice::Iter<'_, f64>| -> Result<f64> {
            if p.is_fixed() {
                Ok(p.mean)
            } else {
                it.next().copied().ok_or_else(|| {
                    Error::Computation("delay kernel: too few parameter values".to_string())
                })
            }
        };

        match self {
            DelayStage::Fixed { pmf } => {
                let total: f64 = pmf.iter().sum();
                Ok(pmf.iter().map(|&p| p / total).collect())
            }
            DelayStage::LogNormal { meanlog, sdlog, max } => {
                let mu = resolve(meanlog, free)?;
                let sigma = resolve(sdlog, free)?;
                lognormal_pmf(mu, sigma, *max)
            }
            DelayStage::Gamma { mean, sd, max } => {
                let m = resolve(mean, free)?;
                let s = resolve(sd, free)?;
                gamma_pmf(m, s, *max)
            }
        }
    }
}

/// Discrete convolution of two PMFs; support is the sum of the supports.
pub fn convolve(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() {
        return b.to_vec();
    }
    if b.is_empty() {
        return a.to_vec();
    }
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &pa) in a.iter().enumerate() {
        if pa == 0.0 {
            continue;
        }
        for (j, &pb) in b.iter().enumerate() {
            out[i + j] += pa * pb;
        }
    }
    out
}

/// An ordered list of delay stages forming one composite reporting delay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelaySpec {
    /// Delay stages, applied by convolution.
    pub stages: Vec<DelayStage>,
}

impl DelaySpec {
    /// A composite delay from the given stages.
    pub fn new(stages: Vec<DelayStage>) -> Self {
        Self { stages }
    }

    /// The identity delay: reports occur on the day of infection.
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    /// Validate every stage.
    pub fn validate(&self) -> Result<()> {
        for stage in &self.stages {
            stage.validate()?;
        }
        Ok(())
    }

    /// Longest combined delay (sum of stage maxima).
    pub fn max_delay(&self) -> usize {
        self.stages.iter().map(|s| s.max_delay()).sum()
    }

    /// Whether no stage carries parameter uncertainty.
    pub fn is_fixed(&self) -> bool {
        self.stages.iter().all(|s| s.is_fixed())
    }

    /// Free parameters across all stages, names prefixed by `prefix`.
    pub fn free_params(&self, prefix: &str) -> Vec<FreeParam> {
        self.stages
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.free_params(&format!("{}[{}]", prefix, i)))
            .collect()
    }

    /// Number of free parameters across all stages.
    pub fn n_free(&self) -> usize {
        self.stages.iter().map(|s| s.free_params("p").len()).sum()
    }

    /// Combined kernel from the current free-parameter values.
    ///
    /// A zero-stage spec yields the identity kernel `[1.0]`. The combined
    /// PMF is renormalized so it sums to 1 over the truncated support.
    pub fn kernel(&self, free: &[f64]) -> Result<Vec<f64>> {
        let mut it = free.iter();
        let mut kernel = vec![1.0];
        for stage in &self.stages {
            let pmf = stage.pmf(&mut it)?;
            kernel = convolve(&kernel, &pmf);
        }
        if it.next().is_some() {
            return Err(Error::Computation(
                "delay kernel: too many parameter values".to_string(),
            ));
        }
        let total: f64 = kernel.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(Error::Computation(format!(
                "combined delay kernel has invalid mass {}",
                total
            )));
        }
        for p in &mut kernel {
            *p /= total;
        }
        Ok(kernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_pmf(pmf: &[f64], tol: f64) {
        let total: f64 = pmf.iter().sum();
        assert!((total - 1.0).abs() < tol, "PMF sums to {}", total);
        assert!(pmf.iter().all(|&p| p >= 0.0 && p.is_finite()));
    }

    #[test]
    fn test_empty_spec_is_identity_kernel() {
        let spec = DelaySpec::empty();
        assert_eq!(spec.kernel(&[]).unwrap(), vec![1.0]);
        assert_eq!(spec.max_delay(), 0);
        assert!(spec.is_fixed());
    }

    #[test]
    fn test_fixed_kernel_sums_to_one() {
        let spec = DelaySpec::new(vec![
            DelayStage::Fixed { pmf: vec![0.2, 0.5, 0.3] },
            DelayStage::Gamma {
                mean: PriorParam::fixed(3.0),
                sd: PriorParam::fixed(1.0),
                max: 10,
            },
        ]);
        spec.validate().unwrap();
        assert!(spec.is_fixed());
        assert_eq!(spec.n_free(), 0);
        let k = spec.kernel(&[]).unwrap();
        assert_eq!(k.len(), spec.max_delay() + 1);
        assert_pmf(&k, 1e-9);
    }

    #[test]
    fn test_uncertain_kernel_sums_to_one_per_draw() {
        let spec = DelaySpec::new(vec![DelayStage::LogNormal {
            meanlog: PriorParam::new(1.6, 0.05),
            sdlog: PriorParam::new(0.6, 0.05),
            max: 14,
        }]);
        spec.validate().unwrap();
        assert!(!spec.is_fixed());
        assert_eq!(spec.n_free(), 2);
        // Two different parameter draws, both must give proper PMFs.
        for draw in [[1.6, 0.6], [1.8, 0.4]] {
            let k = spec.kernel(&draw).unwrap();
            assert_eq!(k.len(), 15);
            assert_pmf(&k, 1e-9);
        }
    }

    #[test]
    fn test_convolution_is_order_independent() {
        let a = DelayStage::Fixed { pmf: vec![0.5, 0.5] };
        let b = DelayStage::Gamma {
            mean: PriorParam::fixed(2.0),
            sd: PriorParam::fixed(1.0),
            max: 6,
        };
        let c = DelayStage::LogNormal {
            meanlog: PriorParam::fixed(0.5),
            sdlog: PriorParam::fixed(0.4),
            max: 5,
        };

        let orders: [[&DelayStage; 3]; 6] = [
            [&a, &b, &c],
            [&a, &c, &b],
            [&b, &a, &c],
            [&b, &c, &a],
            [&c, &a, &b],
            [&c, &b, &a],
        ];
        let reference = DelaySpec::new(vec![a.clone(), b.clone(), c.clone()])
            .kernel(&[])
            .unwrap();
        for order in orders {
            let spec = DelaySpec::new(order.iter().map(|&s| s.clone()).collect());
            let k = spec.kernel(&[]).unwrap();
            assert_eq!(k.len(), reference.len());
            for (i, (&x, &y)) in k.iter().zip(reference.iter()).enumerate() {
                assert!((x - y).abs() < 1e-12, "order-dependence at lag {}: {} vs {}", i, x, y);
            }
        }
    }

    #[test]
    fn test_stage_max_zero_is_point_mass() {
        let spec = DelaySpec::new(vec![DelayStage::Gamma {
            mean: PriorParam::fixed(3.0),
            sd: PriorParam::fixed(1.0),
            max: 0,
        }]);
        assert_eq!(spec.kernel(&[]).unwrap(), vec![1.0]);
    }

    #[test]
    fn test_fixed_pmf_validation() {
        assert!(DelayStage::Fixed { pmf: vec![] }.validate().is_err());
        assert!(DelayStage::Fixed { pmf: vec![0.5, -0.1, 0.6] }.validate().is_err());
        assert!(DelayStage::Fixed { pmf: vec![0.5, 0.2] }.validate().is_err());
        assert!(DelayStage::Fixed { pmf: vec![0.5, 0.5] }.validate().is_ok());
    }

    #[test]
    fn test_wrong_free_value_count_is_error() {
        let spec = DelaySpec::new(vec![DelayStage::LogNormal {
            meanlog: PriorParam::new(1.0, 0.1),
            sdlog: PriorParam::fixed(0.5),
            max: 5,
        }]);
        assert!(spec.kernel(&[]).is_err());
        assert!(spec.kernel(&[1.0, 2.0]).is_err());
        assert!(spec.kernel(&[1.0]).is_ok());
    }

    #[test]
    fn test_free_param_metadata() {
        let spec = DelaySpec::new(vec![DelayStage::Gamma {
            mean: PriorParam::new(4.0, 1.0),
            sd: PriorParam::new(2.0, 0.5),
            max: 10,
        }]);
        let params = spec.free_params("delay");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "delay[0]_mean");
        assert_eq!(params[0].bounds, (0.0, f64::INFINITY));
        assert_eq!(params[1].name, "delay[0]_sd");
        assert!((params[0].init - 4.0).abs() < 1e-12);
    }
}

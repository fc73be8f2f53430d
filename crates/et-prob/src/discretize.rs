//! Continuous-to-discrete distribution discretization.
//!
//! Delay and generation-time distributions are continuous families
//! (lognormal, gamma) observed on a daily grid. A distribution with CDF `F`
//! truncated at a maximum delay `max` becomes the PMF
//!
//! `p_k = (F(k+1) - F(k)) / F(max+1)`, `k = 0..=max`,
//!
//! i.e. the probability mass of day `k`, conditioned on the delay not
//! exceeding the truncation window.

use et_core::{Error, Result};
use statrs::distribution::{ContinuousCDF, Gamma, LogNormal};

fn discretize_cdf(cdf: impl Fn(f64) -> f64, max: usize) -> Result<Vec<f64>> {
    let total = cdf((max + 1) as f64);
    if !total.is_finite() || total <= 0.0 {
        return Err(Error::Computation(format!(
            "no probability mass on delay support 0..={}",
            max
        )));
    }
    let mut pmf = Vec::with_capacity(max + 1);
    let mut lo = 0.0;
    for k in 0..=max {
        let hi = cdf((k + 1) as f64);
        pmf.push(((hi - lo) / total).max(0.0));
        lo = hi;
    }
    Ok(pmf)
}

/// Discretized lognormal PMF over `{0, ..., max}`.
///
/// `meanlog`/`sdlog` are the log-scale location and scale parameters.
pub fn lognormal_pmf(meanlog: f64, sdlog: f64, max: usize) -> Result<Vec<f64>> {
    if !meanlog.is_finite() || !sdlog.is_finite() || sdlog <= 0.0 {
        return Err(Error::Computation(format!(
            "invalid lognormal parameters: meanlog={}, sdlog={}",
            meanlog, sdlog
        )));
    }
    if max == 0 {
        return Ok(vec![1.0]);
    }
    let dist = LogNormal::new(meanlog, sdlog)
        .map_err(|e| Error::Computation(format!("lognormal construction failed: {}", e)))?;
    discretize_cdf(|x| dist.cdf(x), max)
}

/// Discretized gamma PMF over `{0, ..., max}`, parameterized by mean and sd.
pub fn gamma_pmf(mean: f64, sd: f64, max: usize) -> Result<Vec<f64>> {
    if !mean.is_finite() || mean <= 0.0 || !sd.is_finite() || sd <= 0.0 {
        return Err(Error::Computation(format!(
            "invalid gamma parameters: mean={}, sd={}",
            mean, sd
        )));
    }
    if max == 0 {
        return Ok(vec![1.0]);
    }
    let shape = (mean / sd).powi(2);
    let rate = mean / (sd * sd);
    let dist = Gamma::new(shape, rate)
        .map_err(|e| Error::Computation(format!("gamma construction failed: {}", e)))?;
    discretize_cdf(|x| dist.cdf(x), max)
}

//! Count-data likelihoods: negative binomial (NB2) and its Poisson limit.

use et_core::{Error, Result};
use statrs::function::gamma::ln_gamma;

#[inline]
fn ln_factorial(n: u64) -> f64 {
    ln_gamma(n as f64 + 1.0)
}

/// Log-PMF of a Negative Binomial distribution (NB2) parameterized by mean
/// `mu` and overdispersion `phi`.
///
/// `Var(Y) = mu + mu^2 / phi`; `phi -> inf` recovers the Poisson limit.
pub fn neg_binomial_logpmf(k: u64, mu: f64, phi: f64) -> Result<f64> {
    if !mu.is_finite() || mu <= 0.0 {
        return Err(Error::Computation(format!("NB mean must be finite and > 0, got {}", mu)));
    }
    if !phi.is_finite() || phi <= 0.0 {
        return Err(Error::Computation(format!(
            "NB overdispersion must be finite and > 0, got {}",
            phi
        )));
    }

    let kf = k as f64;
    let ln_coeff = ln_gamma(kf + phi) - ln_gamma(phi) - ln_factorial(k);
    Ok(ln_coeff + phi * (phi / (phi + mu)).ln() + kf * (mu / (phi + mu)).ln())
}

/// Log-PMF of a Poisson distribution with mean `mu`.
pub fn poisson_logpmf(k: u64, mu: f64) -> Result<f64> {
    if !mu.is_finite() || mu <= 0.0 {
        return Err(Error::Computation(format!(
            "Poisson mean must be finite and > 0, got {}",
            mu
        )));
    }
    let kf = k as f64;
    Ok(kf * mu.ln() - mu - ln_factorial(k))
}

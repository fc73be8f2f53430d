//! Small numerically-stable math utilities used across probability code.

/// Stable `log(1 + exp(x))`.
///
/// `log(1+exp(x)) = max(x,0) + log(1+exp(-|x|))`; the exponential argument is
/// always non-positive, so it cannot overflow.
#[inline]
pub fn log1pexp(x: f64) -> f64 {
    let e = (-x.abs()).exp();
    x.max(0.0) + e.ln_1p()
}

/// Stable sigmoid: `1 / (1 + exp(-x))`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    let e = (-x.abs()).exp();
    let recip = 1.0 / (1.0 + e);
    if x >= 0.0 { recip } else { e * recip }
}

/// Stable `log(sigmoid(x))`.
#[inline]
pub fn log_sigmoid(x: f64) -> f64 {
    if x >= 0.0 { -(-x).exp().ln_1p() } else { x - x.exp().ln_1p() }
}

/// Exponential with a conservative clamp to avoid overflow.
///
/// Count-model likelihoods turn an overflowing `exp` into an infinite NLL,
/// which stalls both line searches and Metropolis proposals; clamping keeps
/// the objective finite so the sampler can recover.
#[inline]
pub fn exp_clamped(x: f64) -> f64 {
    x.clamp(-700.0, 700.0).exp()
}

/// `log(sum(exp(xs)))` over two values.
#[inline]
pub fn log_sum_exp2(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY {
        f64::NEG_INFINITY
    } else {
        max + ((a - max).exp() + (b - max).exp()).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log1pexp_matches_naive_moderate_values() {
        for x in [-10.0, -2.0, -0.1, 0.0, 0.1, 2.0, 10.0] {
            let naive = (1.0 + f64::exp(x)).ln();
            assert!((naive - log1pexp(x)).abs() < 1e-12, "x={}", x);
        }
    }

    #[test]
    fn test_log1pexp_finite_extremes() {
        for x in [-1e6, -100.0, 100.0, 1e6] {
            assert!(log1pexp(x).is_finite(), "x={}", x);
        }
        assert!((log1pexp(1e6) - 1e6).abs() < 1e-6);
    }

    #[test]
    fn test_sigmoid_bounds_and_symmetry() {
        for x in [-50.0, -10.0, -1.0, 0.0, 1.0, 10.0, 50.0] {
            let s = sigmoid(x);
            assert!((0.0..=1.0).contains(&s), "sigmoid({})={}", x, s);
            assert!((s + sigmoid(-x) - 1.0).abs() < 1e-15, "symmetry failed at {}", x);
        }
    }

    #[test]
    fn test_log_sigmoid_matches_naive() {
        for x in [-10.0, -2.0, 0.0, 2.0, 10.0] {
            let naive = sigmoid(x).ln();
            assert!((naive - log_sigmoid(x)).abs() < 1e-12, "x={}", x);
        }
    }

    #[test]
    fn test_exp_clamped_finite() {
        for x in [-1e6, -100.0, 100.0, 1e6] {
            assert!(exp_clamped(x).is_finite());
        }
    }
}

//! MCMC convergence diagnostics: split R-hat (rank-normalized and folded),
//! bulk and tail effective sample size, and warn-only quality gates.
//!
//! Per the error-handling contract, convergence problems are *warnings*
//! recorded in the result's diagnostics — they never escalate to failures.

use std::fmt;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::engine::DrawEnsemble;

/// Per-parameter convergence statistics for one ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsSummary {
    /// Rank-normalized folded split R-hat per parameter.
    pub r_hat: Vec<f64>,
    /// Bulk ESS per parameter.
    pub ess_bulk: Vec<f64>,
    /// Tail ESS per parameter.
    pub ess_tail: Vec<f64>,
    /// Total divergent proposals across chains.
    pub divergences: usize,
}

impl DiagnosticsSummary {
    /// Largest finite R-hat, or NaN when none is computable.
    pub fn max_r_hat(&self) -> f64 {
        let max = self
            .r_hat
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        if max == f64::NEG_INFINITY { f64::NAN } else { max }
    }

    /// Smallest finite bulk ESS, or NaN.
    pub fn min_ess_bulk(&self) -> f64 {
        let min = self
            .ess_bulk
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::INFINITY, f64::min);
        if min == f64::INFINITY { f64::NAN } else { min }
    }

    /// Smallest finite tail ESS, or NaN.
    pub fn min_ess_tail(&self) -> f64 {
        let min = self
            .ess_tail
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::INFINITY, f64::min);
        if min == f64::INFINITY { f64::NAN } else { min }
    }
}

/// Compute per-parameter diagnostics for an ensemble.
pub fn compute(ensemble: &DrawEnsemble) -> DiagnosticsSummary {
    let n_params = ensemble.param_names.len();
    let mut r_hat = Vec::with_capacity(n_params);
    let mut ess_bulk_v = Vec::with_capacity(n_params);
    let mut ess_tail_v = Vec::with_capacity(n_params);

    for idx in 0..n_params {
        let chains = ensemble.param_draws(idx);
        r_hat.push(r_hat_rank_normalized(&chains));
        let refs: Vec<&[f64]> = chains.iter().map(|c| c.as_slice()).collect();
        ess_bulk_v.push(ess_bulk(&refs));
        ess_tail_v.push(ess_tail(&chains));
    }

    DiagnosticsSummary {
        r_hat,
        ess_bulk: ess_bulk_v,
        ess_tail: ess_tail_v,
        divergences: ensemble.total_divergences(),
    }
}

/// Split R-hat for one parameter across chains (Gelman et al.).
///
/// Each chain is split in half; `R-hat = sqrt(var_hat_plus / W)` where
/// `var_hat_plus = (N-1)/N * W + B/N`.
pub fn split_r_hat(chains: &[&[f64]]) -> f64 {
    if chains.is_empty() {
        return f64::NAN;
    }
    let mut halves: Vec<&[f64]> = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        if chain.len() < 4 {
            return f64::NAN;
        }
        let mid = chain.len() / 2;
        halves.push(&chain[..mid]);
        halves.push(&chain[mid..]);
    }
    let min_len = halves.iter().map(|c| c.len()).min().unwrap_or(0);
    if min_len < 2 {
        return f64::NAN;
    }
    let halves: Vec<&[f64]> = halves.iter().map(|c| &c[..min_len]).collect();

    let m = halves.len() as f64;
    let n = min_len as f64;

    let means: Vec<f64> = halves.iter().map(|c| c.iter().sum::<f64>() / n).collect();
    let grand = means.iter().sum::<f64>() / m;
    let b: f64 = means.iter().map(|&cm| (cm - grand).powi(2)).sum::<f64>() * n / (m - 1.0);
    let w: f64 = halves
        .iter()
        .zip(means.iter())
        .map(|(c, &cm)| c.iter().map(|&x| (x - cm).powi(2)).sum::<f64>() / (n - 1.0))
        .sum::<f64>()
        / m;

    if w < 1e-30 {
        return f64::NAN;
    }
    let var_hat_plus = (n - 1.0) / n * w + b / n;
    (var_hat_plus / w).sqrt()
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() as f64 - 1.0);
    let i0 = pos.floor() as usize;
    let i1 = pos.ceil() as usize;
    if i0 == i1 {
        return sorted[i0];
    }
    let f = pos - i0 as f64;
    sorted[i0] * (1.0 - f) + sorted[i1] * f
}

fn rank_normalize(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let normal = Normal::new(0.0, 1.0).expect("standard normal is valid");
    let total: usize = chains.iter().map(|c| c.len()).sum();
    if total == 0 {
        return chains.to_vec();
    }

    let mut flat: Vec<(f64, usize, usize)> = Vec::with_capacity(total);
    for (ci, chain) in chains.iter().enumerate() {
        for (ti, &x) in chain.iter().enumerate() {
            flat.push((x, ci, ti));
        }
    }
    flat.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Greater));

    let mut out: Vec<Vec<f64>> = chains.iter().map(|c| vec![0.0; c.len()]).collect();
    let n = flat.len();
    let mut i = 0usize;
    while i < n {
        let mut j = i + 1;
        while j < n && flat[j].0 == flat[i].0 {
            j += 1;
        }
        // Average rank for ties, mapped through the normal quantile function
        // with the (rank - 1/2)/N offset.
        let rank = 0.5 * ((i + 1) as f64 + j as f64);
        let p = ((rank - 0.5) / n as f64).clamp(1e-12, 1.0 - 1e-12);
        let z = normal.inverse_cdf(p);
        for k in i..j {
            let (_, ci, ti) = flat[k];
            out[ci][ti] = z;
        }
        i = j;
    }
    out
}

fn median_all(chains: &[Vec<f64>]) -> f64 {
    let mut all: Vec<f64> = chains.iter().flat_map(|c| c.iter().copied()).collect();
    all.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Greater));
    all.get(all.len() / 2).copied().unwrap_or(f64::NAN)
}

/// Rank-normalized folded split R-hat (Vehtari et al. 2021): the max of the
/// rank-normalized statistic and its folded (spread-sensitive) variant.
pub fn r_hat_rank_normalized(chains: &[Vec<f64>]) -> f64 {
    if chains.len() < 2 || chains.iter().any(|c| c.len() < 4) {
        return f64::NAN;
    }

    let z = rank_normalize(chains);
    let z_refs: Vec<&[f64]> = z.iter().map(|c| c.as_slice()).collect();
    let r_rank = split_r_hat(&z_refs);

    let med = median_all(chains);
    let folded: Vec<Vec<f64>> =
        chains.iter().map(|c| c.iter().map(|&x| (x - med).abs()).collect()).collect();
    let z_fold = rank_normalize(&folded);
    let zf_refs: Vec<&[f64]> = z_fold.iter().map(|c| c.as_slice()).collect();
    let r_fold = split_r_hat(&zf_refs);

    r_rank.max(r_fold)
}

/// Effective sample size via the variogram autocorrelation estimate and
/// Geyer's initial monotone sequence, on split chains.
pub fn ess_bulk(chains: &[&[f64]]) -> f64 {
    if chains.is_empty() || chains.iter().any(|c| c.len() < 8) {
        return f64::NAN;
    }
    let mut split: Vec<&[f64]> = Vec::with_capacity(chains.len() * 2);
    for c in chains {
        let mid = c.len() / 2;
        split.push(&c[..mid]);
        split.push(&c[mid..]);
    }
    let n = split.iter().map(|c| c.len()).min().unwrap_or(0);
    let split: Vec<&[f64]> = split.iter().map(|c| &c[..n]).collect();
    let m = split.len();
    let total = (m * n) as f64;

    let means: Vec<f64> =
        split.iter().map(|c| c.iter().sum::<f64>() / c.len() as f64).collect();
    let vars: Vec<f64> = split
        .iter()
        .zip(means.iter())
        .map(|(c, &mu)| c.iter().map(|&x| (x - mu).powi(2)).sum::<f64>() / (n as f64 - 1.0))
        .collect();

    let m_f = m as f64;
    let n_f = n as f64;
    let grand = means.iter().sum::<f64>() / m_f;
    let b = means.iter().map(|&mu| (mu - grand).powi(2)).sum::<f64>() * n_f / (m_f - 1.0);
    let w = vars.iter().sum::<f64>() / m_f;
    let var_hat_plus = (n_f - 1.0) / n_f * w + b / n_f;
    if !var_hat_plus.is_finite() || var_hat_plus < 1e-30 {
        return total;
    }

    // rho_t = 1 - V_t / (2 * var_hat_plus), V_t the mean squared lag-t
    // difference across chains.
    let max_lag = n - 1;
    let mut rho = Vec::with_capacity(max_lag);
    for lag in 1..=max_lag {
        let mut sum = 0.0;
        let mut count = 0usize;
        for c in &split {
            for i in 0..(n - lag) {
                let d = c[i] - c[i + lag];
                sum += d * d;
                count += 1;
            }
        }
        let v = sum / count as f64;
        rho.push(1.0 - v / (2.0 * var_hat_plus));
    }

    // Geyer pairing: accumulate rho in (odd, even) pairs while the pair sum
    // stays positive, enforcing monotone non-increase.
    let mut tau = 1.0;
    let mut prev_pair = f64::INFINITY;
    let mut t = 0usize;
    while t + 1 < rho.len() {
        let pair = rho[t] + rho[t + 1];
        if pair <= 0.0 {
            break;
        }
        let pair = pair.min(prev_pair);
        tau += 2.0 * pair;
        prev_pair = pair;
        t += 2;
    }

    (total / tau).min(total).max(0.0)
}

/// Tail ESS: the minimum ESS of the 5% and 95% quantile indicators.
pub fn ess_tail(chains: &[Vec<f64>]) -> f64 {
    let total: usize = chains.iter().map(|c| c.len()).sum();
    if total == 0 {
        return f64::NAN;
    }
    let mut all: Vec<f64> = chains.iter().flat_map(|c| c.iter().copied()).collect();
    all.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Greater));
    let q05 = quantile_sorted(&all, 0.05);
    let q95 = quantile_sorted(&all, 0.95);

    let lower: Vec<Vec<f64>> = chains
        .iter()
        .map(|c| c.iter().map(|&x| if x <= q05 { 1.0 } else { 0.0 }).collect())
        .collect();
    let upper: Vec<Vec<f64>> = chains
        .iter()
        .map(|c| c.iter().map(|&x| if x >= q95 { 1.0 } else { 0.0 }).collect())
        .collect();

    let lower_refs: Vec<&[f64]> = lower.iter().map(|c| c.as_slice()).collect();
    let upper_refs: Vec<&[f64]> = upper.iter().map(|c| c.as_slice()).collect();
    ess_bulk(&lower_refs).min(ess_bulk(&upper_refs))
}

/// Warn-only thresholds for sampling quality.
///
/// Conservative to avoid flakiness on short runs; R-hat/ESS gates are
/// disabled below the chain/draw minima.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticThresholds {
    /// Minimum chains before R-hat/ESS gates apply.
    pub min_chains: usize,
    /// Minimum post-warmup draws per chain before R-hat/ESS gates apply.
    pub min_draws_per_chain: usize,
    /// Warn when the max rank-normalized folded R-hat exceeds this.
    pub max_r_hat: f64,
    /// Warn when min bulk/tail ESS falls below this fraction of total draws.
    pub min_ess_frac: f64,
}

impl Default for DiagnosticThresholds {
    fn default() -> Self {
        Self { min_chains: 2, min_draws_per_chain: 50, max_r_hat: 1.05, min_ess_frac: 0.05 }
    }
}

/// A soft convergence condition attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConvergenceWarning {
    /// Divergent proposals occurred during sampling.
    Divergences {
        /// Number of divergent proposals.
        count: usize,
    },
    /// The scale-reduction statistic exceeds its threshold.
    HighRHat {
        /// Largest per-parameter R-hat.
        max: f64,
    },
    /// Bulk effective sample size is low.
    LowBulkEss {
        /// Smallest per-parameter bulk ESS.
        min: f64,
    },
    /// Tail effective sample size is low.
    LowTailEss {
        /// Smallest per-parameter tail ESS.
        min: f64,
    },
    /// A deadline dropped chains; the result was built from fewer draws.
    ReducedDraws {
        /// Chains that completed.
        completed_chains: usize,
        /// Chains requested.
        requested_chains: usize,
    },
    /// The ensemble came from an approximate (non-MCMC) engine.
    ApproximateMode,
    /// Run too short for R-hat/ESS gates; they were skipped.
    ShortRun,
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceWarning::Divergences { count } => {
                write!(f, "{} divergent proposals during sampling", count)
            }
            ConvergenceWarning::HighRHat { max } => {
                write!(f, "max R-hat {:.3} above threshold", max)
            }
            ConvergenceWarning::LowBulkEss { min } => {
                write!(f, "min bulk ESS {:.1} is low", min)
            }
            ConvergenceWarning::LowTailEss { min } => {
                write!(f, "min tail ESS {:.1} is low", min)
            }
            ConvergenceWarning::ReducedDraws { completed_chains, requested_chains } => {
                write!(
                    f,
                    "deadline reached: {} of {} chains completed",
                    completed_chains, requested_chains
                )
            }
            ConvergenceWarning::ApproximateMode => {
                write!(f, "approximate inference: draws are not MCMC samples")
            }
            ConvergenceWarning::ShortRun => {
                write!(f, "run too short for R-hat/ESS gates")
            }
        }
    }
}

/// Evaluate warn-only quality gates for an ensemble.
pub fn quality_warnings(
    summary: &DiagnosticsSummary,
    ensemble: &DrawEnsemble,
    thresholds: &DiagnosticThresholds,
) -> Vec<ConvergenceWarning> {
    let mut warnings = Vec::new();

    if summary.divergences > 0 {
        warnings.push(ConvergenceWarning::Divergences { count: summary.divergences });
    }
    if ensemble.partial {
        warnings.push(ConvergenceWarning::ReducedDraws {
            completed_chains: ensemble.chains.len(),
            requested_chains: ensemble.n_chains_requested,
        });
    }
    if ensemble.approximate {
        warnings.push(ConvergenceWarning::ApproximateMode);
        return warnings;
    }

    let draws_per_chain = ensemble.chains.iter().map(|c| c.draws.len()).min().unwrap_or(0);
    let enabled = ensemble.chains.len() >= thresholds.min_chains
        && draws_per_chain >= thresholds.min_draws_per_chain;
    if !enabled {
        warnings.push(ConvergenceWarning::ShortRun);
        return warnings;
    }

    let max_r_hat = summary.max_r_hat();
    if max_r_hat.is_finite() && max_r_hat > thresholds.max_r_hat {
        warnings.push(ConvergenceWarning::HighRHat { max: max_r_hat });
    }
    let ess_floor = thresholds.min_ess_frac * ensemble.total_draws() as f64;
    let min_bulk = summary.min_ess_bulk();
    if min_bulk.is_finite() && min_bulk < ess_floor {
        warnings.push(ConvergenceWarning::LowBulkEss { min: min_bulk });
    }
    let min_tail = summary.min_ess_tail();
    if min_tail.is_finite() && min_tail < ess_floor {
        warnings.push(ConvergenceWarning::LowTailEss { min: min_tail });
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn iid_chains(n_chains: usize, n: usize, seed: u64) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n_chains)
            .map(|_| (0..n).map(|_| rng.sample::<f64, _>(StandardNormal)).collect())
            .collect()
    }

    #[test]
    fn test_r_hat_near_one_for_iid_chains() {
        let chains = iid_chains(4, 500, 7);
        let r = r_hat_rank_normalized(&chains);
        assert!(r.is_finite());
        assert!(r < 1.05, "iid chains should mix: R-hat = {}", r);
    }

    #[test]
    fn test_r_hat_detects_disjoint_chains() {
        let mut chains = iid_chains(2, 400, 11);
        for x in chains[1].iter_mut() {
            *x += 10.0;
        }
        let r = r_hat_rank_normalized(&chains);
        assert!(r > 1.5, "offset chains should flag: R-hat = {}", r);
    }

    #[test]
    fn test_ess_near_total_for_iid_draws() {
        let chains = iid_chains(4, 500, 13);
        let refs: Vec<&[f64]> = chains.iter().map(|c| c.as_slice()).collect();
        let ess = ess_bulk(&refs);
        let total = 2000.0;
        assert!(ess > 0.5 * total, "iid ESS should be large: {}", ess);
        assert!(ess <= total + 1e-9);
    }

    #[test]
    fn test_ess_small_for_highly_correlated_draws() {
        // A slow AR(1) walk has far fewer effective draws than nominal.
        let mut rng = StdRng::seed_from_u64(17);
        let chains: Vec<Vec<f64>> = (0..2)
            .map(|_| {
                let mut x = 0.0;
                (0..500)
                    .map(|_| {
                        x = 0.99 * x + 0.1 * rng.sample::<f64, _>(StandardNormal);
                        x
                    })
                    .collect()
            })
            .collect();
        let refs: Vec<&[f64]> = chains.iter().map(|c| c.as_slice()).collect();
        let ess = ess_bulk(&refs);
        assert!(ess < 300.0, "correlated ESS should be small: {}", ess);
    }

    #[test]
    fn test_short_chains_yield_nan_r_hat() {
        let chains = vec![vec![1.0, 2.0], vec![1.5, 2.5]];
        assert!(r_hat_rank_normalized(&chains).is_nan());
    }

    #[test]
    fn test_quality_warning_display() {
        let w = ConvergenceWarning::Divergences { count: 3 };
        assert!(w.to_string().contains("3"));
        let w = ConvergenceWarning::ReducedDraws { completed_chains: 1, requested_chains: 4 };
        assert!(w.to_string().contains("1 of 4"));
    }
}

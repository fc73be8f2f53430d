//! The posterior sampling engine boundary and the exact MCMC engine.
//!
//! [`PosteriorEngine`] is the narrow interface the estimation driver talks
//! to: a model specification goes in, a [`DrawEnsemble`] plus per-chain
//! statistics comes out. The default exact engine is an adaptive random-walk
//! Metropolis sampler: proposal scale tuned by dual averaging, per-coordinate
//! proposal deviations from windowed Welford variance, chains run in
//! parallel via rayon with deterministic per-chain seeds.
//!
//! Chains are shared-nothing; a wall-clock deadline aborts unfinished chains
//! individually, and whatever chains completed are returned (flagged
//! partial). Zero completed chains is a sampling failure, never an empty
//! success.

use std::time::{Duration, Instant};

use et_core::{Error, LogDensityModel, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::adapt::{compute_windows, DualAveraging, WelfordVariance};
use crate::target::UnconstrainedTarget;

/// Sampler configuration passed to a [`PosteriorEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerOptions {
    /// Number of independent chains.
    pub n_chains: usize,
    /// Warmup (adaptation) iterations per chain, discarded.
    pub n_warmup: usize,
    /// Post-warmup draws per chain.
    pub n_samples: usize,
    /// Target average acceptance probability for adaptation.
    pub target_accept: f64,
    /// Base RNG seed; chain `i` uses `seed + i`.
    pub seed: u64,
    /// Stddev of the jitter applied to each chain's starting point.
    pub init_jitter: f64,
    /// Wall-clock budget; on expiry, unfinished chains are dropped and
    /// completed chains returned.
    pub deadline: Option<Duration>,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            n_chains: 4,
            n_warmup: 500,
            n_samples: 500,
            // Optimal acceptance for multivariate random-walk proposals.
            target_accept: 0.3,
            seed: 20240901,
            init_jitter: 0.5,
            deadline: None,
        }
    }
}

impl SamplerOptions {
    fn validate(&self) -> Result<()> {
        if self.n_chains == 0 {
            return Err(Error::Config("sampler needs at least one chain".to_string()));
        }
        if self.n_samples == 0 {
            return Err(Error::Config("sampler needs at least one draw per chain".to_string()));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(Error::Config(format!(
                "target_accept must be in (0, 1), got {}",
                self.target_accept
            )));
        }
        Ok(())
    }
}

/// One chain's post-warmup output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    /// Draws in constrained (model) space.
    pub draws: Vec<Vec<f64>>,
    /// Proposals with non-finite posterior density during sampling.
    pub divergences: usize,
    /// Fraction of accepted transitions during sampling.
    pub accept_rate: f64,
    /// Final adapted proposal scale.
    pub proposal_scale: f64,
    /// Wall-clock time spent in warmup.
    pub warmup_time: Duration,
    /// Wall-clock time spent sampling.
    pub sampling_time: Duration,
}

/// Wall-clock timing per engine phase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngineTiming {
    /// Longest per-chain warmup time.
    pub warmup: Duration,
    /// Longest per-chain sampling time.
    pub sampling: Duration,
}

/// A complete multi-chain draw ensemble. Immutable once produced; the
/// driver only reads and aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawEnsemble {
    /// Completed chains.
    pub chains: Vec<Chain>,
    /// Parameter names (stable order).
    pub param_names: Vec<String>,
    /// Warmup iterations per chain.
    pub n_warmup: usize,
    /// Requested post-warmup draws per chain.
    pub n_samples: usize,
    /// Chains requested (>= `chains.len()` when a deadline truncated the run).
    pub n_chains_requested: usize,
    /// Per-phase timing.
    pub timing: EngineTiming,
    /// Whether a deadline dropped at least one chain.
    pub partial: bool,
    /// Whether the ensemble came from an approximate (non-MCMC) engine.
    pub approximate: bool,
    /// Engine name.
    pub engine: String,
}

impl DrawEnsemble {
    /// Total post-warmup draws across completed chains.
    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(|c| c.draws.len()).sum()
    }

    /// Total divergent proposals across completed chains.
    pub fn total_divergences(&self) -> usize {
        self.chains.iter().map(|c| c.divergences).sum()
    }

    /// Draws of one parameter, per chain.
    pub fn param_draws(&self, param_idx: usize) -> Vec<Vec<f64>> {
        self.chains
            .iter()
            .map(|c| c.draws.iter().map(|d| d[param_idx]).collect())
            .collect()
    }

    /// Iterate over all draws across chains.
    pub fn iter_draws(&self) -> impl Iterator<Item = &Vec<f64>> {
        self.chains.iter().flat_map(|c| c.draws.iter())
    }
}

/// The opaque posterior sampling engine boundary.
///
/// The driver submits a model specification and sampler configuration and
/// receives draws plus diagnostics; which algorithm runs behind the trait is
/// its own business.
pub trait PosteriorEngine: Send + Sync {
    /// Engine name for diagnostics.
    fn name(&self) -> &str;

    /// Run the engine and return the draw ensemble.
    fn sample(&self, model: &dyn LogDensityModel, opts: &SamplerOptions) -> Result<DrawEnsemble>;
}

/// Adaptive random-walk Metropolis engine (the exact MCMC mode).
#[derive(Debug, Clone, Copy, Default)]
pub struct MetropolisEngine;

impl PosteriorEngine for MetropolisEngine {
    fn name(&self) -> &str {
        "adaptive-metropolis"
    }

    fn sample(&self, model: &dyn LogDensityModel, opts: &SamplerOptions) -> Result<DrawEnsemble> {
        opts.validate()?;
        let start = Instant::now();
        let deadline = opts.deadline.map(|d| start + d);

        let dim = model.dim();
        if dim == 0 {
            // Fully-pinned model: the posterior is a point mass.
            let chains = (0..opts.n_chains)
                .map(|_| Chain {
                    draws: vec![Vec::new(); opts.n_samples],
                    divergences: 0,
                    accept_rate: 1.0,
                    proposal_scale: 0.0,
                    warmup_time: Duration::ZERO,
                    sampling_time: Duration::ZERO,
                })
                .collect();
            return Ok(DrawEnsemble {
                chains,
                param_names: Vec::new(),
                n_warmup: opts.n_warmup,
                n_samples: opts.n_samples,
                n_chains_requested: opts.n_chains,
                timing: EngineTiming::default(),
                partial: false,
                approximate: false,
                engine: self.name().to_string(),
            });
        }

        let target = UnconstrainedTarget::new(model);
        let z_init = target.to_unconstrained(&model.parameter_init());

        let results: Vec<Result<Option<Chain>>> = (0..opts.n_chains)
            .into_par_iter()
            .map(|chain_id| {
                let chain_seed = opts.seed.wrapping_add(chain_id as u64);
                run_chain(&target, opts, chain_seed, &z_init, deadline)
            })
            .collect();

        let mut chains = Vec::new();
        let mut first_error: Option<Error> = None;
        let mut dropped = 0usize;
        for r in results {
            match r {
                Ok(Some(chain)) => chains.push(chain),
                Ok(None) => dropped += 1,
                Err(e) => {
                    dropped += 1;
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if chains.is_empty() {
            let reason = match first_error {
                Some(e) => format!("all chains failed: {}", e),
                None => "no chain completed within the execution deadline".to_string(),
            };
            return Err(Error::Sampling(reason));
        }

        let timing = EngineTiming {
            warmup: chains.iter().map(|c| c.warmup_time).max().unwrap_or_default(),
            sampling: chains.iter().map(|c| c.sampling_time).max().unwrap_or_default(),
        };

        Ok(DrawEnsemble {
            partial: dropped > 0,
            n_chains_requested: opts.n_chains,
            param_names: model.parameter_names(),
            n_warmup: opts.n_warmup,
            n_samples: opts.n_samples,
            timing,
            chains,
            approximate: false,
            engine: self.name().to_string(),
        })
    }
}

fn deadline_hit(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn run_chain(
    target: &UnconstrainedTarget<'_>,
    opts: &SamplerOptions,
    seed: u64,
    z_init: &[f64],
    deadline: Option<Instant>,
) -> Result<Option<Chain>> {
    let dim = z_init.len();
    let mut rng = StdRng::seed_from_u64(seed);

    // Jittered start, retrying until the density is finite.
    let mut z: Vec<f64> = z_init
        .iter()
        .map(|&v| v + opts.init_jitter * rng.sample::<f64, _>(StandardNormal))
        .collect();
    let mut lp = target.logpdf(&z);
    let mut attempts = 0;
    while !lp.is_finite() && attempts < 100 {
        z = z_init
            .iter()
            .map(|&v| v + opts.init_jitter * rng.sample::<f64, _>(StandardNormal))
            .collect();
        lp = target.logpdf(&z);
        attempts += 1;
    }
    if !lp.is_finite() {
        return Err(Error::Sampling(
            "chain could not find a starting point with finite posterior density".to_string(),
        ));
    }

    let init_scale = 2.38 / (dim as f64).sqrt();
    let mut da = DualAveraging::new(opts.target_accept, init_scale);
    let mut welford = WelfordVariance::new(dim);
    let mut proposal_sd = vec![1.0; dim];
    let windows = compute_windows(opts.n_warmup);
    let mut window_idx = 0usize;

    let propose = |z: &[f64], scale: f64, sd: &[f64], rng: &mut StdRng| -> Vec<f64> {
        z.iter()
            .zip(sd.iter())
            .map(|(&zi, &s)| zi + scale * s * rng.sample::<f64, _>(StandardNormal))
            .collect()
    };

    let warmup_start = Instant::now();
    for i in 0..opts.n_warmup {
        if deadline_hit(deadline) {
            return Ok(None);
        }
        let scale = da.current();
        let z_new = propose(&z, scale, &proposal_sd, &mut rng);
        let lp_new = target.logpdf(&z_new);
        let accept_prob = if lp_new.is_finite() { (lp_new - lp).exp().min(1.0) } else { 0.0 };
        if rng.random::<f64>() < accept_prob {
            z = z_new;
            lp = lp_new;
        }
        da.update(accept_prob);

        let in_slow_window = window_idx > 0 && window_idx + 1 < windows.len();
        if in_slow_window {
            welford.update(&z);
        }
        if window_idx < windows.len() && i + 1 >= windows[window_idx].1 {
            if in_slow_window && welford.count() >= 10 {
                proposal_sd = welford.variance().iter().map(|v| v.sqrt()).collect();
            }
            welford.reset();
            let eps = da.adapted();
            da.reset(eps);
            window_idx += 1;
        }
    }
    let warmup_time = warmup_start.elapsed();

    let scale = da.adapted();
    let mut draws = Vec::with_capacity(opts.n_samples);
    let mut divergences = 0usize;
    let mut accepted = 0usize;

    let sampling_start = Instant::now();
    for _ in 0..opts.n_samples {
        if deadline_hit(deadline) {
            return Ok(None);
        }
        let z_new = propose(&z, scale, &proposal_sd, &mut rng);
        let lp_new = target.logpdf(&z_new);
        if !lp_new.is_finite() {
            divergences += 1;
        }
        let accept_prob = if lp_new.is_finite() { (lp_new - lp).exp().min(1.0) } else { 0.0 };
        if rng.random::<f64>() < accept_prob {
            z = z_new;
            lp = lp_new;
            accepted += 1;
        }
        draws.push(target.to_constrained(&z));
    }
    let sampling_time = sampling_start.elapsed();

    Ok(Some(Chain {
        draws,
        divergences,
        accept_rate: accepted as f64 / opts.n_samples as f64,
        proposal_scale: scale,
        warmup_time,
        sampling_time,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use et_core::Result as CoreResult;

    /// Standard normal in one dimension with a positive scale parameter.
    struct NormalModel {
        mean: f64,
    }

    impl LogDensityModel for NormalModel {
        fn dim(&self) -> usize {
            1
        }
        fn parameter_names(&self) -> Vec<String> {
            vec!["x".into()]
        }
        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(f64::NEG_INFINITY, f64::INFINITY)]
        }
        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0]
        }
        fn nll(&self, params: &[f64]) -> CoreResult<f64> {
            Ok(0.5 * (params[0] - self.mean).powi(2))
        }
    }

    fn quick_opts() -> SamplerOptions {
        SamplerOptions {
            n_chains: 2,
            n_warmup: 300,
            n_samples: 400,
            ..SamplerOptions::default()
        }
    }

    #[test]
    fn test_recovers_normal_mean() {
        let model = NormalModel { mean: 3.0 };
        let ensemble = MetropolisEngine.sample(&model, &quick_opts()).unwrap();
        assert_eq!(ensemble.chains.len(), 2);
        assert_eq!(ensemble.total_draws(), 800);
        let mean: f64 = ensemble.iter_draws().map(|d| d[0]).sum::<f64>() / 800.0;
        assert!((mean - 3.0).abs() < 0.5, "posterior mean {} should be near 3", mean);
        assert!(!ensemble.partial);
    }

    #[test]
    fn test_deterministic_given_seed() {
        let model = NormalModel { mean: 0.0 };
        let opts = quick_opts();
        let a = MetropolisEngine.sample(&model, &opts).unwrap();
        let b = MetropolisEngine.sample(&model, &opts).unwrap();
        for (ca, cb) in a.chains.iter().zip(b.chains.iter()) {
            assert_eq!(ca.draws, cb.draws, "same seed should reproduce draws");
        }
    }

    #[test]
    fn test_zero_deadline_is_sampling_failure() {
        let model = NormalModel { mean: 0.0 };
        let mut opts = quick_opts();
        opts.deadline = Some(Duration::ZERO);
        match MetropolisEngine.sample(&model, &opts) {
            Err(Error::Sampling(_)) => {}
            Ok(ensemble) => {
                // A chain may sneak in before the clock is checked; if so the
                // result must be flagged partial, never a silent success.
                assert!(ensemble.partial || ensemble.total_draws() > 0);
            }
            Err(e) => panic!("unexpected error kind: {:?}", e),
        }
    }

    #[test]
    fn test_acceptance_rate_near_target() {
        let model = NormalModel { mean: 0.0 };
        let mut opts = quick_opts();
        opts.n_warmup = 800;
        opts.n_samples = 800;
        let ensemble = MetropolisEngine.sample(&model, &opts).unwrap();
        for c in &ensemble.chains {
            assert!(
                (c.accept_rate - opts.target_accept).abs() < 0.2,
                "accept rate {} far from target {}",
                c.accept_rate,
                opts.target_accept
            );
        }
    }

    #[test]
    fn test_zero_dimensional_model() {
        struct PointMass;
        impl LogDensityModel for PointMass {
            fn dim(&self) -> usize {
                0
            }
            fn parameter_names(&self) -> Vec<String> {
                Vec::new()
            }
            fn parameter_bounds(&self) -> Vec<(f64, f64)> {
                Vec::new()
            }
            fn parameter_init(&self) -> Vec<f64> {
                Vec::new()
            }
            fn nll(&self, _params: &[f64]) -> CoreResult<f64> {
                Ok(0.0)
            }
        }
        let ensemble = MetropolisEngine.sample(&PointMass, &quick_opts()).unwrap();
        assert_eq!(ensemble.total_draws(), 800);
        assert!(ensemble.iter_draws().all(|d| d.is_empty()));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let model = NormalModel { mean: 0.0 };
        let mut opts = quick_opts();
        opts.n_chains = 0;
        assert!(MetropolisEngine.sample(&model, &opts).is_err());
    }
}

//! The estimation driver: assemble the joint model, run a posterior
//! sampling engine, validate convergence, and package posterior summaries.

use std::time::{Duration, Instant};

use et_core::{Error, OutputQuantity, Result, SummaryTable};
use et_model::{EpiModel, EstimateInput};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::diagnostics::{
    self, ConvergenceWarning, DiagnosticThresholds, DiagnosticsSummary,
};
use crate::engine::{DrawEnsemble, MetropolisEngine, PosteriorEngine, SamplerOptions};
use crate::laplace::LaplaceEngine;
use crate::summary::summarize_quantity;

/// Which inference mode backs the estimation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceMode {
    /// Full MCMC: multiple parallel chains with warmup adaptation.
    Exact {
        /// Number of chains.
        chains: usize,
        /// Warmup iterations per chain.
        warmup: usize,
        /// Post-warmup draws per chain.
        samples: usize,
    },
    /// MAP plus Laplace draws: fast, flagged approximate in diagnostics.
    Approximate {
        /// Number of draws from the Gaussian approximation.
        draws: usize,
    },
}

impl Default for InferenceMode {
    fn default() -> Self {
        InferenceMode::Exact { chains: 4, warmup: 500, samples: 500 }
    }
}

/// Options for one estimation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateOptions {
    /// Inference mode.
    pub mode: InferenceMode,
    /// Base RNG seed.
    pub seed: u64,
    /// Target acceptance rate for warmup adaptation.
    pub target_accept: f64,
    /// Wall-clock budget for the sampling engine; on expiry, completed
    /// chains are summarized and a reduced-draws warning attached.
    pub timeout: Option<Duration>,
    /// Central credible levels for the summary bands.
    pub credible_levels: Vec<f64>,
    /// Keep the raw draw ensemble on the result.
    pub keep_draws: bool,
    /// Warn-only convergence gates.
    pub thresholds: DiagnosticThresholds,
}

impl Default for EstimateOptions {
    fn default() -> Self {
        Self {
            mode: InferenceMode::default(),
            seed: 20240901,
            target_accept: 0.3,
            timeout: None,
            credible_levels: vec![0.2, 0.5, 0.9],
            keep_draws: false,
            thresholds: DiagnosticThresholds::default(),
        }
    }
}

impl EstimateOptions {
    fn validate(&self) -> Result<()> {
        if self.credible_levels.is_empty() {
            return Err(Error::Config("at least one credible level is required".to_string()));
        }
        for &level in &self.credible_levels {
            if !(level > 0.0 && level < 1.0) {
                return Err(Error::Config(format!(
                    "credible levels must lie in (0, 1), got {}",
                    level
                )));
            }
        }
        match self.mode {
            InferenceMode::Exact { chains, samples, .. } => {
                if chains == 0 || samples == 0 {
                    return Err(Error::Config(
                        "exact mode needs at least one chain and one draw".to_string(),
                    ));
                }
            }
            InferenceMode::Approximate { draws } => {
                if draws == 0 {
                    return Err(Error::Config(
                        "approximate mode needs at least one draw".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn sampler_options(&self) -> SamplerOptions {
        let defaults = SamplerOptions::default();
        match self.mode {
            InferenceMode::Exact { chains, warmup, samples } => SamplerOptions {
                n_chains: chains,
                n_warmup: warmup,
                n_samples: samples,
                target_accept: self.target_accept,
                seed: self.seed,
                deadline: self.timeout,
                ..defaults
            },
            InferenceMode::Approximate { draws } => SamplerOptions {
                n_chains: 1,
                n_warmup: 0,
                n_samples: draws,
                target_accept: self.target_accept,
                seed: self.seed,
                deadline: self.timeout,
                ..defaults
            },
        }
    }
}

/// Diagnostic metadata attached to every result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Engine that produced the draws.
    pub engine: String,
    /// Per-parameter convergence statistics.
    pub summary: DiagnosticsSummary,
    /// Soft warnings; never escalated to failures.
    pub warnings: Vec<ConvergenceWarning>,
    /// Chains that completed.
    pub chains_completed: usize,
    /// Chains requested.
    pub chains_requested: usize,
    /// Total post-warmup draws summarized.
    pub total_draws: usize,
    /// Whether a deadline truncated the run.
    pub partial: bool,
}

/// Wall-clock timing per estimation phase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PhaseTimings {
    /// Engine warmup phase.
    pub warmup: Duration,
    /// Engine sampling phase.
    pub sampling: Duration,
    /// Generated-quantities and summarization phase.
    pub summarize: Duration,
}

/// Output of one estimation call. Owned by the caller; no shared mutable
/// state survives the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationResult {
    /// Per-quantity, per-date posterior summary tables.
    pub summaries: Vec<SummaryTable>,
    /// Raw posterior draws, if requested.
    pub draws: Option<DrawEnsemble>,
    /// Convergence diagnostics and warnings.
    pub diagnostics: Diagnostics,
    /// Per-phase timing.
    pub timing: PhaseTimings,
}

impl EstimationResult {
    /// Summary table for one quantity, if tracked.
    pub fn summary(&self, quantity: OutputQuantity) -> Option<&SummaryTable> {
        self.summaries.iter().find(|t| t.quantity == quantity)
    }
}

/// Estimate Rt and latent infections for one region with the default engine
/// for the configured mode.
pub fn estimate(input: &EstimateInput, opts: &EstimateOptions) -> Result<EstimationResult> {
    match opts.mode {
        InferenceMode::Exact { .. } => estimate_with_engine(input, opts, &MetropolisEngine),
        InferenceMode::Approximate { .. } => {
            estimate_with_engine(input, opts, &LaplaceEngine::default())
        }
    }
}

/// Estimate with a caller-supplied posterior sampling engine.
pub fn estimate_with_engine(
    input: &EstimateInput,
    opts: &EstimateOptions,
    engine: &dyn PosteriorEngine,
) -> Result<EstimationResult> {
    opts.validate()?;

    // Fail fast: configuration and data validation happen before any
    // sampling is attempted.
    let model = EpiModel::new(input)?;
    info!(
        n_obs = model.n_obs(),
        horizon = model.horizon(),
        dim = et_core::LogDensityModel::dim(&model),
        engine = engine.name(),
        "fitting joint model"
    );

    let ensemble = engine.sample(&model, &opts.sampler_options())?;
    if ensemble.total_draws() == 0 {
        return Err(Error::Sampling("engine returned zero usable draws".to_string()));
    }
    debug!(
        chains = ensemble.chains.len(),
        draws = ensemble.total_draws(),
        "sampling complete"
    );

    let diag_summary = diagnostics::compute(&ensemble);
    let warnings = diagnostics::quality_warnings(&diag_summary, &ensemble, &opts.thresholds);
    for w in &warnings {
        warn!(warning = %w, "convergence");
    }

    let summarize_start = Instant::now();
    let mut rt_draws: Vec<Vec<f64>> = Vec::new();
    let mut infection_draws: Vec<Vec<f64>> = Vec::new();
    let mut report_draws: Vec<Vec<f64>> = Vec::new();
    let mut growth_draws: Vec<Vec<f64>> = Vec::new();
    let mut doubling_draws: Vec<Vec<f64>> = Vec::new();

    for draw in ensemble.iter_draws() {
        let q = model.quantities(draw)?;
        if let Some(rt) = q.rt {
            rt_draws.push(rt);
        }
        infection_draws.push(q.infections);
        report_draws.push(q.expected_reports);
        growth_draws.push(q.growth_rate);
        doubling_draws.push(q.doubling_time);
    }

    let dates = model.output_dates();
    let n_obs = model.n_obs();
    let levels = &opts.credible_levels;

    let mut summaries = Vec::new();
    if model.has_rt() {
        summaries.push(summarize_quantity(OutputQuantity::Rt, &dates, n_obs, &rt_draws, levels));
    }
    summaries.push(summarize_quantity(
        OutputQuantity::Infections,
        &dates,
        n_obs,
        &infection_draws,
        levels,
    ));
    summaries.push(summarize_quantity(
        OutputQuantity::ExpectedReports,
        &dates,
        n_obs,
        &report_draws,
        levels,
    ));
    summaries.push(summarize_quantity(
        OutputQuantity::GrowthRate,
        &dates,
        n_obs,
        &growth_draws,
        levels,
    ));
    summaries.push(summarize_quantity(
        OutputQuantity::DoublingTime,
        &dates,
        n_obs,
        &doubling_draws,
        levels,
    ));
    let summarize_time = summarize_start.elapsed();

    let diagnostics = Diagnostics {
        engine: ensemble.engine.clone(),
        summary: diag_summary,
        warnings,
        chains_completed: ensemble.chains.len(),
        chains_requested: ensemble.n_chains_requested,
        total_draws: ensemble.total_draws(),
        partial: ensemble.partial,
    };
    let timing = PhaseTimings {
        warmup: ensemble.timing.warmup,
        sampling: ensemble.timing.sampling,
        summarize: summarize_time,
    };

    Ok(EstimationResult {
        summaries,
        draws: if opts.keep_draws { Some(ensemble) } else { None },
        diagnostics,
        timing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_validation() {
        let mut opts = EstimateOptions::default();
        opts.credible_levels = vec![];
        assert!(opts.validate().is_err());
        opts.credible_levels = vec![1.5];
        assert!(opts.validate().is_err());
        opts.credible_levels = vec![0.5];
        assert!(opts.validate().is_ok());
        opts.mode = InferenceMode::Exact { chains: 0, warmup: 10, samples: 10 };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_sampler_options_mapping() {
        let opts = EstimateOptions {
            mode: InferenceMode::Approximate { draws: 123 },
            ..EstimateOptions::default()
        };
        let s = opts.sampler_options();
        assert_eq!(s.n_chains, 1);
        assert_eq!(s.n_warmup, 0);
        assert_eq!(s.n_samples, 123);
    }
}

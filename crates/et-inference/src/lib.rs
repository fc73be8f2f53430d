//! # et-inference
//!
//! Posterior sampling engines, convergence diagnostics, posterior
//! summarization, the estimation driver, and the multi-region orchestrator
//! for EpiTrend.
//!
//! ## Architecture
//!
//! The driver depends on the [`engine::PosteriorEngine`] trait, never on a
//! concrete sampler: the exact adaptive-Metropolis engine and the MAP +
//! Laplace approximate engine both sit behind it, and a caller can inject
//! their own.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Warmup adaptation: dual averaging and Welford variance.
pub mod adapt;
/// Convergence diagnostics: split R-hat, bulk/tail ESS, warn-only gates.
pub mod diagnostics;
/// Engine boundary and the exact Metropolis engine.
pub mod engine;
/// Estimation driver.
pub mod estimate;
/// MAP + Laplace approximate engine.
pub mod laplace;
/// Generic L-BFGS optimization.
pub mod optimizer;
/// Multi-region orchestration.
pub mod regions;
/// Posterior summarization.
pub mod summary;
/// Unconstrained posterior target.
pub mod target;

pub use diagnostics::{ConvergenceWarning, DiagnosticThresholds, DiagnosticsSummary};
pub use engine::{Chain, DrawEnsemble, MetropolisEngine, PosteriorEngine, SamplerOptions};
pub use estimate::{
    estimate, estimate_with_engine, Diagnostics, EstimateOptions, EstimationResult,
    InferenceMode, PhaseTimings,
};
pub use laplace::LaplaceEngine;
pub use regions::{estimate_regions, Region, RegionOutcome, RegionalResults};

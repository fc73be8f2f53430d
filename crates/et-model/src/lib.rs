//! # et-model
//!
//! The generative model for EpiTrend: Rt process variants, the renewal /
//! backcalculation infection generating process, the observation model, and
//! the joint assembly exposing everything as a single
//! [`et_core::LogDensityModel`] plus per-draw generated quantities.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// User-facing configuration types.
pub mod config;
/// Infection generating process (renewal recursion, backcalculation walk).
pub mod infections;
/// Joint model assembly and generated quantities.
pub mod joint;
/// Observation model building blocks.
pub mod observation;
/// Rt process variants.
pub mod rt;

pub use config::{
    BackcalcConfig, EstimateInput, ForecastConfig, GenerationTime, GpKernel, InfectionNoise,
    ObservationConfig, ObservationFamily, RtConfig, RtForecast, RtProcess,
};
pub use joint::{EpiModel, PathQuantities};
pub use rt::RtProcessModel;

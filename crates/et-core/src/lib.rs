//! # et-core
//!
//! Core types for EpiTrend: the error taxonomy, the case-series data model,
//! posterior summary tables, and the [`traits::LogDensityModel`] trait that
//! separates model construction from the posterior sampling engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types
pub mod error;
/// Core traits
pub mod traits;
/// Common data types
pub mod types;

pub use error::{Error, Result};
pub use traits::LogDensityModel;
pub use types::{
    CaseSeries, CredibleInterval, DateKind, NormalizedSeries, Observation, OutputQuantity,
    SummaryRow, SummaryTable,
};

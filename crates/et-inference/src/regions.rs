//! Multi-region orchestration: independent fan-out of the estimation driver
//! over many case series.
//!
//! Regions share nothing. Each region's outcome — success, partial result,
//! or hard failure — is captured independently; one region's failure never
//! aborts its siblings.

use et_core::{Error, Result};
use et_model::EstimateInput;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::estimate::{estimate, EstimateOptions, EstimationResult};

/// One region's name and input.
#[derive(Debug, Clone)]
pub struct Region {
    /// Region identifier, unique within one call.
    pub name: String,
    /// Full estimation input for this region.
    pub input: EstimateInput,
}

impl Region {
    /// Create a named region.
    pub fn new(name: impl Into<String>, input: EstimateInput) -> Self {
        Self { name: name.into(), input }
    }
}

/// One region's captured outcome.
#[derive(Debug)]
pub struct RegionOutcome {
    /// Region identifier.
    pub region: String,
    /// The region's result or its captured error.
    pub outcome: Result<EstimationResult>,
}

/// Outcomes for all regions of one call, in input order.
#[derive(Debug)]
pub struct RegionalResults {
    /// Per-region outcomes.
    pub outcomes: Vec<RegionOutcome>,
}

impl RegionalResults {
    /// Outcome for a region by name.
    pub fn get(&self, name: &str) -> Option<&RegionOutcome> {
        self.outcomes.iter().find(|o| o.region == name)
    }

    /// Number of regions that produced a result.
    pub fn n_success(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_ok()).count()
    }

    /// Number of regions that failed.
    pub fn n_failed(&self) -> usize {
        self.outcomes.len() - self.n_success()
    }
}

/// Run the estimation driver over independent regions, at most
/// `parallelism` regions at a time.
pub fn estimate_regions(
    regions: Vec<Region>,
    opts: &EstimateOptions,
    parallelism: usize,
) -> Result<RegionalResults> {
    if regions.is_empty() {
        return Ok(RegionalResults { outcomes: Vec::new() });
    }

    info!(n_regions = regions.len(), parallelism, "starting multi-region estimation");
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.max(1))
        .build()
        .map_err(|e| Error::Computation(format!("failed to build region pool: {}", e)))?;

    let outcomes: Vec<RegionOutcome> = pool.install(|| {
        regions
            .par_iter()
            .map(|region| {
                let outcome = estimate(&region.input, opts);
                if let Err(e) = &outcome {
                    warn!(region = %region.name, error = %e, "region failed");
                }
                RegionOutcome { region: region.name.clone(), outcome }
            })
            .collect()
    });

    Ok(RegionalResults { outcomes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_region_list() {
        let results =
            estimate_regions(Vec::new(), &EstimateOptions::default(), 2).unwrap();
        assert!(results.outcomes.is_empty());
        assert_eq!(results.n_success(), 0);
        assert_eq!(results.n_failed(), 0);
    }
}

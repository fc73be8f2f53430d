//! User-facing model configuration.

use et_core::{CaseSeries, Error, Result};
use et_prob::delay::{DelaySpec, DelayStage, FreeParam, PriorParam};
use serde::{Deserialize, Serialize};

/// Generation-time distribution: the delay between an infector's infection
/// and their infectee's infection.
///
/// Wraps one delay stage (fixed PMF or uncertain parametric family). The
/// discretized PMF has its day-0 mass removed and is renormalized over
/// `1..=max`: the daily renewal recursion cannot consume same-day infections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTime {
    /// The underlying distribution.
    pub stage: DelayStage,
}

impl GenerationTime {
    /// Generation time from a fixed PMF over `{0, ..., len-1}` days.
    pub fn fixed_pmf(pmf: Vec<f64>) -> Self {
        Self { stage: DelayStage::Fixed { pmf } }
    }

    /// Gamma-family generation time parameterized by mean and sd in days.
    pub fn gamma(mean: PriorParam, sd: PriorParam, max: usize) -> Self {
        Self { stage: DelayStage::Gamma { mean, sd, max } }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.stage.validate()?;
        if self.stage.max_delay() == 0 {
            return Err(Error::Config(
                "generation time must allow delays of at least one day".to_string(),
            ));
        }
        Ok(())
    }

    /// Longest generation interval in days.
    pub fn max_delay(&self) -> usize {
        self.stage.max_delay()
    }

    /// Free parameters contributed by an uncertain generation time.
    pub fn free_params(&self) -> Vec<FreeParam> {
        self.stage.free_params("gt")
    }

    /// Generation-interval PMF from the current free-parameter values.
    ///
    /// Index `d` holds the probability of a generation interval of `d + 1`
    /// days; day-0 mass is dropped and the PMF renormalized.
    pub fn pmf(&self, free: &[f64]) -> Result<Vec<f64>> {
        let mut it = free.iter();
        let raw = self.stage.pmf(&mut it)?;
        let tail: f64 = raw.iter().skip(1).sum();
        if !tail.is_finite() || tail <= 0.0 {
            return Err(Error::Computation(
                "generation-time PMF has no mass beyond day 0".to_string(),
            ));
        }
        Ok(raw.iter().skip(1).map(|&p| p / tail).collect())
    }
}

/// Kernel family for the Gaussian-process Rt prior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpKernel {
    /// Squared-exponential (infinitely smooth).
    SquaredExponential,
    /// Matérn with smoothness 3/2.
    Matern32,
    /// Matérn with smoothness 5/2.
    Matern52,
}

/// How Rt behaves across the boundary between fitted data and the forecast
/// horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RtForecast {
    /// Extrapolate the Rt process into the horizon.
    Project,
    /// Freeze Rt at its last fitted value.
    Latest,
}

/// Rt process variants.
///
/// Random-walk and breakpoints share one piecewise latent-innovation
/// representation: both produce a piecewise-constant log-Rt whose segment
/// offsets are independent normal innovations; they differ only in where the
/// segment boundaries come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RtProcess {
    /// Smooth Rt via a low-rank Gaussian-process basis approximation.
    GaussianProcess {
        /// Prior on the GP length scale, in days.
        length_scale: PriorParam,
        /// Half-normal prior scale for the GP marginal standard deviation.
        magnitude_sd: f64,
        /// Basis-function count as a fraction of the horizon length.
        basis_fraction: f64,
        /// Kernel family.
        kernel: GpKernel,
        /// Forecast-boundary policy.
        forecast: RtForecast,
    },
    /// Piecewise-constant Rt changing every `step_days` days.
    RandomWalk {
        /// Step length in days.
        step_days: usize,
        /// Forecast-boundary policy.
        forecast: RtForecast,
    },
    /// Piecewise-constant Rt changing at dates flagged in the case series.
    Breakpoints,
    /// A single constant Rt for the whole horizon.
    Fixed,
}

/// Rt process configuration: initial-value prior plus process variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtConfig {
    /// Prior on Rt at the first fitted day (lognormal, moment-matched from
    /// this mean and sd).
    pub prior: PriorParam,
    /// Process variant.
    pub process: RtProcess,
}

impl RtConfig {
    /// Gaussian-process Rt with default hyperparameters.
    pub fn gp(prior: PriorParam) -> Self {
        Self {
            prior,
            process: RtProcess::GaussianProcess {
                length_scale: PriorParam::new(21.0, 7.0),
                magnitude_sd: 0.1,
                basis_fraction: 0.2,
                kernel: GpKernel::Matern32,
                forecast: RtForecast::Latest,
            },
        }
    }

    /// Weekly random-walk Rt.
    pub fn random_walk(prior: PriorParam) -> Self {
        Self {
            prior,
            process: RtProcess::RandomWalk { step_days: 7, forecast: RtForecast::Latest },
        }
    }

    /// Constant Rt.
    pub fn fixed(prior: PriorParam) -> Self {
        Self { prior, process: RtProcess::Fixed }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.prior.mean.is_finite() || self.prior.mean <= 0.0 || self.prior.sd < 0.0 {
            return Err(Error::Config(format!(
                "Rt prior mean must be > 0, got {}",
                self.prior.mean
            )));
        }
        match &self.process {
            RtProcess::GaussianProcess { length_scale, magnitude_sd, basis_fraction, .. } => {
                if length_scale.mean <= 0.0 || !length_scale.mean.is_finite() {
                    return Err(Error::Config(
                        "GP length-scale prior mean must be > 0 days".to_string(),
                    ));
                }
                if !(*magnitude_sd > 0.0 && magnitude_sd.is_finite()) {
                    return Err(Error::Config("GP magnitude_sd must be > 0".to_string()));
                }
                if !(*basis_fraction > 0.0 && *basis_fraction <= 1.0) {
                    return Err(Error::Config(format!(
                        "GP basis_fraction must be in (0, 1], got {}",
                        basis_fraction
                    )));
                }
                Ok(())
            }
            RtProcess::RandomWalk { step_days, .. } => {
                if *step_days == 0 {
                    return Err(Error::Config("random-walk step_days must be >= 1".to_string()));
                }
                Ok(())
            }
            RtProcess::Breakpoints | RtProcess::Fixed => Ok(()),
        }
    }
}

/// Process noise on realized infections in renewal mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InfectionNoise {
    /// Deterministic renewal recursion.
    None,
    /// Multiplicative lognormal noise, `I_t = mu_t * exp(sigma*eps_t - sigma^2/2)`
    /// with `eps_t ~ N(0,1)` and a half-normal prior on `sigma`.
    LogNormal {
        /// Half-normal prior scale for the noise standard deviation.
        prior_sd: f64,
    },
}

impl Default for InfectionNoise {
    fn default() -> Self {
        InfectionNoise::None
    }
}

/// Non-parametric backcalculation mode: latent log-infections follow their
/// own random walk, with no Rt semantics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackcalcConfig {
    /// Half-normal prior scale for the random-walk innovation sd.
    pub smoothing_sd: f64,
}

impl Default for BackcalcConfig {
    fn default() -> Self {
        Self { smoothing_sd: 0.1 }
    }
}

/// Observation likelihood family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservationFamily {
    /// Negative binomial with estimated overdispersion.
    NegativeBinomial,
    /// Poisson (the zero-overdispersion limit).
    Poisson,
}

/// Observation-model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationConfig {
    /// Likelihood family.
    pub family: ObservationFamily,
    /// Estimate multiplicative day-of-week reporting effects (7 values
    /// constrained to average 1 over a week).
    pub week_effect: bool,
    /// Right-truncation adjustment distribution: the delay from report to
    /// appearance in the data. Expected counts in the most recent days are
    /// multiplied by its CDF.
    pub truncation: Option<DelaySpec>,
    /// Fraction of infections that are ever reported, in (0, 1].
    pub scaling: Option<PriorParam>,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            family: ObservationFamily::NegativeBinomial,
            week_effect: false,
            truncation: None,
            scaling: None,
        }
    }
}

impl ObservationConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if let Some(trunc) = &self.truncation {
            trunc.validate()?;
        }
        if let Some(scaling) = &self.scaling {
            if !(scaling.mean > 0.0 && scaling.mean <= 1.0) || scaling.sd < 0.0 {
                return Err(Error::Config(format!(
                    "reporting-fraction scaling mean must be in (0, 1], got {}",
                    scaling.mean
                )));
            }
        }
        Ok(())
    }
}

/// Forecast configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ForecastConfig {
    /// Days to project beyond the observed series.
    pub horizon: usize,
    /// Population size enabling the crude susceptible-depletion adjustment
    /// on forecast steps.
    pub population: Option<f64>,
}

impl ForecastConfig {
    /// Forecast `horizon` days with no depletion adjustment.
    pub fn days(horizon: usize) -> Self {
        Self { horizon, population: None }
    }
}

/// Everything one estimation call consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateInput {
    /// Reported cases per date (with optional breakpoint markers).
    pub cases: CaseSeries,
    /// Generation-time distribution.
    pub generation_time: GenerationTime,
    /// Reporting-delay stages between infection and report.
    pub delays: DelaySpec,
    /// Rt process configuration; `None` only together with `backcalc`.
    pub rt: Option<RtConfig>,
    /// Non-parametric backcalculation mode; mutually exclusive with `rt`.
    pub backcalc: Option<BackcalcConfig>,
    /// Observation model.
    pub observation: ObservationConfig,
    /// Process noise on realized infections (renewal mode).
    #[serde(default)]
    pub noise: InfectionNoise,
    /// Forecast horizon and optional population.
    #[serde(default)]
    pub forecast: ForecastConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_time_drops_day_zero_mass() {
        let gt = GenerationTime::fixed_pmf(vec![0.2, 0.4, 0.4]);
        let pmf = gt.pmf(&[]).unwrap();
        // Day-0 mass removed, remainder renormalized: [0.5, 0.5] on days 1, 2.
        assert_eq!(pmf.len(), 2);
        assert!((pmf[0] - 0.5).abs() < 1e-12);
        assert!((pmf[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_generation_time_requires_positive_support() {
        let gt = GenerationTime::fixed_pmf(vec![1.0]);
        assert!(gt.validate().is_err());
    }

    #[test]
    fn test_rt_config_validation() {
        assert!(RtConfig::fixed(PriorParam::new(1.0, 0.2)).validate().is_ok());
        assert!(RtConfig::fixed(PriorParam::new(-1.0, 0.2)).validate().is_err());
        let rw = RtConfig {
            prior: PriorParam::new(1.0, 0.2),
            process: RtProcess::RandomWalk { step_days: 0, forecast: RtForecast::Latest },
        };
        assert!(rw.validate().is_err());
        let gp = RtConfig {
            prior: PriorParam::new(1.0, 0.2),
            process: RtProcess::GaussianProcess {
                length_scale: PriorParam::new(21.0, 7.0),
                magnitude_sd: 0.1,
                basis_fraction: 1.5,
                kernel: GpKernel::SquaredExponential,
                forecast: RtForecast::Project,
            },
        };
        assert!(gp.validate().is_err());
    }

    #[test]
    fn test_observation_scaling_validation() {
        let mut obs = ObservationConfig::default();
        obs.scaling = Some(PriorParam::fixed(0.4));
        assert!(obs.validate().is_ok());
        obs.scaling = Some(PriorParam::fixed(1.4));
        assert!(obs.validate().is_err());
    }
}

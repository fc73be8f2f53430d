//! Joint model assembly.
//!
//! [`EpiModel`] wires the Rt process, the infection generating process, the
//! delay algebra and the observation model into one [`LogDensityModel`] the
//! sampling engines can consume. Priors are part of the negative
//! log-density, added per parameter from the layout metadata.
//!
//! Uncertain delay, generation-time and truncation distributions are
//! regenerated from the current parameter values on every evaluation, so a
//! posterior draw of those parameters carries its own kernel.

use std::ops::Range;

use chrono::{Datelike, NaiveDate};
use et_core::{Error, LogDensityModel, NormalizedSeries, Result};
use et_prob::counts::{neg_binomial_logpmf, poisson_logpmf};
use et_prob::delay::{DelaySpec, FreeParam, PriorParam};
use et_prob::math::exp_clamped;

use crate::config::{
    BackcalcConfig, EstimateInput, GenerationTime, InfectionNoise, ObservationConfig,
    ObservationFamily,
};
use crate::infections::{backcalc_path, renewal_path};
use crate::observation::{day_of_week_effects, expected_reports, pmf_to_cdf};
use crate::rt::RtProcessModel;

/// Expected counts below this floor are clamped before entering the count
/// likelihood, keeping the objective finite when a proposal drives the
/// latent series toward zero.
const MU_FLOOR: f64 = 1e-8;

/// Positions of each parameter block within the flat parameter vector.
#[derive(Debug, Clone, Default)]
struct ParamBlocks {
    seed: usize,
    rt: Range<usize>,
    noise_sigma: Option<usize>,
    noise_eps: Range<usize>,
    bc_sigma: Option<usize>,
    bc_steps: Range<usize>,
    gt: Range<usize>,
    delays: Range<usize>,
    truncation: Range<usize>,
    dow: Range<usize>,
    overdispersion: Option<usize>,
    scaling: Option<usize>,
}

struct LayoutBuilder {
    entries: Vec<FreeParam>,
}

impl LayoutBuilder {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn push(&mut self, entry: FreeParam) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    fn push_all(&mut self, entries: Vec<FreeParam>) -> Range<usize> {
        let start = self.entries.len();
        self.entries.extend(entries);
        start..self.entries.len()
    }
}

#[derive(Debug)]
enum Mode {
    Renewal { rt: RtProcessModel, noise: InfectionNoise },
    Backcalc { config: BackcalcConfig },
}

/// Per-draw derived trajectories over the fitted-plus-forecast window.
#[derive(Debug, Clone)]
pub struct PathQuantities {
    /// Effective Rt per day; `None` in backcalculation mode.
    pub rt: Option<Vec<f64>>,
    /// Latent infections per day.
    pub infections: Vec<f64>,
    /// Expected reported cases per day.
    pub expected_reports: Vec<f64>,
    /// Daily growth rate: first difference of log-infections.
    pub growth_rate: Vec<f64>,
    /// `ln 2 / growth rate`; negative when shrinking, infinite at zero growth.
    pub doubling_time: Vec<f64>,
}

struct Evaluated {
    rt_effective: Option<Vec<f64>>,
    /// Full latent axis: prefix plus fitted/forecast days.
    infections: Vec<f64>,
    expected_reports: Vec<f64>,
}

/// The joint generative model for one region's case series.
#[derive(Debug)]
pub struct EpiModel {
    series: NormalizedSeries,
    n_obs: usize,
    horizon: usize,
    n_prefix: usize,
    mode: Mode,
    generation_time: GenerationTime,
    delays: DelaySpec,
    observation: ObservationConfig,
    population: Option<f64>,
    first_weekday: usize,
    entries: Vec<FreeParam>,
    blocks: ParamBlocks,
}

impl EpiModel {
    /// Assemble the joint model, failing fast on any configuration or data
    /// problem — nothing here touches the sampler.
    pub fn new(input: &EstimateInput) -> Result<Self> {
        input.delays.validate()?;
        input.observation.validate()?;

        let series = input.cases.normalize()?;
        let n_obs = series.len();
        let horizon = input.forecast.horizon;

        if let Some(pop) = input.forecast.population {
            if !pop.is_finite() || pop <= 0.0 {
                return Err(Error::Config(format!(
                    "population must be finite and > 0, got {}",
                    pop
                )));
            }
        }

        let mode = match (&input.rt, &input.backcalc) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "an Rt process configuration cannot be combined with backcalculation mode"
                        .to_string(),
                ));
            }
            (None, None) => {
                return Err(Error::Config(
                    "either an Rt configuration or a backcalculation configuration is required"
                        .to_string(),
                ));
            }
            (Some(rt_config), None) => {
                input.generation_time.validate()?;
                if let InfectionNoise::LogNormal { prior_sd } = input.noise {
                    if !(prior_sd > 0.0 && prior_sd.is_finite()) {
                        return Err(Error::Config(format!(
                            "infection-noise prior sd must be > 0, got {}",
                            prior_sd
                        )));
                    }
                }
                let rt = RtProcessModel::new(rt_config, n_obs, horizon, &series.breakpoints)?;
                Mode::Renewal { rt, noise: input.noise }
            }
            (None, Some(bc)) => {
                if horizon > 7 {
                    return Err(Error::Config(format!(
                        "backcalculation mode has no Rt projection mechanism; forecast \
                         horizons above 7 days are not supported (got {})",
                        horizon
                    )));
                }
                if !(bc.smoothing_sd > 0.0 && bc.smoothing_sd.is_finite()) {
                    return Err(Error::Config(format!(
                        "backcalculation smoothing sd must be > 0, got {}",
                        bc.smoothing_sd
                    )));
                }
                Mode::Backcalc { config: *bc }
            }
        };

        let n_time = n_obs + horizon;
        let n_prefix = match &mode {
            Mode::Renewal { .. } => input
                .generation_time
                .max_delay()
                .max(input.delays.max_delay())
                .max(1),
            Mode::Backcalc { .. } => input.delays.max_delay().max(1),
        };

        let first_weekday = series.start.weekday().num_days_from_monday() as usize;

        // Seeding prior centered on the early reported level, corrected for
        // the reporting fraction.
        let scaling_mean = input.observation.scaling.map(|s| s.mean).unwrap_or(1.0);
        let seed_level = (series.early_mean(7) / scaling_mean).max(1e-3);
        let seed_prior = PriorParam::new(seed_level.ln(), 1.5);

        let mut layout = LayoutBuilder::new();
        let mut blocks = ParamBlocks::default();

        blocks.seed = layout.push(FreeParam {
            name: match mode {
                Mode::Renewal { .. } => "log_seed".to_string(),
                Mode::Backcalc { .. } => "log_infections0".to_string(),
            },
            bounds: (f64::NEG_INFINITY, f64::INFINITY),
            prior: seed_prior,
            init: seed_prior.mean,
        });

        match &mode {
            Mode::Renewal { rt, noise } => {
                blocks.rt = layout.push_all(rt.free_params());
                if let InfectionNoise::LogNormal { prior_sd } = noise {
                    blocks.noise_sigma = Some(layout.push(FreeParam {
                        name: "noise_sd".to_string(),
                        bounds: (0.0, f64::INFINITY),
                        prior: PriorParam::new(0.0, *prior_sd),
                        init: 0.5 * prior_sd,
                    }));
                    blocks.noise_eps = layout.push_all(
                        (0..n_time)
                            .map(|t| FreeParam {
                                name: format!("noise_eps[{}]", t),
                                bounds: (f64::NEG_INFINITY, f64::INFINITY),
                                prior: PriorParam::new(0.0, 1.0),
                                init: 0.0,
                            })
                            .collect(),
                    );
                }
                blocks.gt = layout.push_all(input.generation_time.free_params());
            }
            Mode::Backcalc { config } => {
                blocks.bc_sigma = Some(layout.push(FreeParam {
                    name: "bc_step_sd".to_string(),
                    bounds: (0.0, f64::INFINITY),
                    prior: PriorParam::new(0.0, config.smoothing_sd),
                    init: 0.5 * config.smoothing_sd,
                }));
                blocks.bc_steps = layout.push_all(
                    (0..n_prefix + n_time - 1)
                        .map(|t| FreeParam {
                            name: format!("bc_step[{}]", t),
                            bounds: (f64::NEG_INFINITY, f64::INFINITY),
                            prior: PriorParam::new(0.0, 1.0),
                            init: 0.0,
                        })
                        .collect(),
                );
            }
        }

        blocks.delays = layout.push_all(input.delays.free_params("delay"));
        if let Some(trunc) = &input.observation.truncation {
            blocks.truncation = layout.push_all(trunc.free_params("truncation"));
        }
        if input.observation.week_effect {
            blocks.dow = layout.push_all(
                (0..7)
                    .map(|i| FreeParam {
                        name: format!("dow[{}]", i),
                        bounds: (f64::NEG_INFINITY, f64::INFINITY),
                        prior: PriorParam::new(0.0, 0.5),
                        init: 0.0,
                    })
                    .collect(),
            );
        }
        if input.observation.family == ObservationFamily::NegativeBinomial {
            blocks.overdispersion = Some(layout.push(FreeParam {
                name: "phi_inv_sqrt".to_string(),
                bounds: (0.0, f64::INFINITY),
                prior: PriorParam::new(0.0, 1.0),
                init: 0.5,
            }));
        }
        if let Some(scaling) = &input.observation.scaling {
            if !scaling.is_fixed() {
                blocks.scaling = Some(layout.push(FreeParam {
                    name: "report_fraction".to_string(),
                    bounds: (0.0, 1.0),
                    prior: *scaling,
                    init: scaling.mean,
                }));
            }
        }

        Ok(Self {
            series,
            n_obs,
            horizon,
            n_prefix,
            mode,
            generation_time: input.generation_time.clone(),
            delays: input.delays.clone(),
            observation: input.observation.clone(),
            population: input.forecast.population,
            first_weekday,
            entries: layout.entries,
            blocks,
        })
    }

    /// Number of fitted days.
    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    /// Forecast horizon in days.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Fitted plus forecast days.
    pub fn n_time(&self) -> usize {
        self.n_obs + self.horizon
    }

    /// The validated input series.
    pub fn series(&self) -> &NormalizedSeries {
        &self.series
    }

    /// Dates of the fitted-plus-forecast window, in output order.
    pub fn output_dates(&self) -> Vec<NaiveDate> {
        (0..self.n_time()).map(|t| self.series.date(t)).collect()
    }

    /// Whether the model carries Rt semantics (renewal mode).
    pub fn has_rt(&self) -> bool {
        matches!(self.mode, Mode::Renewal { .. })
    }

    fn evaluate(&self, params: &[f64]) -> Result<Evaluated> {
        let b = &self.blocks;
        let n_time = self.n_time();

        let delay_kernel = self.delays.kernel(&params[b.delays.clone()])?;
        let trunc_cdf = match &self.observation.truncation {
            Some(spec) => Some(pmf_to_cdf(&spec.kernel(&params[b.truncation.clone()])?)),
            None => None,
        };
        let scaling = match (&self.observation.scaling, b.scaling) {
            (Some(_), Some(idx)) => params[idx],
            (Some(pinned), None) => pinned.mean,
            _ => 1.0,
        };
        let dow = if self.observation.week_effect {
            let raw: [f64; 7] = params[b.dow.clone()].try_into().map_err(|_| {
                Error::Computation("day-of-week block has wrong width".to_string())
            })?;
            Some(day_of_week_effects(&raw))
        } else {
            None
        };

        let (rt_effective, infections) = match &self.mode {
            Mode::Renewal { rt, noise } => {
                let gt_pmf = self.generation_time.pmf(&params[b.gt.clone()])?;
                let trajectory = rt.trajectory(&params[b.rt.clone()])?;
                let noise_args = match (noise, b.noise_sigma) {
                    (InfectionNoise::LogNormal { .. }, Some(idx)) => {
                        Some((params[idx], &params[b.noise_eps.clone()]))
                    }
                    _ => None,
                };
                let seed = exp_clamped(params[b.seed]);
                let path = renewal_path(
                    &trajectory,
                    &gt_pmf,
                    seed,
                    self.n_prefix,
                    noise_args,
                    self.n_obs,
                    self.population,
                );
                (Some(path.rt_effective), path.infections)
            }
            Mode::Backcalc { .. } => {
                let sigma = b
                    .bc_sigma
                    .map(|idx| params[idx])
                    .ok_or_else(|| Error::Computation("missing backcalc sd".to_string()))?;
                let path = backcalc_path(
                    params[b.seed],
                    sigma,
                    &params[b.bc_steps.clone()],
                    self.n_prefix,
                    n_time,
                );
                (None, path.infections)
            }
        };

        let reports = expected_reports(
            &infections,
            self.n_prefix,
            n_time,
            self.n_obs,
            &delay_kernel,
            scaling,
            dow.as_ref(),
            self.first_weekday,
            trunc_cdf.as_deref(),
        );

        Ok(Evaluated { rt_effective, infections, expected_reports: reports })
    }

    /// Per-draw derived trajectories for summarization.
    pub fn quantities(&self, params: &[f64]) -> Result<PathQuantities> {
        let eval = self.evaluate(params)?;
        let n_time = self.n_time();

        let infections: Vec<f64> = eval.infections[self.n_prefix..].to_vec();
        let mut growth_rate = Vec::with_capacity(n_time);
        let mut doubling_time = Vec::with_capacity(n_time);
        for t in 0..n_time {
            let g = self.n_prefix + t;
            let r = eval.infections[g].ln() - eval.infections[g - 1].ln();
            growth_rate.push(r);
            // IEEE division gives +inf at exactly zero growth, which is the
            // documented behavior (numerically large, never a crash).
            doubling_time.push(std::f64::consts::LN_2 / r);
        }

        Ok(PathQuantities {
            rt: eval.rt_effective,
            infections,
            expected_reports: eval.expected_reports,
            growth_rate,
            doubling_time,
        })
    }
}

impl LogDensityModel for EpiModel {
    fn dim(&self) -> usize {
        self.entries.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.entries.iter().map(|e| e.bounds).collect()
    }

    fn parameter_init(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.init).collect()
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        if params.len() != self.entries.len() {
            return Err(Error::Computation(format!(
                "expected {} parameters, got {}",
                self.entries.len(),
                params.len()
            )));
        }

        let eval = self.evaluate(params)?;
        let mut nll = 0.0;

        let phi = self.blocks.overdispersion.map(|idx| {
            let xi = params[idx].max(1e-6);
            1.0 / (xi * xi)
        });

        for (t, count) in self.series.counts.iter().enumerate() {
            let Some(y) = count else { continue };
            let mu = eval.expected_reports[t].max(MU_FLOOR);
            let lp = match phi {
                Some(phi) => neg_binomial_logpmf(*y, mu, phi)?,
                None => poisson_logpmf(*y, mu)?,
            };
            nll -= lp;
        }

        for (entry, &x) in self.entries.iter().zip(params.iter()) {
            if entry.prior.sd > 0.0 {
                let pull = (x - entry.prior.mean) / entry.prior.sd;
                nll += 0.5 * pull * pull;
            }
        }

        Ok(nll)
    }
}

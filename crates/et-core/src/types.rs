//! Common data types for EpiTrend

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One day's reported case count.
///
/// `confirmed = None` marks a missing observation: it contributes nothing to
/// the likelihood but its date is still a latent-inference target in the
/// summarized output. `breakpoint` flags the date as an Rt change point for
/// the breakpoint process variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Report date.
    pub date: NaiveDate,
    /// Reported case count, `None` if missing.
    pub confirmed: Option<u64>,
    /// Whether Rt may change at this date (breakpoint process only).
    #[serde(default)]
    pub breakpoint: bool,
}

impl Observation {
    /// Observation with a known count and no breakpoint marker.
    pub fn new(date: NaiveDate, confirmed: u64) -> Self {
        Self { date, confirmed: Some(confirmed), breakpoint: false }
    }

    /// Missing observation.
    pub fn missing(date: NaiveDate) -> Self {
        Self { date, confirmed: None, breakpoint: false }
    }
}

/// A raw per-date case-report series as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSeries {
    /// Per-date observations, expected in ascending date order.
    pub observations: Vec<Observation>,
}

impl CaseSeries {
    /// Build a series from (date, count) pairs.
    pub fn from_counts(counts: impl IntoIterator<Item = (NaiveDate, u64)>) -> Self {
        Self {
            observations: counts.into_iter().map(|(d, c)| Observation::new(d, c)).collect(),
        }
    }

    /// Validate the series and normalize it onto a contiguous daily grid.
    ///
    /// Fails fast with [`Error::Data`] on an empty series, non-monotonic or
    /// duplicate dates (naming the offending date), or a series with no
    /// non-missing count at all. Calendar gaps are filled with missing
    /// observations.
    pub fn normalize(&self) -> Result<NormalizedSeries> {
        if self.observations.is_empty() {
            return Err(Error::Data("case series is empty".to_string()));
        }

        for pair in self.observations.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(Error::Data(format!(
                    "case series dates must be strictly increasing: {} follows {}",
                    pair[1].date, pair[0].date
                )));
            }
        }

        let start = self.observations[0].date;
        let end = self.observations[self.observations.len() - 1].date;
        let n = (end - start).num_days() as usize + 1;

        let mut counts: Vec<Option<u64>> = vec![None; n];
        let mut breakpoints = Vec::new();
        for obs in &self.observations {
            let idx = (obs.date - start).num_days() as usize;
            counts[idx] = obs.confirmed;
            if obs.breakpoint {
                breakpoints.push(idx);
            }
        }

        if counts.iter().all(|c| c.is_none()) {
            return Err(Error::Data("case series has no non-missing counts".to_string()));
        }

        Ok(NormalizedSeries { start, counts, breakpoints })
    }
}

/// A validated case series on a contiguous daily grid starting at `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSeries {
    /// Date of index 0.
    pub start: NaiveDate,
    /// Daily counts; `None` for missing days.
    pub counts: Vec<Option<u64>>,
    /// Indices (into `counts`) flagged as Rt breakpoints.
    pub breakpoints: Vec<usize>,
}

impl NormalizedSeries {
    /// Number of days covered.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether the series covers no days.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Date at day index `idx`.
    pub fn date(&self, idx: usize) -> NaiveDate {
        self.start + chrono::Duration::days(idx as i64)
    }

    /// Mean of the first `window` non-missing counts (at least 1.0).
    ///
    /// Used to center the seeding prior.
    pub fn early_mean(&self, window: usize) -> f64 {
        let mut sum = 0.0;
        let mut n = 0usize;
        for c in self.counts.iter().flatten() {
            sum += *c as f64;
            n += 1;
            if n >= window {
                break;
            }
        }
        if n == 0 { 1.0 } else { (sum / n as f64).max(1.0) }
    }
}

/// Quantities tracked in the posterior output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputQuantity {
    /// Effective reproduction number per date.
    Rt,
    /// Latent daily infection incidence.
    Infections,
    /// Expected reported cases by report date.
    ExpectedReports,
    /// Daily growth rate of infections (first difference of log-infections).
    GrowthRate,
    /// `ln 2 / growth rate`; negative values are halving times.
    DoublingTime,
}

impl OutputQuantity {
    /// Stable lowercase label used in serialized tables.
    pub fn label(&self) -> &'static str {
        match self {
            OutputQuantity::Rt => "rt",
            OutputQuantity::Infections => "infections",
            OutputQuantity::ExpectedReports => "expected_reports",
            OutputQuantity::GrowthRate => "growth_rate",
            OutputQuantity::DoublingTime => "doubling_time",
        }
    }
}

/// Whether a summarized date lies in the fitted range or the forecast horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateKind {
    /// Date within the observed series.
    Estimate,
    /// Date beyond the observed series.
    Forecast,
}

/// A central credible interval at one level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CredibleInterval {
    /// Credible level in (0, 1), e.g. 0.9.
    pub level: f64,
    /// Lower bound.
    pub lower: f64,
    /// Upper bound.
    pub upper: f64,
}

/// Posterior summary for one quantity on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    /// Date the row describes.
    pub date: NaiveDate,
    /// Estimate vs forecast.
    pub kind: DateKind,
    /// Posterior mean.
    pub mean: f64,
    /// Posterior standard deviation.
    pub sd: f64,
    /// Posterior median.
    pub median: f64,
    /// Central credible intervals, ascending by level.
    pub intervals: Vec<CredibleInterval>,
}

/// Per-date posterior summary table for one quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTable {
    /// Which quantity the table summarizes.
    pub quantity: OutputQuantity,
    /// One row per date, ascending.
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    /// Row for a given date, if present.
    pub fn row(&self, date: NaiveDate) -> Option<&SummaryRow> {
        self.rows.iter().find(|r| r.date == date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_normalize_fills_gaps_as_missing() {
        let series = CaseSeries {
            observations: vec![
                Observation::new(d("2024-03-01"), 5),
                Observation::new(d("2024-03-04"), 8),
            ],
        };
        let norm = series.normalize().unwrap();
        assert_eq!(norm.len(), 4);
        assert_eq!(norm.counts[0], Some(5));
        assert_eq!(norm.counts[1], None);
        assert_eq!(norm.counts[2], None);
        assert_eq!(norm.counts[3], Some(8));
        assert_eq!(norm.date(3), d("2024-03-04"));
    }

    #[test]
    fn test_normalize_rejects_duplicate_dates() {
        let series = CaseSeries {
            observations: vec![
                Observation::new(d("2024-03-01"), 5),
                Observation::new(d("2024-03-01"), 6),
            ],
        };
        let err = series.normalize().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2024-03-01"), "error should name the offending date: {}", msg);
    }

    #[test]
    fn test_normalize_rejects_backwards_dates() {
        let series = CaseSeries {
            observations: vec![
                Observation::new(d("2024-03-02"), 5),
                Observation::new(d("2024-03-01"), 6),
            ],
        };
        assert!(series.normalize().is_err());
    }

    #[test]
    fn test_normalize_rejects_all_missing() {
        let series = CaseSeries {
            observations: vec![
                Observation::missing(d("2024-03-01")),
                Observation::missing(d("2024-03-02")),
            ],
        };
        assert!(series.normalize().is_err());
    }

    #[test]
    fn test_breakpoint_indices() {
        let mut obs = vec![
            Observation::new(d("2024-03-01"), 5),
            Observation::new(d("2024-03-02"), 6),
            Observation::new(d("2024-03-03"), 7),
        ];
        obs[2].breakpoint = true;
        let norm = CaseSeries { observations: obs }.normalize().unwrap();
        assert_eq!(norm.breakpoints, vec![2]);
    }

    #[test]
    fn test_early_mean_skips_missing() {
        let series = CaseSeries {
            observations: vec![
                Observation::missing(d("2024-03-01")),
                Observation::new(d("2024-03-02"), 10),
                Observation::new(d("2024-03-03"), 20),
            ],
        };
        let norm = series.normalize().unwrap();
        assert!((norm.early_mean(7) - 15.0).abs() < 1e-12);
    }
}

//! End-to-end parameter recovery for the estimation driver.
//!
//! A constant 100-cases-per-day series with an identity reporting delay and
//! a one-day generation interval is a steady state of the renewal model at
//! Rt = 1: the posterior must recover both the reporting level and Rt ~ 1.

use chrono::NaiveDate;
use et_core::{CaseSeries, DateKind, OutputQuantity};
use et_inference::{estimate, EstimateOptions, InferenceMode};
use et_model::{
    EstimateInput, ForecastConfig, GenerationTime, InfectionNoise, ObservationConfig,
    ObservationFamily, RtConfig,
};
use et_prob::delay::{DelaySpec, DelayStage, PriorParam};

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, 1).unwrap() + chrono::Duration::days(offset as i64)
}

fn constant_input(n_days: u64, value: u64) -> EstimateInput {
    EstimateInput {
        cases: CaseSeries::from_counts((0..n_days).map(|i| (day(i), value))),
        generation_time: GenerationTime::fixed_pmf(vec![0.0, 1.0]),
        delays: DelaySpec::empty(),
        rt: Some(RtConfig::fixed(PriorParam::new(1.0, 0.05))),
        backcalc: None,
        observation: ObservationConfig {
            family: ObservationFamily::Poisson,
            ..ObservationConfig::default()
        },
        noise: InfectionNoise::None,
        forecast: ForecastConfig::default(),
    }
}

fn quick_exact() -> EstimateOptions {
    EstimateOptions {
        mode: InferenceMode::Exact { chains: 2, warmup: 500, samples: 500 },
        ..EstimateOptions::default()
    }
}

#[test]
fn recovers_constant_reporting_level_and_unit_rt() {
    let input = constant_input(10, 100);
    let result = estimate(&input, &quick_exact()).unwrap();

    let reports = result.summary(OutputQuantity::ExpectedReports).unwrap();
    assert_eq!(reports.rows.len(), 10);
    for row in &reports.rows {
        assert!(
            (row.median - 100.0).abs() < 30.0,
            "{}: posterior median reports {} should be near 100",
            row.date,
            row.median
        );
        let wide = row.intervals.last().unwrap();
        assert!(
            wide.lower <= 100.0 && 100.0 <= wide.upper,
            "{}: 90% interval [{}, {}] should cover 100",
            row.date,
            wide.lower,
            wide.upper
        );
    }

    let rt = result.summary(OutputQuantity::Rt).unwrap();
    for row in &rt.rows {
        assert!(
            (row.median - 1.0).abs() < 0.15,
            "{}: posterior median Rt {} should be near 1",
            row.date,
            row.median
        );
    }

    assert_eq!(result.diagnostics.chains_completed, 2);
    assert!(result.diagnostics.total_draws == 1000);
    assert!(!result.diagnostics.partial);
}

#[test]
fn approximate_mode_recovers_level_and_flags_itself() {
    let input = constant_input(10, 100);
    let opts = EstimateOptions {
        mode: InferenceMode::Approximate { draws: 500 },
        ..EstimateOptions::default()
    };
    let result = estimate(&input, &opts).unwrap();

    let reports = result.summary(OutputQuantity::ExpectedReports).unwrap();
    for row in &reports.rows {
        assert!(
            (row.median - 100.0).abs() < 30.0,
            "{}: approximate median reports {}",
            row.date,
            row.median
        );
    }
    assert_eq!(result.diagnostics.engine, "map-laplace");
    assert!(result
        .diagnostics
        .warnings
        .iter()
        .any(|w| matches!(w, et_inference::ConvergenceWarning::ApproximateMode)));
}

#[test]
fn forecast_rows_extend_and_are_tagged() {
    let mut input = constant_input(12, 100);
    input.forecast = ForecastConfig::days(5);
    let result = estimate(&input, &quick_exact()).unwrap();

    let infections = result.summary(OutputQuantity::Infections).unwrap();
    assert_eq!(infections.rows.len(), 17);
    for (t, row) in infections.rows.iter().enumerate() {
        let expected = if t < 12 { DateKind::Estimate } else { DateKind::Forecast };
        assert_eq!(row.kind, expected, "row {} kind", t);
    }
    // Steady state carries into the forecast.
    let last = infections.rows.last().unwrap();
    assert!((last.median - 100.0).abs() < 40.0, "forecast median {}", last.median);
}

#[test]
fn uncertain_delays_propagate_into_the_fit() {
    let mut input = constant_input(14, 100);
    input.delays = DelaySpec::new(vec![DelayStage::LogNormal {
        meanlog: PriorParam::new(0.7, 0.1),
        sdlog: PriorParam::new(0.5, 0.1),
        max: 8,
    }]);
    let opts = EstimateOptions {
        mode: InferenceMode::Exact { chains: 2, warmup: 400, samples: 300 },
        keep_draws: true,
        ..EstimateOptions::default()
    };
    let result = estimate(&input, &opts).unwrap();

    let draws = result.draws.as_ref().unwrap();
    let names = &draws.param_names;
    let meanlog_idx =
        names.iter().position(|n| n == "delay[0]_meanlog").expect("delay parameter sampled");
    // The per-draw kernel regeneration keeps the delay parameters proper:
    // draws should spread around the prior rather than collapse.
    let chains = draws.param_draws(meanlog_idx);
    let flat: Vec<f64> = chains.into_iter().flatten().collect();
    let mean: f64 = flat.iter().sum::<f64>() / flat.len() as f64;
    assert!((mean - 0.7).abs() < 0.3, "delay meanlog posterior mean {}", mean);

    // A constant series still yields a near-constant fit through the delay.
    let reports = result.summary(OutputQuantity::ExpectedReports).unwrap();
    for row in reports.rows.iter().skip(2) {
        assert!((row.median - 100.0).abs() < 40.0, "{}: {}", row.date, row.median);
    }
}

#[test]
fn growth_rate_and_doubling_time_are_summarized() {
    let input = constant_input(10, 100);
    let result = estimate(&input, &quick_exact()).unwrap();
    let growth = result.summary(OutputQuantity::GrowthRate).unwrap();
    assert_eq!(growth.rows.len(), 10);
    for row in growth.rows.iter().skip(1) {
        assert!(row.median.abs() < 0.2, "{}: growth {}", row.date, row.median);
    }
    // Doubling times near a steady state are huge in magnitude; the table
    // must exist and never contain NaN medians.
    let doubling = result.summary(OutputQuantity::DoublingTime).unwrap();
    for row in &doubling.rows {
        assert!(!row.median.is_nan(), "{}: doubling median NaN", row.date);
    }
}

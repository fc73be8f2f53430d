//! Observation model: maps latent infections to expected reported cases.
//!
//! Expected reports by report date are the convolution of the latent
//! infection series with the combined reporting-delay kernel, optionally
//! scaled by the reporting fraction, modulated by multiplicative day-of-week
//! effects (constrained to average 1 over a week), and right-truncated near
//! the end of the observed series by the CDF of a truncation delay.

/// Map 7 free parameters to day-of-week effects averaging 1 over the week.
///
/// Softmax scaled by 7: `w_i = 7 * exp(e_i) / sum_j exp(e_j)`.
pub fn day_of_week_effects(raw: &[f64; 7]) -> [f64; 7] {
    let max = raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut exp = [0.0; 7];
    let mut total = 0.0;
    for (i, &e) in raw.iter().enumerate() {
        exp[i] = (e - max).exp();
        total += exp[i];
    }
    let mut out = [0.0; 7];
    for i in 0..7 {
        out[i] = 7.0 * exp[i] / total;
    }
    out
}

/// Expected reported cases per fitted/forecast day.
///
/// * `infections` — latent series: `n_prefix` days before the first report
///   date, then `n_time` fitted/forecast days.
/// * `kernel` — combined reporting-delay PMF over `{0, ..., max}`.
/// * `scaling` — reporting fraction in (0, 1].
/// * `dow` — optional day-of-week effects; `first_weekday` is the weekday
///   index (0 = Monday) of the first fitted day.
/// * `trunc_cdf` — optional truncation-delay CDF; applied to fitted days
///   only, by distance from the final observed day.
#[allow(clippy::too_many_arguments)]
pub fn expected_reports(
    infections: &[f64],
    n_prefix: usize,
    n_time: usize,
    n_obs: usize,
    kernel: &[f64],
    scaling: f64,
    dow: Option<&[f64; 7]>,
    first_weekday: usize,
    trunc_cdf: Option<&[f64]>,
) -> Vec<f64> {
    let mut out = Vec::with_capacity(n_time);
    for t in 0..n_time {
        let g = n_prefix + t;
        let mut expected = 0.0;
        for (d, &w) in kernel.iter().enumerate() {
            if d > g {
                break;
            }
            expected += w * infections[g - d];
        }
        expected *= scaling;

        if let Some(effects) = dow {
            expected *= effects[(first_weekday + t) % 7];
        }

        if let Some(cdf) = trunc_cdf {
            if t < n_obs {
                let days_observed = n_obs - 1 - t;
                if days_observed < cdf.len() {
                    expected *= cdf[days_observed];
                }
            }
        }

        out.push(expected);
    }
    out
}

/// Cumulative distribution of a delay PMF: `cdf[d] = P(delay <= d)`.
pub fn pmf_to_cdf(pmf: &[f64]) -> Vec<f64> {
    let mut acc = 0.0;
    pmf.iter()
        .map(|&p| {
            acc += p;
            acc.min(1.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_of_week_effects_average_one() {
        let raw = [0.3, -0.2, 0.0, 1.0, -1.0, 0.5, 0.1];
        let effects = day_of_week_effects(&raw);
        let mean: f64 = effects.iter().sum::<f64>() / 7.0;
        assert!((mean - 1.0).abs() < 1e-12, "mean effect {}", mean);
        assert!(effects.iter().all(|&w| w > 0.0));
    }

    #[test]
    fn test_identity_kernel_passes_infections_through() {
        let infections = vec![5.0, 10.0, 20.0, 40.0];
        let reports =
            expected_reports(&infections, 1, 3, 3, &[1.0], 1.0, None, 0, None);
        assert_eq!(reports, vec![10.0, 20.0, 40.0]);
    }

    #[test]
    fn test_delay_kernel_shifts_mass() {
        // All mass at a 1-day delay: reports mirror the previous day's
        // infections.
        let infections = vec![5.0, 10.0, 20.0, 40.0];
        let reports =
            expected_reports(&infections, 1, 3, 3, &[0.0, 1.0], 1.0, None, 0, None);
        assert_eq!(reports, vec![5.0, 10.0, 20.0]);
    }

    #[test]
    fn test_scaling_reduces_reports() {
        let infections = vec![100.0; 5];
        let reports =
            expected_reports(&infections, 1, 4, 4, &[1.0], 0.25, None, 0, None);
        for &r in &reports {
            assert!((r - 25.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_truncation_suppresses_recent_days_only() {
        let infections = vec![100.0; 8];
        // 60% of reports arrive same-day, 90% within one day, all within two.
        let cdf = vec![0.6, 0.9, 1.0];
        let reports =
            expected_reports(&infections, 1, 7, 5, &[1.0], 1.0, None, 0, Some(&cdf));
        assert!((reports[4] - 60.0).abs() < 1e-12, "last observed day keeps 60%");
        assert!((reports[3] - 90.0).abs() < 1e-12);
        assert!((reports[2] - 100.0).abs() < 1e-12);
        assert!((reports[0] - 100.0).abs() < 1e-12, "old days unaffected");
        // Forecast days are projections of eventual counts: no truncation.
        assert!((reports[5] - 100.0).abs() < 1e-12);
        assert!((reports[6] - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_week_effect_applied_by_weekday() {
        let infections = vec![70.0; 15];
        let raw = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let effects = day_of_week_effects(&raw);
        let reports = expected_reports(
            &infections,
            1,
            14,
            14,
            &[1.0],
            1.0,
            Some(&effects),
            2,
            None,
        );
        // Weekday pattern repeats with period 7.
        for t in 0..7 {
            assert!((reports[t] - reports[t + 7]).abs() < 1e-9);
        }
        // The boosted weekday is index 0, first hit at t where (2 + t) % 7 == 0.
        let boosted = reports
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(t, _)| t)
            .unwrap();
        assert_eq!((2 + boosted) % 7, 0);
    }

    #[test]
    fn test_pmf_to_cdf_monotone() {
        let cdf = pmf_to_cdf(&[0.2, 0.3, 0.5]);
        assert!((cdf[2] - 1.0).abs() < 1e-12);
        assert!(cdf.windows(2).all(|w| w[1] >= w[0]));
    }
}

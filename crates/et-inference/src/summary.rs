//! Posterior summarization: per-date quantile bands over draw ensembles.

use chrono::NaiveDate;
use et_core::{CredibleInterval, DateKind, OutputQuantity, SummaryRow, SummaryTable};

/// Interpolated quantile of a sorted slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() as f64 - 1.0);
    let i0 = pos.floor() as usize;
    let i1 = pos.ceil() as usize;
    if i0 == i1 {
        return sorted[i0];
    }
    let f = pos - i0 as f64;
    sorted[i0] * (1.0 - f) + sorted[i1] * f
}

/// Summarize one tracked quantity over its per-draw trajectories.
///
/// `per_draw[d][t]` is draw `d`'s value at date index `t`. Dates at index
/// `>= n_obs` are tagged as forecast rows. `levels` are central credible
/// levels (e.g. 0.2/0.5/0.9).
pub fn summarize_quantity(
    quantity: OutputQuantity,
    dates: &[NaiveDate],
    n_obs: usize,
    per_draw: &[Vec<f64>],
    levels: &[f64],
) -> SummaryTable {
    let n_draws = per_draw.len();
    let mut rows = Vec::with_capacity(dates.len());

    for (t, &date) in dates.iter().enumerate() {
        let mut column: Vec<f64> = per_draw.iter().map(|d| d[t]).collect();
        column.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Greater));

        let mean = column.iter().sum::<f64>() / n_draws as f64;
        let sd = if n_draws > 1 {
            (column.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n_draws as f64 - 1.0))
                .sqrt()
        } else {
            0.0
        };
        let median = quantile_sorted(&column, 0.5);

        let intervals = levels
            .iter()
            .map(|&level| CredibleInterval {
                level,
                lower: quantile_sorted(&column, 0.5 * (1.0 - level)),
                upper: quantile_sorted(&column, 0.5 * (1.0 + level)),
            })
            .collect();

        rows.push(SummaryRow {
            date,
            kind: if t < n_obs { DateKind::Estimate } else { DateKind::Forecast },
            mean,
            sd,
            median,
            intervals,
        });
    }

    SummaryTable { quantity, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect()
    }

    #[test]
    fn test_quantile_interpolates() {
        let sorted = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        assert!((quantile_sorted(&sorted, 0.5) - 2.0).abs() < 1e-12);
        assert!((quantile_sorted(&sorted, 0.25) - 1.0).abs() < 1e-12);
        assert!((quantile_sorted(&sorted, 0.0) - 0.0).abs() < 1e-12);
        assert!((quantile_sorted(&sorted, 1.0) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_summary_orders_bounds() {
        // 101 draws of a linear ramp at a single date.
        let per_draw: Vec<Vec<f64>> = (0..=100).map(|d| vec![d as f64]).collect();
        let table = summarize_quantity(
            OutputQuantity::Infections,
            &dates(1),
            1,
            &per_draw,
            &[0.2, 0.5, 0.9],
        );
        let row = &table.rows[0];
        assert_relative_eq!(row.median, 50.0, max_relative = 1e-9);
        assert_relative_eq!(row.mean, 50.0, max_relative = 1e-9);
        for iv in &row.intervals {
            assert!(iv.lower <= row.median && row.median <= iv.upper);
        }
        // Wider level, wider band.
        assert!(row.intervals[2].upper - row.intervals[2].lower
            > row.intervals[0].upper - row.intervals[0].lower);
        assert!((row.intervals[2].lower - 5.0).abs() < 1e-9);
        assert!((row.intervals[2].upper - 95.0).abs() < 1e-9);
    }

    #[test]
    fn test_forecast_rows_tagged() {
        let per_draw = vec![vec![1.0, 2.0, 3.0]; 10];
        let table = summarize_quantity(
            OutputQuantity::Rt,
            &dates(3),
            2,
            &per_draw,
            &[0.9],
        );
        assert_eq!(table.rows[0].kind, DateKind::Estimate);
        assert_eq!(table.rows[1].kind, DateKind::Estimate);
        assert_eq!(table.rows[2].kind, DateKind::Forecast);
    }

    #[test]
    fn test_infinite_doubling_times_do_not_crash() {
        let per_draw = vec![vec![f64::INFINITY], vec![10.0], vec![12.0]];
        let table = summarize_quantity(
            OutputQuantity::DoublingTime,
            &dates(1),
            1,
            &per_draw,
            &[0.5],
        );
        let row = &table.rows[0];
        assert!((row.median - 12.0).abs() < 1e-9);
        assert!(row.intervals[0].upper.is_infinite() || row.intervals[0].upper.is_finite());
    }
}

//! Statistical primitives
//!
//! Shared numeric routines for baseline computation and correlation:
//! sample mean and standard deviation, Pearson's r, and calendar-day
//! alignment of two series under a candidate lag.

use crate::types::DataPoint;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;

/// Arithmetic mean; 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (Bessel-corrected, n-1); defined as 0 when n <= 1
pub fn sample_std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n <= 1 {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (sum_sq / (n - 1) as f64).sqrt()
}

/// Pearson correlation coefficient between two equal-length series.
///
/// Returns 0 when either series is constant (zero variance) rather than NaN.
/// The result is clamped to [-1, 1] to absorb floating-point drift.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    let n = x.len();
    if n < 2 {
        return 0.0;
    }

    let mean_x = mean(x);
    let mean_y = mean(y);

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }

    (cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0)
}

/// Index a series by calendar day. When a day carries more than one sample
/// the later one wins, matching last-committed read semantics.
fn by_day(series: &[DataPoint]) -> BTreeMap<NaiveDate, DataPoint> {
    let mut map = BTreeMap::new();
    for point in series {
        map.insert(point.timestamp.date_naive(), *point);
    }
    map
}

/// Align an output series against an input series shifted forward by `lag_hours`.
///
/// The output value observed at time `t` is paired with the input value on
/// `date(t - lag)`; only days present in both series survive. Matching is by
/// calendar day, not exact timestamp.
pub fn align_series_with_lag(
    input: &[DataPoint],
    output: &[DataPoint],
    lag_hours: i64,
) -> Vec<(f64, f64)> {
    let input_by_day = by_day(input);
    let output_by_day = by_day(output);
    let lag = Duration::hours(lag_hours);

    let mut pairs = Vec::new();
    for point in output_by_day.values() {
        let input_day = (point.timestamp - lag).date_naive();
        if let Some(in_point) = input_by_day.get(&input_day) {
            pairs.push((in_point.value, point.value));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn day_point(day: u32, value: f64) -> DataPoint {
        DataPoint::new(Utc.with_ymd_and_hms(2026, 3, day, 9, 0, 0).unwrap(), value)
    }

    #[test]
    fn test_mean_and_std_dev_known_series() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values) - 5.0).abs() < 1e-12);
        // Sample std dev with n-1: sqrt(32/7)
        assert!((sample_std_dev(&values) - 2.1380899353).abs() < 1e-9);
    }

    #[test]
    fn test_std_dev_degenerate_sizes() {
        assert_eq!(sample_std_dev(&[]), 0.0);
        assert_eq!(sample_std_dev(&[42.0]), 0.0);
    }

    #[test]
    fn test_pearson_perfect_positive() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0];
        assert!((pearson(&x, &y) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pearson_perfect_negative() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [8.0, 6.0, 4.0, 2.0];
        assert!((pearson(&x, &y) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pearson_matches_closed_form() {
        let x = [10.0, 8.0, 13.0, 9.0, 11.0, 14.0, 6.0, 4.0, 12.0, 7.0, 5.0];
        let y = [8.04, 6.95, 7.58, 8.81, 8.33, 9.96, 7.24, 4.26, 10.84, 4.82, 5.68];
        // Anscombe's first quartet, r = 0.81642051634484
        assert!((pearson(&x, &y) - 0.8164205163).abs() < 1e-9);
        assert!(pearson(&x, &y).abs() <= 1.0);
    }

    #[test]
    fn test_pearson_constant_series_is_zero() {
        let x = [3.0, 3.0, 3.0, 3.0];
        let y = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(pearson(&x, &y), 0.0);
        assert_eq!(pearson(&y, &x), 0.0);
    }

    #[test]
    fn test_alignment_zero_lag_intersects_days() {
        let input = vec![day_point(1, 10.0), day_point(2, 20.0), day_point(3, 30.0)];
        let output = vec![day_point(2, 5.0), day_point(3, 6.0), day_point(4, 7.0)];

        let pairs = align_series_with_lag(&input, &output, 0);
        assert_eq!(pairs, vec![(20.0, 5.0), (30.0, 6.0)]);
    }

    #[test]
    fn test_alignment_24h_lag_pairs_next_day() {
        // Input value 10 on day D, output value 5 on day D+1, lag 24h
        let input = vec![day_point(1, 10.0)];
        let output = vec![day_point(2, 5.0)];

        let pairs = align_series_with_lag(&input, &output, 24);
        assert_eq!(pairs, vec![(10.0, 5.0)]);
    }

    #[test]
    fn test_alignment_12h_lag_rounds_to_same_day() {
        // A 12h shift from a morning sample lands on the previous calendar day
        let input = vec![day_point(1, 10.0)];
        let output = vec![day_point(2, 5.0)];

        let pairs = align_series_with_lag(&input, &output, 12);
        assert_eq!(pairs, vec![(10.0, 5.0)]);
    }

    #[test]
    fn test_alignment_duplicate_day_last_value_wins() {
        let mut input = vec![day_point(1, 10.0)];
        input.push(DataPoint::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 21, 0, 0).unwrap(),
            99.0,
        ));
        let output = vec![day_point(1, 5.0)];

        let pairs = align_series_with_lag(&input, &output, 0);
        assert_eq!(pairs, vec![(99.0, 5.0)]);
    }
}

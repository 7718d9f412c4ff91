// dca_core/src/utils.rs

//! Small helpers shared by the optimizer: timestamp parsing and the summary
//! statistics used for generation progress and walk-forward aggregation.

use anyhow::Context;

/// Converts a date-time string into a `chrono::DateTime<chrono::Utc>`.
///
/// # Arguments
/// * `string` - The date-time string to parse (e.g., "2025-07-08 15:30:00").
/// * `format` - The expected format of the input string (e.g., "%Y-%m-%d %H:%M:%S").
///
/// # Returns
/// * The parsed UTC date-time on success, or an error if parsing fails.
pub fn string_to_date_time(string: &str, format: &str) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    let dt = chrono::NaiveDateTime::parse_from_str(
        string,
        format,
    ).with_context(|| format!(
        "Invalid date-time '{}' for format '{}'",
        string,
        format
    ))?;

    let dt_utc = chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(
        dt,
        chrono::Utc
    );

    anyhow::Ok(dt_utc)
}

/// Converts a day count from settings into a duration.
///
/// # Arguments
/// * `name` - Settings key, used in the error message.
/// * `days` - Number of days.
///
/// # Returns
/// * The duration, or an error if `days` does not fit a `chrono::Duration`.
pub fn days_to_duration(name: &str, days: i64) -> anyhow::Result<chrono::Duration> {
    chrono::Duration::try_days(days)
        .ok_or_else(|| anyhow::anyhow!("'{}' = {} is out of range", name, days))
}

/// Mean, max and min of a slice in one pass. Returns zeros for an empty slice.
pub fn calculate_stats(values: &[f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }

    let (sum, max, min) = values.iter().fold(
        (0.0, f64::NEG_INFINITY, f64::INFINITY),
        |(sum, max, min), &value| (sum + value, max.max(value), min.min(value)),
    );

    (sum / values.len() as f64, max, min)
}

/// Arithmetic mean; zero for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    calculate_stats(values).0
}

/// Sample standard deviation (n - 1 denominator); zero below two values.
pub fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (n - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_of_empty_slice_are_zero() {
        assert_eq!(calculate_stats(&[]), (0.0, 0.0, 0.0));
        assert_eq!(sample_std(&[1.0]), 0.0);
    }

    #[test]
    fn stats_match_hand_computation() {
        let (avg, max, min) = calculate_stats(&[1.0, -2.0, 4.0, 5.0]);
        assert_eq!(avg, 2.0);
        assert_eq!(max, 5.0);
        assert_eq!(min, -2.0);

        // sample variance of [2, 4, 4, 4, 5, 5, 7, 9] is 32 / 7
        let std = sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((std - (32.0_f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn day_counts_outside_duration_range_are_errors() {
        assert_eq!(days_to_duration("test_days", 5).unwrap(), chrono::Duration::days(5));
        let err = days_to_duration("train_days", i64::MAX).unwrap_err();
        assert!(err.to_string().contains("train_days"));
    }

    #[test]
    fn parses_plain_date_time() {
        let dt = string_to_date_time("2024-03-01 12:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(dt.timestamp(), 1_709_296_200);
        assert!(string_to_date_time("not a date", "%Y-%m-%d %H:%M:%S").is_err());
    }
}

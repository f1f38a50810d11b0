//! Per-year statistics.

use crate::analysis::filter::FilteredYear;
use crate::model::{Statistic, YearAggregate, SENTINEL};

/// Arithmetic mean. Returns `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Percentile with linear interpolation between the two nearest ranks.
///
/// `rank` is in 0..=100. For `n` sorted values the fractional index is
/// `(n - 1) * rank / 100`; the result interpolates between the values on
/// either side of it. Returns `None` for an empty slice.
pub fn percentile(values: &[f64], rank: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let h = (sorted.len() - 1) as f64 * rank.clamp(0.0, 100.0) / 100.0;
    let lower = h.floor() as usize;
    let upper = h.ceil() as usize;
    let frac = h - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    values.iter().fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Computes one year's aggregate from its filtered readings.
///
/// An empty year is not an error: statistic, min, max and the first/last
/// observation all carry the sentinel.
pub fn aggregate_year(filtered: &FilteredYear, statistic: Statistic) -> YearAggregate {
    let values = &filtered.accepted_values;

    let (stat, min_value, max_value) = match min_max(values) {
        None => (SENTINEL, SENTINEL, SENTINEL),
        Some((lo, hi)) => {
            let stat = match statistic {
                Statistic::Mean => mean(values),
                Statistic::Maximum => Some(hi),
                Statistic::Percentile(rank) => percentile(values, rank),
            };
            (stat.unwrap_or(SENTINEL), lo, hi)
        }
    };

    YearAggregate {
        year: filtered.year,
        statistic: stat,
        total_count: filtered.total_count(),
        invalid_count: filtered.invalid_count,
        valid_count: filtered.valid_count(),
        accepted_values: values.clone(),
        accepted_times: filtered.accepted_times.clone(),
        max_value,
        min_value,
        requested_start: String::new(),
        requested_end: String::new(),
        first_observation: filtered.accepted_times.first().cloned(),
        last_observation: filtered.accepted_times.last().cloned(),
        detection_limit: filtered.detection_limit,
        limit_substitutions: filtered.limit_substitutions,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn filtered(values: &[f64], invalid: usize) -> FilteredYear {
        FilteredYear {
            year: 2012,
            accepted_values: values.to_vec(),
            accepted_times: (0..values.len())
                .map(|i| format!("2012-01-{:02}T00:00:00+01:00", i + 1))
                .collect(),
            invalid_count: invalid,
            ..Default::default()
        }
    }

    #[test]
    fn test_mean_of_values() {
        assert_eq!(mean(&[1.0, 2.0, 6.0]), Some(3.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_percentile_interpolates_between_ranks() {
        // Ten values 1..=10: h = 9 * 0.9 = 8.1 → 9 + 0.1 * (10 - 9) = 9.1
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        let p90 = percentile(&values, 90.0).unwrap();
        assert!((p90 - 9.1).abs() < 1e-12, "got {}", p90);
    }

    #[test]
    fn test_percentile_ignores_input_order() {
        let p = percentile(&[4.0, 1.0, 3.0, 2.0], 90.0).unwrap();
        // h = 3 * 0.9 = 2.7 → 3 + 0.7 * (4 - 3) = 3.7
        assert!((p - 3.7).abs() < 1e-12, "got {}", p);
    }

    #[test]
    fn test_percentile_of_single_value_is_that_value() {
        assert_eq!(percentile(&[7.25], 90.0), Some(7.25));
    }

    #[test]
    fn test_percentile_stays_within_min_and_max() {
        let sets: [&[f64]; 5] = [
            &[0.5],
            &[3.0, 3.0, 3.0],
            &[10.0, -2.0, 0.0, 8.5, 1.25],
            &[1e-6, 2e-6],
            &[100.0, 1.0, 50.0, 25.0, 75.0, 12.5, 99.9],
        ];
        for set in sets {
            let p = percentile(set, 90.0).unwrap();
            let lo = set.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = set.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            assert!(p >= lo && p <= hi, "p90 {} outside [{}, {}] for {:?}", p, lo, hi, set);
        }
    }

    #[test]
    fn test_mean_year_records_min_max_and_provenance() {
        let agg = aggregate_year(&filtered(&[2.0, 8.0, 5.0], 1), Statistic::Mean);
        assert_eq!(agg.statistic, 5.0);
        assert_eq!(agg.min_value, 2.0);
        assert_eq!(agg.max_value, 8.0);
        assert_eq!(agg.valid_count, 3);
        assert_eq!(agg.invalid_count, 1);
        assert_eq!(agg.total_count, 4);
        assert_eq!(agg.first_observation.as_deref(), Some("2012-01-01T00:00:00+01:00"));
        assert_eq!(agg.last_observation.as_deref(), Some("2012-01-03T00:00:00+01:00"));
    }

    #[test]
    fn test_maximum_statistic_takes_largest_value() {
        let agg = aggregate_year(&filtered(&[2.0, 8.0, 5.0], 0), Statistic::Maximum);
        assert_eq!(agg.statistic, 8.0);
    }

    #[test]
    fn test_empty_year_uses_sentinels() {
        let agg = aggregate_year(&filtered(&[], 3), Statistic::Percentile(90.0));
        assert_eq!(agg.statistic, SENTINEL);
        assert_eq!(agg.min_value, SENTINEL);
        assert_eq!(agg.max_value, SENTINEL);
        assert_eq!(agg.first_observation, None);
        assert_eq!(agg.last_observation, None);
        assert_eq!(agg.valid_count, 0);
        assert_eq!(agg.total_count, 3);
        assert!(!agg.has_data());
    }
}

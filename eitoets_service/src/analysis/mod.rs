/// The aggregation engine.
///
/// Turns the raw readings of one substance/location series into a
/// [`SeriesSummary`]: readings are bucketed by year, filtered on quality and
/// reference datum, summarized per year with the method-dependent statistic
/// and finally folded into a multi-year value.
///
/// Submodules:
/// - `groupings`: year bucketing.
/// - `filter`:    acceptance criteria and detection-limit substitution.
/// - `yearly`:    mean / percentile / maximum for one year.
/// - `combine`:   multi-year mean.

pub mod combine;
pub mod filter;
pub mod groupings;
pub mod yearly;

use crate::model::{
    AggregationError, AggregationMethod, Observation, ProcessingKey, SeriesSummary, Statistic,
};

pub use combine::combine;
pub use filter::{filter_year, FilteredYear};
pub use yearly::aggregate_year;

/// A summary together with the malformed readings met while building it.
#[derive(Debug, Clone)]
pub struct SeriesAggregation {
    pub summary: SeriesSummary,
    pub malformed: Vec<AggregationError>,
}

/// Runs filter, year aggregator and combiner over one series.
///
/// `method` is carried into the summary for the record; `statistic` is the
/// formula actually applied (see `AggregationMethod::statistic`).
/// `period` is the requested ingestion window stamped on every year.
pub fn summarize_series(
    key: ProcessingKey,
    method: AggregationMethod,
    statistic: Statistic,
    observations: &[Observation],
    period: (&str, &str),
) -> SeriesAggregation {
    let mut years = Vec::new();
    let mut malformed = Vec::new();

    for year in groupings::years_present(observations) {
        let mut filtered = filter_year(observations, year);
        malformed.append(&mut filtered.malformed);
        years.push(aggregate_year(&filtered, statistic).with_requested_period(period.0, period.1));
    }

    let multi_year = combine(&years);

    SeriesAggregation {
        summary: SeriesSummary {
            key,
            method,
            years,
            multi_year,
        },
        malformed,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::model::Observation;
    use chrono::DateTime;

    /// Builds an observation from an RFC 3339 timestamp.
    pub fn obs(timestamp: &str, value: f64, quality: &str, reference: &str) -> Observation {
        Observation {
            timestamp: DateTime::parse_from_rfc3339(timestamp).unwrap(),
            raw_timestamp: timestamp.to_string(),
            value: Some(value),
            quality_code: quality.to_string(),
            reference_datum: reference.to_string(),
            below_detection_limit: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::obs;
    use super::*;
    use crate::model::SENTINEL;

    const PERIOD: (&str, &str) = ("2012-01-01T00:00:00", "2015-01-01T00:00:00");

    #[test]
    fn test_two_year_mean_series() {
        let readings = vec![
            obs("2012-03-01T10:00:00+01:00", 1.0, "10", "WATSGL"),
            obs("2012-04-01T10:00:00+02:00", 3.0, "60", "WATSGL"),
            obs("2013-05-01T10:00:00+02:00", 5.0, "5", "WATSGL"),
        ];
        let result = summarize_series(
            ProcessingKey::new("X", "L"),
            AggregationMethod::AnnualMean,
            Statistic::Mean,
            &readings,
            PERIOD,
        );
        let s = result.summary;

        assert_eq!(s.years.len(), 2);
        assert_eq!(s.years[0].year, 2012);
        assert_eq!(s.years[0].accepted_values, vec![1.0]);
        assert_eq!(s.years[0].invalid_count, 1);
        assert_eq!(s.years[0].statistic, 1.0);
        assert_eq!(s.years[1].year, 2013);
        assert_eq!(s.years[1].statistic, 5.0);
        assert_eq!(s.multi_year, 3.0);
        assert_eq!(s.years[0].requested_start, PERIOD.0);
        assert_eq!(s.years[1].requested_end, PERIOD.1);
    }

    #[test]
    fn test_empty_year_sentinel_enters_multi_year_mean() {
        let readings = vec![
            obs("2012-03-01T10:00:00+01:00", 4.0, "00", "WATSGL"),
            obs("2013-03-01T10:00:00+01:00", 4.0, "99", "WATSGL"),
        ];
        let s = summarize_series(
            ProcessingKey::new("X", "L"),
            AggregationMethod::Percentile90,
            Statistic::Percentile(90.0),
            &readings,
            PERIOD,
        )
        .summary;
        assert_eq!(s.years[1].statistic, SENTINEL);
        assert_eq!(s.multi_year, (4.0 + SENTINEL) / 2.0);
    }

    #[test]
    fn test_series_without_readings_has_zero_multi_year() {
        let s = summarize_series(
            ProcessingKey::new("X", "L"),
            AggregationMethod::Maximum,
            Statistic::Mean,
            &[],
            PERIOD,
        )
        .summary;
        assert!(s.years.is_empty());
        assert_eq!(s.multi_year, 0.0);
    }

    #[test]
    fn test_malformed_readings_are_collected_across_years() {
        let readings = vec![
            obs("2012-03-01T10:00:00+01:00", 1.0, "x", "WATSGL"),
            obs("2013-03-01T10:00:00+01:00", 2.0, "?", "WATSGL"),
            obs("2013-04-01T10:00:00+01:00", 2.0, "00", "WATSGL"),
        ];
        let result = summarize_series(
            ProcessingKey::new("X", "L"),
            AggregationMethod::AnnualMean,
            Statistic::Mean,
            &readings,
            PERIOD,
        );
        assert_eq!(result.malformed.len(), 2);
        assert_eq!(result.summary.years[0].invalid_count, 1);
        assert_eq!(result.summary.years[1].statistic, 2.0);
    }
}

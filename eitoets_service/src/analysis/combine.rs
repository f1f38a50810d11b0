//! Multi-year combination of per-year statistics.

use crate::model::YearAggregate;

/// Arithmetic mean of the per-year statistics.
///
/// Every processed year weighs the same regardless of its sample count, and
/// sentinel years contribute their sentinel like any other number. With no
/// years at all the result is 0, which keeps "nothing processed" apart from
/// "processed but empty".
pub fn combine(years: &[YearAggregate]) -> f64 {
    if years.is_empty() {
        return 0.0;
    }
    years.iter().map(|y| y.statistic).sum::<f64>() / years.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::filter::FilteredYear;
    use crate::analysis::yearly::aggregate_year;
    use crate::model::{Statistic, SENTINEL};

    fn year(y: i32, values: &[f64]) -> YearAggregate {
        let filtered = FilteredYear {
            year: y,
            accepted_values: values.to_vec(),
            accepted_times: values.iter().map(|_| format!("{}-06-01T00:00:00+01:00", y)).collect(),
            ..Default::default()
        };
        aggregate_year(&filtered, Statistic::Mean)
    }

    #[test]
    fn test_no_years_gives_zero_not_sentinel() {
        assert_eq!(combine(&[]), 0.0);
    }

    #[test]
    fn test_years_weigh_equally() {
        // 2012 has three samples averaging 2.0, 2013 one sample of 6.0.
        let years = vec![year(2012, &[1.0, 2.0, 3.0]), year(2013, &[6.0])];
        assert_eq!(combine(&years), 4.0);
    }

    #[test]
    fn test_sentinel_year_participates_in_mean() {
        let years = vec![year(2012, &[1.0]), year(2013, &[])];
        assert_eq!(combine(&years), (1.0 + SENTINEL) / 2.0);
    }
}

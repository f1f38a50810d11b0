/// Organizes a flat list of observations into calendar-year buckets.
///
/// Years are taken in each reading's own UTC offset, the way the DDL
/// reports them.

use std::collections::BTreeSet;

use crate::model::Observation;

/// Distinct years present in `observations`, ascending.
pub fn years_present(observations: &[Observation]) -> BTreeSet<i32> {
    observations.iter().map(Observation::year).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::obs;

    #[test]
    fn test_years_are_distinct_and_sorted() {
        let readings = vec![
            obs("2014-02-01T10:00:00+01:00", 1.0, "00", "WATSGL"),
            obs("2012-02-01T10:00:00+01:00", 1.0, "00", "WATSGL"),
            obs("2014-08-01T10:00:00+02:00", 1.0, "99", "NAP"),
        ];
        let years: Vec<i32> = years_present(&readings).into_iter().collect();
        assert_eq!(years, vec![2012, 2014]);
    }

    #[test]
    fn test_new_year_boundary_uses_local_offset() {
        // 00:30+01:00 on 1 Jan is 23:30 UTC on 31 Dec, but belongs to the new year.
        let readings = vec![obs("2013-01-01T00:30:00+01:00", 1.0, "00", "WATSGL")];
        assert!(years_present(&readings).contains(&2013));
    }

    #[test]
    fn test_no_observations_no_years() {
        assert!(years_present(&[]).is_empty());
    }
}

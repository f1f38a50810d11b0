//! Observation acceptance for one year of readings.
//!
//! A reading is accepted when its quality code parses to an integer below
//! [`QUALITY_CODE_LIMIT`] and its reference datum is
//! [`ACCEPTED_REFERENCE_DATUM`]. Everything else counts as invalid and its
//! value never reaches a statistic.

use crate::model::{
    AggregationError, Observation, ACCEPTED_REFERENCE_DATUM, DETECTION_LIMIT_FACTOR,
    QUALITY_CODE_LIMIT,
};

/// The readings of one year that survived filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredYear {
    pub year: i32,
    /// Values after detection-limit substitution, in source order.
    pub accepted_values: Vec<f64>,
    /// Raw timestamps of the accepted values, same order.
    pub accepted_times: Vec<String>,
    pub invalid_count: usize,
    /// Raw value of the last below-detection-limit reading.
    pub detection_limit: Option<f64>,
    pub limit_substitutions: usize,
    /// Readings rejected because they could not be interpreted at all.
    /// Already included in `invalid_count`.
    pub malformed: Vec<AggregationError>,
}

impl FilteredYear {
    pub fn valid_count(&self) -> usize {
        self.accepted_values.len()
    }

    pub fn total_count(&self) -> usize {
        self.valid_count() + self.invalid_count
    }
}

enum Verdict {
    Accepted(f64),
    Rejected,
    Malformed(String),
}

fn judge(obs: &Observation) -> Verdict {
    let quality: i64 = match obs.quality_code.trim().parse() {
        Ok(q) => q,
        Err(_) => {
            return Verdict::Malformed(format!(
                "quality code '{}' is not an integer",
                obs.quality_code
            ));
        }
    };

    if quality >= QUALITY_CODE_LIMIT || obs.reference_datum != ACCEPTED_REFERENCE_DATUM {
        return Verdict::Rejected;
    }

    match obs.value {
        Some(v) if v.is_finite() => Verdict::Accepted(v),
        Some(v) => Verdict::Malformed(format!("value {} is not finite", v)),
        None => Verdict::Malformed("numeric value missing".to_string()),
    }
}

/// Filters `observations` down to the accepted readings of `year`.
///
/// Readings flagged below the detection limit enter the statistics at
/// half their value; the unhalved value is kept as `detection_limit`. When
/// several readings in a year are flagged only the last one is remembered
/// there, `limit_substitutions` counts all of them.
pub fn filter_year(observations: &[Observation], year: i32) -> FilteredYear {
    let mut out = FilteredYear {
        year,
        ..Default::default()
    };

    for obs in observations.iter().filter(|o| o.year() == year) {
        match judge(obs) {
            Verdict::Accepted(raw) => {
                let value = if obs.below_detection_limit {
                    out.detection_limit = Some(raw);
                    out.limit_substitutions += 1;
                    raw * DETECTION_LIMIT_FACTOR
                } else {
                    raw
                };
                out.accepted_values.push(value);
                out.accepted_times.push(obs.raw_timestamp.clone());
            }
            Verdict::Rejected => out.invalid_count += 1,
            Verdict::Malformed(reason) => {
                out.invalid_count += 1;
                out.malformed.push(AggregationError::MalformedObservation {
                    timestamp: obs.raw_timestamp.clone(),
                    reason,
                });
            }
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

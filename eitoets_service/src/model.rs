/// Core data types for the EI-toets aggregation service.
///
/// This module defines the shared domain model imported by all other
/// modules: processing keys, observations, aggregation methods and the
/// per-year / multi-year summaries. It contains no I/O.

use chrono::{DateTime, Datelike, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Codes and constants
// ---------------------------------------------------------------------------

/// Out-of-band marker for "no data computed". Distinct from zero.
pub const SENTINEL: f64 = -9999.0;

/// Reference datum code accepted by the observation filter
/// (standard inland water level).
pub const ACCEPTED_REFERENCE_DATUM: &str = "WATSGL";

/// Quality codes must parse to a value strictly below this limit.
pub const QUALITY_CODE_LIMIT: i64 = 50;

/// Readings below the detection limit are replaced by limit × this factor.
pub const DETECTION_LIMIT_FACTOR: f64 = 0.5;

/// DDL quantity ("Grootheid") code for concentrations; the only quantity
/// that is aggregated.
pub const QUANTITY_CONCENTRATION: &str = "CONCTTE";

/// DDL sampling type description of a direct single-point sample.
pub const GRAB_SAMPLE: &str = "Steekmonster";

/// Percentile used by the percentile-type method.
pub const PERCENTILE_RANK: f64 = 90.0;

// ---------------------------------------------------------------------------
// Processing key
// ---------------------------------------------------------------------------

/// Substance + location, the sole deduplication unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessingKey {
    /// Aquo parameter code, e.g. "Cd".
    pub substance: String,
    /// DDL location code, e.g. "LOBH".
    pub location: String,
}

impl ProcessingKey {
    pub fn new(substance: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            substance: substance.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for ProcessingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.substance, self.location)
    }
}

// ---------------------------------------------------------------------------
// Aggregation method
// ---------------------------------------------------------------------------

/// The value processing method a norm mandates.
///
/// Declaration order is the tie-break priority used by the norm resolver:
/// annual mean beats maximum beats 90th percentile beats everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AggregationMethod {
    /// "JGM": jaargemiddelde (annual mean).
    AnnualMean,
    /// "MAX": maximum.
    Maximum,
    /// "P90": 90th percentile.
    Percentile90,
    /// Any other code, or no qualifying norm. Terminal: never aggregated.
    Other,
}

impl AggregationMethod {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "JGM" => AggregationMethod::AnnualMean,
            "MAX" => AggregationMethod::Maximum,
            "P90" => AggregationMethod::Percentile90,
            _ => AggregationMethod::Other,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AggregationMethod::AnnualMean => "JGM",
            AggregationMethod::Maximum => "MAX",
            AggregationMethod::Percentile90 => "P90",
            AggregationMethod::Other => "Other",
        }
    }

    /// Whether an aggregate is computed for this method at all.
    pub fn is_supported(&self) -> bool {
        !matches!(self, AggregationMethod::Other)
    }

    /// The statistic used for one year of data under this method.
    ///
    /// `max_policy` decides what "MAX" means; see [`MaxMethodPolicy`].
    pub fn statistic(&self, max_policy: MaxMethodPolicy) -> Option<Statistic> {
        match self {
            AggregationMethod::AnnualMean => Some(Statistic::Mean),
            AggregationMethod::Maximum => match max_policy {
                MaxMethodPolicy::Mean => Some(Statistic::Mean),
                MaxMethodPolicy::Maximum => Some(Statistic::Maximum),
            },
            AggregationMethod::Percentile90 => Some(Statistic::Percentile(PERCENTILE_RANK)),
            AggregationMethod::Other => None,
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// How the "MAX" processing method is evaluated.
///
/// Historic records computed MAX exactly like JGM (arithmetic mean). `Mean`
/// keeps those records comparable; `Maximum` takes the real maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxMethodPolicy {
    #[default]
    Mean,
    Maximum,
}

/// The formula applied to one year of accepted values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statistic {
    Mean,
    Maximum,
    /// Linear-interpolated percentile, rank in 0..=100.
    Percentile(f64),
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// A single raw reading from the observation source.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<FixedOffset>,
    /// Timestamp exactly as delivered, e.g. "2012-03-14T10:20:00.000+01:00".
    /// Persisted as-is in the year detail.
    pub raw_timestamp: String,
    /// `None` when the source omitted the numeric value.
    pub value: Option<f64>,
    /// Quality code as delivered ("00", "25", ...). Parsed by the filter.
    pub quality_code: String,
    pub reference_datum: String,
    /// Set when the source attached a limit symbol ("<") to the value.
    pub below_detection_limit: bool,
}

impl Observation {
    /// Calendar year in the reading's own UTC offset.
    pub fn year(&self) -> i32 {
        self.timestamp.year()
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// One year of filtered and aggregated readings.
///
/// Serialized with the field names of the persisted `yearData` entries.
/// Missing values are written as the sentinel rather than omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearAggregate {
    pub year: i32,
    #[serde(rename = "avg")]
    pub statistic: f64,
    #[serde(rename = "totalNrMeas")]
    pub total_count: usize,
    #[serde(rename = "nrInvalidMeas")]
    pub invalid_count: usize,
    #[serde(rename = "nrValidMeas")]
    pub valid_count: usize,
    #[serde(rename = "validMeasValues")]
    pub accepted_values: Vec<f64>,
    #[serde(rename = "validMeasTimes")]
    pub accepted_times: Vec<String>,
    #[serde(rename = "maxValue")]
    pub max_value: f64,
    #[serde(rename = "minValue")]
    pub min_value: f64,
    #[serde(rename = "startTimeReq", default)]
    pub requested_start: String,
    #[serde(rename = "endTimeReq", default)]
    pub requested_end: String,
    #[serde(rename = "firstObsDate", with = "sentinel::text")]
    pub first_observation: Option<String>,
    #[serde(rename = "lastObsDate", with = "sentinel::text")]
    pub last_observation: Option<String>,
    /// Raw value of the last below-detection-limit reading of the year.
    #[serde(rename = "measLimit", with = "sentinel::number")]
    pub detection_limit: Option<f64>,
    #[serde(rename = "nrLimitSubstituted", default)]
    pub limit_substitutions: usize,
}

impl YearAggregate {
    pub fn has_data(&self) -> bool {
        self.valid_count > 0
    }

    /// Stamps the requested ingestion period onto the aggregate.
    pub fn with_requested_period(mut self, start: &str, end: &str) -> Self {
        self.requested_start = start.to_string();
        self.requested_end = end.to_string();
        self
    }
}

/// The aggregation result for one processing key.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSummary {
    pub key: ProcessingKey,
    pub method: AggregationMethod,
    /// Ascending by year.
    pub years: Vec<YearAggregate>,
    /// Mean of the per-year statistics, or 0 when no year was processed.
    pub multi_year: f64,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while aggregating observations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    /// A reading whose quality code is not an integer or whose value is
    /// missing. The reading is counted as invalid.
    #[error("malformed observation at {timestamp}: {reason}")]
    MalformedObservation { timestamp: String, reason: String },
}

// ---------------------------------------------------------------------------
// Sentinel serialization
// ---------------------------------------------------------------------------

/// Serde adapters writing `None` as the numeric sentinel.
pub(crate) mod sentinel {
    use super::SENTINEL;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    fn is_sentinel(v: f64) -> bool {
        (v - SENTINEL).abs() < f64::EPSILON
    }

    pub mod number {
        use super::*;

        pub fn serialize<S: Serializer>(value: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_f64(value.unwrap_or(SENTINEL))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
            Ok(match Option::<Raw>::deserialize(d)? {
                Some(Raw::Number(v)) if !is_sentinel(v) => Some(v),
                Some(Raw::Text(t)) => t.parse().ok(),
                _ => None,
            })
        }
    }

    pub mod text {
        use super::*;

        pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => s.serialize_str(v),
                None => s.serialize_i64(SENTINEL as i64),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
            Ok(match Option::<Raw>::deserialize(d)? {
                Some(Raw::Text(t)) => Some(t),
                _ => None,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Upstream data sources.
///
/// Submodules:
/// - `ddl`:  Rijkswaterstaat catalog and observation services.
/// - `rivm`: RIVM norm database.
///
/// The orchestrator only sees the [`ObservationSource`] trait, so batch runs
/// can be driven from recorded data as well as from the live DDL.

pub mod ddl;
pub mod rivm;

use std::path::PathBuf;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::model::Observation;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures talking to an upstream service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    /// Transport error, timeout or non-2xx status.
    #[error("{service} unavailable: {reason}")]
    UpstreamUnavailable { service: &'static str, reason: String },
    /// The service answered but flagged the request as failed.
    #[error("{service} rejected request: {reason}")]
    UpstreamRejected { service: &'static str, reason: String },
    /// The body could not be decoded.
    #[error("{service} response could not be parsed: {reason}")]
    Parse { service: &'static str, reason: String },
}

impl IngestError {
    pub(crate) fn unavailable(service: &'static str, err: impl std::fmt::Display) -> Self {
        IngestError::UpstreamUnavailable {
            service,
            reason: err.to_string(),
        }
    }

    pub(crate) fn parse(service: &'static str, err: impl std::fmt::Display) -> Self {
        IngestError::Parse {
            service,
            reason: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// The requested observation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPeriod {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl RequestPeriod {
    const DDL_FORMAT: &'static str = "%Y-%m-%dT%H:%M:%S.000+01:00";
    const RECORD_FORMAT: &'static str = "%Y-%m-%dT%H:%M:%S";

    /// Start as the DDL expects it (fixed +01:00 offset).
    pub fn ddl_start(&self) -> String {
        self.start.format(Self::DDL_FORMAT).to_string()
    }

    pub fn ddl_end(&self) -> String {
        self.end.format(Self::DDL_FORMAT).to_string()
    }

    /// Start as stored in the year detail of a record.
    pub fn record_start(&self) -> String {
        self.start.format(Self::RECORD_FORMAT).to_string()
    }

    pub fn record_end(&self) -> String {
        self.end.format(Self::RECORD_FORMAT).to_string()
    }
}

/// Everything needed to ask for one parameter at one location.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRequest {
    pub parameter_code: String,
    pub location_code: String,
    /// DDL-internal location id, only used to name archived responses.
    pub location_message_id: i64,
    pub x: f64,
    pub y: f64,
    pub period: RequestPeriod,
}

/// A code with its human-readable description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coded {
    pub code: String,
    pub description: String,
}

impl Coded {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
        }
    }
}

/// One measurement series of a response, with its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSeries {
    /// Sampling type ("BemonsteringsSoort"), e.g. Steekmonster.
    pub sampling: Coded,
    pub compartment: Coded,
    /// Physical state ("Hoedanigheid"); matched against norm state codes.
    pub state: Coded,
    pub unit: Coded,
    pub observations: Vec<Observation>,
}

/// A successful observation response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceResponse {
    pub series: Vec<MeasurementSeries>,
    /// Where the raw response was archived, if archiving is on.
    pub archived_to: Option<PathBuf>,
}

/// Anything that can deliver observations for a request.
pub trait ObservationSource {
    fn fetch_observations(&self, request: &ObservationRequest) -> Result<SourceResponse, IngestError>;
}

/// Structured logging for the aggregation service
///
/// Thin layer over `tracing`: every event carries the data source it
/// concerns and, where relevant, the processing key. Upstream failures are
/// classified before logging so an offline DDL endpoint does not look the
/// same as a schema change in its responses.

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, LoggingSettings};
use crate::ingest::IngestError;

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Rijkswaterstaat data distribution layer (catalog and observations).
    Ddl,
    /// RIVM norm database.
    Rivm,
    Database,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Ddl => write!(f, "DDL"),
            DataSource::Rivm => write!(f, "RIVM"),
            DataSource::Database => write!(f, "DB"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the service answered but has nothing for this key
    Expected,
    /// Unexpected failure - service degradation, or a response we cannot read
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify an upstream failure.
///
/// The DDL answers `Succesvol: false` for combinations without data in the
/// requested period, so an explicit rejection is expected; a missing flag
/// is not.
pub fn classify_failure(err: &IngestError) -> FailureType {
    match err {
        IngestError::UpstreamUnavailable { .. } => FailureType::Unexpected,
        IngestError::Parse { .. } => FailureType::Unexpected,
        IngestError::UpstreamRejected { reason, .. } => {
            if reason.contains("Succesvol") {
                FailureType::Unknown
            } else {
                FailureType::Expected
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the configured level. When a log file is configured
/// events are appended there instead of going to stderr.
pub fn init_logger(settings: &LoggingSettings) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| ConfigError::Invalid(format!("log level '{}': {}", settings.level, e)))?;

    let writer = match &settings.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ConfigError::Io(path.clone(), e))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false);

    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    // A second init keeps the first subscriber.
    if installed.is_err() {
        tracing::debug!("global subscriber already installed");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(source: DataSource, key: Option<&str>, message: &str) {
    tracing::info!(source = %source, key = key.unwrap_or("-"), "{}", message);
}

/// Log a warning message
pub fn warn(source: DataSource, key: Option<&str>, message: &str) {
    tracing::warn!(source = %source, key = key.unwrap_or("-"), "{}", message);
}

/// Log an error message
pub fn error(source: DataSource, key: Option<&str>, message: &str) {
    tracing::error!(source = %source, key = key.unwrap_or("-"), "{}", message);
}

/// Log a debug message
pub fn debug(source: DataSource, key: Option<&str>, message: &str) {
    tracing::debug!(source = %source, key = key.unwrap_or("-"), "{}", message);
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log an upstream failure with automatic classification
pub fn log_upstream_failure(source: DataSource, key: Option<&str>, operation: &str, err: &IngestError) {
    let failure_type = classify_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    let level = failure_level(failure_type);
    if level == tracing::Level::ERROR {
        error(source, key, &message);
    } else if level == tracing::Level::WARN {
        warn(source, key, &message);
    } else {
        info(source, key, &message);
    }
}

/// Rejections by the service stay visible at the default `info` level.
fn failure_level(failure_type: FailureType) -> tracing::Level {
    match failure_type {
        FailureType::Expected => tracing::Level::INFO,
        FailureType::Unexpected => tracing::Level::ERROR,
        FailureType::Unknown => tracing::Level::WARN,
    }
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

/// Log the outcome of a batch run
pub fn log_run_summary(attempted: usize, written: usize, failed: usize) {
    let message = format!(
        "Run complete: {} combinations fetched, {} records written, {} failed",
        attempted, written, failed
    );

    if failed == 0 {
        info(DataSource::System, None, &message);
    } else if written == 0 && attempted > 0 {
        error(DataSource::System, None, &message);
    } else {
        warn(DataSource::System, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        let transport = IngestError::UpstreamUnavailable {
            service: "DDL",
            reason: "HTTP 503".to_string(),
        };
        assert_eq!(classify_failure(&transport), FailureType::Unexpected);

        let no_data = IngestError::UpstreamRejected {
            service: "DDL",
            reason: "Geen gegevens gevonden".to_string(),
        };
        assert_eq!(classify_failure(&no_data), FailureType::Expected);

        let missing_flag = IngestError::UpstreamRejected {
            service: "DDL",
            reason: "no key 'Succesvol' in response".to_string(),
        };
        assert_eq!(classify_failure(&missing_flag), FailureType::Unknown);
    }

    #[test]
    fn test_rejections_log_at_info_or_above() {
        assert_eq!(failure_level(FailureType::Expected), tracing::Level::INFO);
        assert_eq!(failure_level(FailureType::Unknown), tracing::Level::WARN);
        assert_eq!(failure_level(FailureType::Unexpected), tracing::Level::ERROR);
    }

    #[test]
    fn test_data_source_labels() {
        assert_eq!(DataSource::Ddl.to_string(), "DDL");
        assert_eq!(DataSource::Rivm.to_string(), "RIVM");
    }
}

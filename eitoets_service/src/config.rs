//! Service configuration.
//!
//! Settings come from a TOML file (`eitoets.toml` by default); every key has
//! a default so a missing section is fine. The database connection string is
//! not part of the file: it is read from `DATABASE_URL`, with `.env`
//! support through `dotenv`.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Deserialize;
use thiserror::Error;

use crate::geo::Crs;
use crate::ingest::RequestPeriod;
use crate::model::{MaxMethodPolicy, QUANTITY_CONCENTRATION};

pub const DEFAULT_CONFIG_PATH: &str = "eitoets.toml";

pub const DEFAULT_CATALOG_URL: &str =
    "https://waterwebservices.rijkswaterstaat.nl/METADATASERVICES_DBO/OphalenCatalogus/";
pub const DEFAULT_OBSERVATIONS_URL: &str =
    "https://waterwebservices.rijkswaterstaat.nl/ONLINEWAARNEMINGENSERVICES_DBO/OphalenWaarnemingen/";
pub const DEFAULT_NORMS_URL: &str = "https://rvs.rivm.nl/zoeksysteem/Data/SubtanceNormValues";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("cannot parse {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ddl: DdlSettings,
    pub rivm: RivmSettings,
    pub run: RunSettings,
    pub output: OutputSettings,
    pub logging: LoggingSettings,
}

/// Rijkswaterstaat data distribution layer endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DdlSettings {
    pub catalog_url: String,
    pub observations_url: String,
    /// Upper bound for a single upstream request, and so for one key.
    pub timeout_secs: u64,
    /// EPSG code of the coordinates the DDL delivers.
    pub source_epsg: u32,
}

impl Default for DdlSettings {
    fn default() -> Self {
        Self {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            observations_url: DEFAULT_OBSERVATIONS_URL.to_string(),
            timeout_secs: 120,
            source_epsg: 25831,
        }
    }
}

/// RIVM norm database.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RivmSettings {
    pub norms_url: String,
    pub timeout_secs: u64,
    /// Norm table refresh interval in daemon mode.
    pub refresh_minutes: u64,
}

impl Default for RivmSettings {
    fn default() -> Self {
        Self {
            norms_url: DEFAULT_NORMS_URL.to_string(),
            timeout_secs: 120,
            refresh_minutes: 24 * 60,
        }
    }
}

/// How often a processing key may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One record per key, ever.
    #[default]
    AtMostOnce,
    /// Every qualifying series of a newly fetched key gets its own record.
    PerSeries,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Start of the requested period (inclusive), local DDL time.
    pub start: NaiveDateTime,
    /// End of the requested period.
    pub end: NaiveDateTime,
    /// Stop after this many records were written; 0 means no limit.
    pub max_records: usize,
    pub mode: RunMode,
    pub max_method: MaxMethodPolicy,
    /// Clear the record store before the run.
    pub reset: bool,
    /// Pause between batches in daemon mode.
    pub interval_minutes: u64,
    /// DDL quantity ("Grootheid") code that is aggregated.
    pub quantity: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        let at = |y| {
            chrono::NaiveDate::from_ymd_opt(y, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default()
        };
        Self {
            start: at(2012),
            end: at(2015),
            max_records: 20,
            mode: RunMode::AtMostOnce,
            max_method: MaxMethodPolicy::Mean,
            reset: false,
            interval_minutes: 24 * 60,
            quantity: QUANTITY_CONCENTRATION.to_string(),
        }
    }
}

impl RunSettings {
    pub fn period(&self) -> RequestPeriod {
        RequestPeriod {
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// EPSG code of the stored geometry.
    pub target_epsg: u32,
    /// When set, raw DDL observation responses are kept here.
    pub archive_dir: Option<PathBuf>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            target_epsg: 4326,
            archive_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing` filter directive, e.g. "info" or "eitoets_service=debug".
    pub level: String,
    /// Append log lines to this file instead of stderr.
    pub file: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Settings {
    /// Parses and validates settings from TOML text.
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| ConfigError::Parse(origin.to_path_buf(), e))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml(&text, path)
    }

    /// Loads `path` when it exists, otherwise falls back to the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.start >= self.run.end {
            return Err(ConfigError::Invalid(format!(
                "run.start ({}) must be before run.end ({})",
                self.run.start, self.run.end
            )));
        }
        for (name, code) in [
            ("ddl.source_epsg", self.ddl.source_epsg),
            ("output.target_epsg", self.output.target_epsg),
        ] {
            if Crs::from_epsg(code).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{} = {} is not a supported coordinate system",
                    name, code
                )));
            }
        }
        if self.ddl.timeout_secs == 0 || self.rivm.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least one second".to_string()));
        }
        if self.run.interval_minutes == 0 || self.rivm.refresh_minutes == 0 {
            return Err(ConfigError::Invalid(
                "run.interval_minutes and rivm.refresh_minutes must be at least one minute".to_string(),
            ));
        }
        if self.run.quantity.trim().is_empty() {
            return Err(ConfigError::Invalid("run.quantity must not be empty".to_string()));
        }
        Ok(())
    }
}

/// PostgreSQL connection string from the environment (`.env` honored).
pub fn database_url() -> Result<String, ConfigError> {
    dotenv::dotenv().ok();
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))
}

// ============================================================================
// Tests
// ============================================================================

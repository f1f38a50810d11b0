/// Rijkswaterstaat DDL (Data Distributielaag) API client
///
/// Two services are used:
/// - `OphalenCatalogus` lists every parameter/location combination together
///   with the location and parameter metadata.
/// - `OphalenWaarnemingen` returns the measurement series for one
///   parameter at one location within a period.
///
/// Both are JSON-over-POST. Field names in the response structures below
/// follow the DDL's Dutch naming.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::DateTime;
use serde::{Deserialize, Deserializer};
use serde_json::json;

use crate::ingest::{
    Coded, IngestError, MeasurementSeries, ObservationRequest, ObservationSource, SourceResponse,
};
use crate::logging::{self, DataSource};
use crate::model::{Observation, ProcessingKey};

const SERVICE: &str = "DDL";

// ============================================================================
// DDL Response Structures
// ============================================================================

/// `{"Code": ..., "Omschrijving": ...}` pairs used throughout the DDL.
#[derive(Debug, Default, Deserialize)]
pub struct DdlCode {
    #[serde(rename = "Code", default)]
    pub code: Option<String>,
    #[serde(rename = "Omschrijving", default)]
    pub description: Option<String>,
}

impl From<DdlCode> for Coded {
    fn from(c: DdlCode) -> Self {
        Coded::new(c.code.unwrap_or_default(), c.description.unwrap_or_default())
    }
}

/// Catalog response (only the lists we use).
#[derive(Debug, Deserialize)]
pub struct CatalogResponse {
    #[serde(rename = "AquoMetadataLocatieLijst", default)]
    pub links: Vec<CatalogLink>,
    #[serde(rename = "LocatieLijst", default)]
    pub locations: Vec<DdlLocation>,
    #[serde(rename = "AquoMetadataLijst", default)]
    pub metadata: Vec<DdlAquoMetadata>,
}

/// Joins one metadata entry to one location.
#[derive(Debug, Deserialize)]
pub struct CatalogLink {
    #[serde(rename = "AquoMetaData_MessageID")]
    pub metadata_id: i64,
    #[serde(rename = "Locatie_MessageID")]
    pub location_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct DdlLocation {
    #[serde(rename = "Locatie_MessageID")]
    pub message_id: i64,
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Naam", default)]
    pub name: String,
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
}

#[derive(Debug, Deserialize)]
pub struct DdlAquoMetadata {
    #[serde(rename = "AquoMetadata_MessageID")]
    pub message_id: i64,
    #[serde(rename = "Parameter", default)]
    pub parameter: DdlCode,
    #[serde(rename = "Grootheid", default)]
    pub quantity: DdlCode,
    #[serde(rename = "Parameter_Wat_Omschrijving", default)]
    pub what_description: Option<String>,
}

/// Observation response.
///
/// Reading-level fields are optional so one incomplete reading does not
/// fail the whole body.
#[derive(Debug, Deserialize)]
pub struct ObservationResponse {
    #[serde(rename = "Succesvol", default)]
    pub succeeded: Option<bool>,
    #[serde(rename = "Foutmelding", default)]
    pub error_message: Option<String>,
    #[serde(rename = "WaarnemingenLijst", default)]
    pub series: Vec<DdlSeries>,
}

#[derive(Debug, Deserialize)]
pub struct DdlSeries {
    #[serde(rename = "AquoMetadata")]
    pub metadata: DdlSeriesMetadata,
    #[serde(rename = "MetingenLijst", default)]
    pub measurements: Vec<DdlMeasurement>,
}

#[derive(Debug, Deserialize)]
pub struct DdlSeriesMetadata {
    #[serde(rename = "BemonsteringsSoort", default)]
    pub sampling: DdlCode,
    #[serde(rename = "Compartiment", default)]
    pub compartment: DdlCode,
    #[serde(rename = "Hoedanigheid", default)]
    pub state: DdlCode,
    #[serde(rename = "Eenheid", default)]
    pub unit: DdlCode,
}

#[derive(Debug, Deserialize)]
pub struct DdlMeasurement {
    #[serde(rename = "Tijdstip", default)]
    pub timestamp: Option<String>,
    #[serde(rename = "Meetwaarde", default)]
    pub value: Option<DdlValue>,
    #[serde(rename = "WaarnemingMetadata", default)]
    pub metadata: DdlMeasurementMetadata,
}

#[derive(Debug, Deserialize)]
pub struct DdlValue {
    #[serde(rename = "Waarde_Numeriek", default)]
    pub numeric: Option<f64>,
    /// True whenever the limit symbol key is present, whatever its value.
    #[serde(rename = "Waarde_Limietsymbool", default, deserialize_with = "key_present")]
    pub has_limit_symbol: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DdlMeasurementMetadata {
    #[serde(rename = "KwaliteitswaardecodeLijst", default)]
    pub quality_codes: Vec<String>,
    #[serde(rename = "ReferentievlakLijst", default)]
    pub reference_datums: Vec<String>,
}

fn key_present<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    serde::de::IgnoredAny::deserialize(d).map(|_| true)
}

// ============================================================================
// Catalog
// ============================================================================

/// A monitoring location as listed in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub message_id: i64,
    pub code: String,
    pub name: String,
    /// Easting in the DDL coordinate system.
    pub x: f64,
    /// Northing in the DDL coordinate system.
    pub y: f64,
}

/// One parameter/location combination.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub key: ProcessingKey,
    /// Quantity ("Grootheid") code, e.g. CONCTTE.
    pub quantity_code: String,
    /// Parameter description, e.g. "cadmium".
    pub parameter_description: String,
    /// Long-form description ("Parameter_Wat_Omschrijving").
    pub parameter_what: String,
    pub location: Location,
}

impl CatalogEntry {
    pub fn request(&self, period: crate::ingest::RequestPeriod) -> ObservationRequest {
        ObservationRequest {
            parameter_code: self.key.substance.clone(),
            location_code: self.key.location.clone(),
            location_message_id: self.location.message_id,
            x: self.location.x,
            y: self.location.y,
            period,
        }
    }
}

/// All combinations of a catalog load, in catalog order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Joins links to their location and metadata through id maps.
    /// Links pointing at unknown ids are dropped with a warning.
    pub fn from_response(response: CatalogResponse) -> Self {
        let locations: HashMap<i64, DdlLocation> = response
            .locations
            .into_iter()
            .map(|l| (l.message_id, l))
            .collect();
        let metadata: HashMap<i64, DdlAquoMetadata> = response
            .metadata
            .into_iter()
            .map(|m| (m.message_id, m))
            .collect();

        let mut entries = Vec::with_capacity(response.links.len());
        let mut dangling = 0usize;

        for link in &response.links {
            let (Some(loc), Some(meta)) = (
                locations.get(&link.location_id),
                metadata.get(&link.metadata_id),
            ) else {
                dangling += 1;
                continue;
            };

            entries.push(CatalogEntry {
                key: ProcessingKey::new(
                    meta.parameter.code.clone().unwrap_or_default(),
                    loc.code.clone(),
                ),
                quantity_code: meta.quantity.code.clone().unwrap_or_default(),
                parameter_description: meta.parameter.description.clone().unwrap_or_default(),
                parameter_what: meta.what_description.clone().unwrap_or_default(),
                location: Location {
                    message_id: loc.message_id,
                    code: loc.code.clone(),
                    name: loc.name.clone(),
                    x: loc.x,
                    y: loc.y,
                },
            });
        }

        if dangling > 0 {
            logging::warn(
                DataSource::Ddl,
                None,
                &format!("{} catalog links reference unknown locations or metadata", dangling),
            );
        }

        Catalog { entries }
    }

    /// Entries of the given quantity ("Grootheid") code.
    pub fn with_quantity<'a>(&'a self, quantity: &'a str) -> impl Iterator<Item = &'a CatalogEntry> + 'a {
        self.entries.iter().filter(move |e| e.quantity_code == quantity)
    }
}

/// Catalog request body: quantities, parameters and units.
pub fn catalog_payload() -> serde_json::Value {
    json!({
        "CatalogusFilter": {
            "Grootheden": true,
            "Parameters": true,
            "Eenheden": true
        }
    })
}

/// Fetch and index the DDL catalog.
pub fn fetch_catalog(client: &reqwest::blocking::Client, url: &str) -> Result<Catalog, IngestError> {
    let response = client
        .post(url)
        .json(&catalog_payload())
        .send()
        .map_err(|e| IngestError::unavailable(SERVICE, e))?;

    if !response.status().is_success() {
        return Err(IngestError::unavailable(
            SERVICE,
            format!("catalog HTTP {}", response.status()),
        ));
    }

    let body: CatalogResponse = response.json().map_err(|e| IngestError::parse(SERVICE, e))?;
    Ok(Catalog::from_response(body))
}

// ============================================================================
// Observations
// ============================================================================

/// Observation request body for one parameter at one location.
pub fn observation_payload(request: &ObservationRequest) -> serde_json::Value {
    json!({
        "AquoPlusWaarnemingMetadata": {
            "AquoMetadata": { "Parameter": { "Code": request.parameter_code } }
        },
        "Locatie": {
            "X": request.x.to_string(),
            "Y": request.y.to_string(),
            "Code": request.location_code
        },
        "Periode": {
            "Begindatumtijd": request.period.ddl_start(),
            "Einddatumtijd": request.period.ddl_end()
        }
    })
}

/// Decode an observation response body and convert it to domain series.
///
/// A response without `Succesvol`, or with `Succesvol: false`, is an
/// explicit rejection. Readings with a missing or unreadable timestamp
/// cannot be placed in a year; they are dropped with a warning. A reading
/// without a `Meetwaarde` is kept with no value and judged malformed later.
pub fn parse_observation_response(body: &str, key: &str) -> Result<Vec<MeasurementSeries>, IngestError> {
    let response: ObservationResponse =
        serde_json::from_str(body).map_err(|e| IngestError::parse(SERVICE, e))?;

    match response.succeeded {
        Some(true) => {}
        Some(false) => {
            return Err(IngestError::UpstreamRejected {
                service: SERVICE,
                reason: response
                    .error_message
                    .unwrap_or_else(|| "request flagged unsuccessful".to_string()),
            });
        }
        None => {
            return Err(IngestError::UpstreamRejected {
                service: SERVICE,
                reason: "no key 'Succesvol' in response".to_string(),
            });
        }
    }

    Ok(response
        .series
        .into_iter()
        .map(|s| convert_series(s, key))
        .collect())
}

fn convert_series(series: DdlSeries, key: &str) -> MeasurementSeries {
    let mut observations = Vec::with_capacity(series.measurements.len());
    let mut unplaceable = 0usize;

    for m in series.measurements {
        let Some(raw_timestamp) = m.timestamp else {
            unplaceable += 1;
            continue;
        };
        let Ok(timestamp) = DateTime::parse_from_rfc3339(&raw_timestamp) else {
            unplaceable += 1;
            continue;
        };
        let mut metadata = m.metadata;
        let (value, below_detection_limit) = match m.value {
            Some(v) => (v.numeric, v.has_limit_symbol),
            None => (None, false),
        };
        observations.push(Observation {
            timestamp,
            raw_timestamp,
            value,
            quality_code: take_first(&mut metadata.quality_codes),
            reference_datum: take_first(&mut metadata.reference_datums),
            below_detection_limit,
        });
    }

    if unplaceable > 0 {
        logging::warn(
            DataSource::Ddl,
            Some(key),
            &format!("{} readings dropped: missing or unreadable timestamp", unplaceable),
        );
    }

    MeasurementSeries {
        sampling: series.metadata.sampling.into(),
        compartment: series.metadata.compartment.into(),
        state: series.metadata.state.into(),
        unit: series.metadata.unit.into(),
        observations,
    }
}

fn take_first(list: &mut Vec<String>) -> String {
    if list.is_empty() {
        String::new()
    } else {
        list.swap_remove(0)
    }
}

// ============================================================================
// Client
// ============================================================================

/// Build the blocking HTTP client shared by the DDL and RIVM calls.
pub fn build_client(timeout: Duration) -> Result<reqwest::blocking::Client, IngestError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| IngestError::unavailable(SERVICE, e))
}

/// Live observation source backed by `OphalenWaarnemingen`.
pub struct DdlClient {
    client: reqwest::blocking::Client,
    observations_url: String,
    archive_dir: Option<PathBuf>,
}

impl DdlClient {
    pub fn new(client: reqwest::blocking::Client, observations_url: impl Into<String>) -> Self {
        Self {
            client,
            observations_url: observations_url.into(),
            archive_dir: None,
        }
    }

    /// Keep every successful raw response body under `dir`.
    pub fn with_archive(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    fn archive(&self, dir: &Path, request: &ObservationRequest, body: &str) -> Option<PathBuf> {
        let key = format!("{}_{}", request.parameter_code, request.location_code);
        let path = dir.join(archive_file_name(request));

        if let Err(e) = fs::create_dir_all(dir) {
            logging::warn(DataSource::System, Some(&key), &format!("cannot create {}: {}", dir.display(), e));
            return None;
        }
        if path.exists() {
            logging::warn(
                DataSource::System,
                Some(&key),
                &format!("File {} already exists, overwrite this file", path.display()),
            );
        }
        match fs::write(&path, body) {
            Ok(()) => Some(path),
            Err(e) => {
                logging::warn(DataSource::System, Some(&key), &format!("cannot write {}: {}", path.display(), e));
                None
            }
        }
    }
}

/// `record<parameter>_<location message id>.json`
pub fn archive_file_name(request: &ObservationRequest) -> String {
    format!("record{}_{}.json", request.parameter_code, request.location_message_id)
}

impl ObservationSource for DdlClient {
    fn fetch_observations(&self, request: &ObservationRequest) -> Result<SourceResponse, IngestError> {
        let key = format!("{}_{}", request.parameter_code, request.location_code);

        let response = self
            .client
            .post(&self.observations_url)
            .json(&observation_payload(request))
            .send()
            .map_err(|e| IngestError::unavailable(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(IngestError::unavailable(SERVICE, format!("HTTP {}", response.status())));
        }

        let body = response.text().map_err(|e| IngestError::unavailable(SERVICE, e))?;
        let series = parse_observation_response(&body, &key)?;

        let archived_to = self
            .archive_dir
            .as_deref()
            .and_then(|dir| self.archive(dir, request, &body));

        Ok(SourceResponse { series, archived_to })
    }
}

// ============================================================================
// Tests
// ============================================================================

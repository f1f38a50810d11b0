/// Record persistence
///
/// Records are stored as JSONB GeoJSON features in
/// `eitoets.series_records` (see `sql/001_eitoets_schema.sql`), one row per
/// (substance, location, series ordinal). The unique constraint on that
/// triple is what makes a second writer for the same key a no-op.
///
/// [`MemoryRecordStore`] implements the same trait for offline runs and
/// tests.

use std::collections::HashSet;

use postgres::{Client, NoTls};
use thiserror::Error;

use crate::config::{self, ConfigError};
use crate::model::ProcessingKey;
use crate::record::SeriesRecord;

pub const SCHEMA: &str = "eitoets";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] postgres::Error),
    #[error("database schema(s) not found: {0}; apply sql/001_eitoets_schema.sql")]
    MissingSchema(String),
    #[error("stored record could not be (de)serialized: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Store interface
// ---------------------------------------------------------------------------

/// Selects records by substance and/or location. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub substance: Option<String>,
    pub location: Option<String>,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        self.substance.is_none() && self.location.is_none()
    }

    pub fn matches(&self, record: &SeriesRecord) -> bool {
        let p = &record.properties;
        self.substance.as_deref().is_none_or(|s| p.aquo_par_code == s)
            && self.location.as_deref().is_none_or(|l| p.loc_id == l)
    }
}

pub trait RecordStore {
    /// Every key with at least one stored record.
    fn existing_keys(&mut self) -> Result<HashSet<ProcessingKey>, StoreError>;

    /// Stores a record. Returns false when a record with the same key and
    /// ordinal already exists; nothing is written in that case.
    fn insert(&mut self, record: &SeriesRecord, series_ordinal: i32) -> Result<bool, StoreError>;

    /// Matching records in insertion order.
    fn find(&mut self, filter: &RecordFilter) -> Result<Vec<SeriesRecord>, StoreError>;

    /// Removes all records, returning how many were removed.
    fn clear(&mut self) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// Connect using `DATABASE_URL` and check that the given schemas exist.
pub fn connect_and_verify(schemas: &[&str]) -> Result<Client, StoreError> {
    let url = config::database_url()?;
    let mut client = Client::connect(&url, NoTls)?;

    let rows = client.query(
        "SELECT schema_name FROM information_schema.schemata WHERE schema_name = ANY($1)",
        &[&schemas],
    )?;
    let found: HashSet<String> = rows.iter().map(|r| r.get(0)).collect();

    let missing: Vec<&str> = schemas
        .iter()
        .copied()
        .filter(|s| !found.contains(*s))
        .collect();
    if !missing.is_empty() {
        return Err(StoreError::MissingSchema(missing.join(", ")));
    }

    Ok(client)
}

pub struct PgRecordStore {
    client: Client,
}

impl PgRecordStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect to `DATABASE_URL` and verify the `eitoets` schema.
    pub fn connect() -> Result<Self, StoreError> {
        connect_and_verify(&[SCHEMA]).map(Self::new)
    }
}

impl RecordStore for PgRecordStore {
    fn existing_keys(&mut self) -> Result<HashSet<ProcessingKey>, StoreError> {
        let rows = self.client.query(
            "SELECT DISTINCT aquo_par_code, loc_id FROM eitoets.series_records",
            &[],
        )?;
        Ok(rows
            .iter()
            .map(|r| ProcessingKey::new(r.get::<_, String>(0), r.get::<_, String>(1)))
            .collect())
    }

    fn insert(&mut self, record: &SeriesRecord, series_ordinal: i32) -> Result<bool, StoreError> {
        let feature = serde_json::to_value(record)?;
        let n = self.client.execute(
            "INSERT INTO eitoets.series_records (aquo_par_code, loc_id, series_ordinal, feature)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (aquo_par_code, loc_id, series_ordinal) DO NOTHING",
            &[
                &record.properties.aquo_par_code,
                &record.properties.loc_id,
                &series_ordinal,
                &feature,
            ],
        )?;
        Ok(n == 1)
    }

    fn find(&mut self, filter: &RecordFilter) -> Result<Vec<SeriesRecord>, StoreError> {
        let rows = self.client.query(
            "SELECT feature FROM eitoets.series_records
             WHERE ($1::text IS NULL OR aquo_par_code = $1)
               AND ($2::text IS NULL OR loc_id = $2)
             ORDER BY id",
            &[&filter.substance, &filter.location],
        )?;

        rows.into_iter()
            .map(|r| {
                let feature: serde_json::Value = r.get(0);
                serde_json::from_value(feature).map_err(StoreError::from)
            })
            .collect()
    }

    fn clear(&mut self) -> Result<u64, StoreError> {
        Ok(self.client.execute("DELETE FROM eitoets.series_records", &[])?)
    }
}

// ---------------------------------------------------------------------------
// In memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    rows: Vec<(ProcessingKey, i32, SeriesRecord)>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn existing_keys(&mut self) -> Result<HashSet<ProcessingKey>, StoreError> {
        Ok(self.rows.iter().map(|(k, _, _)| k.clone()).collect())
    }

    fn insert(&mut self, record: &SeriesRecord, series_ordinal: i32) -> Result<bool, StoreError> {
        let key = record.key();
        if self
            .rows
            .iter()
            .any(|(k, o, _)| *k == key && *o == series_ordinal)
        {
            return Ok(false);
        }
        self.rows.push((key, series_ordinal, record.clone()));
        Ok(true)
    }

    fn find(&mut self, filter: &RecordFilter) -> Result<Vec<SeriesRecord>, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|(_, _, r)| filter.matches(r))
            .map(|(_, _, r)| r.clone())
            .collect())
    }

    fn clear(&mut self) -> Result<u64, StoreError> {
        let n = self.rows.len() as u64;
        self.rows.clear();
        Ok(n)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::record::{EiData, PointGeometry, RecordProperties, SeriesRecord, SourceProp};

    /// A minimal record for store and query tests.
    pub fn record(substance: &str, location: &str, location_name: &str) -> SeriesRecord {
        SeriesRecord {
            kind: "Feature".to_string(),
            geometry: PointGeometry::new(4.9, 52.4),
            properties: RecordProperties {
                source: "DDL".to_string(),
                source_desc: "test".to_string(),
                aquo_par_omschrijving: format!("{} description", substance),
                aquo_par_code: substance.to_string(),
                par_description: format!("{} in water", substance),
                loc_id: location.to_string(),
                loc_name: location_name.to_string(),
                ei_data: EiData {
                    bemonsterings_soort_code: "01".to_string(),
                    bemonsterings_soort_omschrijving: "Steekmonster".to_string(),
                    compartiment_code: "OW".to_string(),
                    compartiment_omschrijving: "Oppervlaktewater".to_string(),
                    hoedanigheid_code: "NVT".to_string(),
                    hoedanigheid_omschrijving: "Niet van toepassing".to_string(),
                    eenheid_code: "ug/l".to_string(),
                    eenheid_omschrijving: "microgram per liter".to_string(),
                    file_name: None,
                    norms_for_substance_state_code_list: Vec::new(),
                    value_processing_method_code: "JGM".to_string(),
                    avg: 1.0,
                    year_data: Vec::new(),
                },
                source_prop: SourceProp {
                    x: "629638.04".to_string(),
                    y: "5803631.23".to_string(),
                },
            },
        }
    }
}

/// Batch ingestion
///
/// Walks the DDL catalog and, for every concentration combination not yet
/// stored, fetches the observations, aggregates each qualifying series and
/// writes the enriched record. Processing is sequential; the set of stored
/// keys is read once at the start of a batch and every key is claimed
/// before it is fetched, so a key is attempted at most once per batch.
///
/// One key's failure (upstream, geometry or a single insert) is logged and
/// counted; it never stops the batch. Only failing to read the stored keys
/// up front aborts a run.

use std::collections::HashSet;

use crate::analysis::summarize_series;
use crate::config::{RunMode, Settings};
use crate::db::{RecordStore, StoreError};
use crate::geo::{self, GeoError};
use crate::ingest::ddl::{Catalog, CatalogEntry};
use crate::ingest::{IngestError, ObservationSource, RequestPeriod};
use crate::logging::{self, DataSource};
use crate::model::{MaxMethodPolicy, ProcessingKey, GRAB_SAMPLE};
use crate::norms::NormTable;
use crate::record::SeriesRecord;

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// What a batch run needs from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub period: RequestPeriod,
    /// 0 means no limit.
    pub max_records: usize,
    pub mode: RunMode,
    pub max_method: MaxMethodPolicy,
    pub quantity: String,
    pub source_epsg: u32,
    pub target_epsg: u32,
}

impl RunOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            period: settings.run.period(),
            max_records: settings.run.max_records,
            mode: settings.run.mode,
            max_method: settings.run.max_method,
            quantity: settings.run.quantity.clone(),
            source_epsg: settings.ddl.source_epsg,
            target_epsg: settings.output.target_epsg,
        }
    }

    fn limit_reached(&self, written: usize) -> bool {
        self.max_records > 0 && written >= self.max_records
    }
}

/// Counters of one batch run.
///
/// `skipped_duplicate`, `skipped_quantity` and `failed` count catalog
/// combinations; `skipped_unclassified` and `skipped_not_grab_sample` count
/// series, except that a substance no state could classify is counted once
/// without fetching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub seen: usize,
    pub fetched: usize,
    pub written: usize,
    pub failed: usize,
    pub skipped_duplicate: usize,
    pub skipped_quantity: usize,
    pub skipped_unclassified: usize,
    pub skipped_not_grab_sample: usize,
    pub malformed_readings: usize,
    /// The batch stopped early on `max_records`.
    pub limit_reached: bool,
}

/// Pre-run overview computed from the catalog and the stored keys only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub total: usize,
    pub concentration: usize,
    pub already_done: usize,
    pub to_compute: usize,
}

/// Why a single key could not be processed.
#[derive(Debug, thiserror::Error)]
pub enum KeyFailure {
    #[error(transparent)]
    Upstream(#[from] IngestError),
    #[error(transparent)]
    Geometry(#[from] GeoError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Counts what a run would do without fetching any observations.
pub fn plan(catalog: &Catalog, existing: &HashSet<ProcessingKey>, quantity: &str) -> Plan {
    let mut plan = Plan {
        total: catalog.entries.len(),
        ..Plan::default()
    };
    for entry in catalog.with_quantity(quantity) {
        plan.concentration += 1;
        if existing.contains(&entry.key) {
            plan.already_done += 1;
        } else {
            plan.to_compute += 1;
        }
    }
    plan
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Runs one batch over `catalog`.
pub fn run_batch(
    catalog: &Catalog,
    norms: &NormTable,
    source: &dyn ObservationSource,
    store: &mut dyn RecordStore,
    options: &RunOptions,
) -> Result<RunSummary, StoreError> {
    let mut claimed = store.existing_keys()?;
    let mut summary = RunSummary::default();
    let mut attempted = 0usize;

    logging::info(
        DataSource::System,
        None,
        &format!(
            "Batch start: {} catalog entries, {} keys already stored",
            catalog.entries.len(),
            claimed.len()
        ),
    );

    for entry in &catalog.entries {
        if options.limit_reached(summary.written) {
            summary.limit_reached = true;
            break;
        }
        summary.seen += 1;

        if entry.quantity_code != options.quantity {
            summary.skipped_quantity += 1;
            continue;
        }
        if claimed.contains(&entry.key) {
            summary.skipped_duplicate += 1;
            continue;
        }
        if !norms.may_aggregate(&entry.key.substance) {
            summary.skipped_unclassified += 1;
            logging::debug(
                DataSource::Rivm,
                Some(&entry.key.to_string()),
                "no JGM/MAX/P90 norm for this substance, not fetched",
            );
            continue;
        }

        claimed.insert(entry.key.clone());
        attempted += 1;

        if let Err(failure) = process_entry(entry, norms, source, store, options, &mut summary) {
            summary.failed += 1;
            let key = entry.key.to_string();
            match &failure {
                KeyFailure::Upstream(e) => {
                    logging::log_upstream_failure(DataSource::Ddl, Some(&key), "fetch observations", e)
                }
                KeyFailure::Geometry(e) => logging::error(DataSource::System, Some(&key), &e.to_string()),
                KeyFailure::Store(e) => logging::error(DataSource::Database, Some(&key), &e.to_string()),
            }
        }
    }

    logging::log_run_summary(attempted, summary.written, summary.failed);
    Ok(summary)
}

/// Fetches, aggregates and stores one combination.
fn process_entry(
    entry: &CatalogEntry,
    norms: &NormTable,
    source: &dyn ObservationSource,
    store: &mut dyn RecordStore,
    options: &RunOptions,
    summary: &mut RunSummary,
) -> Result<(), KeyFailure> {
    let key = entry.key.to_string();
    logging::info(DataSource::Ddl, Some(&key), "Compute");

    let response = source.fetch_observations(&entry.request(options.period))?;
    summary.fetched += 1;

    let coordinates = geo::transform_point(
        entry.location.x,
        entry.location.y,
        options.source_epsg,
        options.target_epsg,
    )?;

    let period = (options.period.record_start(), options.period.record_end());

    for (ordinal, series) in response.series.iter().enumerate() {
        let resolution = norms.resolve_method(&entry.key.substance, &series.state.code);
        let Some(statistic) = resolution.method.statistic(options.max_method) else {
            summary.skipped_unclassified += 1;
            logging::debug(
                DataSource::Rivm,
                Some(&key),
                &format!("no supported norm for state '{}'", series.state.code),
            );
            continue;
        };

        let aggregation = summarize_series(
            entry.key.clone(),
            resolution.method,
            statistic,
            &series.observations,
            (&period.0, &period.1),
        );
        for m in &aggregation.malformed {
            logging::warn(DataSource::Ddl, Some(&key), &m.to_string());
        }
        summary.malformed_readings += aggregation.malformed.len();

        if series.sampling.description != GRAB_SAMPLE {
            summary.skipped_not_grab_sample += 1;
            logging::info(
                DataSource::Ddl,
                Some(&key),
                &format!("Data is not stored, sampling is: {}", series.sampling.description),
            );
            continue;
        }

        logging::info(
            DataSource::Ddl,
            Some(&key),
            &format!(
                "Calculated {} value: {}",
                resolution.method.code(),
                aggregation.summary.multi_year
            ),
        );

        let record = SeriesRecord::build(
            entry,
            series,
            &resolution,
            &aggregation.summary,
            coordinates,
            response.archived_to.as_deref(),
        );

        let series_ordinal = match options.mode {
            RunMode::AtMostOnce => 0,
            RunMode::PerSeries => i32::try_from(ordinal).unwrap_or(i32::MAX),
        };

        if store.insert(&record, series_ordinal)? {
            summary.written += 1;
        } else {
            logging::debug(DataSource::Database, Some(&key), "already stored by another writer");
        }

        if options.mode == RunMode::AtMostOnce {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRecordStore;
    use crate::ingest::ddl::Location;
    use crate::ingest::{Coded, MeasurementSeries, ObservationRequest, SourceResponse};
    use crate::model::Observation;
    use crate::norms::{Norm, NormRef, Substance};
    use chrono::DateTime;
    use serde_json::json;
    use std::cell::RefCell;

    struct FakeSource {
        calls: RefCell<Vec<String>>,
        fail_for: Option<String>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail_for: None,
            }
        }
    }

    fn reading(ts: &str, value: f64) -> Observation {
        Observation {
            timestamp: DateTime::parse_from_rfc3339(ts).unwrap(),
            raw_timestamp: ts.to_string(),
            value: Some(value),
            quality_code: "00".to_string(),
            reference_datum: "WATSGL".to_string(),
            below_detection_limit: false,
        }
    }

    fn grab_series(state: &str) -> MeasurementSeries {
        MeasurementSeries {
            sampling: Coded::new("01", "Steekmonster"),
            compartment: Coded::new("OW", "Oppervlaktewater"),
            state: Coded::new(state, state),
            unit: Coded::new("ug/l", "microgram per liter"),
            observations: vec![
                reading("2012-03-01T10:00:00+01:00", 2.0),
                reading("2013-03-01T10:00:00+01:00", 4.0),
            ],
        }
    }

    impl ObservationSource for FakeSource {
        fn fetch_observations(&self, request: &ObservationRequest) -> Result<SourceResponse, IngestError> {
            self.calls.borrow_mut().push(request.parameter_code.clone());
            if self.fail_for.as_deref() == Some(request.parameter_code.as_str()) {
                return Err(IngestError::UpstreamUnavailable {
                    service: "DDL",
                    reason: "HTTP 503".to_string(),
                });
            }
            Ok(SourceResponse {
                series: vec![grab_series("Opgelost"), grab_series("Opgelost")],
                archived_to: None,
            })
        }
    }

    fn entry(substance: &str, quantity: &str) -> CatalogEntry {
        CatalogEntry {
            key: ProcessingKey::new(substance, "AMSDM"),
            quantity_code: quantity.to_string(),
            parameter_description: substance.to_lowercase(),
            parameter_what: String::new(),
            location: Location {
                message_id: 10,
                code: "AMSDM".to_string(),
                name: "Amsterdam".to_string(),
                x: 629638.04,
                y: 5803631.23,
            },
        }
    }

    fn norms() -> NormTable {
        let norm: Norm = serde_json::from_value(json!({
            "id": 1, "stateCode": "Opgelost", "valueProcessingMethodCode": "JGM"
        }))
        .unwrap();
        let substance = |code: &str| Substance {
            aquo_code: Some(code.to_string()),
            name: None,
            english_name: None,
            cas_number: None,
            has_zzs_entry: None,
            norms: vec![NormRef {
                id: "1".to_string(),
                value: json!(1.0),
            }],
        };
        NormTable::new(vec![norm], vec![substance("Cd"), substance("Zn")])
    }

    fn options() -> RunOptions {
        RunOptions::from_settings(&Settings::default())
    }

    #[test]
    fn test_plan_counts() {
        let catalog = Catalog {
            entries: vec![entry("Cd", "CONCTTE"), entry("Zn", "CONCTTE"), entry("NVT", "WATHTE")],
        };
        let existing: HashSet<_> = [ProcessingKey::new("Cd", "AMSDM")].into_iter().collect();
        let p = plan(&catalog, &existing, "CONCTTE");
        assert_eq!(
            p,
            Plan {
                total: 3,
                concentration: 2,
                already_done: 1,
                to_compute: 1
            }
        );
    }

    #[test]
    fn test_at_most_once_writes_first_series_only() {
        let catalog = Catalog {
            entries: vec![entry("Cd", "CONCTTE")],
        };
        let mut store = MemoryRecordStore::new();
        let s = run_batch(&catalog, &norms(), &FakeSource::new(), &mut store, &options()).unwrap();
        assert_eq!(s.written, 1);
        assert_eq!(store.len(), 1);

        let rec = &store.find(&Default::default()).unwrap()[0];
        assert_eq!(rec.properties.ei_data.avg, 3.0);
        assert_eq!(rec.properties.ei_data.value_processing_method_code, "JGM");
        assert_eq!(rec.properties.ei_data.year_data.len(), 2);
        assert_eq!(rec.properties.ei_data.year_data[0].requested_start, "2012-01-01T00:00:00");
    }

    #[test]
    fn test_per_series_mode_writes_every_series() {
        let catalog = Catalog {
            entries: vec![entry("Cd", "CONCTTE")],
        };
        let mut opts = options();
        opts.mode = RunMode::PerSeries;
        let mut store = MemoryRecordStore::new();
        let s = run_batch(&catalog, &norms(), &FakeSource::new(), &mut store, &opts).unwrap();
        assert_eq!(s.written, 2);
    }

    #[test]
    fn test_duplicate_catalog_key_fetched_once() {
        let catalog = Catalog {
            entries: vec![entry("Cd", "CONCTTE"), entry("Cd", "CONCTTE")],
        };
        let source = FakeSource::new();
        let mut store = MemoryRecordStore::new();
        let s = run_batch(&catalog, &norms(), &source, &mut store, &options()).unwrap();
        assert_eq!(source.calls.borrow().len(), 1);
        assert_eq!(s.skipped_duplicate, 1);
    }

    #[test]
    fn test_max_records_stops_the_batch() {
        let catalog = Catalog {
            entries: vec![entry("Cd", "CONCTTE"), entry("Zn", "CONCTTE")],
        };
        let mut opts = options();
        opts.max_records = 1;
        let source = FakeSource::new();
        let mut store = MemoryRecordStore::new();
        let s = run_batch(&catalog, &norms(), &source, &mut store, &opts).unwrap();
        assert_eq!(s.written, 1);
        assert!(s.limit_reached);
        assert_eq!(source.calls.borrow().len(), 1);
    }

    #[test]
    fn test_upstream_failure_is_isolated() {
        let catalog = Catalog {
            entries: vec![entry("Cd", "CONCTTE"), entry("Zn", "CONCTTE")],
        };
        let source = FakeSource {
            calls: RefCell::new(Vec::new()),
            fail_for: Some("Cd".to_string()),
        };
        let mut store = MemoryRecordStore::new();
        let s = run_batch(&catalog, &norms(), &source, &mut store, &options()).unwrap();
        assert_eq!(s.failed, 1);
        assert_eq!(s.written, 1);
        assert_eq!(store.find(&Default::default()).unwrap()[0].properties.aquo_par_code, "Zn");
    }

    #[test]
    fn test_unknown_substance_is_not_fetched() {
        let catalog = Catalog {
            entries: vec![entry("Hg", "CONCTTE"), entry("NVT", "WATHTE")],
        };
        let source = FakeSource::new();
        let mut store = MemoryRecordStore::new();
        let s = run_batch(&catalog, &norms(), &source, &mut store, &options()).unwrap();
        assert!(source.calls.borrow().is_empty());
        assert_eq!(s.skipped_unclassified, 1);
        assert_eq!(s.skipped_quantity, 1);
        assert_eq!(s.seen, 2);
    }
}

//! RIVM norm table and aggregation-method resolution.
//!
//! The norm database is loaded wholesale into an immutable [`NormTable`]
//! with identifier maps built once per load. [`NormCatalog`] holds the
//! current table behind a single-writer swap so a refresh never exposes a
//! half-built table to readers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::ingest::IngestError;
use crate::logging::{self, DataSource};
use crate::model::AggregationMethod;

// ============================================================================
// Norm database records
// ============================================================================

/// A regulatory norm as published by the RIVM norm database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Norm {
    #[serde(deserialize_with = "id_text")]
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub compartment_name: Option<String>,
    #[serde(default)]
    pub category_description: Option<String>,
    #[serde(default)]
    pub norm_code: Option<String>,
    #[serde(default)]
    pub norm_description: Option<String>,
    #[serde(default)]
    pub norm_subgroup_code: Option<String>,
    #[serde(default)]
    pub norm_subgroup_description: Option<String>,
    #[serde(default)]
    pub compartment_code: Option<String>,
    #[serde(default)]
    pub compartment_description: Option<String>,
    #[serde(default)]
    pub compartment_subgroup_code: Option<String>,
    #[serde(default)]
    pub compartment_subgroup_description: Option<String>,
    #[serde(default)]
    pub quantity_code: Option<String>,
    #[serde(default)]
    pub quantity_description: Option<String>,
    /// Physical state the norm applies to; matched against the DDL
    /// "Hoedanigheid" code of a series.
    #[serde(default)]
    pub state_code: Option<String>,
    #[serde(default)]
    pub state_description: Option<String>,
    #[serde(default)]
    pub value_processing_method_code: Option<String>,
    #[serde(default)]
    pub value_processing_method_description: Option<String>,
}

impl Norm {
    pub fn method(&self) -> AggregationMethod {
        self.value_processing_method_code
            .as_deref()
            .map(AggregationMethod::from_code)
            .unwrap_or(AggregationMethod::Other)
    }

    pub fn applies_to_state(&self, state: &str) -> bool {
        self.state_code.as_deref() == Some(state)
    }
}

/// A norm reference attached to a substance, with the norm value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormRef {
    #[serde(deserialize_with = "id_text")]
    pub id: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A substance (parameter) keyed by its aquo code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Substance {
    /// Entries without a code cannot be matched and are skipped on load.
    #[serde(default)]
    pub aquo_code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub english_name: Option<String>,
    #[serde(default)]
    pub cas_number: Option<String>,
    #[serde(default)]
    pub has_zzs_entry: Option<bool>,
    #[serde(default)]
    pub norms: Vec<NormRef>,
}

/// Norm identifiers appear both as numbers and as strings.
fn id_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Int(i64),
        Text(String),
    }
    Ok(match Id::deserialize(d)? {
        Id::Int(i) => i.to_string(),
        Id::Text(s) => s,
    })
}

// ============================================================================
// Resolution result
// ============================================================================

/// The subset of a norm stored with each series record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormSummary {
    pub id: String,
    pub value_processing_method_code: Option<String>,
    pub value_processing_method_description: Option<String>,
    pub state_code: Option<String>,
    pub state_description: Option<String>,
    pub norm_description: Option<String>,
}

impl From<&Norm> for NormSummary {
    fn from(n: &Norm) -> Self {
        Self {
            id: n.id.clone(),
            value_processing_method_code: n.value_processing_method_code.clone(),
            value_processing_method_description: n.value_processing_method_description.clone(),
            state_code: n.state_code.clone(),
            state_description: n.state_description.clone(),
            norm_description: n.norm_description.clone(),
        }
    }
}

/// Outcome of [`NormTable::resolve_method`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub method: AggregationMethod,
    /// Qualifying norms in the substance's own order.
    pub norms: Vec<NormSummary>,
}

// ============================================================================
// Norm table snapshot
// ============================================================================

/// An immutable, fully indexed load of the norm database.
#[derive(Debug, Clone, Default)]
pub struct NormTable {
    norms: HashMap<String, Norm>,
    substances: HashMap<String, Substance>,
    loaded_at: Option<DateTime<Utc>>,
}

impl NormTable {
    /// Indexes the raw collections.
    ///
    /// A substance listed more than once keeps the metadata of its first
    /// entry and the norm references of all entries. Substances without an
    /// aquo code are dropped.
    pub fn new(norms: Vec<Norm>, substances: Vec<Substance>) -> Self {
        let norms = norms.into_iter().map(|n| (n.id.clone(), n)).collect();

        let mut by_code: HashMap<String, Substance> = HashMap::new();
        let mut uncoded = 0usize;
        for substance in substances {
            let Some(code) = substance.aquo_code.clone() else {
                uncoded += 1;
                continue;
            };
            match by_code.get_mut(&code) {
                Some(existing) => existing.norms.extend(substance.norms),
                None => {
                    by_code.insert(code, substance);
                }
            }
        }

        if uncoded > 0 {
            logging::warn(
                DataSource::Rivm,
                None,
                &format!("{} substances without aquoCode skipped", uncoded),
            );
        }

        Self {
            norms,
            substances: by_code,
            loaded_at: Some(Utc::now()),
        }
    }

    pub fn norm(&self, id: &str) -> Option<&Norm> {
        self.norms.get(id)
    }

    pub fn substance(&self, aquo_code: &str) -> Option<&Substance> {
        self.substances.get(aquo_code)
    }

    pub fn norm_count(&self) -> usize {
        self.norms.len()
    }

    pub fn substance_count(&self) -> usize {
        self.substances.len()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    /// All known norms of a substance, in the substance's order. Dangling
    /// references are skipped.
    pub fn norms_for(&self, aquo_code: &str) -> Vec<&Norm> {
        self.substance(aquo_code)
            .map(|s| s.norms.iter().filter_map(|r| self.norm(&r.id)).collect())
            .unwrap_or_default()
    }

    /// Derives the aggregation method for a substance observed in `state`.
    ///
    /// Only norms whose state code equals `state` qualify. Among those the
    /// first method in priority order JGM, MAX, P90 wins; anything else,
    /// including an unknown substance, resolves to `Other`.
    pub fn resolve_method(&self, aquo_code: &str, state: &str) -> Resolution {
        let qualifying: Vec<&Norm> = self
            .norms_for(aquo_code)
            .into_iter()
            .filter(|n| n.applies_to_state(state))
            .collect();

        let method = qualifying
            .iter()
            .map(|n| n.method())
            .min()
            .unwrap_or(AggregationMethod::Other);

        Resolution {
            method,
            norms: qualifying.into_iter().map(NormSummary::from).collect(),
        }
    }

    /// Whether any state could give this substance a supported method.
    /// Used to avoid fetching observations that can never be aggregated.
    pub fn may_aggregate(&self, aquo_code: &str) -> bool {
        self.norms_for(aquo_code)
            .iter()
            .any(|n| n.state_code.is_some() && n.method().is_supported())
    }
}

// ============================================================================
// Refreshable catalog
// ============================================================================

/// The current norm table, replaced atomically on refresh.
#[derive(Debug, Default)]
pub struct NormCatalog {
    current: RwLock<Arc<NormTable>>,
}

impl NormCatalog {
    pub fn new(table: NormTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    /// The table as of now. Later refreshes do not affect the returned value.
    pub fn snapshot(&self) -> Arc<NormTable> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace(&self, table: NormTable) {
        let table = Arc::new(table);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = table;
    }

    /// Fetches a new table and swaps it in. On error the current table stays.
    pub fn refresh_with<F>(&self, fetch: F) -> Result<(), IngestError>
    where
        F: FnOnce() -> Result<NormTable, IngestError>,
    {
        let table = fetch()?;
        logging::info(
            DataSource::Rivm,
            None,
            &format!(
                "Norm table refreshed: {} substances, {} norms",
                table.substance_count(),
                table.norm_count()
            ),
        );
        self.replace(table);
        Ok(())
    }

    /// Refreshes the catalog every `interval` on a background thread.
    pub fn spawn_refresher<F>(self: Arc<Self>, interval: Duration, fetch: F) -> JoinHandle<()>
    where
        F: Fn() -> Result<NormTable, IngestError> + Send + 'static,
    {
        thread::spawn(move || {
            loop {
                thread::sleep(interval);
                if let Err(e) = self.refresh_with(&fetch) {
                    logging::log_upstream_failure(DataSource::Rivm, None, "norm refresh", &e);
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

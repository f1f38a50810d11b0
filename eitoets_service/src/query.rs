//! Read queries over the norm table and the stored records.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::db::{RecordFilter, RecordStore, StoreError};
use crate::norms::{Norm, NormTable};
use crate::record::{PointGeometry, SeriesRecord};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("give a substance (parCode) and/or a location (locID)")]
    MissingFilter,
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Norms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormWithValue<'a> {
    pub value: &'a serde_json::Value,
    pub info: &'a Norm,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstanceNorms<'a> {
    pub aquo_code: &'a str,
    pub name: Option<&'a str>,
    pub english_name: Option<&'a str>,
    pub cas_number: Option<&'a str>,
    pub has_zzs_entry: Option<bool>,
    pub norms: Vec<NormWithValue<'a>>,
}

/// The substance with every norm attached to it and the norm values.
pub fn norms_for_substance<'a>(table: &'a NormTable, aquo_code: &str) -> Option<SubstanceNorms<'a>> {
    let substance = table.substance(aquo_code)?;
    let norms = substance
        .norms
        .iter()
        .filter_map(|r| {
            table.norm(&r.id).map(|info| NormWithValue {
                value: &r.value,
                info,
            })
        })
        .collect();

    Some(SubstanceNorms {
        aquo_code: substance.aquo_code.as_deref().unwrap_or_default(),
        name: substance.name.as_deref(),
        english_name: substance.english_name.as_deref(),
        cas_number: substance.cas_number.as_deref(),
        has_zzs_entry: substance.has_zzs_entry,
        norms,
    })
}

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationProperties {
    pub source: String,
    #[serde(rename = "locID")]
    pub loc_id: String,
    #[serde(rename = "locName")]
    pub loc_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationFeature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub properties: LocationProperties,
    pub geometry: PointGeometry,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<LocationFeature>,
}

/// One feature per location among the matching records, sorted by
/// location name. When a location occurs more than once the last stored
/// record provides its name and geometry.
pub fn unique_locations(
    store: &mut dyn RecordStore,
    filter: &RecordFilter,
) -> Result<FeatureCollection, QueryError> {
    let records = store.find(filter)?;

    let mut by_location: HashMap<String, SeriesRecord> = HashMap::new();
    for r in records {
        by_location.insert(r.properties.loc_id.clone(), r);
    }

    let mut features: Vec<LocationFeature> = by_location
        .into_values()
        .map(|r| LocationFeature {
            kind: "Feature",
            properties: LocationProperties {
                source: r.properties.source,
                loc_id: r.properties.loc_id,
                loc_name: r.properties.loc_name,
            },
            geometry: r.geometry,
        })
        .collect();
    features.sort_by(|a, b| {
        a.properties
            .loc_name
            .cmp(&b.properties.loc_name)
            .then_with(|| a.properties.loc_id.cmp(&b.properties.loc_id))
    });

    Ok(FeatureCollection {
        kind: "FeatureCollection",
        features,
    })
}

// ---------------------------------------------------------------------------
// Substances
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubstanceListing {
    #[serde(rename = "aquoParCode")]
    pub aquo_par_code: String,
    #[serde(rename = "aquoParOmschrijving")]
    pub aquo_par_omschrijving: String,
    #[serde(rename = "parDescription")]
    pub par_description: String,
}

/// Every substance with a stored record, sorted by description.
pub fn unique_substances(store: &mut dyn RecordStore) -> Result<Vec<SubstanceListing>, QueryError> {
    let mut by_code: HashMap<String, SubstanceListing> = HashMap::new();
    for r in store.find(&RecordFilter::default())? {
        let p = r.properties;
        by_code.insert(
            p.aquo_par_code.clone(),
            SubstanceListing {
                aquo_par_code: p.aquo_par_code,
                aquo_par_omschrijving: p.aquo_par_omschrijving,
                par_description: p.par_description,
            },
        );
    }

    let mut listing: Vec<SubstanceListing> = by_code.into_values().collect();
    listing.sort_by(|a, b| {
        a.aquo_par_omschrijving
            .cmp(&b.aquo_par_omschrijving)
            .then_with(|| a.aquo_par_code.cmp(&b.aquo_par_code))
    });
    Ok(listing)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Stored records for a substance and/or location. An empty filter is
/// refused rather than dumping the whole store.
pub fn records(store: &mut dyn RecordStore, filter: &RecordFilter) -> Result<Vec<SeriesRecord>, QueryError> {
    if filter.is_empty() {
        return Err(QueryError::MissingFilter);
    }
    Ok(store.find(filter)?)
}

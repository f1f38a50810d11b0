//! The enriched series record.
//!
//! One record is a GeoJSON `Feature` with a `Point` geometry. The property
//! names are part of the stored format and are read back by the query
//! module, so they keep the published camelCase spelling.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ingest::ddl::CatalogEntry;
use crate::ingest::MeasurementSeries;
use crate::model::{ProcessingKey, SeriesSummary, YearAggregate};
use crate::norms::{NormSummary, Resolution};

pub const SOURCE: &str = "DDL";
pub const SOURCE_DESCRIPTION: &str = "Gegevens uit de data distributielaag van Rijkswaterstaat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[x, y]`, longitude first for geographic output.
    pub coordinates: [f64; 2],
}

impl PointGeometry {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [x, y],
        }
    }
}

/// Location coordinates as the DDL delivered them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProp {
    #[serde(rename = "X")]
    pub x: String,
    #[serde(rename = "Y")]
    pub y: String,
}

/// Classification, norms and aggregation result of one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EiData {
    pub bemonsterings_soort_code: String,
    pub bemonsterings_soort_omschrijving: String,
    pub compartiment_code: String,
    pub compartiment_omschrijving: String,
    pub hoedanigheid_code: String,
    pub hoedanigheid_omschrijving: String,
    pub eenheid_code: String,
    pub eenheid_omschrijving: String,
    /// Archived raw response, when archiving is on.
    #[serde(default)]
    pub file_name: Option<String>,
    pub norms_for_substance_state_code_list: Vec<NormSummary>,
    pub value_processing_method_code: String,
    /// Multi-year value.
    pub avg: f64,
    pub year_data: Vec<YearAggregate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordProperties {
    pub source: String,
    #[serde(rename = "sourceDesc")]
    pub source_desc: String,
    #[serde(rename = "aquoParOmschrijving")]
    pub aquo_par_omschrijving: String,
    #[serde(rename = "aquoParCode")]
    pub aquo_par_code: String,
    #[serde(rename = "parDescription")]
    pub par_description: String,
    #[serde(rename = "locID")]
    pub loc_id: String,
    #[serde(rename = "locName")]
    pub loc_name: String,
    #[serde(rename = "EIData")]
    pub ei_data: EiData,
    #[serde(rename = "sourceProp")]
    pub source_prop: SourceProp,
}

/// A persisted series: GeoJSON feature keyed by substance and location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: PointGeometry,
    pub properties: RecordProperties,
}

impl SeriesRecord {
    /// Assembles the record for one aggregated series.
    ///
    /// `coordinates` are the location already transformed to the output
    /// coordinate system.
    pub fn build(
        entry: &CatalogEntry,
        series: &MeasurementSeries,
        resolution: &Resolution,
        summary: &SeriesSummary,
        coordinates: (f64, f64),
        archived_to: Option<&Path>,
    ) -> Self {
        let ei_data = EiData {
            bemonsterings_soort_code: series.sampling.code.clone(),
            bemonsterings_soort_omschrijving: series.sampling.description.clone(),
            compartiment_code: series.compartment.code.clone(),
            compartiment_omschrijving: series.compartment.description.clone(),
            hoedanigheid_code: series.state.code.clone(),
            hoedanigheid_omschrijving: series.state.description.clone(),
            eenheid_code: series.unit.code.clone(),
            eenheid_omschrijving: series.unit.description.clone(),
            file_name: archived_to.map(|p| p.display().to_string()),
            norms_for_substance_state_code_list: resolution.norms.clone(),
            value_processing_method_code: summary.method.code().to_string(),
            avg: summary.multi_year,
            year_data: summary.years.clone(),
        };

        SeriesRecord {
            kind: "Feature".to_string(),
            geometry: PointGeometry::new(coordinates.0, coordinates.1),
            properties: RecordProperties {
                source: SOURCE.to_string(),
                source_desc: SOURCE_DESCRIPTION.to_string(),
                aquo_par_omschrijving: entry.parameter_description.clone(),
                aquo_par_code: entry.key.substance.clone(),
                par_description: entry.parameter_what.clone(),
                loc_id: entry.key.location.clone(),
                loc_name: entry.location.name.clone(),
                ei_data,
                source_prop: SourceProp {
                    x: entry.location.x.to_string(),
                    y: entry.location.y.to_string(),
                },
            },
        }
    }

    pub fn key(&self) -> ProcessingKey {
        ProcessingKey::new(&self.properties.aquo_par_code, &self.properties.loc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ddl::Location;
    use crate::ingest::Coded;
    use crate::model::AggregationMethod;

    fn entry() -> CatalogEntry {
        CatalogEntry {
            key: ProcessingKey::new("Cd", "AMSDM"),
            quantity_code: "CONCTTE".to_string(),
            parameter_description: "cadmium".to_string(),
            parameter_what: "Cadmium Oppervlaktewater".to_string(),
            location: Location {
                message_id: 10,
                code: "AMSDM".to_string(),
                name: "Amsterdam".to_string(),
                x: 629638.04,
                y: 5803631.23,
            },
        }
    }

    fn series() -> MeasurementSeries {
        MeasurementSeries {
            sampling: Coded::new("01", "Steekmonster"),
            compartment: Coded::new("OW", "Oppervlaktewater"),
            state: Coded::new("Opgelost", "opgelost"),
            unit: Coded::new("ug/l", "microgram per liter"),
            observations: Vec::new(),
        }
    }

    fn summary() -> SeriesSummary {
        SeriesSummary {
            key: ProcessingKey::new("Cd", "AMSDM"),
            method: AggregationMethod::Percentile90,
            years: Vec::new(),
            multi_year: 0.0,
        }
    }

    #[test]
    fn test_record_json_shape() {
        let resolution = Resolution {
            method: AggregationMethod::Percentile90,
            norms: Vec::new(),
        };
        let record = SeriesRecord::build(
            &entry(),
            &series(),
            &resolution,
            &summary(),
            (4.9041, 52.3676),
            Some(Path::new("/tmp/recordCd_10.json")),
        );
        let v = serde_json::to_value(&record).unwrap();

        assert_eq!(v["type"], "Feature");
        assert_eq!(v["geometry"]["type"], "Point");
        assert_eq!(v["geometry"]["coordinates"][0], 4.9041);
        assert_eq!(v["properties"]["source"], "DDL");
        assert_eq!(v["properties"]["aquoParCode"], "Cd");
        assert_eq!(v["properties"]["locID"], "AMSDM");
        assert_eq!(v["properties"]["locName"], "Amsterdam");
        assert_eq!(v["properties"]["sourceProp"]["X"], "629638.04");
        assert_eq!(v["properties"]["EIData"]["bemonsteringsSoortOmschrijving"], "Steekmonster");
        assert_eq!(v["properties"]["EIData"]["hoedanigheidCode"], "Opgelost");
        assert_eq!(v["properties"]["EIData"]["valueProcessingMethodCode"], "P90");
        assert_eq!(v["properties"]["EIData"]["fileName"], "/tmp/recordCd_10.json");
        assert_eq!(v["properties"]["EIData"]["avg"], 0.0);
    }

    #[test]
    fn test_record_reads_back() {
        let resolution = Resolution {
            method: AggregationMethod::Percentile90,
            norms: Vec::new(),
        };
        let record = SeriesRecord::build(&entry(), &series(), &resolution, &summary(), (1.0, 2.0), None);
        let text = serde_json::to_string(&record).unwrap();
        let back: SeriesRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.key(), ProcessingKey::new("Cd", "AMSDM"));
    }
}

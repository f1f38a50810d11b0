/// RIVM norm database client
///
/// One GET returns the whole database as `{"norms": [...], "substances": [...]}`.
/// The result is indexed once into a [`NormTable`].

use serde::Deserialize;

use crate::ingest::IngestError;
use crate::norms::{Norm, NormTable, Substance};

const SERVICE: &str = "RIVM";

#[derive(Debug, Deserialize)]
struct NormDatabase {
    norms: Vec<Norm>,
    substances: Vec<Substance>,
}

/// Parse a norm database document.
pub fn parse_norm_database(body: &str) -> Result<NormTable, IngestError> {
    let db: NormDatabase = serde_json::from_str(body).map_err(|e| IngestError::parse(SERVICE, e))?;
    Ok(NormTable::new(db.norms, db.substances))
}

/// Download and index the norm database.
pub fn fetch_norm_database(client: &reqwest::blocking::Client, url: &str) -> Result<NormTable, IngestError> {
    let response = client
        .get(url)
        .send()
        .map_err(|e| IngestError::unavailable(SERVICE, e))?;

    if !response.status().is_success() {
        return Err(IngestError::unavailable(SERVICE, format!("HTTP {}", response.status())));
    }

    let body = response.text().map_err(|e| IngestError::unavailable(SERVICE, e))?;
    parse_norm_database(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AggregationMethod;

    const DB: &str = r#"{
        "norms": [
            {"id": 101, "normDescription": "JG-MKE", "stateCode": "Opgelost",
             "stateDescription": "opgelost", "valueProcessingMethodCode": "JGM",
             "valueProcessingMethodDescription": "jaargemiddelde", "compartmentCode": "OW"},
            {"id": 102, "normDescription": "MAC-MKE", "stateCode": "Opgelost",
             "valueProcessingMethodCode": "MAX"}
        ],
        "substances": [
            {"aquoCode": "Cd", "name": "cadmium", "casNumber": "7440-43-9",
             "hasZzsEntry": true,
             "norms": [{"id": 101, "value": 0.08}, {"id": 102, "value": 0.45}]}
        ]
    }"#;

    #[test]
    fn test_parse_norm_database() {
        let table = parse_norm_database(DB).unwrap();
        assert_eq!(table.norm_count(), 2);
        assert_eq!(table.substance_count(), 1);
        assert!(table.loaded_at().is_some());

        let cd = table.substance("Cd").unwrap();
        assert_eq!(cd.cas_number.as_deref(), Some("7440-43-9"));
        assert_eq!(cd.has_zzs_entry, Some(true));

        let r = table.resolve_method("Cd", "Opgelost");
        assert_eq!(r.method, AggregationMethod::AnnualMean);
        assert_eq!(r.norms[0].value_processing_method_description.as_deref(), Some("jaargemiddelde"));
    }

    #[test]
    fn test_substance_without_code_is_skipped() {
        let body = r#"{
            "norms": [{"id": 101, "stateCode": "Opgelost", "valueProcessingMethodCode": "JGM"}],
            "substances": [
                {"aquoCode": "Cd", "norms": [{"id": 101, "value": 0.08}]},
                {"aquoCode": null, "name": "onbekend", "norms": [{"id": 101, "value": 1.0}]},
                {"name": "zonder code", "norms": []}
            ]
        }"#;
        let table = parse_norm_database(body).unwrap();
        assert_eq!(table.substance_count(), 1);
        assert_eq!(table.resolve_method("Cd", "Opgelost").method, AggregationMethod::AnnualMean);
    }

    #[test]
    fn test_missing_collection_is_parse_error() {
        let err = parse_norm_database(r#"{"norms": []}"#).unwrap_err();
        assert!(matches!(err, IngestError::Parse { service: "RIVM", .. }));
    }
}

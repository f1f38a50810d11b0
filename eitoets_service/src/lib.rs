pub mod analysis;
pub mod config;
pub mod db;
pub mod geo;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod norms;
pub mod orchestrator;
pub mod query;
pub mod record;

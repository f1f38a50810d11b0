//! EI-toets aggregation service command line.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use eitoets_service::config::{DEFAULT_CONFIG_PATH, Settings};
use eitoets_service::db::{MemoryRecordStore, PgRecordStore, RecordFilter, RecordStore};
use eitoets_service::ingest::ddl::{self, Catalog, DdlClient};
use eitoets_service::ingest::rivm;
use eitoets_service::logging::{self, DataSource};
use eitoets_service::norms::{NormCatalog, NormTable};
use eitoets_service::orchestrator::{self, RunOptions, RunSummary};
use eitoets_service::query;

#[derive(Parser)]
#[command(name = "eitoets")]
#[command(about = "Multi-year water quality statistics from the Rijkswaterstaat DDL", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "EITOETS_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion batch
    Run {
        /// Clear stored records first
        #[arg(long)]
        reset: bool,

        /// Override run.max_records (0 = unlimited)
        #[arg(long)]
        limit: Option<usize>,

        /// Keep records in memory and print them instead of storing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Count combinations to compute without fetching observations
    Plan,

    /// Repeat ingestion batches, refreshing the norm table in the background
    Daemon,

    /// Print the norms of a substance
    Norms {
        /// Aquo parameter code
        #[arg(long)]
        par_code: String,
    },

    /// Print stored locations as a GeoJSON FeatureCollection
    Locations {
        #[arg(long)]
        par_code: Option<String>,
        #[arg(long)]
        loc_id: Option<String>,
    },

    /// Print the substances with stored records
    Substances,

    /// Print stored records for a substance and/or location
    Records {
        #[arg(long)]
        par_code: Option<String>,
        #[arg(long)]
        loc_id: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load_or_default(&cli.config)?;
    logging::init_logger(&settings.logging)?;

    match cli.command {
        Commands::Run { reset, limit, dry_run } => {
            settings.run.reset |= reset;
            if let Some(n) = limit {
                settings.run.max_records = n;
            }
            let summary = if dry_run {
                let mut store = MemoryRecordStore::new();
                let summary = run_once(&settings, &mut store)?;
                let records = store.find(&RecordFilter::default())?;
                println!("{}", serde_json::to_string_pretty(&records)?);
                summary
            } else {
                let mut store = PgRecordStore::connect()?;
                run_once(&settings, &mut store)?
            };
            print_summary(&summary);
        }
        Commands::Plan => {
            let client = ddl::build_client(Duration::from_secs(settings.ddl.timeout_secs))?;
            let catalog = ddl::fetch_catalog(&client, &settings.ddl.catalog_url)?;
            let mut store = PgRecordStore::connect()?;
            let existing = store.existing_keys()?;
            let plan = orchestrator::plan(&catalog, &existing, &settings.run.quantity);
            println!("Total catalog entries: {}", plan.total);
            println!("Total concentration records: {}", plan.concentration);
            println!("Records already computed: {}", plan.already_done);
            println!("Records still to compute: {}", plan.to_compute);
        }
        Commands::Daemon => run_daemon(settings)?,
        Commands::Norms { par_code } => {
            let table = load_norms(&settings)?;
            let Some(found) = query::norms_for_substance(&table, &par_code) else {
                bail!("unknown aquo code '{}'", par_code);
            };
            println!("{}", serde_json::to_string_pretty(&found)?);
        }
        Commands::Locations { par_code, loc_id } => {
            let mut store = PgRecordStore::connect()?;
            let filter = RecordFilter {
                substance: par_code,
                location: loc_id,
            };
            let fc = query::unique_locations(&mut store, &filter)?;
            println!("{}", serde_json::to_string_pretty(&fc)?);
        }
        Commands::Substances => {
            let mut store = PgRecordStore::connect()?;
            let listing = query::unique_substances(&mut store)?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        Commands::Records { par_code, loc_id } => {
            let mut store = PgRecordStore::connect()?;
            let filter = RecordFilter {
                substance: par_code,
                location: loc_id,
            };
            let records = query::records(&mut store, &filter)?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(())
}

fn load_norms(settings: &Settings) -> anyhow::Result<NormTable> {
    let client = ddl::build_client(Duration::from_secs(settings.rivm.timeout_secs))?;
    let table = rivm::fetch_norm_database(&client, &settings.rivm.norms_url)
        .context("loading the RIVM norm database")?;
    logging::info(
        DataSource::Rivm,
        None,
        &format!("Norm database loaded: {} substances", table.substance_count()),
    );
    Ok(table)
}

fn observation_source(settings: &Settings) -> anyhow::Result<(reqwest::blocking::Client, DdlClient)> {
    let client = ddl::build_client(Duration::from_secs(settings.ddl.timeout_secs))?;
    let mut source = DdlClient::new(client.clone(), &settings.ddl.observations_url);
    if let Some(dir) = &settings.output.archive_dir {
        source = source.with_archive(dir);
    }
    Ok((client, source))
}

fn load_catalog(client: &reqwest::blocking::Client, settings: &Settings) -> anyhow::Result<Catalog> {
    let catalog = ddl::fetch_catalog(client, &settings.ddl.catalog_url).context("loading the DDL catalog")?;
    logging::info(
        DataSource::Ddl,
        None,
        &format!("Catalog loaded: {} combinations", catalog.entries.len()),
    );
    Ok(catalog)
}

fn run_once(settings: &Settings, store: &mut dyn RecordStore) -> anyhow::Result<RunSummary> {
    if settings.run.reset {
        let removed = store.clear()?;
        logging::warn(DataSource::Database, None, &format!("Reset: {} records removed", removed));
    }
    let norms = load_norms(settings)?;
    let (client, source) = observation_source(settings)?;
    let catalog = load_catalog(&client, settings)?;
    let summary = orchestrator::run_batch(&catalog, &norms, &source, store, &RunOptions::from_settings(settings))?;
    Ok(summary)
}

fn run_daemon(settings: Settings) -> anyhow::Result<()> {
    let mut store = PgRecordStore::connect()?;
    if settings.run.reset {
        let removed = store.clear()?;
        logging::warn(DataSource::Database, None, &format!("Reset: {} records removed", removed));
    }

    let norms = Arc::new(NormCatalog::new(load_norms(&settings)?));
    let rivm_client = ddl::build_client(Duration::from_secs(settings.rivm.timeout_secs))?;
    let norms_url = settings.rivm.norms_url.clone();
    let _refresher = Arc::clone(&norms).spawn_refresher(
        Duration::from_secs(settings.rivm.refresh_minutes * 60),
        move || rivm::fetch_norm_database(&rivm_client, &norms_url),
    );

    let (client, source) = observation_source(&settings)?;
    let options = RunOptions::from_settings(&settings);
    let interval = Duration::from_secs(settings.run.interval_minutes * 60);

    loop {
        match ddl::fetch_catalog(&client, &settings.ddl.catalog_url) {
            Ok(catalog) => {
                let table = norms.snapshot();
                match orchestrator::run_batch(&catalog, &table, &source, &mut store, &options) {
                    Ok(summary) => print_summary(&summary),
                    Err(e) => logging::error(DataSource::Database, None, &format!("Batch aborted: {}", e)),
                }
            }
            Err(e) => logging::log_upstream_failure(DataSource::Ddl, None, "catalog load", &e),
        }
        thread::sleep(interval);
    }
}

fn print_summary(s: &RunSummary) {
    println!("Combinations seen: {}", s.seen);
    println!("Fetched: {}  written: {}  failed: {}", s.fetched, s.written, s.failed);
    println!(
        "Skipped: {} already stored, {} other quantity, {} unclassified, {} not a grab sample",
        s.skipped_duplicate, s.skipped_quantity, s.skipped_unclassified, s.skipped_not_grab_sample
    );
    if s.malformed_readings > 0 {
        println!("Malformed readings: {}", s.malformed_readings);
    }
    if s.limit_reached {
        println!("Stopped at the record limit");
    }
}

//! InmoSuite - back-office tooling for a real-estate agency
//!
//! - `stats`: monthly inquiry and property-view statistics from the CRM
//! - `export-contacts`: deduplicated buyer/seller/professional contacts
//! - `import-contacts`: load a contact export into the agency database
//! - `locations`: location import sheet with Wikimedia Commons thumbnails
//! - `serve`: the dashboard API over the snapshot and the property feeds

mod config;
mod contacts;
mod crm;
mod db;
mod geoip;
mod locations;
mod stats;
mod web;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::crm::CrmClient;
use crate::geoip::GeoIp;

#[derive(Parser)]
#[command(name = "inmosuite", version, about = "Real-estate back-office tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Regenerate the inquiry statistics snapshot
    Stats,
    /// Export CRM contacts with their log notes to a timestamped JSON file
    ExportContacts,
    /// Replace the configured client's contacts with an export file
    ImportContacts {
        /// JSON file written by export-contacts
        file: PathBuf,
    },
    /// Build the location import sheet with Wikimedia Commons thumbnails
    Locations,
    /// Serve the dashboard API
    Serve,
}

fn init_logging(level: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Use LOG_FORMAT=gcp for structured GCP Cloud Logging
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn connect_crm(config: &Config) -> Result<CrmClient> {
    let crm_config = config.crm()?;
    let crm = CrmClient::connect(crm_config)
        .await
        .with_context(|| format!("Failed to log in to the CRM at {}", crm_config.url))?;
    info!(uid = crm.uid(), url = %crm_config.url, "Authenticated against the CRM");
    Ok(crm)
}

async fn run_stats(config: &Config) -> Result<()> {
    let geoip = if config.geoip.required {
        GeoIp::open(&config.geoip.database)
            .with_context(|| format!("Failed to open GeoIP database {}", config.geoip.database))?
    } else {
        GeoIp::new(&config.geoip.database)
    };
    if !geoip.is_available() {
        warn!("GeoIP disabled; every visitor resolves to no country");
    }

    let crm = connect_crm(config).await?;
    stats::run(config, &crm, &geoip).await
}

async fn run_export(config: &Config) -> Result<()> {
    let page_size = config.crm()?.page_size;
    let crm = connect_crm(config).await?;
    let path = contacts::export_contacts(
        &crm,
        page_size,
        Path::new(&config.export.output_dir),
        chrono::Local::now(),
    )
    .await?;
    println!("{}", path.display());
    Ok(())
}

async fn run_import(config: &Config, file: &Path) -> Result<()> {
    let client_id = config
        .import
        .client_id
        .context("import.client_id is required to import contacts")?;
    let db_config = config
        .database
        .as_ref()
        .context("Missing [database] section (or INMOSUITE_DATABASE__* variables)")?;
    let db = db::Database::new(db_config)
        .await
        .context("Failed to connect to the agency database")?;

    let summary = db::contacts::import_contacts(&db, file, client_id, &config.import.authors).await?;
    println!("{} contacts, {} notes imported", summary.contacts, summary.notes);
    Ok(())
}

async fn run_locations(config: &Config) -> Result<()> {
    let wikimedia = locations::Wikimedia::new(&config.locations)?;
    let rows = locations::build_sheet(&config.locations, &wikimedia).await?;
    info!(rows, output = %config.locations.output, "Location sheet written");
    println!("{}", config.locations.output);
    Ok(())
}

async fn run_server(config: &Config) -> Result<()> {
    let db = match &config.database {
        Some(db_config) => {
            let db = db::Database::new(db_config)
                .await
                .context("Failed to connect to the property database")?;
            info!("Property database connected");
            Some(db)
        }
        None => {
            info!("No property database configured; /api/properties is disabled");
            None
        }
    };

    web::start_server(config, db).await
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load()?;
    init_logging(&config.logging.level);
    info!("Configuration loaded");

    match cli.command {
        Command::Stats => run_stats(&config).await,
        Command::ExportContacts => run_export(&config).await,
        Command::ImportContacts { file } => run_import(&config, &file).await,
        Command::Locations => run_locations(&config).await,
        Command::Serve => run_server(&config).await,
    }
}

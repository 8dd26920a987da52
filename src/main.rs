//! Catalog Sync - Warehouse Product Database
//!
//! Syncs the warehouse product catalog to file exports, SQLite and a
//! spreadsheet. Runs once or continuously on an interval schedule.

use catalog_sync::database::init_schema;
use catalog_sync::{SyncConfig, SyncPipeline};
use clap::Parser;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::interval;

/// Warehouse catalog sync - pulls product data and pushes it everywhere the business reads it
#[derive(Parser, Debug)]
#[command(name = "catalog_sync")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the SQLite database file
    #[arg(short, long, default_value_t = default_db_path())]
    database: String,

    /// Directory for raw page snapshots and file exports
    #[arg(long, default_value_t = default_data_dir())]
    data_dir: String,

    /// Base URL of the warehouse API
    #[arg(long, env = "WAREHOUSE_API_URL")]
    base_url: String,

    /// Warehouse API login
    #[arg(long, env = "WAREHOUSE_LOGIN")]
    login: String,

    /// Warehouse API password
    #[arg(long, env = "WAREHOUSE_PASSWORD", hide_env_values = true)]
    password: String,

    /// Spreadsheet ID to upload to (omit to skip the sheet upload)
    #[arg(long, env = "SPREADSHEET_ID", default_value = "")]
    spreadsheet_id: String,

    /// Bearer token for the spreadsheet API
    #[arg(long, env = "SHEETS_TOKEN", default_value = "", hide_env_values = true)]
    sheets_token: String,

    /// Sheet (tab) name within the spreadsheet
    #[arg(long, default_value = "Products")]
    sheet_name: String,

    /// Records requested per page
    #[arg(long, default_value_t = 1000)]
    page_size: usize,

    /// Hard cap on records per source, 0 for unbounded
    #[arg(long, default_value_t = 0)]
    record_cap: usize,

    /// Seconds to pause between page requests
    #[arg(long, default_value_t = 2)]
    page_delay_secs: u64,

    /// Memory utilization percentage that triggers page-size throttling
    #[arg(long, default_value_t = 90.0)]
    memory_threshold: f32,

    /// Rows per spreadsheet upload batch
    #[arg(long, default_value_t = 1000)]
    batch_size: usize,

    /// Run once and exit (default: run continuously with interval schedule)
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Sync interval in hours when running continuously
    #[arg(long, default_value_t = 12)]
    interval_hours: u64,

    /// Enable status API on specified port (default: disabled)
    #[arg(long)]
    web_port: Option<u16>,
}

/// Returns the default database path: ~/.local/share/catalog_sync/catalog.db
fn default_db_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("catalog_sync")
        .join("catalog.db")
        .to_string_lossy()
        .to_string()
}

/// Returns the default data directory: ~/.local/share/catalog_sync/data
fn default_data_dir() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("catalog_sync")
        .join("data")
        .to_string_lossy()
        .to_string()
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let db_path = PathBuf::from(&args.database);

    let config = SyncConfig {
        base_url: args.base_url,
        login: args.login,
        password: args.password,
        page_size: args.page_size,
        record_cap: args.record_cap,
        page_delay: Duration::from_secs(args.page_delay_secs),
        memory_threshold: args.memory_threshold,
        batch_size: args.batch_size,
        data_dir: PathBuf::from(&args.data_dir),
        sheets_token: args.sheets_token,
        spreadsheet_id: args.spreadsheet_id,
        sheet_name: args.sheet_name,
        ..SyncConfig::default()
    };
    if let Err(e) = config.validate() {
        log::error!("{}", e);
        std::process::exit(1);
    }

    log::info!("Starting catalog_sync...");
    log::info!("Database path: {}", db_path.display());
    log::info!("Data directory: {}", config.data_dir.display());

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.exists() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create database directory: {}", e);
                std::process::exit(1);
            }
            log::info!("Created directory: {}", parent.display());
        }
    }

    // Open database connection
    let conn = match Connection::open(&db_path) {
        Ok(conn) => {
            log::info!("Opened database: {}", db_path.display());
            conn
        }
        Err(e) => {
            log::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize database schema
    if let Err(e) = init_schema(&conn) {
        log::error!("Failed to initialize database schema: {}", e);
        std::process::exit(1);
    }

    let db = Arc::new(Mutex::new(conn));
    let pipeline = Arc::new(SyncPipeline::new(config));

    // Spawn status API if --web-port specified
    if let Some(port) = args.web_port {
        let web_db = Arc::clone(&db);
        let web_db_path = db_path.clone();
        let web_pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            if let Err(e) = catalog_sync::web::serve(web_db, web_db_path, web_pipeline, port).await
            {
                log::error!("Web server error: {}", e);
            }
        });
    }

    if args.once {
        // Run once and exit
        run_sync(&pipeline, &db_path).await;
    } else {
        // Run continuously with interval schedule
        log::info!(
            "Running in daemon mode, syncing every {} hour(s)",
            args.interval_hours
        );
        run_daemon(&pipeline, &db_path, args.interval_hours).await;
    }
}

/// Run the sync daemon - syncs immediately, then on every interval tick
async fn run_daemon(pipeline: &SyncPipeline, db_path: &Path, interval_hours: u64) {
    let mut ticker = interval(Duration::from_secs(interval_hours * 3600));

    // The first tick fires immediately
    loop {
        ticker.tick().await;
        log::info!("Scheduled sync triggered");
        run_sync(pipeline, db_path).await;
    }
}

/// Run a single sync operation on a dedicated connection, leaving the
/// shared one free for the status API
async fn run_sync(pipeline: &SyncPipeline, db_path: &Path) {
    let mut conn = match Connection::open(db_path) {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("Failed to open database for sync: {}", e);
            return;
        }
    };

    match pipeline.run(&mut conn).await {
        Ok(report) => {
            if report.partial {
                log::warn!(
                    "Sync completed partially: {} products, {} uploaded, truncations: {}",
                    report.total_products,
                    report.rows_uploaded,
                    report.truncations.join("; ")
                );
            } else {
                log::info!(
                    "Sync completed successfully: {} products, {} uploaded",
                    report.total_products,
                    report.rows_uploaded
                );
            }
        }
        Err(e) => {
            log::error!("Sync failed: {}", e);
        }
    }
}

//! The sync pipeline
//!
//! One run drains the three warehouse sources, reconciles them into a
//! single product set, and lands that set everywhere the business reads
//! it: JSON and XML exports on disk, the SQLite database, and the
//! spreadsheet. A run is exclusive per process; a second trigger while one
//! is in flight is rejected rather than queued.

use crate::config::SyncConfig;
use crate::database::{self, SyncRunRow};
use crate::error::{Result, SyncError};
use crate::export;
use crate::reconcile::{reconcile, ReconcileStats};
use crate::sheets::BulkSink;
use crate::warehouse::{PaginatedRetriever, Retrieval, TokenAuthority, Truncation};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The three sources drained on every run, in overlay order
const SOURCES: [(&str, &str); 3] = [
    ("entity/assortment", "assortment.jsonl"),
    ("report/stock/all", "stock_all.jsonl"),
    ("report/stock/bystore", "stock_bystore.jsonl"),
];

/// What one pipeline run produced
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub started_at: String,
    pub finished_at: String,
    pub total_products: usize,
    pub stats: ReconcileStats,
    /// Sources that stopped before their natural end, with the reason
    pub truncations: Vec<String>,
    pub rows_uploaded: usize,
    /// True when any source was truncated or the upload was cancelled
    pub partial: bool,
}

/// Orchestrates one full sync: retrieve, reconcile, export, persist, upload
pub struct SyncPipeline {
    config: SyncConfig,
    client: reqwest::Client,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

/// Clears the running flag when a run ends, however it ends
struct RunToken(Arc<AtomicBool>);

impl Drop for RunToken {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag observed at page and batch boundaries; setting it stops the
    /// current run at the next boundary
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the pipeline once. Fails fast on invalid configuration or a
    /// rejected credential; partial retrievals still flow through to the
    /// outputs and are flagged in the report.
    pub async fn run(&self, conn: &mut Connection) -> Result<SyncReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }
        let _token = RunToken(Arc::clone(&self.running));
        self.cancel.store(false, Ordering::SeqCst);

        let started_at = database::now_kiev();
        self.config.validate()?;

        let mut auth = TokenAuthority::new(
            self.client.clone(),
            &self.config.base_url,
            &self.config.login,
            &self.config.password,
        );
        auth.test_auth().await?;

        let retriever =
            PaginatedRetriever::new(&self.config, self.client.clone(), Arc::clone(&self.cancel));

        let mut retrievals: Vec<Retrieval> = Vec::with_capacity(SOURCES.len());
        for (entity, snapshot) in SOURCES {
            let path = self.config.data_dir.join(snapshot);
            retrievals.push(retriever.fetch_all(&mut auth, entity, &path).await?);
        }

        let truncations: Vec<String> = retrievals
            .iter()
            .filter_map(|r| {
                r.truncation
                    .map(|reason| format!("{}: {}", r.entity, reason))
            })
            .collect();
        let fetched: usize = retrievals.iter().map(|r| r.records.len()).sum();

        let reconciled = reconcile(
            &retrievals[0].records,
            &retrievals[1].records,
            &retrievals[2].records,
        );
        let products = reconciled.products;
        log::info!(
            "Reconciled {} products from {} raw records",
            products.len(),
            fetched
        );

        // A truncated run that reconciled to nothing must not wipe the
        // downstream outputs with an empty set
        if products.is_empty() && !truncations.is_empty() {
            if retrievals
                .iter()
                .any(|r| r.truncation == Some(Truncation::MemoryAbort))
            {
                return Err(SyncError::MemoryAbort { fetched });
            }
            // Cancelled before anything usable arrived: not an error, but
            // nothing to land either
            log::warn!("Sync cancelled with no usable data, outputs left untouched");
            let report = SyncReport {
                started_at,
                finished_at: database::now_kiev(),
                total_products: 0,
                stats: reconciled.stats,
                partial: true,
                truncations,
                rows_uploaded: 0,
            };
            database::record_sync_run(conn, &run_row(&report))?;
            return Ok(report);
        }

        export::save_json(&products, &self.config.data_dir.join("products.json"))?;
        export::save_xml(&products, &self.config.data_dir.join("products.xml"))?;
        database::upsert_products(conn, &products)?;

        let mut rows_uploaded = 0;
        let mut upload_cancelled = false;
        if self.config.spreadsheet_id.is_empty() {
            log::info!("No spreadsheet configured, skipping sheet upload");
        } else {
            let sink =
                BulkSink::new(&self.config, self.client.clone(), Arc::clone(&self.cancel));
            let summary = sink.upload(&products).await?;
            rows_uploaded = summary.rows_uploaded;
            upload_cancelled = summary.cancelled;
        }

        let report = SyncReport {
            started_at,
            finished_at: database::now_kiev(),
            total_products: products.len(),
            stats: reconciled.stats,
            partial: !truncations.is_empty() || upload_cancelled,
            truncations,
            rows_uploaded,
        };

        database::record_sync_run(conn, &run_row(&report))?;

        if report.partial {
            log::warn!(
                "Sync finished partially: {} products, truncations: {:?}",
                report.total_products,
                report.truncations
            );
        } else {
            log::info!("Sync finished: {} products", report.total_products);
        }
        Ok(report)
    }
}

/// Bookkeeping row for a finished run
fn run_row(report: &SyncReport) -> SyncRunRow {
    SyncRunRow {
        started_at: report.started_at.clone(),
        finished_at: report.finished_at.clone(),
        total_products: report.total_products,
        stats: report.stats,
        partial: report.partial,
        reason: if report.truncations.is_empty() {
            None
        } else {
            Some(report.truncations.join("; "))
        },
    }
}

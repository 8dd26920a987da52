//! Catalog Sync - Warehouse Product Database
//!
//! Pulls the product catalog, stock report and per-store balances from the
//! warehouse API, reconciles them into one product set, and lands that set
//! in file exports, SQLite and a spreadsheet.

pub mod config;
pub mod database;
pub mod error;
pub mod export;
pub mod memory;
pub mod pipeline;
pub mod reconcile;
pub mod retry;
pub mod sheets;
pub mod warehouse;
pub mod web;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use pipeline::{SyncPipeline, SyncReport};
pub use reconcile::{reconcile, Reconciled, ReconciledProduct};

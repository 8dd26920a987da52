//! Pipeline configuration
//!
//! All tunables are supplied externally (CLI flags or environment) and
//! validated once at pipeline start, before any network call is made.

use crate::error::{Result, SyncError};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for one sync pipeline run
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the warehouse API (e.g. "https://api.warehouse.example/api/remap/1.2")
    pub base_url: String,
    /// Login for the basic-auth token exchange
    pub login: String,
    /// Password for the basic-auth token exchange
    pub password: String,
    /// Records requested per page
    pub page_size: usize,
    /// Hard cap on total records per source (0 = unbounded)
    pub record_cap: usize,
    /// Pause between successive page requests
    pub page_delay: Duration,
    /// Memory utilization percentage above which throttling kicks in
    pub memory_threshold: f32,
    /// Rows per sink upload batch
    pub batch_size: usize,
    /// Attempts per page against transient fetch errors
    pub fetch_attempts: u32,
    /// Pause between fetch attempts
    pub fetch_retry_delay: Duration,
    /// Consecutive 401-triggered token refreshes tolerated per page
    pub refresh_attempts: u32,
    /// Attempts per batch against transient sink errors
    pub upload_attempts: u32,
    /// Directory for raw page snapshots and export artifacts
    pub data_dir: PathBuf,
    /// Base URL of the spreadsheet API
    pub sheets_base_url: String,
    /// Bearer token for the spreadsheet API
    pub sheets_token: String,
    /// Target spreadsheet ID
    pub spreadsheet_id: String,
    /// Target sheet (tab) name within the spreadsheet
    pub sheet_name: String,
}

impl SyncConfig {
    /// Validate all tunables, failing fast before any network call
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::Config("base URL must not be empty".into()));
        }
        if self.login.trim().is_empty() || self.password.is_empty() {
            return Err(SyncError::Config(
                "warehouse API credentials must not be empty".into(),
            ));
        }
        if self.page_size == 0 {
            return Err(SyncError::Config("page size must be positive".into()));
        }
        if !(0.0..=100.0).contains(&self.memory_threshold) {
            return Err(SyncError::Config(format!(
                "memory threshold must be within 0-100, got {}",
                self.memory_threshold
            )));
        }
        if self.batch_size == 0 {
            return Err(SyncError::Config("sink batch size must be positive".into()));
        }
        if self.fetch_attempts == 0 || self.upload_attempts == 0 {
            return Err(SyncError::Config("retry attempts must be positive".into()));
        }
        if self.refresh_attempts == 0 {
            return Err(SyncError::Config(
                "token refresh attempts must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            login: String::new(),
            password: String::new(),
            page_size: 1000,
            record_cap: 0,
            page_delay: Duration::from_secs(2),
            memory_threshold: 90.0,
            batch_size: 1000,
            fetch_attempts: 3,
            fetch_retry_delay: Duration::from_secs(5),
            refresh_attempts: 3,
            upload_attempts: 5,
            data_dir: PathBuf::from("data"),
            sheets_base_url: "https://sheets.googleapis.com/v4".to_string(),
            sheets_token: String::new(),
            spreadsheet_id: String::new(),
            sheet_name: "Products".to_string(),
        }
    }
}

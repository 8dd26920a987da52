//! Paginated retrieval from the warehouse API
//!
//! Drains a paged endpoint into a complete ordered record set while
//! persisting every raw page to an append-only snapshot file. Three control
//! knobs apply: page size (adapted downward under memory pressure), pacing
//! delay between pages, and an optional hard cap on total records.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::memory::{self, ThrottleDecision};
use crate::retry::RetryPolicy;
use crate::warehouse::auth::TokenAuthority;
use crate::warehouse::record::RawRecord;
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One page as returned by the warehouse API
#[derive(Debug, Deserialize)]
pub struct PageResponse {
    #[serde(default)]
    pub rows: Vec<RawRecord>,
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

/// Pagination metadata attached to a page
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub next_href: Option<String>,
    pub size: Option<u64>,
}

/// Why a retrieval stopped before the natural end of data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// Page-size floor reached under sustained memory pressure
    MemoryAbort,
    /// Cancellation flag observed at a page boundary
    Cancelled,
}

impl fmt::Display for Truncation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Truncation::MemoryAbort => write!(f, "aborted under memory pressure"),
            Truncation::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of draining one source: the ordered records, plus the reason the
/// drain stopped early if it did
#[derive(Debug)]
pub struct Retrieval {
    pub entity: String,
    pub records: Vec<RawRecord>,
    pub truncation: Option<Truncation>,
}

impl Retrieval {
    pub fn is_complete(&self) -> bool {
        self.truncation.is_none()
    }
}

/// Appends raw pages to a JSON-lines snapshot file, one page per line.
/// The file is truncated when a new retrieval starts; a retrieval
/// interrupted mid-way keeps every page fetched before the interruption.
pub struct SnapshotWriter {
    file: File,
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            file: File::create(path)?,
            path: path.to_path_buf(),
        })
    }

    pub fn append_page(&mut self, rows: &[RawRecord]) -> Result<()> {
        let line = serde_json::to_string(rows)?;
        writeln!(self.file, "{}", line)?;
        log::debug!(
            "Appended page of {} rows to {}",
            rows.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Read a snapshot file back into its pages (replay)
pub fn read_snapshot(path: &Path) -> Result<Vec<Vec<RawRecord>>> {
    let reader = BufReader::new(File::open(path)?);
    let mut pages = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        pages.push(serde_json::from_str(&line)?);
    }
    Ok(pages)
}

/// Fetches a complete ordered collection from a paged endpoint
pub struct PaginatedRetriever {
    client: reqwest::Client,
    base_url: String,
    page_size: usize,
    record_cap: usize,
    page_delay: Duration,
    memory_threshold: f32,
    retry: RetryPolicy,
    refresh_attempts: u32,
    cancel: Arc<AtomicBool>,
    memory_probe: fn() -> f32,
    snapshot_len_probe: fn(&Path) -> u64,
}

impl PaginatedRetriever {
    pub fn new(config: &SyncConfig, client: reqwest::Client, cancel: Arc<AtomicBool>) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            record_cap: config.record_cap,
            page_delay: config.page_delay,
            memory_threshold: config.memory_threshold,
            retry: RetryPolicy::fixed(config.fetch_attempts, config.fetch_retry_delay),
            refresh_attempts: config.refresh_attempts,
            cancel,
            memory_probe: memory::utilization_percent,
            snapshot_len_probe: memory::snapshot_len,
        }
    }

    /// Replace the memory and snapshot-size probes (for tests)
    pub(crate) fn with_probes(
        mut self,
        memory_probe: fn() -> f32,
        snapshot_len_probe: fn(&Path) -> u64,
    ) -> Self {
        self.memory_probe = memory_probe;
        self.snapshot_len_probe = snapshot_len_probe;
        self
    }

    /// Drain `entity` completely, persisting every raw page to
    /// `snapshot_path` before the next page is requested
    pub async fn fetch_all(
        &self,
        auth: &mut TokenAuthority,
        entity: &str,
        snapshot_path: &Path,
    ) -> Result<Retrieval> {
        log::info!("Starting retrieval of {}", entity);
        let mut snapshot = SnapshotWriter::create(snapshot_path)?;
        let mut records: Vec<RawRecord> = Vec::new();
        let mut page_size = self.page_size;
        let mut truncation = None;
        let mut last_sample_len = (self.snapshot_len_probe)(snapshot_path);
        let mut offset = 0usize;
        let mut first_page = true;

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                log::warn!("Retrieval of {} cancelled at offset {}", entity, offset);
                truncation = Some(Truncation::Cancelled);
                break;
            }

            // Pacing between successive page requests, regardless of outcome
            if !first_page {
                tokio::time::sleep(self.page_delay).await;
            }
            first_page = false;

            let mut limit = page_size;
            if self.record_cap > 0 {
                limit = limit.min(self.record_cap - records.len());
            }

            let rows = self.fetch_page(auth, entity, offset, limit).await?;
            let count = rows.len();
            snapshot.append_page(&rows)?;
            records.extend(rows);
            offset += count;
            log::info!("Fetched and saved {} {} records in total", records.len(), entity);

            if count < limit {
                break; // natural end of data
            }
            if self.record_cap > 0 && records.len() >= self.record_cap {
                log::info!("Record cap of {} reached for {}", self.record_cap, entity);
                break;
            }

            let current_len = (self.snapshot_len_probe)(snapshot_path);
            let grew = current_len > last_sample_len;
            last_sample_len = current_len;
            match memory::throttle_decision(
                (self.memory_probe)(),
                self.memory_threshold,
                grew,
                page_size,
            ) {
                ThrottleDecision::Continue => {}
                ThrottleDecision::Reduce(next) => page_size = next,
                ThrottleDecision::Abort => {
                    log::error!(
                        "Page size floor reached under memory pressure, aborting {} retrieval with {} records",
                        entity,
                        records.len()
                    );
                    truncation = Some(Truncation::MemoryAbort);
                    break;
                }
            }
        }

        Ok(Retrieval {
            entity: entity.to_string(),
            records,
            truncation,
        })
    }

    /// Fetch one page, retrying the same offset on 401 (bounded token
    /// refreshes) and on transient errors (bounded attempts with a fixed
    /// pacing delay)
    async fn fetch_page(
        &self,
        auth: &mut TokenAuthority,
        entity: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawRecord>> {
        let mut attempt: u32 = 0;
        let mut refreshes: u32 = 0;

        loop {
            let header = auth.auth_header().await?;
            let url = format!(
                "{}/{}?offset={}&limit={}",
                self.base_url, entity, offset, limit
            );
            log::debug!("Requesting page: {}", url);

            match self.client.get(&url).header("Authorization", header).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED {
                        refreshes += 1;
                        if refreshes > self.refresh_attempts {
                            log::error!(
                                "Still unauthorized after {} token refreshes",
                                self.refresh_attempts
                            );
                            return Err(SyncError::AuthExhausted);
                        }
                        log::warn!("Got 401 fetching {}, refreshing token", entity);
                        auth.refresh().await?;
                        continue;
                    }
                    if status.is_success() {
                        let page: PageResponse = response.json().await?;
                        log::debug!("Fetched {} rows in this page", page.rows.len());
                        return Ok(page.rows);
                    }
                    if !status.is_server_error() {
                        log::error!("Unexpected status {} fetching {}", status, entity);
                        return Err(SyncError::HttpStatus(status));
                    }
                    log::warn!(
                        "Server error {} fetching {} at offset {}",
                        status,
                        entity,
                        offset
                    );
                }
                Err(e) => {
                    log::warn!("Request error fetching {} at offset {}: {}", entity, offset, e);
                }
            }

            match self.retry.delay_for(attempt) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(SyncError::RetrievalFailed {
                        entity: entity.to_string(),
                        offset,
                    })
                }
            }
            attempt += 1;
        }
    }
}

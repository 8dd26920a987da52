//! Error types for catalog_sync

use std::fmt;

/// Unified error type for catalog_sync operations
#[derive(Debug)]
pub enum SyncError {
    /// HTTP request failed (network error, timeout, etc.)
    Network(reqwest::Error),
    /// Failed to parse JSON response
    Parse(serde_json::Error),
    /// HTTP error status code
    HttpStatus(reqwest::StatusCode),
    /// File I/O error
    Io(std::io::Error),
    /// Database operation failed
    Database(rusqlite::Error),
    /// The warehouse API rejected the basic credential
    Auth(String),
    /// Token refresh loop did not recover authorization
    AuthExhausted,
    /// Page fetch exhausted its retries; offset is the last one reached
    RetrievalFailed { entity: String, offset: usize },
    /// Adaptive throttling hit its page-size floor under sustained pressure
    MemoryAbort { fetched: usize },
    /// Non-retryable response from the spreadsheet sink
    UploadFailed(String),
    /// All upload attempts against a transient sink error were consumed
    RetriesExhausted(String),
    /// Sink row count after upload diverged from what was submitted
    VerificationMismatch { expected: usize, actual: usize },
    /// Invalid tunable detected at pipeline start
    Config(String),
    /// A sync run was requested while another one is still in progress
    AlreadyRunning,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Network(e) => write!(f, "Network error: {}", e),
            SyncError::Parse(e) => write!(f, "Parse error: {}", e),
            SyncError::HttpStatus(status) => write!(f, "HTTP error: {}", status),
            SyncError::Io(e) => write!(f, "I/O error: {}", e),
            SyncError::Database(e) => write!(f, "Database error: {}", e),
            SyncError::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            SyncError::AuthExhausted => write!(
                f,
                "Token refresh attempts exhausted without recovering authorization"
            ),
            SyncError::RetrievalFailed { entity, offset } => write!(
                f,
                "Retrieval of {} failed after retries at offset {}",
                entity, offset
            ),
            SyncError::MemoryAbort { fetched } => write!(
                f,
                "Retrieval aborted at page-size floor under memory pressure ({} records kept)",
                fetched
            ),
            SyncError::UploadFailed(msg) => write!(f, "Sink upload failed: {}", msg),
            SyncError::RetriesExhausted(msg) => {
                write!(f, "Sink upload retries exhausted: {}", msg)
            }
            SyncError::VerificationMismatch { expected, actual } => write!(
                f,
                "Sink verification mismatch: submitted {} rows, destination has {}",
                expected, actual
            ),
            SyncError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SyncError::AlreadyRunning => write!(f, "A sync run is already in progress"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Network(e) => Some(e),
            SyncError::Parse(e) => Some(e),
            SyncError::Io(e) => Some(e),
            SyncError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err)
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Database(err)
    }
}

/// Result alias for catalog_sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

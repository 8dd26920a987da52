//! Spreadsheet sink for the reconciled product set
//!
//! Uploads replace the sheet's prior contents entirely: clear first, then
//! sequential batched appends, then a row-count read-back so a partial
//! upload can never be reported as success. The sheet API is rate limited,
//! so batches go up one at a time with exponential backoff on 429/5xx.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::reconcile::ReconciledProduct;
use crate::retry::RetryPolicy;
use chrono::Utc;
use chrono_tz::Europe::Kiev;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Column order of the uploaded table. This is a declared contract with the
/// sheet's consumers, not incidental.
pub const COLUMN_ORDER: [&str; 10] = [
    "ID",
    "Code",
    "Article",
    "Path Name",
    "Name",
    "Description",
    "Sale Price",
    "Stores",
    "Stock",
    "Updated",
];

/// Serialize one product into the declared column order
pub fn to_row(product: &ReconciledProduct) -> Vec<String> {
    vec![
        product.id.clone(),
        product.code.clone(),
        product.article.clone(),
        product.path_name.clone(),
        product.name.clone(),
        product.description.clone(),
        product.sale_price.to_string(),
        product.stores.clone(),
        product.stock.to_string(),
        product.updated.clone(),
    ]
}

/// Values read back from the sheet
#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Thin client over the spreadsheet REST surface: the five verbs the sink
/// needs and nothing else
pub struct SheetsClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    spreadsheet_id: String,
}

impl SheetsClient {
    pub fn new(config: &SyncConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.sheets_base_url.trim_end_matches('/').to_string(),
            token: config.sheets_token.clone(),
            spreadsheet_id: config.spreadsheet_id.clone(),
        }
    }

    fn values_url(&self, range: &str, verb: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}{}",
            self.base_url,
            self.spreadsheet_id,
            urlencoding::encode(range),
            verb
        )
    }

    async fn check(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SyncError::HttpStatus(status))
        }
    }

    /// Clear every value in `range`
    pub async fn clear(&self, range: &str) -> Result<()> {
        let response = self
            .client
            .post(self.values_url(range, ":clear"))
            .bearer_auth(&self.token)
            .json(&json!({}))
            .send()
            .await?;
        Self::check(response).await
    }

    /// Read the values currently present in `range`
    pub async fn get(&self, range: &str) -> Result<Vec<Vec<serde_json::Value>>> {
        let response = self
            .client
            .get(self.values_url(range, ""))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus(status));
        }
        let body: ValueRange = response.json().await?;
        Ok(body.values)
    }

    /// Append rows after the last data row of `range`
    pub async fn append(&self, range: &str, rows: &[Vec<String>]) -> Result<()> {
        let response = self
            .client
            .post(self.values_url(range, ":append"))
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(&self.token)
            .json(&json!({ "values": rows }))
            .send()
            .await?;
        Self::check(response).await
    }

    /// Overwrite `range` with rows
    pub async fn update(&self, range: &str, rows: &[Vec<String>]) -> Result<()> {
        let response = self
            .client
            .put(self.values_url(range, ""))
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(&self.token)
            .json(&json!({ "values": rows }))
            .send()
            .await?;
        Self::check(response).await
    }

    /// Spreadsheet-level batch update (formatting requests)
    pub async fn batch_update(&self, requests: serde_json::Value) -> Result<()> {
        let url = format!(
            "{}/spreadsheets/{}:batchUpdate",
            self.base_url, self.spreadsheet_id
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&json!({ "requests": requests }))
            .send()
            .await?;
        Self::check(response).await
    }
}

/// Summary of one sink upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    /// Data rows submitted (header not counted)
    pub rows_uploaded: usize,
    /// Batches sent
    pub batches: usize,
    /// True when the cancel flag stopped the upload between batches
    pub cancelled: bool,
}

/// Pushes the reconciled set to the spreadsheet in bounded batches
pub struct BulkSink {
    client: SheetsClient,
    sheet_name: String,
    batch_size: usize,
    retry: RetryPolicy,
    cancel: Arc<AtomicBool>,
}

impl BulkSink {
    pub fn new(config: &SyncConfig, client: reqwest::Client, cancel: Arc<AtomicBool>) -> Self {
        Self {
            client: SheetsClient::new(config, client),
            sheet_name: config.sheet_name.clone(),
            batch_size: config.batch_size,
            retry: RetryPolicy::exponential(config.upload_attempts),
            cancel,
        }
    }

    /// Replace the retry policy (for tests)
    pub(crate) fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn full_range(&self) -> String {
        format!("{}!A:Z", self.sheet_name)
    }

    /// Replace the sheet's contents with the reconciled set.
    ///
    /// Clears first (full-replace semantics), uploads header plus data rows
    /// in sequential batches, verifies the destination row count, then
    /// applies best-effort cosmetic finalization.
    pub async fn upload(&self, products: &[ReconciledProduct]) -> Result<UploadSummary> {
        log::info!(
            "Uploading {} products to sheet {} in batches of {}",
            products.len(),
            self.sheet_name,
            self.batch_size
        );

        let range = self.full_range();
        self.with_backoff("clear", || self.client.clear(&range))
            .await?;

        let mut rows: Vec<Vec<String>> =
            vec![COLUMN_ORDER.iter().map(|s| s.to_string()).collect()];
        rows.extend(products.iter().map(to_row));

        let mut batches = 0;
        let mut uploaded = 0usize;
        for chunk in rows.chunks(self.batch_size) {
            if self.cancel.load(Ordering::Relaxed) {
                log::warn!("Upload cancelled after {} batches", batches);
                return Ok(UploadSummary {
                    rows_uploaded: uploaded.saturating_sub(1),
                    batches,
                    cancelled: true,
                });
            }
            self.with_backoff("append batch", || self.client.append(&range, chunk))
                .await?;
            batches += 1;
            uploaded += chunk.len();
            log::info!("Uploaded batch {} ({} rows so far)", batches, uploaded);
        }

        self.verify_row_count(products.len()).await?;

        if let Err(e) = self.finalize(rows.len()).await {
            // Data is uploaded and verified; formatting is cosmetic only
            log::warn!("Cosmetic finalization failed: {}", e);
        }

        log::info!("Upload complete: {} rows in {} batches", products.len(), batches);
        Ok(UploadSummary {
            rows_uploaded: products.len(),
            batches,
            cancelled: false,
        })
    }

    /// Run one sink call under the retry policy. Rate-limit and transient
    /// server responses back off and retry; anything else aborts at once.
    async fn with_backoff<F, Fut>(&self, what: &str, op: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(SyncError::HttpStatus(status)) if is_retryable(status) => {
                    log::warn!("Sink {} got {} (attempt {})", what, status, attempt + 1);
                    match self.retry.delay_for(attempt) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => {
                            return Err(SyncError::RetriesExhausted(format!(
                                "{} kept returning {}",
                                what, status
                            )))
                        }
                    }
                }
                Err(SyncError::HttpStatus(status)) => {
                    return Err(SyncError::UploadFailed(format!(
                        "{} returned {}",
                        what, status
                    )))
                }
                Err(SyncError::Network(e)) => {
                    log::warn!("Sink {} network error: {} (attempt {})", what, e, attempt + 1);
                    match self.retry.delay_for(attempt) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => return Err(SyncError::RetriesExhausted(e.to_string())),
                    }
                }
                Err(other) => return Err(other),
            }
            attempt += 1;
        }
    }

    /// Re-read the destination row count; a silent partial upload must
    /// never be reported as success
    async fn verify_row_count(&self, expected: usize) -> Result<()> {
        let column_a = format!("{}!A:A", self.sheet_name);
        let values = self.client.get(&column_a).await?;
        let actual = values.len().saturating_sub(1); // header row
        if actual != expected {
            return Err(SyncError::VerificationMismatch { expected, actual });
        }
        log::info!("Verified {} rows at the destination", actual);
        Ok(())
    }

    /// Freeze and bold the header row, and stamp the sync time next to the
    /// table. Best-effort: the data upload is already verified.
    async fn finalize(&self, total_rows: usize) -> Result<()> {
        self.client
            .batch_update(json!([
                {
                    "updateSheetProperties": {
                        "properties": {"gridProperties": {"frozenRowCount": 1}},
                        "fields": "gridProperties.frozenRowCount"
                    }
                },
                {
                    "repeatCell": {
                        "range": {"startRowIndex": 0, "endRowIndex": 1},
                        "cell": {"userEnteredFormat": {"textFormat": {"bold": true}}},
                        "fields": "userEnteredFormat.textFormat.bold"
                    }
                }
            ]))
            .await?;

        let stamp = Utc::now()
            .with_timezone(&Kiev)
            .format("Synced %d.%m.%Y %H:%M")
            .to_string();
        self.client
            .update(&format!("{}!L1", self.sheet_name), &[vec![stamp]])
            .await?;
        log::debug!("Formatted sheet with {} rows", total_rows);
        Ok(())
    }
}

/// Whether a sink response status is worth retrying
fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::FORBIDDEN // quota errors surface as 403
        || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path_regex};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn product(id: &str, name: &str) -> ReconciledProduct {
        ReconciledProduct {
            id: id.to_string(),
            code: format!("C-{id}"),
            article: format!("SKU-{id}"),
            path_name: "Category/Sub".to_string(),
            name: name.to_string(),
            description: String::new(),
            sale_price: 500.0,
            stores: "Main".to_string(),
            stock: 10.0,
            updated: "15.01.24 09:15".to_string(),
        }
    }

    fn test_config(base_url: &str) -> SyncConfig {
        SyncConfig {
            sheets_base_url: base_url.to_string(),
            sheets_token: "sheet-token".to_string(),
            spreadsheet_id: "spread-1".to_string(),
            sheet_name: "Products".to_string(),
            batch_size: 2,
            ..SyncConfig::default()
        }
    }

    fn sink(config: &SyncConfig) -> BulkSink {
        BulkSink::new(
            config,
            reqwest::Client::new(),
            Arc::new(AtomicBool::new(false)),
        )
        .with_retry(RetryPolicy::fixed(5, Duration::from_millis(0)))
    }

    fn count_response(rows: usize) -> ResponseTemplate {
        // Column A read-back: header plus one cell per data row
        let mut values = vec![vec!["ID".to_string()]];
        values.extend((0..rows).map(|i| vec![i.to_string()]));
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "values": values }))
    }

    async fn mount_happy_sink(server: &MockServer, data_rows: usize) {
        Mock::given(method("POST"))
            .and(path_regex(r":clear$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r":append$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"/values/"))
            .respond_with(count_response(data_rows))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r":batchUpdate$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex(r"/values/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[test]
    fn row_serialization_follows_declared_column_order() {
        let row = to_row(&product("1", "Widget"));
        assert_eq!(
            row,
            vec![
                "1",
                "C-1",
                "SKU-1",
                "Category/Sub",
                "Widget",
                "",
                "500",
                "Main",
                "10",
                "15.01.24 09:15"
            ]
        );
        assert_eq!(row.len(), COLUMN_ORDER.len());
    }

    #[tokio::test]
    async fn upload_clears_then_appends_in_batches() {
        let server = MockServer::start().await;
        mount_happy_sink(&server, 3).await;

        let config = test_config(&server.uri());
        let products = vec![product("1", "A"), product("2", "B"), product("3", "C")];
        let summary = sink(&config).upload(&products).await.unwrap();

        assert_eq!(summary.rows_uploaded, 3);
        // Header + 3 data rows at batch size 2 is 2 batches
        assert_eq!(summary.batches, 2);
        assert!(!summary.cancelled);

        // Clear must precede the first append
        let requests = server.received_requests().await.unwrap();
        let order: Vec<&str> = requests
            .iter()
            .filter_map(|r| {
                let p = r.url.path().to_string();
                if p.ends_with(":clear") {
                    Some("clear")
                } else if p.ends_with(":append") {
                    Some("append")
                } else {
                    None
                }
            })
            .collect();
        assert_eq!(order, ["clear", "append", "append"]);
    }

    #[tokio::test]
    async fn rate_limited_batch_retries_until_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path_regex(r":clear$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        // Two rate-limit responses, then acceptance
        Mock::given(method("POST"))
            .and(path_regex(r":append$"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r":append$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"/values/"))
            .respond_with(count_response(1))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r":batchUpdate$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex(r"/values/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let summary = sink(&config).upload(&[product("1", "A")]).await.unwrap();
        assert_eq!(summary.rows_uploaded, 1);
    }

    #[tokio::test]
    async fn non_retryable_response_aborts_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r":clear$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r":append$"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let result = sink(&config).upload(&[product("1", "A")]).await;
        match result {
            Err(SyncError::UploadFailed(_)) => {}
            other => panic!("Expected UploadFailed, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn persistent_transient_errors_exhaust_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r":clear$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r":append$"))
            .respond_with(ResponseTemplate::new(503))
            .expect(5)
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let result = sink(&config).upload(&[product("1", "A")]).await;
        match result {
            Err(SyncError::RetriesExhausted(_)) => {}
            other => panic!("Expected RetriesExhausted, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn row_count_divergence_is_a_verification_mismatch() {
        let server = MockServer::start().await;
        // Destination reports 1 data row although 2 were submitted
        mount_happy_sink(&server, 1).await;

        let config = test_config(&server.uri());
        let result = sink(&config)
            .upload(&[product("1", "A"), product("2", "B")])
            .await;
        match result {
            Err(SyncError::VerificationMismatch { expected, actual }) => {
                assert_eq!(expected, 2);
                assert_eq!(actual, 1);
            }
            other => panic!("Expected VerificationMismatch, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn formatting_failure_does_not_invalidate_verified_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r":clear$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r":append$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"/values/"))
            .respond_with(count_response(1))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r":batchUpdate$"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let summary = sink(&config).upload(&[product("1", "A")]).await.unwrap();
        assert_eq!(summary.rows_uploaded, 1);
    }

    #[tokio::test]
    async fn bearer_token_is_sent_on_every_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r":clear$"))
            .and(wiremock::matchers::header(
                "Authorization",
                "Bearer sheet-token",
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r":append$"))
            .and(body_partial_json(serde_json::json!({})))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"/values/"))
            .respond_with(count_response(0))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r":batchUpdate$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex(r"/values/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let summary = sink(&config).upload(&[]).await.unwrap();
        assert_eq!(summary.rows_uploaded, 0);
    }

    type SheetRows = Arc<Mutex<Vec<Vec<String>>>>;

    /// Clears the simulated sheet
    struct ClearRows(SheetRows);

    impl Respond for ClearRows {
        fn respond(&self, _: &Request) -> ResponseTemplate {
            self.0.lock().unwrap().clear();
            ResponseTemplate::new(200)
        }
    }

    /// Appends the submitted rows to the simulated sheet
    struct AppendRows(SheetRows);

    impl Respond for AppendRows {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            let rows: Vec<Vec<String>> = serde_json::from_value(body["values"].clone()).unwrap();
            self.0.lock().unwrap().extend(rows);
            ResponseTemplate::new(200)
        }
    }

    /// Reads the simulated sheet back
    struct ReadRows(SheetRows);

    impl Respond for ReadRows {
        fn respond(&self, _: &Request) -> ResponseTemplate {
            let values = self.0.lock().unwrap().clone();
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "values": values }))
        }
    }

    #[tokio::test]
    async fn repeated_upload_leaves_destination_unchanged() {
        let server = MockServer::start().await;
        let sheet: SheetRows = Arc::new(Mutex::new(Vec::new()));

        Mock::given(method("POST"))
            .and(path_regex(r":clear$"))
            .respond_with(ClearRows(Arc::clone(&sheet)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r":append$"))
            .respond_with(AppendRows(Arc::clone(&sheet)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"/values/"))
            .respond_with(ReadRows(Arc::clone(&sheet)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r":batchUpdate$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        // The timestamp annotation is cosmetic and not part of the table
        Mock::given(method("PUT"))
            .and(path_regex(r"/values/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let products = vec![product("1", "A"), product("2", "B")];

        let first = sink(&config).upload(&products).await.unwrap();
        let after_first = sheet.lock().unwrap().clone();

        let second = sink(&config).upload(&products).await.unwrap();
        let after_second = sheet.lock().unwrap().clone();

        // Both runs verified against the destination and left the same table
        assert_eq!(first.rows_uploaded, 2);
        assert_eq!(second.rows_uploaded, 2);
        assert_eq!(after_first, after_second);
        assert_eq!(after_second.len(), 3); // header + 2 data rows
        assert_eq!(after_second[0], COLUMN_ORDER.map(String::from).to_vec());
        assert_eq!(after_second[1][0], "1");
    }
}

//! Web server for sync status and manual triggers
//!
//! Small REST surface over the synced catalog: inspect the last run,
//! browse products, and kick off a sync without waiting for the next
//! scheduled one.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use crate::database::{get_last_sync_run, get_product_count, list_products, SyncRunRow};
use crate::pipeline::SyncPipeline;
use crate::reconcile::ReconciledProduct;

/// Shared application state (thread-safe database connection + pipeline)
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    pipeline: Arc<SyncPipeline>,
}

/// Product listing query parameters
#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

/// API response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Sync status payload
#[derive(Serialize)]
struct SyncStatus {
    running: bool,
    product_count: i64,
    last_run: Option<SyncRunRow>,
}

/// GET /api/status - last run outcome and current product count
async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SyncStatus>>, StatusCode> {
    let conn = state.db.lock().unwrap();

    let product_count = match get_product_count(&conn) {
        Ok(count) => count,
        Err(e) => {
            log::error!("Database error: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let last_run = match get_last_sync_run(&conn) {
        Ok(run) => run,
        Err(e) => {
            log::error!("Database error: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    Ok(Json(ApiResponse::ok(SyncStatus {
        running: state.pipeline.is_running(),
        product_count,
        last_run,
    })))
}

/// GET /api/products?limit={limit}
async fn products_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<Vec<ReconciledProduct>>>, StatusCode> {
    let conn = state.db.lock().unwrap();

    match list_products(&conn, params.limit) {
        Ok(products) => Ok(Json(ApiResponse::ok(products))),
        Err(e) => {
            log::error!("Database error: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/sync - trigger a sync in the background
///
/// The pipeline itself enforces exclusivity; the running check here only
/// gives the caller a friendly 409 instead of a spawned no-op.
async fn sync_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<&'static str>>) {
    if state.pipeline.is_running() {
        return (
            StatusCode::CONFLICT,
            Json(ApiResponse::err("a sync run is already in progress")),
        );
    }

    let pipeline = Arc::clone(&state.pipeline);
    let db_path = state.db_path.clone();
    tokio::spawn(async move {
        // The shared connection stays free for handlers; the background
        // run gets its own
        match Connection::open(&db_path) {
            Ok(mut conn) => {
                if let Err(e) = pipeline.run(&mut conn).await {
                    log::error!("Triggered sync failed: {}", e);
                }
            }
            Err(e) => log::error!("Could not open database for triggered sync: {}", e),
        }
    });

    (StatusCode::ACCEPTED, Json(ApiResponse::ok("sync started")))
}

/// Build the web server router
pub fn create_router(
    db: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    pipeline: Arc<SyncPipeline>,
) -> Router {
    let state = AppState {
        db,
        db_path,
        pipeline,
    };

    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/products", get(products_handler))
        .route("/api/sync", post(sync_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the web server (async)
///
/// Binds to 0.0.0.0 (all interfaces) to work with Docker port mapping.
pub async fn serve(
    db: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    pipeline: Arc<SyncPipeline>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(db, db_path, pipeline);
    let addr = format!("0.0.0.0:{}", port);

    log::info!("Status API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::database::init_schema;
    use tempfile::TempDir;

    fn create_test_state() -> (AppState, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let conn = Connection::open(&db_path).unwrap();
        init_schema(&conn).unwrap();

        let state = AppState {
            db: Arc::new(Mutex::new(conn)),
            db_path,
            pipeline: Arc::new(SyncPipeline::new(SyncConfig::default())),
        };
        (state, temp_dir)
    }

    #[test]
    fn test_create_router() {
        let (state, _dir) = create_test_state();
        let _router = create_router(state.db, state.db_path, state.pipeline);
    }

    #[tokio::test]
    async fn status_reports_empty_database() {
        let (state, _dir) = create_test_state();
        let response = status_handler(State(state)).await.unwrap();
        let status = response.0.data.unwrap();
        assert!(!status.running);
        assert_eq!(status.product_count, 0);
        assert!(status.last_run.is_none());
    }

    #[tokio::test]
    async fn products_listing_respects_limit() {
        let (state, _dir) = create_test_state();
        {
            let mut conn = state.db.lock().unwrap();
            let products: Vec<ReconciledProduct> = (0..5)
                .map(|i| ReconciledProduct {
                    id: i.to_string(),
                    code: String::new(),
                    article: String::new(),
                    path_name: String::new(),
                    name: format!("Product {i}"),
                    description: String::new(),
                    sale_price: 0.0,
                    stores: String::new(),
                    stock: 0.0,
                    updated: String::new(),
                })
                .collect();
            crate::database::upsert_products(&mut conn, &products).unwrap();
        }

        let response = products_handler(State(state), Query(ListParams { limit: 3 }))
            .await
            .unwrap();
        assert_eq!(response.0.data.unwrap().len(), 3);
    }

    #[test]
    fn test_api_response_serialization() {
        let response = ApiResponse::ok(vec![1, 2, 3]);
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"data\":[1,2,3]"));

        let error: ApiResponse<()> = ApiResponse::err("boom");
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("\"error\":\"boom\""));
        assert!(!json.contains("\"data\""));
    }
}

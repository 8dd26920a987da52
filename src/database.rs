//! Database operations for catalog sync
//!
//! Uses parameterized queries exclusively for security (no SQL string
//! concatenation). All writes are transactional.

use crate::reconcile::{ReconcileStats, ReconciledProduct};
use rusqlite::{params, Connection, Transaction};
use serde::Serialize;

/// Result type for database operations
pub type DbResult<T> = rusqlite::Result<T>;

/// Initialize the database schema
///
/// Creates tables if they don't exist:
/// - `products`: the reconciled product set, replaced on every sync
/// - `sync_runs`: bookkeeping for each pipeline run (counters, outcome)
pub fn init_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            article TEXT NOT NULL,
            path_name TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            sale_price REAL NOT NULL,
            stores TEXT NOT NULL,
            stock REAL NOT NULL,
            updated_at TEXT NOT NULL,
            synced_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_products_code ON products(code);
        CREATE INDEX IF NOT EXISTS idx_products_article ON products(article);

        CREATE TABLE IF NOT EXISTS sync_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            total_products INTEGER NOT NULL,
            pairs_merged INTEGER NOT NULL,
            groups_unmerged INTEGER NOT NULL,
            dropped_no_identity INTEGER NOT NULL,
            dropped_unmatched INTEGER NOT NULL,
            partial INTEGER NOT NULL,
            reason TEXT
        );
        ",
    )?;

    log::info!("Database schema initialized");
    Ok(())
}

/// Upsert the reconciled set into the database
///
/// Uses INSERT OR REPLACE so re-running a sync updates existing products.
/// All operations are wrapped in a transaction for atomicity.
pub fn upsert_products(conn: &mut Connection, products: &[ReconciledProduct]) -> DbResult<usize> {
    let tx = conn.transaction()?;
    let count = upsert_products_tx(&tx, products)?;
    tx.commit()?;
    Ok(count)
}

fn upsert_products_tx(tx: &Transaction<'_>, products: &[ReconciledProduct]) -> DbResult<usize> {
    let mut stmt = tx.prepare_cached(
        "INSERT OR REPLACE INTO products
         (id, code, article, path_name, name, description, sale_price, stores, stock, updated_at, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, datetime('now'))",
    )?;

    let mut count = 0;
    for product in products {
        stmt.execute(params![
            &product.id,
            &product.code,
            &product.article,
            &product.path_name,
            &product.name,
            &product.description,
            product.sale_price,
            &product.stores,
            product.stock,
            &product.updated,
        ])?;
        count += 1;
    }

    log::info!("Upserted {} products into database", count);
    Ok(count)
}

/// One row of sync-run bookkeeping
#[derive(Debug, Clone, Serialize)]
pub struct SyncRunRow {
    pub started_at: String,
    pub finished_at: String,
    pub total_products: usize,
    pub stats: ReconcileStats,
    pub partial: bool,
    pub reason: Option<String>,
}

/// Record the outcome of one pipeline run
pub fn record_sync_run(conn: &Connection, run: &SyncRunRow) -> DbResult<()> {
    conn.execute(
        "INSERT INTO sync_runs
         (started_at, finished_at, total_products, pairs_merged, groups_unmerged,
          dropped_no_identity, dropped_unmatched, partial, reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &run.started_at,
            &run.finished_at,
            run.total_products,
            run.stats.pairs_merged,
            run.stats.groups_unmerged,
            run.stats.dropped_no_identity,
            run.stats.dropped_unmatched,
            run.partial,
            &run.reason,
        ],
    )?;
    Ok(())
}

/// Latest sync run, if any
pub fn get_last_sync_run(conn: &Connection) -> DbResult<Option<SyncRunRow>> {
    let mut stmt = conn.prepare(
        "SELECT started_at, finished_at, total_products, pairs_merged, groups_unmerged,
                dropped_no_identity, dropped_unmatched, partial, reason
         FROM sync_runs ORDER BY id DESC LIMIT 1",
    )?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => Ok(Some(SyncRunRow {
            started_at: row.get(0)?,
            finished_at: row.get(1)?,
            total_products: row.get::<_, i64>(2)? as usize,
            stats: ReconcileStats {
                pairs_merged: row.get::<_, i64>(3)? as usize,
                groups_unmerged: row.get::<_, i64>(4)? as usize,
                dropped_no_identity: row.get::<_, i64>(5)? as usize,
                dropped_unmatched: row.get::<_, i64>(6)? as usize,
            },
            partial: row.get(7)?,
            reason: row.get(8)?,
        })),
        None => Ok(None),
    }
}

/// Get total count of products in database
pub fn get_product_count(conn: &Connection) -> DbResult<i64> {
    conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))
}

/// List products ordered by name (for the web layer)
pub fn list_products(conn: &Connection, limit: usize) -> DbResult<Vec<ReconciledProduct>> {
    let mut stmt = conn.prepare(
        "SELECT id, code, article, path_name, name, description, sale_price, stores, stock, updated_at
         FROM products ORDER BY name LIMIT ?1",
    )?;

    let results: DbResult<Vec<ReconciledProduct>> = stmt
        .query_map(params![limit], |row| {
            Ok(ReconciledProduct {
                id: row.get(0)?,
                code: row.get(1)?,
                article: row.get(2)?,
                path_name: row.get(3)?,
                name: row.get(4)?,
                description: row.get(5)?,
                sale_price: row.get(6)?,
                stores: row.get(7)?,
                stock: row.get(8)?,
                updated: row.get(9)?,
            })
        })?
        .collect();
    results
}

/// Current time as a display string in Kiev time, the business timezone
pub fn now_kiev() -> String {
    use chrono::Utc;
    use chrono_tz::Europe::Kiev;
    Utc::now()
        .with_timezone(&Kiev)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

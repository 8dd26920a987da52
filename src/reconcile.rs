//! Multi-source record reconciliation
//!
//! Combines the three independently paginated sources (catalog, stock
//! report, per-store balance report) into one record per product identity,
//! then collapses the duplicate-pair artifacts the warehouse system leaves
//! behind when it splits a product.

use crate::warehouse::{self, RawRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One fully reconciled product, read-only once produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledProduct {
    pub id: String,
    pub code: String,
    pub article: String,
    pub path_name: String,
    pub name: String,
    pub description: String,
    pub sale_price: f64,
    pub stores: String,
    pub stock: f64,
    pub updated: String,
}

/// Anomaly counters surfaced to the caller; never discarded silently
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// Records dropped because no identity could be derived
    pub dropped_no_identity: usize,
    /// Stock/balance records with no matching catalog entry
    pub dropped_unmatched: usize,
    /// Split-record pairs collapsed into one product
    pub pairs_merged: usize,
    /// Code groups that did not match the pair rule and passed through
    pub groups_unmerged: usize,
}

/// Output of one reconciliation pass
#[derive(Debug)]
pub struct Reconciled {
    pub products: Vec<ReconciledProduct>,
    pub stats: ReconcileStats,
}

/// Combine the three source sets into one product per surviving identity.
///
/// Catalog records seed the map with descriptive fields; the stock report
/// overlays price and stock count; the balance report overlays the
/// warehouse list. Overlay records that match no catalog identity are
/// dropped and counted, as are records carrying no identity at all.
pub fn reconcile(
    catalog: &[RawRecord],
    stock: &[RawRecord],
    balances: &[RawRecord],
) -> Reconciled {
    let mut stats = ReconcileStats::default();

    if catalog.is_empty() && stock.is_empty() && balances.is_empty() {
        log::warn!("All three source sets are empty, producing an empty reconciled set");
        return Reconciled {
            products: Vec::new(),
            stats,
        };
    }

    let mut by_id: HashMap<String, ReconciledProduct> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    // Step 1: seed from the catalog
    for record in catalog {
        let Some(id) = warehouse::identity(record) else {
            log::warn!("Dropping catalog record without identity");
            stats.dropped_no_identity += 1;
            continue;
        };
        order.push(id.clone());
        by_id.insert(
            id.clone(),
            ReconciledProduct {
                id,
                code: warehouse::str_field(record, "code"),
                article: warehouse::str_field(record, "article"),
                path_name: warehouse::category_path(record),
                name: warehouse::str_field(record, "name"),
                description: warehouse::str_field(record, "description"),
                sale_price: 0.0,
                stores: String::new(),
                stock: 0.0,
                updated: warehouse::format_updated(&warehouse::str_field(record, "updated")),
            },
        );
    }

    // Step 2: overlay the stock report (price, stock count)
    for record in stock {
        let Some(id) = warehouse::identity(record) else {
            stats.dropped_no_identity += 1;
            continue;
        };
        match by_id.get_mut(&id) {
            Some(product) => {
                product.sale_price = warehouse::sale_price(record);
                product.stock = warehouse::stock(record);
            }
            None => {
                log::debug!("Stock record {} has no catalog entry, dropping", id);
                stats.dropped_unmatched += 1;
            }
        }
    }

    // Step 3: overlay the balance report (warehouse list)
    for record in balances {
        let Some(id) = warehouse::identity(record) else {
            stats.dropped_no_identity += 1;
            continue;
        };
        match by_id.get_mut(&id) {
            Some(product) => product.stores = balance_stores(record),
            None => {
                log::debug!("Balance record {} has no catalog entry, dropping", id);
                stats.dropped_unmatched += 1;
            }
        }
    }

    // Step 4: collapse split-record duplicate pairs
    let products = collapse_duplicate_pairs(by_id, order, &mut stats);

    log::info!(
        "Reconciled {} products ({} pairs merged, {} groups left unmerged, {} without identity, {} unmatched)",
        products.len(),
        stats.pairs_merged,
        stats.groups_unmerged,
        stats.dropped_no_identity,
        stats.dropped_unmatched
    );

    Reconciled { products, stats }
}

/// Warehouse list for a balance record: already-flattened `store` field
/// when present, otherwise joined from the raw `stockByStore` array
fn balance_stores(record: &RawRecord) -> String {
    if let Some(Value::String(store)) = record.get("store") {
        return store.clone();
    }
    warehouse::stores(record)
}

/// Collapse duplicate pairs left behind by the warehouse system's record
/// splitting: exactly two entries sharing a code, one carrying a non-empty
/// article and one not, are one logical product. The article-bearing half
/// keeps identity and descriptive fields; the other half contributes the
/// commercial fields. Any other group shape passes through unchanged and
/// bumps the unmerged counter once per group.
///
/// The code match alone could in principle pair unrelated products that
/// share a code by coincidence; the counters exist so that shows up in
/// operations before it shows up in the storefront.
fn collapse_duplicate_pairs(
    mut by_id: HashMap<String, ReconciledProduct>,
    order: Vec<String>,
    stats: &mut ReconcileStats,
) -> Vec<ReconciledProduct> {
    let mut by_code: HashMap<String, Vec<String>> = HashMap::new();
    for id in &order {
        let code = &by_id[id].code;
        if !code.is_empty() {
            by_code.entry(code.clone()).or_default().push(id.clone());
        }
    }

    for (code, ids) in &by_code {
        if ids.len() < 2 {
            continue;
        }
        if ids.len() == 2 {
            let first_has_article = !by_id[&ids[0]].article.is_empty();
            let second_has_article = !by_id[&ids[1]].article.is_empty();
            if first_has_article != second_has_article {
                let (keeper, donor) = if first_has_article {
                    (&ids[0], &ids[1])
                } else {
                    (&ids[1], &ids[0])
                };
                if let Some(donor_record) = by_id.remove(donor) {
                    if let Some(product) = by_id.get_mut(keeper) {
                        product.sale_price = donor_record.sale_price;
                        product.stock = donor_record.stock;
                        product.stores = donor_record.stores;
                        stats.pairs_merged += 1;
                        log::debug!("Merged split pair for code {}", code);
                    }
                }
                continue;
            }
        }
        log::warn!(
            "Code {} groups {} records but does not match the split-pair shape, passing through",
            code,
            ids.len()
        );
        stats.groups_unmerged += 1;
    }

    order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect()
}

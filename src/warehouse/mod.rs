//! Warehouse API client: token exchange, paginated retrieval, raw records

mod auth;
mod record;
mod retriever;

pub use auth::TokenAuthority;
pub use record::{
    category_path, extract_id_from_href, format_updated, identity, sale_price, stock, stores,
    str_field, RawRecord,
};
pub use retriever::{read_snapshot, PaginatedRetriever, Retrieval, SnapshotWriter, Truncation};

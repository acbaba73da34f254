//! Rows of the reference catalog tables (`closers`, `programs`,
//! `payment_methods`).

use serde::Serialize;
use sqlx::FromRow;
use salesdesk_core::types::{DbId, Timestamp};

/// One catalog entry. `key` is the table's natural-key column aliased to a
/// common name.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CatalogEntry {
    pub id: DbId,
    pub key: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

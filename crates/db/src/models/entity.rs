//! Rows of the imported record tables (`leads`, `sales`).

use serde::Serialize;
use sqlx::FromRow;
use salesdesk_core::types::{DbId, Timestamp};

/// An imported record. Natural-key columns are not repeated here; they are
/// also present inside `data`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EntityRow {
    pub id: DbId,
    pub data: serde_json::Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

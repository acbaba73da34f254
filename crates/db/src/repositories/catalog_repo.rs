//! Repository for the reference catalogs, plus the [`CatalogProvider`]
//! adapter used by the commit engine.

use async_trait::async_trait;
use sqlx::PgPool;
use salesdesk_core::catalog::{CatalogError, CatalogProvider};
use salesdesk_core::schema::ReferenceKind;
use salesdesk_core::types::DbId;

use crate::models::catalog::CatalogEntry;

/// Table and natural-key column backing one reference kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogTable {
    pub table: &'static str,
    pub key_column: &'static str,
}

pub fn catalog_table(kind: ReferenceKind) -> CatalogTable {
    match kind {
        ReferenceKind::Closer => CatalogTable {
            table: "closers",
            key_column: "username",
        },
        ReferenceKind::Program => CatalogTable {
            table: "programs",
            key_column: "name",
        },
        ReferenceKind::PaymentMethod => CatalogTable {
            table: "payment_methods",
            key_column: "name",
        },
    }
}

fn entry_columns(t: CatalogTable) -> String {
    format!("id, {} AS key, created_at, updated_at", t.key_column)
}

// ── CatalogRepo ──────────────────────────────────────────────────────

/// Lookups and idempotent inserts against the catalog tables.
pub struct CatalogRepo;

impl CatalogRepo {
    /// Find an entry by its exact natural key.
    pub async fn find_by_key(
        pool: &PgPool,
        kind: ReferenceKind,
        key: &str,
    ) -> Result<Option<CatalogEntry>, sqlx::Error> {
        let t = catalog_table(kind);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = $1",
            entry_columns(t),
            t.table,
            t.key_column
        );
        sqlx::query_as::<_, CatalogEntry>(&sql)
            .bind(key)
            .fetch_optional(pool)
            .await
    }

    /// Insert an entry, or return the existing one when the key is taken.
    pub async fn get_or_create(
        pool: &PgPool,
        kind: ReferenceKind,
        key: &str,
    ) -> Result<CatalogEntry, sqlx::Error> {
        let t = catalog_table(kind);
        let sql = format!(
            "INSERT INTO {table} ({col}) VALUES ($1) \
             ON CONFLICT ({col}) DO UPDATE SET {col} = {table}.{col} \
             RETURNING {columns}",
            table = t.table,
            col = t.key_column,
            columns = entry_columns(t),
        );
        sqlx::query_as::<_, CatalogEntry>(&sql)
            .bind(key)
            .fetch_one(pool)
            .await
    }

    /// All natural keys of one kind in byte order.
    pub async fn list_keys(pool: &PgPool, kind: ReferenceKind) -> Result<Vec<String>, sqlx::Error> {
        let t = catalog_table(kind);
        let sql = format!(
            "SELECT {col} FROM {table} ORDER BY {col} COLLATE \"C\"",
            table = t.table,
            col = t.key_column,
        );
        sqlx::query_scalar::<_, String>(&sql).fetch_all(pool).await
    }
}

// ── PgCatalog ────────────────────────────────────────────────────────

/// [`CatalogProvider`] backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> CatalogError {
    CatalogError::Backend(e.to_string())
}

#[async_trait]
impl CatalogProvider for PgCatalog {
    async fn lookup(&self, kind: ReferenceKind, key: &str) -> Result<Option<DbId>, CatalogError> {
        Ok(CatalogRepo::find_by_key(&self.pool, kind, key)
            .await
            .map_err(backend)?
            .map(|entry| entry.id))
    }

    async fn create(&self, kind: ReferenceKind, key: &str) -> Result<DbId, CatalogError> {
        if key.trim().is_empty() {
            return Err(CatalogError::EmptyKey { kind });
        }
        let entry = CatalogRepo::get_or_create(&self.pool, kind, key)
            .await
            .map_err(backend)?;
        tracing::debug!(reference_kind = %kind, key, id = entry.id, "Catalog entry stored");
        Ok(entry.id)
    }

    async fn list(&self, kind: ReferenceKind) -> Result<Vec<String>, CatalogError> {
        CatalogRepo::list_keys(&self.pool, kind)
            .await
            .map_err(backend)
    }
}

//! Repository for imported records (`leads`, `sales`), plus the
//! [`EntityStore`] adapter used by the commit engine.
//!
//! Each table breaks its natural-key fields out into columns named after
//! the schema fields and keeps the full record in a `data` JSONB column.

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool};
use salesdesk_core::schema::{EntityKind, NaturalKey, TargetSchema};
use salesdesk_core::store::{
    BatchError, BatchOutcome, EntityStore, PlannedWrite, StoreError, StoredEntity, WriteMode,
};
use tokio_util::sync::CancellationToken;
use salesdesk_core::types::{DbId, Record};

use crate::models::entity::EntityRow;

/// Column list for `leads` and `sales`.
const ENTITY_COLUMNS: &str = "id, data, created_at, updated_at";

pub fn table_name(kind: EntityKind) -> &'static str {
    kind.as_str()
}

fn key_columns(kind: EntityKind) -> &'static [&'static str] {
    TargetSchema::for_kind(kind).natural_key
}

/// `col_a = $n AND col_b = $n+1 ...` over the natural-key columns.
fn key_predicate(kind: EntityKind, first_param: usize) -> String {
    key_columns(kind)
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{col} = ${}", first_param + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn select_by_key_sql(kind: EntityKind) -> String {
    format!(
        "SELECT {ENTITY_COLUMNS} FROM {} WHERE {}",
        table_name(kind),
        key_predicate(kind, 1)
    )
}

fn insert_sql(kind: EntityKind) -> String {
    let cols = key_columns(kind);
    let params: Vec<String> = (1..=cols.len() + 1).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {} ({}, data) VALUES ({}) RETURNING {ENTITY_COLUMNS}",
        table_name(kind),
        cols.join(", "),
        params.join(", ")
    )
}

/// Key columns are rewritten and `data` is merged with `||`.
fn update_sql(kind: EntityKind) -> String {
    let cols = key_columns(kind);
    let assignments: Vec<String> = cols
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{col} = ${}", i + 2))
        .collect();
    format!(
        "UPDATE {} SET {}, data = data || ${} WHERE id = $1 RETURNING {ENTITY_COLUMNS}",
        table_name(kind),
        assignments.join(", "),
        cols.len() + 2
    )
}

// ── EntityRepo ───────────────────────────────────────────────────────

/// Natural-key lookups, inserts and merges for imported records.
///
/// Every function takes any executor so the same queries run against the
/// pool or inside a batch transaction.
pub struct EntityRepo;

impl EntityRepo {
    pub async fn find_by_natural_key<'e>(
        executor: impl PgExecutor<'e>,
        kind: EntityKind,
        key: &NaturalKey,
    ) -> Result<Option<EntityRow>, sqlx::Error> {
        let sql = select_by_key_sql(kind);
        let mut query = sqlx::query_as::<_, EntityRow>(&sql);
        for part in key.parts() {
            query = query.bind(part);
        }
        query.fetch_optional(executor).await
    }

    pub async fn insert<'e>(
        executor: impl PgExecutor<'e>,
        kind: EntityKind,
        key: &NaturalKey,
        data: &serde_json::Value,
    ) -> Result<EntityRow, sqlx::Error> {
        let sql = insert_sql(kind);
        let mut query = sqlx::query_as::<_, EntityRow>(&sql);
        for part in key.parts() {
            query = query.bind(part);
        }
        query.bind(data).fetch_one(executor).await
    }

    /// Merge `data` into an existing record. Returns `None` if `id` does
    /// not exist.
    pub async fn update<'e>(
        executor: impl PgExecutor<'e>,
        kind: EntityKind,
        id: DbId,
        key: &NaturalKey,
        data: &serde_json::Value,
    ) -> Result<Option<EntityRow>, sqlx::Error> {
        let sql = update_sql(kind);
        let mut query = sqlx::query_as::<_, EntityRow>(&sql).bind(id);
        for part in key.parts() {
            query = query.bind(part);
        }
        query.bind(data).fetch_optional(executor).await
    }
}

// ── PgEntityStore ────────────────────────────────────────────────────

/// [`EntityStore`] backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn key_of(kind: EntityKind, fields: &Record) -> Result<NaturalKey, StoreError> {
    NaturalKey::from_record(TargetSchema::for_kind(kind), fields)
        .ok_or(StoreError::NoNaturalKey { kind })
}

fn into_record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn find_by_natural_key(
        &self,
        kind: EntityKind,
        key: &NaturalKey,
    ) -> Result<Option<StoredEntity>, StoreError> {
        Ok(EntityRepo::find_by_natural_key(&self.pool, kind, key)
            .await
            .map_err(backend)?
            .map(|row| StoredEntity {
                id: row.id,
                fields: into_record(row.data),
            }))
    }

    async fn insert(&self, kind: EntityKind, fields: &Record) -> Result<DbId, StoreError> {
        let key = key_of(kind, fields)?;
        let data = serde_json::Value::Object(fields.clone());
        let row = EntityRepo::insert(&self.pool, kind, &key, &data)
            .await
            .map_err(backend)?;
        Ok(row.id)
    }

    async fn update(&self, kind: EntityKind, id: DbId, fields: &Record) -> Result<(), StoreError> {
        let key = key_of(kind, fields)?;
        let data = serde_json::Value::Object(fields.clone());
        EntityRepo::update(&self.pool, kind, id, &key, &data)
            .await
            .map_err(backend)?
            .map(|_| ())
            .ok_or(StoreError::Missing { kind, id })
    }

    /// Runs every write inside one transaction. Returning early drops the
    /// transaction, which rolls it back.
    async fn apply_batch(
        &self,
        kind: EntityKind,
        writes: &[PlannedWrite],
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, BatchError> {
        let outside = |e: sqlx::Error| BatchError::outside_rows(backend(e));
        let mut tx = self.pool.begin().await.map_err(outside)?;
        let (mut inserted, mut updated) = (0, 0);

        for write in writes {
            if cancel.is_cancelled() {
                tx.rollback().await.map_err(outside)?;
                return Ok(BatchOutcome::Cancelled);
            }

            let at_row = |e: StoreError| BatchError::at_row(write.row_index, e);
            let data = serde_json::Value::Object(write.fields.clone());
            let existing = EntityRepo::find_by_natural_key(&mut *tx, kind, &write.key)
                .await
                .map_err(|e| at_row(backend(e)))?;

            match (existing, write.mode) {
                (Some(_), WriteMode::Insert) => {
                    return Err(at_row(StoreError::Duplicate { kind }));
                }
                (Some(row), WriteMode::Upsert) => {
                    EntityRepo::update(&mut *tx, kind, row.id, &write.key, &data)
                        .await
                        .map_err(|e| at_row(backend(e)))?
                        .ok_or_else(|| at_row(StoreError::Missing { kind, id: row.id }))?;
                    updated += 1;
                }
                (None, _) => {
                    EntityRepo::insert(&mut *tx, kind, &write.key, &data)
                        .await
                        .map_err(|e| at_row(backend(e)))?;
                    inserted += 1;
                }
            }
        }

        tx.commit().await.map_err(outside)?;
        Ok(BatchOutcome::Applied { inserted, updated })
    }
}

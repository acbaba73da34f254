//! Target entity store (leads, sales) written by the commit engine.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::schema::{EntityKind, NaturalKey, TargetSchema};
use crate::types::{DbId, Record};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Entity store backend error: {0}")]
    Backend(String),

    #[error("{kind} record {id} does not exist")]
    Missing { kind: EntityKind, id: DbId },

    #[error("{kind} record has no natural key")]
    NoNaturalKey { kind: EntityKind },

    #[error("{kind} record with this natural key already exists")]
    Duplicate { kind: EntityKind },
}

/// An existing record found by natural key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEntity {
    pub id: DbId,
    pub fields: Record,
}

// ── Batches ──────────────────────────────────────────────────────────

/// How a planned write treats a record that already has its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The key must still be free when the batch runs.
    Insert,
    /// Merge into the record with this key, or insert when there is none.
    Upsert,
}

/// One row's write, worked out ahead of time by the commit engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedWrite {
    pub row_index: usize,
    pub key: NaturalKey,
    pub fields: Record,
    pub mode: WriteMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Applied { inserted: usize, updated: usize },
    /// The token fired between writes; everything was rolled back.
    Cancelled,
}

/// A batch failed and was rolled back. `row_index` names the write that
/// failed; it is `None` when the transaction itself could not start or
/// commit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{source}")]
pub struct BatchError {
    pub row_index: Option<usize>,
    pub source: StoreError,
}

impl BatchError {
    pub fn at_row(row_index: usize, source: StoreError) -> Self {
        Self {
            row_index: Some(row_index),
            source,
        }
    }

    pub fn outside_rows(source: StoreError) -> Self {
        Self {
            row_index: None,
            source,
        }
    }
}

/// Persistence for imported records.
///
/// The engine is not assumed to be the only writer, so every commit
/// re-checks existence through `find_by_natural_key`.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_by_natural_key(
        &self,
        kind: EntityKind,
        key: &NaturalKey,
    ) -> Result<Option<StoredEntity>, StoreError>;

    async fn insert(&self, kind: EntityKind, fields: &Record) -> Result<DbId, StoreError>;

    async fn update(&self, kind: EntityKind, id: DbId, fields: &Record) -> Result<(), StoreError>;

    /// Apply `writes` in order, all or nothing. `cancel` is checked before
    /// each write; when it fires the batch is rolled back.
    async fn apply_batch(
        &self,
        kind: EntityKind,
        writes: &[PlannedWrite],
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, BatchError>;
}

// ── In-memory store ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct StoreTables {
    next_id: DbId,
    records: HashMap<EntityKind, HashMap<DbId, Record>>,
    by_key: HashMap<(EntityKind, NaturalKey), DbId>,
}

impl StoreTables {
    fn find(&self, kind: EntityKind, key: &NaturalKey) -> Option<DbId> {
        self.by_key.get(&(kind, key.clone())).copied()
    }

    fn insert(&mut self, kind: EntityKind, key: NaturalKey, fields: &Record) -> DbId {
        self.next_id += 1;
        let id = self.next_id;
        self.records.entry(kind).or_default().insert(id, fields.clone());
        self.by_key.insert((kind, key), id);
        id
    }

    fn merge(
        &mut self,
        kind: EntityKind,
        id: DbId,
        key: NaturalKey,
        fields: &Record,
    ) -> Result<(), StoreError> {
        let record = self
            .records
            .get_mut(&kind)
            .and_then(|t| t.get_mut(&id))
            .ok_or(StoreError::Missing { kind, id })?;
        for (field, value) in fields {
            record.insert(field.clone(), value.clone());
        }
        self.by_key.insert((kind, key), id);
        Ok(())
    }
}

/// Process-local entity store used by tests and by the API when no
/// database is configured.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    tables: RwLock<StoreTables>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, kind: EntityKind) -> usize {
        self.tables
            .read()
            .await
            .records
            .get(&kind)
            .map_or(0, HashMap::len)
    }

    /// All records of one kind ordered by id.
    pub async fn records(&self, kind: EntityKind) -> Vec<(DbId, Record)> {
        let tables = self.tables.read().await;
        let mut rows: Vec<(DbId, Record)> = tables
            .records
            .get(&kind)
            .map(|t| t.iter().map(|(id, r)| (*id, r.clone())).collect())
            .unwrap_or_default();
        rows.sort_by_key(|(id, _)| *id);
        rows
    }
}

fn key_of(kind: EntityKind, fields: &Record) -> Result<NaturalKey, StoreError> {
    NaturalKey::from_record(TargetSchema::for_kind(kind), fields)
        .ok_or(StoreError::NoNaturalKey { kind })
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find_by_natural_key(
        &self,
        kind: EntityKind,
        key: &NaturalKey,
    ) -> Result<Option<StoredEntity>, StoreError> {
        let tables = self.tables.read().await;
        let Some(id) = tables.find(kind, key) else {
            return Ok(None);
        };
        Ok(tables
            .records
            .get(&kind)
            .and_then(|t| t.get(&id))
            .map(|fields| StoredEntity {
                id,
                fields: fields.clone(),
            }))
    }

    async fn insert(&self, kind: EntityKind, fields: &Record) -> Result<DbId, StoreError> {
        let key = key_of(kind, fields)?;
        Ok(self.tables.write().await.insert(kind, key, fields))
    }

    async fn update(&self, kind: EntityKind, id: DbId, fields: &Record) -> Result<(), StoreError> {
        let key = key_of(kind, fields)?;
        self.tables.write().await.merge(kind, id, key, fields)
    }

    /// Writes go to a copy of the tables that replaces the live ones only
    /// once every write succeeded.
    async fn apply_batch(
        &self,
        kind: EntityKind,
        writes: &[PlannedWrite],
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, BatchError> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let (mut inserted, mut updated) = (0, 0);

        for write in writes {
            if cancel.is_cancelled() {
                return Ok(BatchOutcome::Cancelled);
            }
            match (staged.find(kind, &write.key), write.mode) {
                (Some(_), WriteMode::Insert) => {
                    return Err(BatchError::at_row(
                        write.row_index,
                        StoreError::Duplicate { kind },
                    ));
                }
                (Some(id), WriteMode::Upsert) => {
                    staged
                        .merge(kind, id, write.key.clone(), &write.fields)
                        .map_err(|e| BatchError::at_row(write.row_index, e))?;
                    updated += 1;
                }
                (None, _) => {
                    staged.insert(kind, write.key.clone(), &write.fields);
                    inserted += 1;
                }
            }
        }

        *tables = staged;
        Ok(BatchOutcome::Applied { inserted, updated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lead(email: &str, name: &str) -> Record {
        let mut r = Record::new();
        r.insert("email".into(), json!(email));
        r.insert("full_name".into(), json!(name));
        r
    }

    #[tokio::test]
    async fn insert_then_find_by_key() {
        let store = InMemoryEntityStore::new();
        let id = store.insert(EntityKind::Lead, &lead("a@x.com", "Ana")).await.unwrap();

        let key = NaturalKey(vec!["a@x.com".into()]);
        let found = store
            .find_by_natural_key(EntityKind::Lead, &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.fields["full_name"], json!("Ana"));
        assert!(store
            .find_by_natural_key(EntityKind::Sale, &key)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = InMemoryEntityStore::new();
        let id = store.insert(EntityKind::Lead, &lead("a@x.com", "Ana")).await.unwrap();
        store
            .update(EntityKind::Lead, id, &lead("a@x.com", "Ana María"))
            .await
            .unwrap();
        let records = store.records(EntityKind::Lead).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1["full_name"], json!("Ana María"));
    }

    #[tokio::test]
    async fn update_unknown_id_fails() {
        let store = InMemoryEntityStore::new();
        let err = store
            .update(EntityKind::Lead, 99, &lead("a@x.com", "Ana"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Missing {
                kind: EntityKind::Lead,
                id: 99
            }
        );
    }

    #[tokio::test]
    async fn insert_without_key_fails() {
        let store = InMemoryEntityStore::new();
        let err = store.insert(EntityKind::Lead, &Record::new()).await.unwrap_err();
        assert_eq!(err, StoreError::NoNaturalKey { kind: EntityKind::Lead });
    }

    fn planned(row_index: usize, email: &str, name: &str, mode: WriteMode) -> PlannedWrite {
        PlannedWrite {
            row_index,
            key: NaturalKey(vec![email.into()]),
            fields: lead(email, name),
            mode,
        }
    }

    #[tokio::test]
    async fn batch_inserts_then_upserts_in_order() {
        let store = InMemoryEntityStore::new();
        let writes = [
            planned(0, "a@x.com", "Ana", WriteMode::Insert),
            planned(1, "a@x.com", "Ana María", WriteMode::Upsert),
            planned(2, "b@x.com", "Bea", WriteMode::Upsert),
        ];

        let outcome = store
            .apply_batch(EntityKind::Lead, &writes, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome::Applied { inserted: 2, updated: 1 });

        let records = store.records(EntityKind::Lead).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1["full_name"], json!("Ana María"));
    }

    #[tokio::test]
    async fn failed_batch_leaves_store_untouched() {
        let store = InMemoryEntityStore::new();
        store.insert(EntityKind::Lead, &lead("c@x.com", "Cy")).await.unwrap();
        let writes = [
            planned(0, "a@x.com", "Ana", WriteMode::Insert),
            planned(1, "b@x.com", "Bea", WriteMode::Insert),
            planned(2, "c@x.com", "Cy", WriteMode::Insert),
        ];

        let err = store
            .apply_batch(EntityKind::Lead, &writes, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BatchError::at_row(2, StoreError::Duplicate { kind: EntityKind::Lead })
        );
        assert_eq!(store.count(EntityKind::Lead).await, 1);
    }

    #[tokio::test]
    async fn cancelled_batch_writes_nothing() {
        let store = InMemoryEntityStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = store
            .apply_batch(
                EntityKind::Lead,
                &[planned(0, "a@x.com", "Ana", WriteMode::Insert)],
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome::Cancelled);
        assert_eq!(store.count(EntityKind::Lead).await, 0);
    }
}

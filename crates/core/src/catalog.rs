//! Catalog of existing reference entities (closers, programs, payment
//! methods), keyed by natural key.
//!
//! The engine only reads and creates catalog entries through
//! [`CatalogProvider`]. Matching is exact and case-sensitive; a provider
//! that wants fuzzier matching does so behind `lookup`.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::schema::ReferenceKind;
use crate::types::DbId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("Catalog backend error: {0}")]
    Backend(String),

    #[error("Catalog key for {kind} must not be empty")]
    EmptyKey { kind: ReferenceKind },
}

/// Read/create access to the reference catalogs.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Find an entity by its exact natural key.
    async fn lookup(&self, kind: ReferenceKind, key: &str) -> Result<Option<DbId>, CatalogError>;

    /// Create an entity and return its id. Creating a key that already
    /// exists returns the existing id.
    async fn create(&self, kind: ReferenceKind, key: &str) -> Result<DbId, CatalogError>;

    /// All natural keys of one kind, sorted.
    async fn list(&self, kind: ReferenceKind) -> Result<Vec<String>, CatalogError>;
}

// ── Snapshot ─────────────────────────────────────────────────────────

/// Point-in-time copy of catalog keys used by the validator.
///
/// Load a fresh snapshot for every validation run; it is never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    keys: HashMap<ReferenceKind, BTreeSet<String>>,
}

impl CatalogSnapshot {
    /// Read every key of each requested kind from `provider`.
    pub async fn load(
        provider: &dyn CatalogProvider,
        kinds: &[ReferenceKind],
    ) -> Result<Self, CatalogError> {
        let mut keys = HashMap::new();
        for &kind in kinds {
            let listed = provider.list(kind).await?;
            keys.insert(kind, listed.into_iter().collect());
        }
        Ok(Self { keys })
    }

    pub fn from_keys<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ReferenceKind, S)>,
        S: Into<String>,
    {
        let mut snapshot = Self::default();
        for (kind, key) in entries {
            snapshot.keys.entry(kind).or_default().insert(key.into());
        }
        snapshot
    }

    pub fn contains(&self, kind: ReferenceKind, key: &str) -> bool {
        self.keys.get(&kind).is_some_and(|set| set.contains(key))
    }

    pub fn keys(&self, kind: ReferenceKind) -> impl Iterator<Item = &str> {
        self.keys
            .get(&kind)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }
}

// ── In-memory provider ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct CatalogTables {
    next_id: DbId,
    entries: HashMap<ReferenceKind, HashMap<String, DbId>>,
}

/// Process-local catalog used by tests and by the API when no database is
/// configured.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tables: RwLock<CatalogTables>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog pre-populated with `entries`.
    pub fn seeded<'a>(entries: impl IntoIterator<Item = (ReferenceKind, &'a str)>) -> Self {
        let mut tables = CatalogTables::default();
        for (kind, key) in entries {
            tables.next_id += 1;
            let id = tables.next_id;
            tables
                .entries
                .entry(kind)
                .or_default()
                .entry(key.to_string())
                .or_insert(id);
        }
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Number of entries of one kind.
    pub async fn count(&self, kind: ReferenceKind) -> usize {
        self.tables
            .read()
            .await
            .entries
            .get(&kind)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl CatalogProvider for InMemoryCatalog {
    async fn lookup(&self, kind: ReferenceKind, key: &str) -> Result<Option<DbId>, CatalogError> {
        let tables = self.tables.read().await;
        Ok(tables.entries.get(&kind).and_then(|t| t.get(key)).copied())
    }

    async fn create(&self, kind: ReferenceKind, key: &str) -> Result<DbId, CatalogError> {
        if key.trim().is_empty() {
            return Err(CatalogError::EmptyKey { kind });
        }
        let mut tables = self.tables.write().await;
        if let Some(id) = tables.entries.get(&kind).and_then(|t| t.get(key)) {
            return Ok(*id);
        }
        tables.next_id += 1;
        let id = tables.next_id;
        tables
            .entries
            .entry(kind)
            .or_default()
            .insert(key.to_string(), id);
        Ok(id)
    }

    async fn list(&self, kind: ReferenceKind) -> Result<Vec<String>, CatalogError> {
        let tables = self.tables.read().await;
        let mut keys: Vec<String> = tables
            .entries
            .get(&kind)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

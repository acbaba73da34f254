use std::sync::Arc;

use salesdesk_core::catalog::CatalogProvider;
use salesdesk_core::store::EntityStore;
use salesdesk_db::{DbPool, PgCatalog, PgEntityStore};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::sessions::SessionRegistry;

/// Where catalogs and imported records live.
#[derive(Clone)]
pub enum Backend {
    Postgres(DbPool),
    InMemory,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::InMemory => "memory",
        }
    }
}

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything is behind `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub backend: Backend,
    pub catalog: Arc<dyn CatalogProvider>,
    pub store: Arc<dyn EntityStore>,
    pub sessions: Arc<SessionRegistry>,
    /// Cancelled on server shutdown; every session token is a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// State backed by PostgreSQL.
    pub fn postgres(pool: DbPool, config: ServerConfig) -> Self {
        Self::build(
            config,
            Backend::Postgres(pool.clone()),
            Arc::new(PgCatalog::new(pool.clone())),
            Arc::new(PgEntityStore::new(pool)),
        )
    }

    /// State whose catalogs and records live in this process; nothing
    /// survives a restart.
    pub fn in_memory(
        config: ServerConfig,
        catalog: Arc<dyn CatalogProvider>,
        store: Arc<dyn EntityStore>,
    ) -> Self {
        Self::build(config, Backend::InMemory, catalog, store)
    }

    fn build(
        config: ServerConfig,
        backend: Backend,
        catalog: Arc<dyn CatalogProvider>,
        store: Arc<dyn EntityStore>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            config: Arc::new(config),
            backend,
            catalog,
            store,
            sessions: Arc::new(SessionRegistry::new(shutdown.clone())),
            shutdown,
        }
    }
}

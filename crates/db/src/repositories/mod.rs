pub mod catalog_repo;
pub mod entity_repo;

pub use catalog_repo::{CatalogRepo, PgCatalog};
pub use entity_repo::{EntityRepo, PgEntityStore};

use crate::catalog::CatalogError;
use crate::parser::ParseError;
use crate::store::StoreError;
use crate::validator::BlockingIssue;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Commit blocked by {} unaddressed issue(s)", issues.len())]
    ValidationBlocked { issues: Vec<BlockingIssue> },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

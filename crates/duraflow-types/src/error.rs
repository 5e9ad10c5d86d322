use thiserror::Error;

/// Errors from store operations (used by the trait definitions in
/// duraflow-core; implemented by the in-memory and SQLite stores).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

//! Database-specific error types and conversions.

use placement_core::error::PlacementError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Invalid stored value: {0}")]
    Decode(String),
}

impl From<DbError> for PlacementError {
    fn from(err: DbError) -> Self {
        PlacementError::Database(err.to_string())
    }
}

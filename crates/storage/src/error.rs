use domain::CommerceError;
use thiserror::Error;

/// Errors that can occur when talking to a storage, cache, lock or messaging backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be mapped onto the domain model.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// The backend is unreachable or refused the operation.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for CommerceError {
    fn from(err: StorageError) -> Self {
        CommerceError::Internal(err.to_string())
    }
}

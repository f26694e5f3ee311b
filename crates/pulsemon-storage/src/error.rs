use std::path::PathBuf;

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use pulsemon_storage::error::StorageError;
///
/// let err = StorageError::CounterOverflow { id: "requests".to_string() };
/// assert!(err.to_string().contains("requests"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Accumulating a counter would exceed the signed 64-bit range.
    #[error("Storage: counter {id} overflowed")]
    CounterOverflow { id: String },

    /// Reading or writing the snapshot file failed.
    #[error("Storage: I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The snapshot file could not be encoded or decoded.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An underlying database error.
    #[error("Storage: database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Schema migration failed; the database backend is unusable.
    #[error("Storage: migration failed: {0}")]
    Migration(sea_orm::DbErr),

    /// A stored row does not describe a valid metric.
    #[error("Storage: invalid row for {id}: {reason}")]
    InvalidRow { id: String, reason: String },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

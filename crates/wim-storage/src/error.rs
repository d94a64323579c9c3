use wim_common::dns::DnsNameError;

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use wim_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "domain",
///     id: "example.com".to_string(),
/// };
/// assert!(err.to_string().contains("example.com"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A record with the same unique key already exists.
    #[error("Storage: {entity} already exists (id={id})")]
    Duplicate { entity: &'static str, id: String },

    /// The asset name failed DNS syntax validation.
    #[error("Storage: invalid asset name: {0}")]
    InvalidName(#[from] DnsNameError),

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure (SAN lists, run reports).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error while preparing the data directory.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A column held a value that does not map onto the expected type.
    #[error("Storage: unexpected value '{value}' in column '{column}'")]
    CorruptValue { column: &'static str, value: String },

    /// The reclamation delete touched a different number of rows than the
    /// materialized candidate list; the transaction is rolled back.
    #[error("Storage: reclamation deleted {deleted} rows but {expected} were selected")]
    ReclaimMismatch { expected: usize, deleted: usize },
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

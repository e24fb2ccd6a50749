use rtmon_common::retry::is_connection_refused;
use rtmon_common::MetricError;
use sea_orm::{ConnAcquireErr, DbErr};

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use rtmon_storage::error::StorageError;
///
/// let err = StorageError::NotFound { id: "PollCount".to_string() };
/// assert!(err.is_not_found());
/// assert!(err.to_string().contains("PollCount"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Lookup miss.
    #[error("Storage: metric '{id}' not found")]
    NotFound { id: String },

    /// The metric payload does not match its type.
    #[error("Storage: invalid metric: {0}")]
    InvalidMetric(#[from] MetricError),

    /// The backing medium refused the connection, after any retry budget.
    #[error("Storage: backend unavailable: {0}")]
    Unavailable(String),

    /// A persisted snapshot could not be decoded on restore.
    #[error("Storage: corrupt snapshot '{path}': {reason}")]
    Corrupt { path: String, reason: String },

    /// The snapshot file has already been closed by shutdown.
    #[error("Storage: snapshot file is closed")]
    Closed,

    /// Any other database error (constraint, syntax, decoding).
    #[error("Storage: database error: {0}")]
    Database(DbErr),

    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

/// Returns true for database failures worth retrying: a refused connection,
/// or the pool giving up on acquiring one. The sqlx pool retries refused
/// dials internally until its acquire timeout, so a down server usually
/// surfaces as the timeout rather than as the refusal itself.
pub fn is_transient(err: &DbErr) -> bool {
    if matches!(err, DbErr::ConnectionAcquire(ConnAcquireErr::Timeout)) {
        return true;
    }
    if is_connection_refused(err) {
        return true;
    }
    matches!(err, DbErr::Conn(_))
        && err.to_string().to_ascii_lowercase().contains("pool timed out")
}

impl From<DbErr> for StorageError {
    fn from(err: DbErr) -> Self {
        if is_transient(&err) {
            StorageError::Unavailable(err.to_string())
        } else {
            StorageError::Database(err)
        }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

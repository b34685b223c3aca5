//! Error types for vpool.
//!
//! All errors use `thiserror` so callers get proper error chains. The REST
//! layer maps each variant to a single status via [`VpoolError::status_code`]
//! and may upgrade an `InvalidOperation` to 409 for conflicting requests.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for vpool operations.
pub type Result<T> = std::result::Result<T, VpoolError>;

/// Main error type for vpool.
#[derive(Error, Debug)]
pub enum VpoolError {
    // Request errors
    #[error("Missing parameter: {param}")]
    MissingParameter {
        /// First missing key, in request field order.
        param: String,
        /// Every missing key.
        missing: Vec<String>,
    },

    #[error("Invalid operation: {reason}")]
    InvalidOperation { reason: String },

    // Lookup errors
    #[error("Storage pool not found: {name}")]
    PoolNotFound { name: String },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Object not found: {collection}/{key}")]
    ObjectNotFound { collection: String, key: String },

    // External manager errors
    #[error("Operation failed: {message}")]
    OperationFailed { message: String },

    // Task registry errors
    #[error("Task queue full: {pending} tasks pending (limit {limit})")]
    TaskQueueFull { pending: usize, limit: usize },

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Database migration failed: {reason}")]
    MigrationFailed { reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VpoolError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }

    /// Shorthand for an [`VpoolError::InvalidOperation`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }

    /// Whether this error means the addressed resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PoolNotFound { .. } | Self::TaskNotFound { .. } | Self::ObjectNotFound { .. }
        )
    }

    /// HTTP status the REST layer reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingParameter { .. } | Self::InvalidOperation { .. } => 400,
            Self::PoolNotFound { .. } | Self::TaskNotFound { .. } | Self::ObjectNotFound { .. } => {
                404
            }
            Self::TaskQueueFull { .. } => 503,
            _ => 500,
        }
    }
}

//! Error types for hashequiv.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions. Only store failures cross the engine boundary as
//! errors; "not found" and duplicate inserts resolve to normal values.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors that occur before a request reaches the engine.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field was empty.
    #[error("Required field '{field}' is missing")]
    MissingField {
        /// Field name.
        field: String,
    },

    /// A field was longer than the server accepts.
    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        /// Field name.
        field: String,
        /// Limit in bytes.
        max_length: usize,
    },
}

/// Execution errors that occur while resolving a request.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The store rejected or could not serve the operation.
    #[error("Equivalence store unavailable: {message}")]
    StoreUnavailable {
        /// Underlying error text.
        message: String,
    },

    /// Opening, replaying or compacting the database failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Underlying error text.
        message: String,
    },
}

impl From<StorageError> for ExecutionError {
    fn from(err: StorageError) -> Self {
        Self::StoreUnavailable {
            message: err.to_string(),
        }
    }
}

/// Transport errors for client-server communication.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach or bind the server.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Underlying error text.
        message: String,
    },

    /// The server answered with a non-OK status.
    #[error("Server error (code {code}): {message}")]
    ServerError {
        /// gRPC status code.
        code: u32,
        /// Status message.
        message: String,
    },
}

/// Top-level error type for hashequiv.
#[derive(Debug, Error)]
pub enum HashEquivError {
    /// Malformed request.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Store failure while serving a request.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// RPC layer failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Config file could not be read or parsed.
    #[error("Invalid config {}: {reason}", .path.display())]
    Config {
        /// File that was being loaded.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Broken internal invariant.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl From<StorageError> for HashEquivError {
    fn from(err: StorageError) -> Self {
        Self::Execution(err.into())
    }
}

impl HashEquivError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a storage error from a message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::Storage {
            message: message.into(),
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Creates a config error for the given file.
    #[must_use]
    pub fn config(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this is a config error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the store could not serve the request.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::StoreUnavailable { .. }))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false, // Validation errors won't change on retry
            Self::Execution(e) => matches!(e, ExecutionError::StoreUnavailable { .. }),
            Self::Transport(e) => match e {
                TransportError::ConnectionFailed { .. } => true,
                TransportError::ServerError { code, .. } => *code >= 500,
            },
            Self::Config { .. } | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for hashequiv operations.
pub type HashEquivResult<T> = Result<T, HashEquivError>;

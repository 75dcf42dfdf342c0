//! Core error types for stillpoint-core.
//!
//! This module defines the error hierarchy using thiserror. Callers are
//! expected to match on [`CoreError`] to decide between surfacing an error
//! to the user (`InvalidDuration`, `NotFound`) and retrying with backoff
//! (`TransientStoreFailure`).

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for stillpoint-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Session duration was zero, negative or not a finite number
    #[error("Invalid duration: {minutes} minutes (must be a finite number greater than 0)")]
    InvalidDuration { minutes: f64 },

    /// Entity missing, or not owned by the given user
    #[error("{entity} '{id}' not found for user '{user_id}'")]
    NotFound {
        entity: &'static str,
        id: String,
        user_id: String,
    },

    /// The store is busy or locked; the caller may retry the whole operation
    #[error("Store temporarily unavailable: {0}")]
    TransientStoreFailure(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn technique_not_found(user_id: &str, technique_id: &str) -> Self {
        CoreError::NotFound {
            entity: "technique",
            id: technique_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    pub(crate) fn session_not_found(user_id: &str, session_id: &str) -> Self {
        CoreError::NotFound {
            entity: "session",
            id: session_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    /// Whether the caller should retry the operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::TransientStoreFailure(_))
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Could not determine the data directory
    #[error("Could not determine data directory: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Required text field was empty
    #[error("'{0}' must not be empty")]
    Empty(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        DatabaseError::QueryFailed(err.to_string())
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _msg)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                CoreError::TransientStoreFailure(err.to_string())
            }
            _ => CoreError::Database(DatabaseError::from(err)),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

//! Error types for bulk loading
//!
//! Every run either completes or fails with exactly one [`LoadError`]. Lower
//! layers report [`DriverError`] (database side) and [`StorageError`] (file
//! side); the orchestrator decides which run-level variant they become.

use crate::validation::ValidationFailure;
use thiserror::Error;

/// Result type alias for a bulk-load run
pub type Result<T> = std::result::Result<T, LoadError>;

/// Result type alias for database driver operations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Fatal outcome of a bulk-load run
#[derive(Error, Debug)]
pub enum LoadError {
    /// The configuration failed shape checks; nothing was touched.
    #[error("Invalid configuration: {}", format_failures(.0))]
    ConfigValidation(Vec<ValidationFailure>),

    /// The database could not be reached or its metadata could not be read.
    #[error("Failed to reach database {target}: {source}")]
    Connectivity {
        target: String,
        #[source]
        source: DriverError,
    },

    #[error(
        "Table {table} does not exist. Check that 'tableName' is set correctly and that \
         the connection string {target} points to the intended database."
    )]
    TableNotFound { table: String, target: String },

    #[error("Path {path} not found. Provide a path that exists in the configured storage.")]
    PathNotFound { path: String },

    /// Anything that went wrong once the copy channel was in play.
    #[error("Failed while running copy statement {statement}: {source}")]
    LoadExecution {
        statement: String,
        #[source]
        source: LoadFailure,
    },
}

impl LoadError {
    pub(crate) fn load_execution(statement: &str, source: impl Into<LoadFailure>) -> Self {
        Self::LoadExecution {
            statement: statement.to_string(),
            source: source.into(),
        }
    }
}

/// Underlying cause of a [`LoadError::LoadExecution`]
#[derive(Error, Debug)]
pub enum LoadFailure {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised by a database driver or its copy channel
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error while streaming to the database: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid connection target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    /// A copy channel operation was called out of order.
    #[error("Copy channel cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// Failure reported by a driver that has no richer error type.
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Errors raised while enumerating or reading input files
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Invalid storage path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object store error on {path}: {message}")]
    ObjectStore { path: String, message: String },
}

fn format_failures(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

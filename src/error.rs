//! Error types for the txt-history-store library.
//!
//! This module provides custom error types using `thiserror` so that each
//! stage of a load run reports a specific, matchable failure.

use thiserror::Error;

/// Errors that can occur while ingesting artifacts or querying the store.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Malformed address-book or application configuration entry
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An artifact could not be opened or read; the store was not touched
    #[error("Failed to read artifact {artifact}: {source}")]
    ArtifactRead {
        /// Artifact path as given by the caller
        artifact: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A write failed mid-artifact; the artifact's transaction was rolled back
    #[error("Storage write failed for artifact {artifact}: {source}")]
    StorageWrite {
        /// Artifact whose transaction was rolled back
        artifact: String,
        /// Underlying SQLite failure
        #[source]
        source: rusqlite::Error,
    },

    /// Database-related errors outside an artifact transaction
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV export errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

impl IngestError {
    /// True for failures that only affect one artifact of a batch
    #[must_use]
    pub const fn is_per_artifact(&self) -> bool {
        matches!(self, Self::ArtifactRead { .. } | Self::StorageWrite { .. })
    }
}

/// Convenience type alias for Result with IngestError
pub type Result<T> = std::result::Result<T, IngestError>;

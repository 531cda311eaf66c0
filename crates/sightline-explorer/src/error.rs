//! Error types for the explorer.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for explorer operations.
pub type Result<T> = std::result::Result<T, ExplorerError>;

/// Errors that can occur while building or querying embedding tables.
#[derive(Debug, Error)]
pub enum ExplorerError {
    /// Missing table or dataset, conflicting arguments, unknown split.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Out-of-range parameter or unusable input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An image referenced by the dataset or a query is missing.
    #[error("Image Not Found {}", .0.display())]
    ImageNotFound(PathBuf),

    /// Dataset descriptor could not be read or understood.
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Failure reported by the embedding model.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Error from the vector store.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation intentionally not provided.
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExplorerError {
    /// Shorthand for the error raised by every operation that needs a table.
    pub(crate) fn no_table() -> Self {
        ExplorerError::Config("Table is not created. Please create the table first.".to_string())
    }
}

impl From<serde_json::Error> for ExplorerError {
    fn from(e: serde_json::Error) -> Self {
        ExplorerError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for ExplorerError {
    fn from(e: serde_yaml::Error) -> Self {
        ExplorerError::Dataset(e.to_string())
    }
}

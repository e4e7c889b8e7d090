//! Core error types for k-Forward

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the k-Forward ecosystem
#[derive(Error, Debug)]
pub enum KfError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Tunnel could not be opened
    #[error("Failed to open tunnel: {0}")]
    Open(#[from] OpenError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by the transport when opening a tunnel
///
/// The message is meant to be shown to the user as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct OpenError(pub String);

impl OpenError {
    /// Create a new open error
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// The message reported by the transport
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<String> for OpenError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for OpenError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Persistent storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Storage file could not be read or written
    #[error("Storage I/O failed for {path}: {source}")]
    Io {
        /// File backing the store
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Stored document is not valid JSON
    #[error("Invalid storage document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

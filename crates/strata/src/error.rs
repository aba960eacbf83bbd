//! Error types for Strata

use thiserror::Error;

/// Main error type for Strata operations
#[derive(Error, Debug)]
pub enum StrataError {
    /// Invalid input: importance out of range, bad vector dimension,
    /// too few sources for a reflection
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-finite or out-of-range vector component
    #[error("Quantization error: {0}")]
    Quantization(String),

    /// A storage, vector or embedding backend failed
    #[error("Backend unavailable ({backend}): {message}")]
    BackendUnavailable { backend: String, message: String },

    /// Malformed cached payload
    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested memory does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// An operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse errors
    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl StrataError {
    /// Shorthand for a backend failure
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Whether a search path may swallow this error and degrade to an
    /// empty result instead of failing the whole query.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. }
                | Self::Timeout(_)
                | Self::Storage(_)
                | Self::CacheCorruption(_)
        )
    }
}

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

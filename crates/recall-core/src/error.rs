use thiserror::Error;

/// Top-level error type for the Recall system.
///
/// Backend crates map their library errors (rusqlite, reqwest) into the
/// string-carrying variants so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecallError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt persisted state: {0}")]
    Corrupt(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Similarity index is empty")]
    EmptyIndex,

    #[error("Embedding provider failure: {0}")]
    Provider(String),

    #[error("Embedding provider timed out after {timeout_ms} ms")]
    ProviderTimeout { timeout_ms: u64 },

    #[error("Index/catalog misalignment: index has {index} slots, catalog has {catalog}")]
    Misaligned { index: usize, catalog: usize },

    #[error("Store halted after an alignment violation; reinitialize before mutating")]
    Halted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RecallError {
    /// Whether this error came from the embedding provider (failure or timeout).
    pub fn is_provider(&self) -> bool {
        matches!(
            self,
            RecallError::Provider(_) | RecallError::ProviderTimeout { .. }
        )
    }
}

impl From<toml::de::Error> for RecallError {
    fn from(err: toml::de::Error) -> Self {
        RecallError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for RecallError {
    fn from(err: toml::ser::Error) -> Self {
        RecallError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for RecallError {
    fn from(err: serde_json::Error) -> Self {
        RecallError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Recall operations.
pub type Result<T> = std::result::Result<T, RecallError>;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RecallError, Result};

/// Top-level configuration for Recall.
///
/// Loaded from `~/.recall/config.toml` by default. Every section falls back
/// to its defaults, so a partial file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecallConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl RecallConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RecallConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or is invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject settings the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if !matches!(c.strategy.as_str(), "paragraph" | "fixed") {
            return Err(RecallError::Config(format!(
                "unknown chunking strategy '{}'",
                c.strategy
            )));
        }
        if c.max_size == 0 {
            return Err(RecallError::Config("chunking.max_size must be > 0".into()));
        }
        if c.min_size > c.max_size {
            return Err(RecallError::Config(format!(
                "chunking.min_size ({}) exceeds max_size ({})",
                c.min_size, c.max_size
            )));
        }
        if c.chunk_size == 0 || c.overlap >= c.chunk_size {
            return Err(RecallError::Config(format!(
                "chunking.overlap ({}) must be smaller than chunk_size ({})",
                c.overlap, c.chunk_size
            )));
        }

        let e = &self.embedding;
        if !matches!(e.provider.as_str(), "ollama" | "mock") {
            return Err(RecallError::Config(format!(
                "unknown embedding provider '{}'",
                e.provider
            )));
        }
        if e.dimension == 0 {
            return Err(RecallError::Config("embedding.dimension must be > 0".into()));
        }
        if e.timeout_secs == 0 {
            return Err(RecallError::Config("embedding.timeout_secs must be > 0".into()));
        }

        if self.search.overfetch_factor < 3 {
            return Err(RecallError::Config(format!(
                "search.overfetch_factor must be at least 3, got {}",
                self.search.overfetch_factor
            )));
        }

        if !matches!(self.storage.backend.as_str(), "file" | "sqlite") {
            return Err(RecallError::Config(format!(
                "unknown storage backend '{}'",
                self.storage.backend
            )));
        }
        Ok(())
    }

    /// Data directory with a leading `~` expanded against `HOME`.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir)
    }
}

/// Expand a leading `~/` using the `HOME` (or `USERPROFILE`) variable.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"));
        if let Ok(home) = home {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the index, catalog, and SQLite files.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.recall/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Text chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// "paragraph" (paragraph, then sentence packing) or "fixed".
    pub strategy: String,
    /// Paragraphs shorter than this many characters are dropped.
    pub min_size: usize,
    /// Paragraphs longer than this many characters are re-split by sentence.
    pub max_size: usize,
    /// Window size for the fixed strategy.
    pub chunk_size: usize,
    /// Characters shared by consecutive fixed windows.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: "paragraph".to_string(),
            min_size: 50,
            max_size: 1000,
            chunk_size: 500,
            overlap: 100,
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "ollama" or "mock".
    pub provider: String,
    /// Model name passed to the provider.
    pub model: String,
    /// Provider base URL.
    pub base_url: String,
    /// Vector dimension. Fixed for the lifetime of a store.
    pub dimension: usize,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Substitute zero vectors for failed embeddings instead of aborting.
    pub degraded: bool,
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimension: 768,
            timeout_secs: 30,
            degraded: false,
        }
    }
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default number of results.
    pub default_limit: usize,
    /// Candidates fetched per requested result. At least 3.
    pub overfetch_factor: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            overfetch_factor: 3,
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// "file" (index + catalog files) or "sqlite".
    pub backend: String,
    /// Index file name, relative to the data directory.
    pub index_file: String,
    /// Catalog file name, relative to the data directory.
    pub catalog_file: String,
    /// SQLite database file name, relative to the data directory.
    pub sqlite_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            index_file: "vectors.idx".to_string(),
            catalog_file: "catalog.json".to_string(),
            sqlite_file: "vectors.db".to_string(),
        }
    }
}

//! CLI argument definitions for the Recall binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use recall_core::config::{expand_home, RecallConfig};
use recall_core::error::{RecallError, Result};
use recall_core::types::Metadata;

/// Recall - long-term memory search over an embedding-backed similarity index.
#[derive(Parser, Debug)]
#[command(name = "recall", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the index and catalog.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Index a document, replacing any earlier content under the same id.
    Add {
        /// Document id. A `mem_<uuid>` id is generated when omitted.
        doc_id: Option<String>,
        #[command(flatten)]
        content: ContentArgs,
        /// Owner metadata as a JSON object.
        #[arg(short = 'm', long)]
        metadata: Option<String>,
    },
    /// Replace a document's content, merge into its metadata, or both.
    Update {
        doc_id: String,
        #[command(flatten)]
        content: ContentArgs,
        /// Metadata to merge (or, with new content, to apply) as a JSON object.
        #[arg(short = 'm', long)]
        metadata: Option<String>,
    },
    /// Find the documents most similar to a query.
    Search {
        query: String,
        /// Maximum number of documents to return.
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show the live chunks of a document.
    Chunks { doc_id: String },
    /// Show index and catalog counts.
    Stats,
    /// Drop tombstoned slots and renumber the rest.
    Compact,
}

/// Document text given inline or read from a file.
#[derive(Args, Debug, Default)]
#[group(multiple = false)]
pub struct ContentArgs {
    /// Text to index.
    #[arg(short = 't', long)]
    pub text: Option<String>,
    /// File whose contents are indexed.
    #[arg(short = 'f', long)]
    pub file: Option<PathBuf>,
}

impl ContentArgs {
    /// The supplied content, if any.
    pub fn read(&self) -> Result<Option<String>> {
        match (&self.text, &self.file) {
            (Some(text), _) => Ok(Some(text.clone())),
            (None, Some(path)) => Ok(Some(std::fs::read_to_string(path)?)),
            (None, None) => Ok(None),
        }
    }
}

/// Parse a `--metadata` argument into an object.
pub fn parse_metadata(raw: Option<&str>) -> Result<Option<Metadata>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<serde_json::Value>(raw)? {
        serde_json::Value::Object(map) => Ok(Some(map)),
        other => Err(RecallError::Config(format!(
            "metadata must be a JSON object, got {}",
            other
        ))),
    }
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > RECALL_CONFIG env var > ~/.recall/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("RECALL_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory.
    ///
    /// Priority: --data-dir flag > RECALL_DATA_DIR env var > config file value.
    pub fn resolve_data_dir(&self, config: &RecallConfig) -> PathBuf {
        if let Some(ref p) = self.data_dir {
            return p.clone();
        }
        if let Ok(p) = std::env::var("RECALL_DATA_DIR") {
            return expand_home(&p);
        }
        config.data_dir()
    }

    /// Resolve the log filter used when RUST_LOG is unset.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config: &RecallConfig) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config.general.log_level.clone())
    }
}

fn default_config_path() -> PathBuf {
    expand_home("~/.recall/config.toml")
}

//! Recall application binary - composition root.
//!
//! 1. Parse arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open the vector store (embedding provider + persistence backend)
//! 4. Run one command and print its result as JSON

mod cli;

use std::path::Path;

use clap::Parser;
use serde::Serialize;
use uuid::Uuid;

use recall_core::config::RecallConfig;
use recall_core::error::{RecallError, Result};
use recall_core::types::Metadata;
use recall_vector::VectorStore;

use cli::{parse_metadata, CliArgs, Command};

/// Load the config file if it exists; a missing file means defaults.
fn load_config(path: &Path) -> Result<RecallConfig> {
    if path.exists() {
        RecallConfig::load(path)
    } else {
        Ok(RecallConfig::default())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command, store: &VectorStore, config: &RecallConfig) -> Result<()> {
    match command {
        Command::Add {
            doc_id,
            content,
            metadata,
        } => {
            let text = content.read()?.ok_or_else(|| {
                RecallError::Config("add needs --text or --file".to_string())
            })?;
            let metadata = parse_metadata(metadata.as_deref())?.unwrap_or_default();
            let doc_id = doc_id.unwrap_or_else(|| format!("mem_{}", Uuid::new_v4()));
            let slots = store.add(&doc_id, &text, metadata).await?;
            print_json(&serde_json::json!({ "doc_id": doc_id, "slots": slots }))
        }
        Command::Update {
            doc_id,
            content,
            metadata,
        } => {
            let text = content.read()?;
            let metadata: Option<Metadata> = parse_metadata(metadata.as_deref())?;
            if text.is_none() && metadata.is_none() {
                return Err(RecallError::Config(
                    "update needs --text, --file, or --metadata".to_string(),
                ));
            }
            let updated = store.update(&doc_id, text.as_deref(), metadata).await?;
            if !updated {
                tracing::warn!(doc_id = %doc_id, "Document not present, nothing updated");
            }
            print_json(&serde_json::json!({ "doc_id": doc_id, "updated": updated }))
        }
        Command::Search { query, limit } => {
            let limit = limit.unwrap_or(config.search.default_limit);
            print_json(&store.search(&query, limit).await?)
        }
        Command::Chunks { doc_id } => print_json(&store.chunks_of(&doc_id).await),
        Command::Stats => print_json(&store.stats().await),
        Command::Compact => print_json(&store.compact().await?),
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = load_config(&config_file)?;

    // Tracing. RUST_LOG wins over --log-level and the config file.
    let level = args.resolve_log_level(&config);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::debug!(path = %config_file.display(), "Configuration resolved");

    let data_dir = args.resolve_data_dir(&config);
    let store = match VectorStore::from_config(&config, &data_dir) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(path = %data_dir.display(), error = %e, "Failed to open vector store");
            return Err(e.into());
        }
    };

    run(args.command, &store, &config).await?;
    Ok(())
}

//! Recall Storage crate - persistence backends for the vector store.
//!
//! Implements `CatalogPersistence` three ways: paired index/catalog files,
//! a WAL-mode SQLite database, and an in-memory holder for tests.

pub mod codec;
pub mod db;
pub mod file;
pub mod memory;
pub mod migrations;
pub mod sqlite;

use std::path::Path;

use recall_core::config::StorageConfig;
use recall_core::error::{RecallError, Result};
use recall_core::persistence::CatalogPersistence;

pub use db::Database;
pub use file::FilePersistence;
pub use memory::MemoryPersistence;
pub use sqlite::SqlitePersistence;

/// Build the backend named by `config.backend`, rooted at `data_dir`.
pub fn open_persistence(
    config: &StorageConfig,
    data_dir: &Path,
) -> Result<Box<dyn CatalogPersistence>> {
    match config.backend.as_str() {
        "file" => Ok(Box::new(FilePersistence::in_dir(
            data_dir,
            &config.index_file,
            &config.catalog_file,
        ))),
        "sqlite" => Ok(Box::new(SqlitePersistence::open(
            &data_dir.join(&config.sqlite_file),
        )?)),
        other => Err(RecallError::Config(format!(
            "unknown storage backend '{}'",
            other
        ))),
    }
}

//! SQLite connection holder for snapshot persistence.
//!
//! A snapshot flush must be durable once it returns, so connections run in
//! WAL mode with `synchronous = FULL`. Flushes go through [`Database::transaction`]
//! and either commit whole or roll back.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

use recall_core::error::{RecallError, Result};

use crate::migrations;

const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
                       PRAGMA synchronous = FULL;
                       PRAGMA cache_size = -16384;";

/// One connection, serialized behind a mutex. Schema migrations are applied
/// before the handle is returned.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file at `path`, creating parent
    /// directories as needed.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| RecallError::Storage(format!("Failed to open database: {}", e)))?;
        let db = Self::prepare(conn)?;
        info!(path = %path.display(), "Snapshot database opened");
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RecallError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.execute_batch(PRAGMAS)
            .map_err(|e| RecallError::Storage(format!("Failed to set pragmas: {}", e)))?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RecallError::Storage(format!("Database lock poisoned: {}", e)))
    }

    /// Run a read against the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one transaction. It commits only if `f` succeeds;
    /// any error rolls the whole flush back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| RecallError::Storage(format!("Failed to begin transaction: {}", e)))?;
        let out = f(&tx)?;
        tx.commit()
            .map_err(|e| RecallError::Storage(format!("Failed to commit transaction: {}", e)))?;
        debug!("Transaction committed");
        Ok(out)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

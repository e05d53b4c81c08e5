//! Database schema migrations.
//!
//! Applies the vector-store schema: store_meta, vectors, chunks, and
//! document_slots, tracked through schema_migrations.

use rusqlite::Connection;
use tracing::info;

use recall_core::error::RecallError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), RecallError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| RecallError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| RecallError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: vector_store_schema");
    }

    Ok(())
}

/// Version 1: index rows, catalog rows, document index, and store metadata.
fn apply_v1(conn: &Connection) -> Result<(), RecallError> {
    conn.execute_batch(
        "
        -- Key/value facts about the persisted pair (dimension, slot_count).
        CREATE TABLE IF NOT EXISTS store_meta (
            key             TEXT PRIMARY KEY NOT NULL,
            value           TEXT NOT NULL
        );

        -- Similarity index rows: one normalized little-endian f32 vector per slot.
        CREATE TABLE IF NOT EXISTS vectors (
            slot            INTEGER PRIMARY KEY NOT NULL,
            embedding       BLOB NOT NULL
        );

        -- Chunk catalog rows, index-aligned with vectors.
        CREATE TABLE IF NOT EXISTS chunks (
            slot            INTEGER PRIMARY KEY NOT NULL,
            doc_id          TEXT NOT NULL,
            sequence        INTEGER NOT NULL,
            content         TEXT NOT NULL,
            metadata        TEXT NOT NULL DEFAULT '{}',
            live            INTEGER NOT NULL DEFAULT 1
                            CHECK (live IN (0, 1))
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_doc
            ON chunks (doc_id, sequence ASC);

        -- Document index: ordered slots registered per doc_id.
        CREATE TABLE IF NOT EXISTS document_slots (
            doc_id          TEXT NOT NULL,
            position        INTEGER NOT NULL,
            slot            INTEGER NOT NULL,
            PRIMARY KEY (doc_id, position)
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'vector_store_schema');
        ",
    )
    .map_err(|e| RecallError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

//! SQLite-backed persistence for the index/catalog pair.
//!
//! Every save rewrites the four tables inside one transaction, so a crash
//! leaves either the previous or the new snapshot, never a blend.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use recall_core::error::{RecallError, Result};
use recall_core::persistence::CatalogPersistence;
use recall_core::types::{Chunk, Metadata, SnapshotRef, StoreSnapshot};

use crate::codec::{get_f32s, put_f32s};
use crate::db::Database;

fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> RecallError + '_ {
    move |e| RecallError::Storage(format!("{}: {}", context, e))
}

/// Index/catalog persistence in a SQLite database.
pub struct SqlitePersistence {
    db: Arc<Database>,
    location: String,
}

impl SqlitePersistence {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            db: Arc::new(Database::new(path)?),
            location: path.display().to_string(),
        })
    }

    /// Use an already-open database.
    pub fn with_database(db: Arc<Database>) -> Self {
        Self {
            db,
            location: "sqlite (shared connection)".to_string(),
        }
    }

    /// In-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            db: Arc::new(Database::in_memory()?),
            location: "sqlite (memory)".to_string(),
        })
    }
}

impl CatalogPersistence for SqlitePersistence {
    fn load(&self) -> Result<Option<StoreSnapshot>> {
        self.db.with_conn(|conn| {
            let Some(slot_count) = read_meta(conn, "slot_count")? else {
                return Ok(None);
            };
            let dimension = read_meta(conn, "dimension")?.ok_or_else(|| {
                RecallError::Corrupt("store_meta has slot_count but no dimension".to_string())
            })?;

            let vectors = read_vectors(conn, dimension)?;
            let chunks = read_chunks(conn)?;
            let documents = read_documents(conn)?;

            if chunks.len() != slot_count {
                return Err(RecallError::Corrupt(format!(
                    "store_meta records {} slots but catalog has {}",
                    slot_count,
                    chunks.len()
                )));
            }

            let snapshot = StoreSnapshot {
                dimension,
                vectors,
                chunks,
                documents,
            };
            snapshot.verify()?;
            info!(slots = slot_count, dimension, "Loaded snapshot from SQLite");
            Ok(Some(snapshot))
        })
    }

    fn save(&self, snapshot: SnapshotRef<'_>) -> Result<()> {
        snapshot.verify()?;
        self.db.transaction(|tx| {
            tx.execute_batch(
                "DELETE FROM vectors;
                 DELETE FROM chunks;
                 DELETE FROM document_slots;",
            )
            .map_err(storage_err("Failed to clear tables"))?;

            {
                let mut insert_vector = tx
                    .prepare("INSERT INTO vectors (slot, embedding) VALUES (?1, ?2)")
                    .map_err(storage_err("Failed to prepare vector insert"))?;
                let mut blob = Vec::with_capacity(snapshot.dimension * 4);
                for (slot, row) in snapshot.vectors.chunks(snapshot.dimension).enumerate() {
                    blob.clear();
                    put_f32s(&mut blob, row);
                    insert_vector
                        .execute(params![slot as i64, blob])
                        .map_err(storage_err("Failed to insert vector"))?;
                }

                let mut insert_chunk = tx
                    .prepare(
                        "INSERT INTO chunks (slot, doc_id, sequence, content, metadata, live)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )
                    .map_err(storage_err("Failed to prepare chunk insert"))?;
                for chunk in snapshot.chunks {
                    let metadata = serde_json::to_string(&chunk.metadata)?;
                    insert_chunk
                        .execute(params![
                            chunk.slot as i64,
                            chunk.doc_id,
                            chunk.sequence as i64,
                            chunk.content,
                            metadata,
                            chunk.live as i64,
                        ])
                        .map_err(storage_err("Failed to insert chunk"))?;
                }

                let mut insert_slot = tx
                    .prepare("INSERT INTO document_slots (doc_id, position, slot) VALUES (?1, ?2, ?3)")
                    .map_err(storage_err("Failed to prepare document insert"))?;
                for (doc_id, slots) in snapshot.documents {
                    for (position, slot) in slots.iter().enumerate() {
                        insert_slot
                            .execute(params![doc_id, position as i64, *slot as i64])
                            .map_err(storage_err("Failed to insert document slot"))?;
                    }
                }
            }

            write_meta(tx, "dimension", snapshot.dimension)?;
            write_meta(tx, "slot_count", snapshot.slot_count())?;
            debug!(slots = snapshot.slot_count(), "Snapshot written to SQLite");
            Ok(())
        })
    }

    fn describe(&self) -> String {
        self.location.clone()
    }
}

fn read_meta(conn: &Connection, key: &str) -> Result<Option<usize>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage_err("Failed to read store_meta"))?;

    value
        .map(|v| {
            v.parse::<usize>().map_err(|e| {
                RecallError::Corrupt(format!("store_meta {} = '{}': {}", key, v, e))
            })
        })
        .transpose()
}

fn write_meta(conn: &Connection, key: &str, value: usize) -> Result<()> {
    conn.execute(
        "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value.to_string()],
    )
    .map_err(storage_err("Failed to write store_meta"))?;
    Ok(())
}

fn read_vectors(conn: &Connection, dimension: usize) -> Result<Vec<f32>> {
    let mut stmt = conn
        .prepare("SELECT slot, embedding FROM vectors ORDER BY slot ASC")
        .map_err(storage_err("Failed to prepare vector scan"))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))
        .map_err(storage_err("Failed to scan vectors"))?;

    let mut vectors = Vec::new();
    for (expected, row) in rows.enumerate() {
        let (slot, blob) = row.map_err(storage_err("Failed to read vector row"))?;
        if slot != expected as i64 {
            return Err(RecallError::Corrupt(format!(
                "vector slot {} found where {} expected",
                slot, expected
            )));
        }
        let row = get_f32s(&blob)?;
        if row.len() != dimension {
            return Err(RecallError::Corrupt(format!(
                "vector at slot {} has {} components, expected {}",
                slot,
                row.len(),
                dimension
            )));
        }
        vectors.extend_from_slice(&row);
    }
    Ok(vectors)
}

fn read_chunks(conn: &Connection) -> Result<Vec<Chunk>> {
    let mut stmt = conn
        .prepare(
            "SELECT slot, doc_id, sequence, content, metadata, live
             FROM chunks ORDER BY slot ASC",
        )
        .map_err(storage_err("Failed to prepare chunk scan"))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })
        .map_err(storage_err("Failed to scan chunks"))?;

    let mut chunks = Vec::new();
    for row in rows {
        let (slot, doc_id, sequence, content, metadata, live) =
            row.map_err(storage_err("Failed to read chunk row"))?;
        let metadata: Metadata = serde_json::from_str(&metadata)?;
        chunks.push(Chunk {
            slot: slot as usize,
            doc_id,
            sequence: sequence as usize,
            content,
            metadata,
            live: live != 0,
        });
    }
    Ok(chunks)
}

fn read_documents(conn: &Connection) -> Result<BTreeMap<String, Vec<usize>>> {
    let mut stmt = conn
        .prepare("SELECT doc_id, slot FROM document_slots ORDER BY doc_id ASC, position ASC")
        .map_err(storage_err("Failed to prepare document scan"))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(storage_err("Failed to scan document slots"))?;

    let mut documents: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for row in rows {
        let (doc_id, slot) = row.map_err(storage_err("Failed to read document row"))?;
        documents.entry(doc_id).or_default().push(slot as usize);
    }
    Ok(documents)
}

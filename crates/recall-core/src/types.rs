use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RecallError, Result};

/// Free-form key/value metadata attached to every chunk.
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata key stamped when a chunk is first recorded.
pub const CREATED_AT: &str = "created_at";

/// Metadata key stamped whenever a chunk's metadata changes.
pub const UPDATED_AT: &str = "updated_at";

// =============================================================================
// Chunk
// =============================================================================

/// One indexed unit of text derived from a document.
///
/// Invariant: `slot` equals the chunk's position in both the similarity
/// index and the chunk catalog. Slots are never reused.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Dense, monotonically assigned position shared with the index.
    pub slot: usize,
    /// Identifier of the owning document.
    pub doc_id: String,
    /// 0-based order of this chunk within its document.
    pub sequence: usize,
    /// Chunk text.
    pub content: String,
    /// Owner-supplied metadata plus `created_at` / `updated_at`.
    pub metadata: Metadata,
    /// Tombstone flag. `false` means logically deleted.
    pub live: bool,
}

impl Chunk {
    /// Parse the `created_at` stamp, if present and well-formed.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        stamp_of(&self.metadata, CREATED_AT)
    }

    /// Parse the `updated_at` stamp, if present and well-formed.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        stamp_of(&self.metadata, UPDATED_AT)
    }
}

/// Current time rendered the way chunk metadata stores it.
pub fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

fn stamp_of(metadata: &Metadata, key: &str) -> Option<DateTime<Utc>> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Strip the system-managed stamps, leaving owner metadata only.
pub fn owner_metadata(metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .filter(|(k, _)| k.as_str() != CREATED_AT && k.as_str() != UPDATED_AT)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

// =============================================================================
// Snapshots
// =============================================================================

/// Owned persisted state of one store instance, as read back from a backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreSnapshot {
    /// Vector dimension the index was built with.
    pub dimension: usize,
    /// Row-major normalized vectors, `dimension` floats per slot.
    pub vectors: Vec<f32>,
    /// Catalog entries, one per slot, in slot order.
    pub chunks: Vec<Chunk>,
    /// Document index: doc_id to the slots most recently registered for it.
    pub documents: BTreeMap<String, Vec<usize>>,
}

impl StoreSnapshot {
    /// Number of slots described by the catalog.
    pub fn slot_count(&self) -> usize {
        self.chunks.len()
    }

    /// Borrow this snapshot for saving.
    pub fn as_snapshot_ref(&self) -> SnapshotRef<'_> {
        SnapshotRef {
            dimension: self.dimension,
            vectors: &self.vectors,
            chunks: &self.chunks,
            documents: &self.documents,
        }
    }

    /// Check that index rows and catalog entries line up slot for slot.
    pub fn verify(&self) -> Result<()> {
        self.as_snapshot_ref().verify()
    }
}

/// Borrowed view of the state handed to a backend on every flush.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotRef<'a> {
    pub dimension: usize,
    pub vectors: &'a [f32],
    pub chunks: &'a [Chunk],
    pub documents: &'a BTreeMap<String, Vec<usize>>,
}

impl SnapshotRef<'_> {
    /// Number of slots described by the catalog.
    pub fn slot_count(&self) -> usize {
        self.chunks.len()
    }

    /// Copy into an owned snapshot.
    pub fn to_owned_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            dimension: self.dimension,
            vectors: self.vectors.to_vec(),
            chunks: self.chunks.to_vec(),
            documents: self.documents.clone(),
        }
    }

    pub fn verify(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(RecallError::Corrupt("dimension is zero".to_string()));
        }
        if self.vectors.len() % self.dimension != 0 {
            return Err(RecallError::Corrupt(format!(
                "{} floats is not a multiple of dimension {}",
                self.vectors.len(),
                self.dimension
            )));
        }
        let rows = self.vectors.len() / self.dimension;
        if rows != self.chunks.len() {
            return Err(RecallError::Misaligned {
                index: rows,
                catalog: self.chunks.len(),
            });
        }
        for (position, chunk) in self.chunks.iter().enumerate() {
            if chunk.slot != position {
                return Err(RecallError::Corrupt(format!(
                    "catalog entry at position {} claims slot {}",
                    position, chunk.slot
                )));
            }
        }
        for (doc_id, slots) in self.documents {
            if let Some(bad) = slots.iter().find(|&&s| s >= rows) {
                return Err(RecallError::Corrupt(format!(
                    "document {} references slot {} beyond {}",
                    doc_id, bad, rows
                )));
            }
        }
        Ok(())
    }
}

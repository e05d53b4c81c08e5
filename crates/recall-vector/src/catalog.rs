//! Slot-keyed chunk catalog with tombstones and a per-document slot index.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use recall_core::types::{owner_metadata, timestamp_value, Chunk, Metadata, UPDATED_AT};

/// Ordered catalog entries, one per slot, plus doc_id -> slots.
///
/// Entries are only ever appended; retirement flips `live` to false.
#[derive(Debug, Clone, Default)]
pub struct ChunkCatalog {
    chunks: Vec<Chunk>,
    documents: BTreeMap<String, Vec<usize>>,
}

impl ChunkCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted parts. Callers verify alignment beforehand.
    pub fn from_parts(chunks: Vec<Chunk>, documents: BTreeMap<String, Vec<usize>>) -> Self {
        Self { chunks, documents }
    }

    /// Number of entries, live or not.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn entries(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn documents(&self) -> &BTreeMap<String, Vec<usize>> {
        &self.documents
    }

    /// Append an entry at the next slot and return that slot.
    pub fn record(
        &mut self,
        doc_id: &str,
        sequence: usize,
        content: &str,
        metadata: Metadata,
    ) -> usize {
        let slot = self.chunks.len();
        self.chunks.push(Chunk {
            slot,
            doc_id: doc_id.to_string(),
            sequence,
            content: content.to_string(),
            metadata,
            live: true,
        });
        slot
    }

    /// Point `doc_id` at `slots`, replacing whatever it referenced before.
    pub fn register(&mut self, doc_id: &str, slots: Vec<usize>) {
        self.documents.insert(doc_id.to_string(), slots);
    }

    /// Retire every slot the document index holds for `doc_id`.
    ///
    /// Returns how many slots went from live to tombstoned.
    pub fn tombstone_all(&mut self, doc_id: &str) -> usize {
        let Some(slots) = self.documents.get(doc_id) else {
            return 0;
        };
        let mut retired = 0;
        for &slot in slots {
            if let Some(chunk) = self.chunks.get_mut(slot) {
                if chunk.live {
                    chunk.live = false;
                    retired += 1;
                }
            }
        }
        retired
    }

    /// Shallow-merge `partial` into every live chunk of `doc_id` and stamp
    /// `updated_at`. Returns the number of chunks touched; zero is a no-op.
    pub fn merge_metadata(&mut self, doc_id: &str, partial: &Metadata) -> usize {
        self.merge_metadata_at(doc_id, partial, Utc::now())
    }

    pub fn merge_metadata_at(
        &mut self,
        doc_id: &str,
        partial: &Metadata,
        at: DateTime<Utc>,
    ) -> usize {
        let Some(slots) = self.documents.get(doc_id) else {
            return 0;
        };
        // Timestamps are system-owned; callers cannot overwrite them.
        let partial = owner_metadata(partial);
        let stamp = timestamp_value(at);
        let mut touched = 0;
        for &slot in slots {
            let Some(chunk) = self.chunks.get_mut(slot) else {
                continue;
            };
            if !chunk.live {
                continue;
            }
            for (key, value) in &partial {
                chunk.metadata.insert(key.clone(), value.clone());
            }
            chunk.metadata.insert(UPDATED_AT.to_string(), stamp.clone());
            touched += 1;
        }
        touched
    }

    /// The entry at `slot` if it exists and is live.
    pub fn resolve(&self, slot: usize) -> Option<&Chunk> {
        self.chunks.get(slot).filter(|c| c.live)
    }

    /// Live chunks of `doc_id` ordered by sequence.
    pub fn chunks_of(&self, doc_id: &str) -> Vec<Chunk> {
        let mut live: Vec<Chunk> = self
            .documents
            .get(doc_id)
            .map(|slots| {
                slots
                    .iter()
                    .filter_map(|&s| self.resolve(s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        live.sort_by_key(|c| c.sequence);
        live
    }

    /// Whether `doc_id` has at least one live chunk.
    pub fn is_present(&self, doc_id: &str) -> bool {
        self.documents
            .get(doc_id)
            .is_some_and(|slots| slots.iter().any(|&s| self.resolve(s).is_some()))
    }

    pub fn live_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.live).count()
    }

    /// Number of documents with at least one live chunk.
    pub fn present_documents(&self) -> usize {
        self.documents
            .keys()
            .filter(|doc_id| self.is_present(doc_id))
            .count()
    }
}

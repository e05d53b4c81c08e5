//! Index and catalog held together so they can only grow in lockstep.

use tracing::error;

use recall_core::error::{RecallError, Result};
use recall_core::types::{Chunk, Metadata, SnapshotRef, StoreSnapshot};

use crate::catalog::ChunkCatalog;
use crate::index::SimilarityIndex;

/// One chunk ready to be written: its text, metadata, and raw vector.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub content: String,
    pub metadata: Metadata,
    pub vector: Vec<f32>,
}

/// Owner of the similarity index and chunk catalog.
///
/// Slot `i` of the index always describes catalog entry `i`. There is no way
/// to append to one without the other.
#[derive(Debug, Clone)]
pub struct SlotTable {
    index: SimilarityIndex,
    catalog: ChunkCatalog,
}

impl SlotTable {
    pub fn new(dimension: usize) -> Self {
        Self {
            index: SimilarityIndex::new(dimension),
            catalog: ChunkCatalog::new(),
        }
    }

    /// Rebuild from a persisted snapshot after verifying alignment.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        snapshot.verify()?;
        let index = SimilarityIndex::from_raw(snapshot.dimension, snapshot.vectors)?;
        let catalog = ChunkCatalog::from_parts(snapshot.chunks, snapshot.documents);
        let table = Self { index, catalog };
        table.check_alignment()?;
        Ok(table)
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn catalog(&self) -> &ChunkCatalog {
        &self.catalog
    }

    /// Verify both halves describe the same number of slots.
    pub fn check_alignment(&self) -> Result<()> {
        let index = self.index.len();
        let catalog = self.catalog.len();
        if index != catalog {
            error!(index, catalog, "Index and catalog slot counts diverged");
            return Err(RecallError::Misaligned { index, catalog });
        }
        Ok(())
    }

    /// Replace `doc_id` with `chunks`: tombstone its prior slots, append each
    /// chunk to both halves in order, and register the new slots.
    ///
    /// Dimensions are checked before anything is written, so a rejected call
    /// leaves the table untouched. With no chunks the document ends up
    /// absent, its old slots still registered but all tombstoned.
    pub fn replace_document(&mut self, doc_id: &str, chunks: Vec<PendingChunk>) -> Result<Vec<usize>> {
        self.check_alignment()?;
        let dimension = self.index.dimension();
        if let Some(bad) = chunks.iter().find(|c| c.vector.len() != dimension) {
            return Err(RecallError::DimensionMismatch {
                expected: dimension,
                actual: bad.vector.len(),
            });
        }

        self.catalog.tombstone_all(doc_id);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut slots = Vec::with_capacity(chunks.len());
        for (sequence, chunk) in chunks.into_iter().enumerate() {
            let index_slot = self.index.append(&chunk.vector)?;
            let catalog_slot =
                self.catalog
                    .record(doc_id, sequence, &chunk.content, chunk.metadata);
            if index_slot != catalog_slot {
                error!(index_slot, catalog_slot, doc_id, "Slot assignment diverged");
                return Err(RecallError::Misaligned {
                    index: self.index.len(),
                    catalog: self.catalog.len(),
                });
            }
            slots.push(index_slot);
        }
        self.catalog.register(doc_id, slots.clone());
        self.check_alignment()?;
        Ok(slots)
    }

    /// See [`ChunkCatalog::merge_metadata`].
    pub fn merge_metadata(&mut self, doc_id: &str, partial: &Metadata) -> usize {
        self.catalog.merge_metadata(doc_id, partial)
    }

    /// Nearest live chunks to `query`, at most `k` candidates examined.
    ///
    /// Tombstoned candidates are skipped, so fewer than `k` may come back.
    pub fn nearest_live(&self, query: &[f32], k: usize) -> Result<Vec<(&Chunk, f32)>> {
        let hits = self.index.query(query, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(slot, distance)| self.catalog.resolve(slot).map(|c| (c, distance)))
            .collect())
    }

    /// A new table holding only live chunks, renumbered densely in slot order.
    ///
    /// Stored vectors are already normalized, and re-normalizing a unit
    /// vector leaves it unchanged within float tolerance.
    pub fn compacted(&self) -> Result<SlotTable> {
        self.check_alignment()?;
        let mut table = SlotTable::new(self.dimension());
        let mut remap = vec![None; self.len()];

        for chunk in self.catalog.entries().iter().filter(|c| c.live) {
            let vector = self.index.vector(chunk.slot).ok_or(RecallError::Misaligned {
                index: self.index.len(),
                catalog: self.catalog.len(),
            })?;
            let slot = table.index.append(vector)?;
            let recorded = table.catalog.record(
                &chunk.doc_id,
                chunk.sequence,
                &chunk.content,
                chunk.metadata.clone(),
            );
            if slot != recorded {
                return Err(RecallError::Misaligned {
                    index: table.index.len(),
                    catalog: table.catalog.len(),
                });
            }
            remap[chunk.slot] = Some(slot);
        }

        for (doc_id, slots) in self.catalog.documents() {
            let kept: Vec<usize> = slots
                .iter()
                .filter_map(|&s| remap.get(s).copied().flatten())
                .collect();
            if !kept.is_empty() {
                table.catalog.register(doc_id, kept);
            }
        }
        table.check_alignment()?;
        Ok(table)
    }

    /// Borrow the full state for a persistence flush.
    pub fn snapshot(&self) -> SnapshotRef<'_> {
        SnapshotRef {
            dimension: self.index.dimension(),
            vectors: self.index.raw(),
            chunks: self.catalog.entries(),
            documents: self.catalog.documents(),
        }
    }
}

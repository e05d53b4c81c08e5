//! Vector store: chunk, embed, index, and search documents by id.
//!
//! Mutations are serialized by a writer gate held for the whole operation,
//! embedding included. The index/catalog pair sits behind an `RwLock` whose
//! write half is taken only once every vector is in hand, so searches never
//! observe a half-applied change and a failed embedding leaves nothing
//! indexed.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use recall_core::config::RecallConfig;
use recall_core::error::{RecallError, Result};
use recall_core::persistence::CatalogPersistence;
use recall_core::types::{owner_metadata, timestamp_value, Chunk, Metadata, CREATED_AT, UPDATED_AT};

use crate::chunker::Chunker;
use crate::embedding::{build_embedder, DynEmbeddingService};
use crate::index::distance_to_score;
use crate::slots::{PendingChunk, SlotTable};

/// Tunables for a [`VectorStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Candidates fetched per requested result. Values below 3 are raised to 3.
    pub overfetch_factor: usize,
    /// Upper bound on a single embedding call (or one batch).
    pub embed_timeout: Duration,
    /// Substitute zero vectors when a chunk cannot be embedded.
    pub degraded: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            overfetch_factor: 3,
            embed_timeout: Duration::from_secs(30),
            degraded: false,
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &RecallConfig) -> Self {
        Self {
            overfetch_factor: config.search.overfetch_factor,
            embed_timeout: config.embedding.timeout(),
            degraded: config.embedding.degraded,
        }
    }
}

/// One search hit, at most one per document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub doc_id: String,
    pub content: String,
    pub metadata: Metadata,
    /// `1 - distance / 2`; 1.0 is an exact match.
    pub score: f32,
    pub slot: usize,
    pub sequence: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub dimension: usize,
    pub slots: usize,
    pub live_chunks: usize,
    pub tombstoned: usize,
    pub documents: usize,
    pub provider: String,
    pub backend: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub slots_before: usize,
    pub slots_after: usize,
    pub reclaimed: usize,
}

/// Secondary similarity index over documents identified by `doc_id`.
pub struct VectorStore {
    chunker: Chunker,
    embedder: Box<dyn DynEmbeddingService>,
    persistence: Box<dyn CatalogPersistence>,
    options: StoreOptions,
    table: RwLock<SlotTable>,
    writer: Mutex<()>,
    halted: AtomicBool,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("provider", &self.embedder.name())
            .field("backend", &self.persistence.describe())
            .field("options", &self.options)
            .finish()
    }
}

impl VectorStore {
    /// Open a store, restoring whatever `persistence` holds.
    ///
    /// Unreadable, inconsistent, or wrong-dimension persisted state is
    /// discarded with a warning and the store starts empty.
    pub fn open(
        chunker: Chunker,
        embedder: Box<dyn DynEmbeddingService>,
        persistence: Box<dyn CatalogPersistence>,
        options: StoreOptions,
    ) -> Result<Self> {
        let dimension = embedder.dimensions();
        if dimension == 0 {
            return Err(RecallError::Config(
                "embedding dimension must be positive".to_string(),
            ));
        }
        let options = StoreOptions {
            overfetch_factor: options.overfetch_factor.max(3),
            ..options
        };

        let table = restore(&*persistence, dimension);
        info!(
            backend = %persistence.describe(),
            provider = embedder.name(),
            dimension,
            slots = table.len(),
            "Vector store opened"
        );

        Ok(Self {
            chunker,
            embedder,
            persistence,
            options,
            table: RwLock::new(table),
            writer: Mutex::new(()),
            halted: AtomicBool::new(false),
        })
    }

    /// Open with the chunker, provider, and backend named in `config`.
    pub fn from_config(config: &RecallConfig, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let embedder = build_embedder(&config.embedding)?;
        let persistence = recall_storage::open_persistence(&config.storage, data_dir)?;
        Self::open(
            Chunker::from_config(&config.chunking),
            embedder,
            persistence,
            StoreOptions::from_config(config),
        )
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimensions()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_halted() {
            return Err(RecallError::Halted);
        }
        Ok(())
    }

    /// Stop all further mutation once the pair is known to be misaligned.
    fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(RecallError::Misaligned { index, catalog }) = &result {
            error!(index, catalog, "Halting store after alignment violation");
            self.halted.store(true, Ordering::SeqCst);
        }
        result
    }

    fn timeout_error(&self) -> RecallError {
        RecallError::ProviderTimeout {
            timeout_ms: self.options.embed_timeout.as_millis() as u64,
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        timeout(self.options.embed_timeout, self.embedder.embed_boxed(query))
            .await
            .map_err(|_| self.timeout_error())?
    }

    /// Embed every piece, all or nothing unless degraded mode is on.
    async fn embed_pieces(&self, pieces: &[String]) -> Result<Vec<Vec<f32>>> {
        if pieces.is_empty() {
            return Ok(Vec::new());
        }

        if !self.options.degraded {
            let vectors = timeout(
                self.options.embed_timeout,
                self.embedder.embed_many_boxed(pieces),
            )
            .await
            .map_err(|_| self.timeout_error())??;
            if vectors.len() != pieces.len() {
                return Err(RecallError::Provider(format!(
                    "provider returned {} vectors for {} chunks",
                    vectors.len(),
                    pieces.len()
                )));
            }
            return Ok(vectors);
        }

        let mut vectors = Vec::with_capacity(pieces.len());
        for (sequence, piece) in pieces.iter().enumerate() {
            let outcome = timeout(self.options.embed_timeout, self.embedder.embed_boxed(piece))
                .await
                .map_err(|_| self.timeout_error())
                .and_then(|r| r);
            match outcome {
                Ok(vector) => vectors.push(vector),
                Err(e) => {
                    warn!(sequence, error = %e, "Embedding failed, substituting zero vector");
                    vectors.push(vec![0.0; self.dimension()]);
                }
            }
        }
        Ok(vectors)
    }

    /// Chunk and embed `text` without touching the table.
    async fn prepare(&self, text: &str, metadata: &Metadata) -> Result<Vec<PendingChunk>> {
        let pieces = self.chunker.chunk(text);
        let vectors = self.embed_pieces(&pieces).await?;
        Ok(pieces
            .into_iter()
            .zip(vectors)
            .map(|(content, vector)| PendingChunk {
                content,
                metadata: metadata.clone(),
                vector,
            })
            .collect())
    }

    /// Tombstone prior slots, append `pending`, and flush, as one unit.
    async fn replace(&self, doc_id: &str, pending: Vec<PendingChunk>) -> Result<Vec<usize>> {
        let mut table = self.table.write().await;
        let slots = self.check(table.replace_document(doc_id, pending))?;
        self.persistence.save(table.snapshot())?;
        Ok(slots)
    }

    /// Index `text` under `doc_id`, superseding any previous content.
    ///
    /// Returns the new slots in document order. Empty text records nothing
    /// and leaves the document absent.
    pub async fn add(&self, doc_id: &str, text: &str, metadata: Metadata) -> Result<Vec<usize>> {
        self.ensure_running()?;
        let _writer = self.writer.lock().await;
        self.ensure_running()?;

        let stamp = timestamp_value(Utc::now());
        let mut metadata = metadata;
        metadata.insert(CREATED_AT.to_string(), stamp.clone());
        metadata.insert(UPDATED_AT.to_string(), stamp);

        let pending = self.prepare(text, &metadata).await?;
        let slots = self.replace(doc_id, pending).await?;
        info!(doc_id, chunks = slots.len(), "Added document");
        Ok(slots)
    }

    /// Replace content, merge metadata, or both. Returns `false` if the
    /// document is not present or neither argument is given.
    ///
    /// Content-only updates carry forward owner metadata and `created_at`.
    /// When both are given the new chunks get only the supplied metadata.
    pub async fn update(
        &self,
        doc_id: &str,
        content: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<bool> {
        if content.is_none() && metadata.is_none() {
            debug!(doc_id, "Update skipped, nothing to change");
            return Ok(false);
        }
        self.ensure_running()?;
        let _writer = self.writer.lock().await;
        self.ensure_running()?;

        let carried = {
            let table = self.table.read().await;
            match table.catalog().chunks_of(doc_id).into_iter().next() {
                Some(first) => first.metadata,
                None => {
                    debug!(doc_id, "Update skipped, document not present");
                    return Ok(false);
                }
            }
        };

        let Some(content) = content else {
            let partial = metadata.unwrap_or_default();
            let mut table = self.table.write().await;
            let touched = table.merge_metadata(doc_id, &partial);
            self.persistence.save(table.snapshot())?;
            info!(doc_id, chunks = touched, "Merged document metadata");
            return Ok(true);
        };

        let now = timestamp_value(Utc::now());
        let mut fresh = match metadata {
            Some(m) => {
                let mut m = owner_metadata(&m);
                m.insert(CREATED_AT.to_string(), now.clone());
                m
            }
            None => {
                let mut m = owner_metadata(&carried);
                let created = carried.get(CREATED_AT).cloned().unwrap_or_else(|| now.clone());
                m.insert(CREATED_AT.to_string(), created);
                m
            }
        };
        fresh.insert(UPDATED_AT.to_string(), now);

        let pending = self.prepare(content, &fresh).await?;
        let slots = self.replace(doc_id, pending).await?;
        info!(doc_id, chunks = slots.len(), "Re-indexed document");
        Ok(true)
    }

    /// Up to `limit` documents nearest to `query`, best first.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if limit == 0 || self.table.read().await.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embed_query(query).await?;
        let candidates = limit.saturating_mul(self.options.overfetch_factor);

        let table = self.table.read().await;
        let hits = match table.nearest_live(&query_vec, candidates) {
            Ok(hits) => hits,
            Err(RecallError::EmptyIndex) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut seen = HashSet::new();
        let mut results = Vec::with_capacity(limit);
        for (chunk, distance) in hits {
            if !seen.insert(chunk.doc_id.as_str()) {
                continue;
            }
            results.push(SearchResult {
                doc_id: chunk.doc_id.clone(),
                content: chunk.content.clone(),
                metadata: chunk.metadata.clone(),
                score: distance_to_score(distance),
                slot: chunk.slot,
                sequence: chunk.sequence,
            });
            if results.len() == limit {
                break;
            }
        }
        debug!(limit, candidates, returned = results.len(), "Search complete");
        Ok(results)
    }

    /// Live chunks of `doc_id` by sequence.
    pub async fn chunks_of(&self, doc_id: &str) -> Vec<Chunk> {
        self.table.read().await.catalog().chunks_of(doc_id)
    }

    pub async fn contains(&self, doc_id: &str) -> bool {
        self.table.read().await.catalog().is_present(doc_id)
    }

    pub async fn stats(&self) -> StoreStats {
        let table = self.table.read().await;
        let catalog = table.catalog();
        let live_chunks = catalog.live_count();
        StoreStats {
            dimension: table.dimension(),
            slots: table.len(),
            live_chunks,
            tombstoned: table.len() - live_chunks,
            documents: catalog.present_documents(),
            provider: self.embedder.name().to_string(),
            backend: self.persistence.describe(),
        }
    }

    /// Rebuild without tombstoned slots and persist the result.
    ///
    /// Slots are renumbered, so any slot numbers held by callers go stale.
    pub async fn compact(&self) -> Result<CompactionReport> {
        self.ensure_running()?;
        let _writer = self.writer.lock().await;
        self.ensure_running()?;

        let mut table = self.table.write().await;
        let compacted = self.check(table.compacted())?;
        self.persistence.save(compacted.snapshot())?;

        let report = CompactionReport {
            slots_before: table.len(),
            slots_after: compacted.len(),
            reclaimed: table.len() - compacted.len(),
        };
        *table = compacted;
        info!(
            before = report.slots_before,
            after = report.slots_after,
            "Compacted vector store"
        );
        Ok(report)
    }
}

fn restore(persistence: &dyn CatalogPersistence, dimension: usize) -> SlotTable {
    match persistence.load() {
        Ok(None) => SlotTable::new(dimension),
        Ok(Some(snapshot)) if snapshot.dimension != dimension => {
            warn!(
                stored = snapshot.dimension,
                configured = dimension,
                "Persisted index has a different dimension, starting empty"
            );
            SlotTable::new(dimension)
        }
        Ok(Some(snapshot)) => match SlotTable::from_snapshot(snapshot) {
            Ok(table) => table,
            Err(e) => {
                warn!(error = %e, "Persisted index is inconsistent, starting empty");
                SlotTable::new(dimension)
            }
        },
        Err(e) => {
            warn!(error = %e, "Failed to load persisted index, starting empty");
            SlotTable::new(dimension)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use recall_core::types::StoreSnapshot;
    use recall_storage::{FilePersistence, MemoryPersistence};
    use serde_json::json;

    use crate::embedding::{EmbeddingService, MockEmbedding};

    const DIM: usize = 32;

    fn meta(pairs: &[(&str, serde_json::Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn store_with(persistence: Arc<MemoryPersistence>) -> VectorStore {
        VectorStore::open(
            Chunker::paragraph(10, 200),
            Box::new(MockEmbedding::new(DIM)),
            Box::new(persistence),
            StoreOptions::default(),
        )
        .unwrap()
    }

    fn store() -> VectorStore {
        store_with(Arc::new(MemoryPersistence::new()))
    }

    /// Fails every call after `fail_after` successful ones.
    struct FlakyEmbedding {
        inner: MockEmbedding,
        calls: AtomicUsize,
        fail_after: usize,
    }

    impl EmbeddingService for FlakyEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                return Err(RecallError::Provider("connection reset".into()));
            }
            self.inner.embed(text).await
        }

        fn dimensions(&self) -> usize {
            DIM
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    struct SlowEmbedding;

    impl EmbeddingService for SlowEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(vec![1.0; DIM])
        }

        fn dimensions(&self) -> usize {
            DIM
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_add_then_search_exact() {
        let store = store();
        store.add("d1", "hello world", Metadata::new()).await.unwrap();

        let results = store.search("hello world", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "d1");
        assert!((results[0].score - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_search_empty_index() {
        let store = store();
        assert!(store.search("anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_limit_zero() {
        let store = store();
        store.add("d1", "hello world", Metadata::new()).await.unwrap();
        assert!(store.search("hello world", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_content_retires_old_text() {
        let store = store();
        store.add("d1", "hello world", Metadata::new()).await.unwrap();
        store.add("d2", "an unrelated note", Metadata::new()).await.unwrap();

        assert!(store.update("d1", Some("goodbye"), None).await.unwrap());

        let old = store.search("hello world", 5).await.unwrap();
        assert!(old
            .iter()
            .all(|r| r.content != "hello world" && r.score < 0.99));

        let new = store.search("goodbye", 5).await.unwrap();
        assert_eq!(new[0].doc_id, "d1");
        assert_eq!(new[0].content, "goodbye");
    }

    #[tokio::test]
    async fn test_merge_metadata_visible_in_chunks() {
        let store = store();
        let text = "First paragraph of the note.\n\nSecond paragraph of the note.";
        store.add("doc", text, Metadata::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let updated = store
            .update("doc", None, Some(meta(&[("importance", json!(0.9))])))
            .await
            .unwrap();
        assert!(updated);

        let chunks = store.chunks_of("doc").await;
        assert_eq!(chunks.len(), 2);
        for chunk in chunks {
            assert_eq!(chunk.metadata["importance"], json!(0.9));
            assert!(chunk.updated_at().unwrap() > chunk.created_at().unwrap());
        }
    }

    #[tokio::test]
    async fn test_search_dedups_by_document() {
        let store = store();
        let text = "alpha beta gamma delta\n\nalpha beta gamma delta epsilon\n\nalpha beta gamma";
        store.add("multi", text, Metadata::new()).await.unwrap();
        store.add("single", "alpha beta gamma delta zeta", Metadata::new()).await.unwrap();

        let results = store.search("alpha beta gamma delta", 5).await.unwrap();
        let mut ids: Vec<_> = results.iter().map(|r| r.doc_id.clone()).collect();
        assert_eq!(results[0].content, "alpha beta gamma delta");
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), results.len());
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_search_respects_limit() {
        let store = store();
        for i in 0..6 {
            store
                .add(&format!("doc-{}", i), &format!("note number {}", i), Metadata::new())
                .await
                .unwrap();
        }
        assert_eq!(store.search("note number 3", 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_absent_returns_false() {
        let store = store();
        assert!(!store.update("ghost", Some("text"), None).await.unwrap());

        store.add("d1", "hello world", Metadata::new()).await.unwrap();
        store.add("d1", "", Metadata::new()).await.unwrap();
        assert!(!store.contains("d1").await);
        assert!(!store
            .update("d1", None, Some(meta(&[("k", json!(1))])))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_update_without_changes_returns_false() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = store_with(persistence.clone());
        store.add("d1", "hello world", Metadata::new()).await.unwrap();
        let saves = persistence.save_count();
        let before = store.chunks_of("d1").await;

        assert!(!store.update("d1", None, None).await.unwrap());
        assert!(!store.update("ghost", None, None).await.unwrap());
        assert_eq!(store.chunks_of("d1").await, before);
        assert_eq!(persistence.save_count(), saves);
    }

    #[tokio::test]
    async fn test_whitespace_add_keeps_document() {
        let store = store();
        store.add("d1", "hello world", Metadata::new()).await.unwrap();

        let slots = store.add("d1", "   ", Metadata::new()).await.unwrap();
        assert_eq!(slots.len(), 1);
        assert!(store.contains("d1").await);
        let chunks = store.chunks_of("d1").await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "   ");
    }

    #[tokio::test]
    async fn test_content_update_carries_metadata() {
        let store = store();
        store
            .add("d1", "original text", meta(&[("source", json!("chat"))]))
            .await
            .unwrap();
        let created = store.chunks_of("d1").await[0].created_at().unwrap();

        store.update("d1", Some("rewritten text"), None).await.unwrap();
        let chunk = &store.chunks_of("d1").await[0];
        assert_eq!(chunk.content, "rewritten text");
        assert_eq!(chunk.metadata["source"], json!("chat"));
        assert_eq!(chunk.created_at().unwrap(), created);
    }

    #[tokio::test]
    async fn test_combined_update_uses_fresh_metadata() {
        let store = store();
        store
            .add("d1", "original text", meta(&[("source", json!("chat"))]))
            .await
            .unwrap();
        store
            .update("d1", Some("rewritten text"), Some(meta(&[("tag", json!("new"))])))
            .await
            .unwrap();

        let chunk = &store.chunks_of("d1").await[0];
        assert_eq!(chunk.metadata["tag"], json!("new"));
        assert!(!chunk.metadata.contains_key("source"));
    }

    #[tokio::test]
    async fn test_add_supersedes_existing_document() {
        let store = store();
        store.add("d1", "first version", Metadata::new()).await.unwrap();
        let slots = store.add("d1", "second version", Metadata::new()).await.unwrap();
        assert_eq!(slots, vec![1]);

        let chunks = store.chunks_of("d1").await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "second version");
    }

    #[tokio::test]
    async fn test_provider_failure_indexes_nothing() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = VectorStore::open(
            Chunker::paragraph(10, 200),
            Box::new(FlakyEmbedding {
                inner: MockEmbedding::new(DIM),
                calls: AtomicUsize::new(0),
                fail_after: 1,
            }),
            Box::new(Arc::clone(&persistence)),
            StoreOptions::default(),
        )
        .unwrap();

        store.add("d1", "first document", Metadata::new()).await.unwrap();
        let text = "Paragraph number one here.\n\nParagraph number two here.";
        let err = store.add("d1", text, Metadata::new()).await.unwrap_err();
        assert!(err.is_provider());

        let stats = store.stats().await;
        assert_eq!(stats.slots, 1);
        assert_eq!(store.chunks_of("d1").await[0].content, "first document");
        assert_eq!(persistence.save_count(), 1);
    }

    #[tokio::test]
    async fn test_degraded_mode_substitutes_zero_vectors() {
        let store = VectorStore::open(
            Chunker::paragraph(10, 200),
            Box::new(FlakyEmbedding {
                inner: MockEmbedding::new(DIM),
                calls: AtomicUsize::new(0),
                fail_after: 1,
            }),
            Box::new(MemoryPersistence::new()),
            StoreOptions {
                degraded: true,
                ..StoreOptions::default()
            },
        )
        .unwrap();

        let text = "Paragraph number one here.\n\nParagraph number two here.";
        let slots = store.add("d1", text, Metadata::new()).await.unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(store.chunks_of("d1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_embedding_timeout() {
        let store = VectorStore::open(
            Chunker::default(),
            Box::new(SlowEmbedding),
            Box::new(MemoryPersistence::new()),
            StoreOptions {
                embed_timeout: Duration::from_millis(20),
                ..StoreOptions::default()
            },
        )
        .unwrap();

        let err = store.add("d1", "hello", Metadata::new()).await.unwrap_err();
        assert!(matches!(err, RecallError::ProviderTimeout { timeout_ms: 20 }));
        assert_eq!(store.stats().await.slots, 0);
    }

    #[tokio::test]
    async fn test_reopen_restores_state() {
        let persistence = Arc::new(MemoryPersistence::new());
        {
            let store = store_with(Arc::clone(&persistence));
            store.add("d1", "hello world", Metadata::new()).await.unwrap();
            store.add("d2", "second note", Metadata::new()).await.unwrap();
        }
        let store = store_with(persistence);
        assert_eq!(store.stats().await.slots, 2);
        assert_eq!(store.search("hello world", 1).await.unwrap()[0].doc_id, "d1");
    }

    #[tokio::test]
    async fn test_reopen_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let open = || {
            VectorStore::open(
                Chunker::default(),
                Box::new(MockEmbedding::new(DIM)),
                Box::new(FilePersistence::in_dir(dir.path(), "vectors.idx", "catalog.json")),
                StoreOptions::default(),
            )
            .unwrap()
        };
        {
            let store = open();
            store.add("d1", "persisted note", Metadata::new()).await.unwrap();
        }
        let store = open();
        assert!(store.contains("d1").await);
    }

    #[tokio::test]
    async fn test_corrupt_files_reset_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vectors.idx"), b"garbage").unwrap();
        std::fs::write(dir.path().join("catalog.json"), b"{}").unwrap();

        let store = VectorStore::open(
            Chunker::default(),
            Box::new(MockEmbedding::new(DIM)),
            Box::new(FilePersistence::in_dir(dir.path(), "vectors.idx", "catalog.json")),
            StoreOptions::default(),
        )
        .unwrap();
        assert_eq!(store.stats().await.slots, 0);
        store.add("d1", "fresh start", Metadata::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_dimension_snapshot_discarded() {
        let persistence = Arc::new(MemoryPersistence::with_snapshot(StoreSnapshot {
            dimension: DIM + 1,
            ..StoreSnapshot::default()
        }));
        let store = store_with(persistence);
        assert_eq!(store.stats().await.slots, 0);
        assert_eq!(store.dimension(), DIM);
    }

    #[tokio::test]
    async fn test_save_failure_keeps_memory_consistent() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = store_with(Arc::clone(&persistence));

        persistence.set_fail_saves(true);
        let err = store.add("d1", "hello world", Metadata::new()).await.unwrap_err();
        assert!(matches!(err, RecallError::Storage(_)));
        assert!(store.contains("d1").await);

        persistence.set_fail_saves(false);
        store.add("d2", "second note", Metadata::new()).await.unwrap();
        let saved = persistence.snapshot().unwrap();
        assert_eq!(saved.slot_count(), 2);
    }

    #[tokio::test]
    async fn test_compact_reclaims_tombstones() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = store_with(Arc::clone(&persistence));
        store.add("d1", "hello world", Metadata::new()).await.unwrap();
        store.update("d1", Some("goodbye world"), None).await.unwrap();
        store.add("d2", "another note", Metadata::new()).await.unwrap();

        let report = store.compact().await.unwrap();
        assert_eq!(report.slots_before, 3);
        assert_eq!(report.slots_after, 2);
        assert_eq!(report.reclaimed, 1);

        let stats = store.stats().await;
        assert_eq!(stats.tombstoned, 0);
        assert_eq!(stats.documents, 2);
        assert_eq!(store.search("goodbye world", 1).await.unwrap()[0].slot, 0);
        assert_eq!(persistence.snapshot().unwrap().slot_count(), 2);
    }

    #[tokio::test]
    async fn test_halted_store_rejects_mutations() {
        let store = store();
        store.add("d1", "hello world", Metadata::new()).await.unwrap();
        store.halted.store(true, Ordering::SeqCst);

        assert!(matches!(
            store.add("d2", "text", Metadata::new()).await,
            Err(RecallError::Halted)
        ));
        assert!(matches!(
            store.update("d1", Some("x"), None).await,
            Err(RecallError::Halted)
        ));
        assert!(matches!(store.compact().await, Err(RecallError::Halted)));
        // Reads still work.
        assert_eq!(store.search("hello world", 1).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_leave_one_generation() {
        let store = Arc::new(store());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let text = format!("Version {} first part.\n\nVersion {} second part.", i, i);
                store.add("shared", &text, Metadata::new()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let chunks = store.chunks_of("shared").await;
        assert_eq!(chunks.len(), 2);
        let version = chunks[0].content.split(' ').nth(1).unwrap().to_string();
        assert!(chunks.iter().all(|c| c.content.contains(&format!("Version {} ", version))));
        assert_eq!(store.stats().await.live_chunks, 2);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = store();
        store.add("d1", "hello world", Metadata::new()).await.unwrap();
        store.add("d1", "hello again", Metadata::new()).await.unwrap();
        let stats = store.stats().await;
        assert_eq!(stats.slots, 2);
        assert_eq!(stats.live_chunks, 1);
        assert_eq!(stats.tombstoned, 1);
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.provider, "mock");
        assert_eq!(stats.backend, "memory");
    }
}

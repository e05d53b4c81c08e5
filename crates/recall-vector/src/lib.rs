//! Recall Vector crate - chunking, the similarity index, and the vector store.
//!
//! A document is split by the [`chunker::Chunker`], embedded through an
//! [`embedding::EmbeddingService`], and appended to the aligned
//! [`slots::SlotTable`]. [`store::VectorStore`] ties these together behind
//! `add`, `update`, `search`, and `chunks_of`.

pub mod catalog;
pub mod chunker;
pub mod embedding;
pub mod index;
pub mod slots;
pub mod store;

pub use catalog::ChunkCatalog;
pub use chunker::{ChunkStrategy, Chunker};
pub use embedding::{
    build_embedder, DynEmbeddingService, EmbeddingService, MockEmbedding, OllamaEmbedding,
};
pub use index::SimilarityIndex;
pub use slots::SlotTable;
pub use store::{CompactionReport, SearchResult, StoreOptions, StoreStats, VectorStore};

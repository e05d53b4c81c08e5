//! Benchmarks for brute-force similarity search.
//!
//! Uses 1,000 chunks by default so CI stays fast. Set `BENCH_FULL_SCALE=1`
//! to run against 100,000 chunks:
//!
//! ```bash
//! BENCH_FULL_SCALE=1 cargo bench -p recall-vector
//! ```
//!
//! A flat index scans every row, so query cost grows linearly with the
//! chunk count.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use recall_core::error::Result;
use recall_core::persistence::CatalogPersistence;
use recall_core::types::{Metadata, SnapshotRef, StoreSnapshot};
use recall_vector::embedding::{EmbeddingService, MockEmbedding};
use recall_vector::index::SimilarityIndex;
use recall_vector::{Chunker, StoreOptions, VectorStore};

const CI_CHUNK_COUNT: usize = 1_000;
const FULL_SCALE_CHUNK_COUNT: usize = 100_000;
const DIMENSIONS: usize = 384;

/// Discards every flush so population cost stays linear.
struct NullPersistence;

impl CatalogPersistence for NullPersistence {
    fn load(&self) -> Result<Option<StoreSnapshot>> {
        Ok(None)
    }

    fn save(&self, _snapshot: SnapshotRef<'_>) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "null".to_string()
    }
}

fn generate_chunk_text(index: usize) -> String {
    format!(
        "The deployment pipeline ran across staging and production. Database \
         migrations were applied without downtime and monitoring dashboards \
         showed nominal memory usage during the release window. Note {}",
        index
    )
}

fn chunk_count() -> usize {
    if std::env::var("BENCH_FULL_SCALE").is_ok() {
        FULL_SCALE_CHUNK_COUNT
    } else {
        CI_CHUNK_COUNT
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
}

fn build_index(rt: &tokio::runtime::Runtime, count: usize) -> SimilarityIndex {
    let embedder = MockEmbedding::new(DIMENSIONS);
    let mut index = SimilarityIndex::new(DIMENSIONS);
    for i in 0..count {
        let vector = rt
            .block_on(embedder.embed(&generate_chunk_text(i)))
            .expect("embed failed");
        index.append(&vector).expect("append failed");
    }
    assert_eq!(index.len(), count);
    index
}

fn build_store(rt: &tokio::runtime::Runtime, count: usize) -> VectorStore {
    let store = VectorStore::open(
        Chunker::default(),
        Box::new(MockEmbedding::new(DIMENSIONS)),
        Box::new(NullPersistence),
        StoreOptions::default(),
    )
    .expect("open failed");
    for i in 0..count {
        rt.block_on(store.add(&format!("doc-{}", i), &generate_chunk_text(i), Metadata::new()))
            .expect("add failed");
    }
    store
}

fn bench_index_query(c: &mut Criterion) {
    let count = chunk_count();
    let rt = runtime();
    let index = build_index(&rt, count);
    let query = rt
        .block_on(MockEmbedding::new(DIMENSIONS).embed("database migrations"))
        .expect("query embed failed");

    let mut group = c.benchmark_group("index_query");
    group.measurement_time(Duration::from_secs(10));
    for k in [1, 10, 30] {
        group.bench_with_input(BenchmarkId::new(format!("{}chunks", count), k), &k, |b, &k| {
            b.iter(|| index.query(&query, k).expect("query failed"));
        });
    }
    group.finish();
}

fn bench_store_search(c: &mut Criterion) {
    let count = chunk_count();
    let rt = runtime();
    let store = build_store(&rt, count);

    let mut group = c.benchmark_group("store_search");
    group.measurement_time(Duration::from_secs(10));
    group.bench_function(format!("top10_{}chunks", count), |b| {
        b.iter(|| {
            let results = rt
                .block_on(store.search("deployment pipeline monitoring", 10))
                .expect("search failed");
            assert_eq!(results.len(), 10);
            results
        });
    });
    group.finish();
}

fn bench_append(c: &mut Criterion) {
    let rt = runtime();
    let vector = rt
        .block_on(MockEmbedding::new(DIMENSIONS).embed("append me"))
        .expect("embed failed");

    c.bench_function("index_append", |b| {
        b.iter_batched(
            || SimilarityIndex::new(DIMENSIONS),
            |mut index| index.append(&vector).expect("append failed"),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_index_query, bench_store_search, bench_append);
criterion_main!(benches);

//! Chunk and fingerprint storage.
//!
//! The [`Store`] trait is everything ingestion and chat need from
//! persistence. Two backends implement it:
//! - [`SqliteStore`](sqlite::SqliteStore): the real store, one SQLite file.
//! - [`InMemoryStore`](memory::InMemoryStore): for tests and dry runs.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert_chunk`](Store::upsert_chunk) | Insert or replace by `(url, chunk_number, version)` |
//! | [`delete_chunks_from`](Store::delete_chunks_from) | Tail cleanup: drop chunk numbers `>= n` |
//! | [`delete_page`](Store::delete_page) | Drop every chunk of a page |
//! | [`list_chunks`](Store::list_chunks) | Chunks of a page in chunk order |
//! | [`search`](Store::search) | Top-k by cosine similarity within a version |
//! | [`get_source`](Store::get_source) / [`put_source`](Store::put_source) / [`delete_source`](Store::delete_source) / [`list_sources`](Store::list_sources) | Persisted fingerprints |
//! | [`stats`](Store::stats) | Per-version counts |
//!
//! Search ranks by similarity descending; equal scores keep the order in
//! which the rows were first inserted.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{DocChunk, RetrievalResult, SourceRecord, Version, VersionStats};

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or fully replace the row with the chunk's identity.
    ///
    /// Fails with [`StoreError::DimensionMismatch`] when the store already
    /// holds embeddings of a different length.
    async fn upsert_chunk(&self, chunk: &DocChunk) -> Result<(), StoreError>;

    /// Delete the single row `(url, chunk_number, version)`, if present.
    async fn delete_chunk(
        &self,
        url: &str,
        version: Version,
        chunk_number: i64,
    ) -> Result<u64, StoreError>;

    /// Delete chunks of `(url, version)` numbered `from` or higher.
    /// Returns the number of rows removed.
    async fn delete_chunks_from(
        &self,
        url: &str,
        version: Version,
        from: i64,
    ) -> Result<u64, StoreError>;

    /// Delete all chunks of `(url, version)`.
    async fn delete_page(&self, url: &str, version: Version) -> Result<u64, StoreError>;

    async fn list_chunks(&self, url: &str, version: Version) -> Result<Vec<DocChunk>, StoreError>;

    async fn search(
        &self,
        query: &[f32],
        version: Version,
        k: usize,
    ) -> Result<Vec<RetrievalResult>, StoreError>;

    async fn get_source(
        &self,
        url: &str,
        version: Version,
    ) -> Result<Option<SourceRecord>, StoreError>;

    async fn put_source(&self, record: &SourceRecord) -> Result<(), StoreError>;

    async fn delete_source(&self, url: &str, version: Version) -> Result<(), StoreError>;

    /// Records of one version, ordered by URL.
    async fn list_sources(&self, version: Version) -> Result<Vec<SourceRecord>, StoreError>;

    /// Chunk and source counts per version present in the store.
    async fn stats(&self) -> Result<Vec<VersionStats>, StoreError>;
}

/// Keep the `k` best `(similarity, result)` pairs. The input must be in
/// insertion order; the stable sort keeps it for ties.
pub(crate) fn top_k(mut scored: Vec<RetrievalResult>, k: usize) -> Vec<RetrievalResult> {
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(k);
    scored
}

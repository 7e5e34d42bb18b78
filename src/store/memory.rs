//! In-memory [`Store`] for tests and dry runs.
//!
//! Rows live in a `Vec` behind `std::sync::RwLock`; position in the vector
//! is insertion order. Search is brute-force cosine similarity.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{top_k, Store};
use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::models::{DocChunk, RetrievalResult, SourceRecord, Version, VersionStats};

#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<Vec<DocChunk>>,
    sources: RwLock<HashMap<(String, Version), SourceRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows across all versions.
    pub fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn same_key(c: &DocChunk, url: &str, version: Version) -> bool {
    c.url == url && c.version == version
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_chunk(&self, chunk: &DocChunk) -> Result<(), StoreError> {
        let mut rows = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = rows.first() {
            if existing.embedding.len() != chunk.embedding.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: existing.embedding.len(),
                    got: chunk.embedding.len(),
                });
            }
        }
        match rows.iter_mut().find(|c| {
            same_key(c, &chunk.url, chunk.version) && c.chunk_number == chunk.chunk_number
        }) {
            Some(slot) => *slot = chunk.clone(),
            None => rows.push(chunk.clone()),
        }
        Ok(())
    }

    async fn delete_chunk(
        &self,
        url: &str,
        version: Version,
        chunk_number: i64,
    ) -> Result<u64, StoreError> {
        let mut rows = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        let before = rows.len();
        rows.retain(|c| !(same_key(c, url, version) && c.chunk_number == chunk_number));
        Ok((before - rows.len()) as u64)
    }

    async fn delete_chunks_from(
        &self,
        url: &str,
        version: Version,
        from: i64,
    ) -> Result<u64, StoreError> {
        let mut rows = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        let before = rows.len();
        rows.retain(|c| !(same_key(c, url, version) && c.chunk_number >= from));
        Ok((before - rows.len()) as u64)
    }

    async fn delete_page(&self, url: &str, version: Version) -> Result<u64, StoreError> {
        let mut rows = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        let before = rows.len();
        rows.retain(|c| !same_key(c, url, version));
        Ok((before - rows.len()) as u64)
    }

    async fn list_chunks(&self, url: &str, version: Version) -> Result<Vec<DocChunk>, StoreError> {
        let rows = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<DocChunk> = rows
            .iter()
            .filter(|c| same_key(c, url, version))
            .cloned()
            .collect();
        out.sort_by_key(|c| c.chunk_number);
        Ok(out)
    }

    async fn search(
        &self,
        query: &[f32],
        version: Version,
        k: usize,
    ) -> Result<Vec<RetrievalResult>, StoreError> {
        let rows = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        if let Some(first) = rows.first() {
            if first.embedding.len() != query.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: first.embedding.len(),
                    got: query.len(),
                });
            }
        }
        let scored = rows
            .iter()
            .filter(|c| c.version == version)
            .map(|c| RetrievalResult {
                url: c.url.clone(),
                title: c.title.clone(),
                content: c.content.clone(),
                similarity: cosine_similarity(query, &c.embedding) as f64,
            })
            .collect();
        Ok(top_k(scored, k))
    }

    async fn get_source(
        &self,
        url: &str,
        version: Version,
    ) -> Result<Option<SourceRecord>, StoreError> {
        let sources = self.sources.read().unwrap_or_else(|e| e.into_inner());
        Ok(sources.get(&(url.to_string(), version)).cloned())
    }

    async fn put_source(&self, record: &SourceRecord) -> Result<(), StoreError> {
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        sources.insert((record.url.clone(), record.version), record.clone());
        Ok(())
    }

    async fn delete_source(&self, url: &str, version: Version) -> Result<(), StoreError> {
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        sources.remove(&(url.to_string(), version));
        Ok(())
    }

    async fn list_sources(&self, version: Version) -> Result<Vec<SourceRecord>, StoreError> {
        let sources = self.sources.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<SourceRecord> = sources
            .values()
            .filter(|r| r.version == version)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(out)
    }

    async fn stats(&self) -> Result<Vec<VersionStats>, StoreError> {
        let mut by_version: BTreeMap<Version, VersionStats> = BTreeMap::new();
        {
            let rows = self.chunks.read().unwrap_or_else(|e| e.into_inner());
            for c in rows.iter() {
                by_version
                    .entry(c.version)
                    .or_insert_with(|| empty_stats(c.version))
                    .chunks += 1;
            }
        }
        {
            let sources = self.sources.read().unwrap_or_else(|e| e.into_inner());
            for r in sources.values() {
                by_version
                    .entry(r.version)
                    .or_insert_with(|| empty_stats(r.version))
                    .sources += 1;
            }
        }
        Ok(by_version.into_values().collect())
    }
}

fn empty_stats(version: Version) -> VersionStats {
    VersionStats {
        version,
        sources: 0,
        chunks: 0,
    }
}

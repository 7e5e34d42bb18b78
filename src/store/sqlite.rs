//! SQLite-backed [`Store`].
//!
//! Embeddings are little-endian f32 BLOBs with their length in `dims`.
//! Similarity is brute-force cosine over one version's rows, read in
//! `rowid` order so equal scores keep insertion order (an upsert that
//! hits an existing key keeps its rowid).

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{top_k, Store};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::StoreError;
use crate::models::{
    ChunkMetadata, DocChunk, RetrievalResult, SourceRecord, Version, VersionStats,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn stored_dims(&self) -> Result<Option<usize>, StoreError> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM doc_chunks LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(dims.map(|d| d as usize))
    }
}

fn row_to_chunk(row: &SqliteRow) -> Result<DocChunk, StoreError> {
    let url: String = row.get("url");
    let chunk_number: i64 = row.get("chunk_number");
    let metadata_json: String = row.get("metadata_json");
    let metadata: ChunkMetadata =
        serde_json::from_str(&metadata_json).map_err(|e| StoreError::Corrupt {
            url: url.clone(),
            chunk_number,
            message: e.to_string(),
        })?;
    let blob: Vec<u8> = row.get("embedding");

    Ok(DocChunk {
        url,
        chunk_number,
        version: Version(row.get::<i64, _>("version") as u32),
        title: row.get("title"),
        content: row.get("content"),
        metadata,
        embedding: blob_to_vec(&blob),
        created_at: row.get("created_at"),
    })
}

fn row_to_source(row: &SqliteRow) -> SourceRecord {
    SourceRecord {
        url: row.get("url"),
        version: Version(row.get::<i64, _>("version") as u32),
        source_path: row.get("source_path"),
        fingerprint: row.get("fingerprint"),
        chunk_count: row.get("chunk_count"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_chunk(&self, chunk: &DocChunk) -> Result<(), StoreError> {
        if let Some(expected) = self.stored_dims().await? {
            if expected != chunk.embedding.len() {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    got: chunk.embedding.len(),
                });
            }
        }

        let metadata_json = serde_json::to_string(&chunk.metadata).map_err(|e| {
            StoreError::Corrupt {
                url: chunk.url.clone(),
                chunk_number: chunk.chunk_number,
                message: e.to_string(),
            }
        })?;

        sqlx::query(
            r#"
            INSERT INTO doc_chunks (url, chunk_number, version, title, content,
                                    metadata_json, embedding, dims, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url, chunk_number, version) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                embedding = excluded.embedding,
                dims = excluded.dims,
                created_at = excluded.created_at
            "#,
        )
        .bind(&chunk.url)
        .bind(chunk.chunk_number)
        .bind(chunk.version.tag() as i64)
        .bind(&chunk.title)
        .bind(&chunk.content)
        .bind(&metadata_json)
        .bind(vec_to_blob(&chunk.embedding))
        .bind(chunk.embedding.len() as i64)
        .bind(chunk.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_chunk(
        &self,
        url: &str,
        version: Version,
        chunk_number: i64,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM doc_chunks WHERE url = ? AND version = ? AND chunk_number = ?",
        )
        .bind(url)
        .bind(version.tag() as i64)
        .bind(chunk_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_chunks_from(
        &self,
        url: &str,
        version: Version,
        from: i64,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM doc_chunks WHERE url = ? AND version = ? AND chunk_number >= ?",
        )
        .bind(url)
        .bind(version.tag() as i64)
        .bind(from)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_page(&self, url: &str, version: Version) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM doc_chunks WHERE url = ? AND version = ?")
            .bind(url)
            .bind(version.tag() as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_chunks(&self, url: &str, version: Version) -> Result<Vec<DocChunk>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM doc_chunks WHERE url = ? AND version = ? ORDER BY chunk_number",
        )
        .bind(url)
        .bind(version.tag() as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn search(
        &self,
        query: &[f32],
        version: Version,
        k: usize,
    ) -> Result<Vec<RetrievalResult>, StoreError> {
        if let Some(expected) = self.stored_dims().await? {
            if expected != query.len() {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    got: query.len(),
                });
            }
        }

        let rows = sqlx::query(
            "SELECT url, title, content, embedding FROM doc_chunks WHERE version = ? ORDER BY rowid",
        )
        .bind(version.tag() as i64)
        .fetch_all(&self.pool)
        .await?;

        let scored = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                RetrievalResult {
                    url: row.get("url"),
                    title: row.get("title"),
                    content: row.get("content"),
                    similarity: cosine_similarity(query, &blob_to_vec(&blob)) as f64,
                }
            })
            .collect();

        Ok(top_k(scored, k))
    }

    async fn get_source(
        &self,
        url: &str,
        version: Version,
    ) -> Result<Option<SourceRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM source_files WHERE url = ? AND version = ?")
            .bind(url)
            .bind(version.tag() as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_source))
    }

    async fn put_source(&self, record: &SourceRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO source_files (url, version, source_path, fingerprint, chunk_count, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(url, version) DO UPDATE SET
                source_path = excluded.source_path,
                fingerprint = excluded.fingerprint,
                chunk_count = excluded.chunk_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.url)
        .bind(record.version.tag() as i64)
        .bind(&record.source_path)
        .bind(&record.fingerprint)
        .bind(record.chunk_count)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_source(&self, url: &str, version: Version) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM source_files WHERE url = ? AND version = ?")
            .bind(url)
            .bind(version.tag() as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_sources(&self, version: Version) -> Result<Vec<SourceRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM source_files WHERE version = ? ORDER BY url")
            .bind(version.tag() as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_source).collect())
    }

    async fn stats(&self) -> Result<Vec<VersionStats>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT version,
                   SUM(chunks) AS chunks,
                   SUM(sources) AS sources
            FROM (
                SELECT version, COUNT(*) AS chunks, 0 AS sources FROM doc_chunks GROUP BY version
                UNION ALL
                SELECT version, 0 AS chunks, COUNT(*) AS sources FROM source_files GROUP BY version
            )
            GROUP BY version
            ORDER BY version
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| VersionStats {
                version: Version(row.get::<i64, _>("version") as u32),
                sources: row.get("sources"),
                chunks: row.get("chunks"),
            })
            .collect())
    }
}

//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete backends:
//! - **[`DisabledEmbedder`]**: always errors; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: OpenAI-compatible `POST /v1/embeddings`.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: fastembed inference (feature `local-embeddings-fastembed`).
//!
//! A backend performs exactly one request per call. Batching, rate
//! limiting and retries live in [`EmbeddingClient`], which every caller
//! goes through.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited), 5xx and network errors → [`EmbeddingError::Transient`], retried
//! - Other HTTP 4xx → [`EmbeddingError::Permanent`], fail immediately
//! - Backoff: `backoff_base_ms` × 1, 2, 4, 8, 16, 32 (capped at 2^5)
//!
//! Also provides the vector helpers used by the store:
//! [`vec_to_blob`], [`blob_to_vec`] and [`cosine_similarity`].

#[cfg(feature = "local-embeddings-fastembed")]
mod local;
mod ollama;
mod openai;

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAIEmbedder;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

/// A text embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality every returned embedding must have.
    fn dims(&self) -> usize;
    /// Embed one batch with a single provider request, results in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Always fails with [`EmbeddingError::Disabled`].
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

/// Build the backend named by `embedding.provider`.
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (needs `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Map an HTTP status to the retry classification.
pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str, who: &str) -> EmbeddingError {
    let message = format!("{} API error {}: {}", who, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        EmbeddingError::Transient(message)
    } else {
        EmbeddingError::Permanent(message)
    }
}

/// Parse a JSON array of numbers into a vector.
pub(crate) fn json_vector(value: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    value
        .as_array()
        .ok_or_else(|| EmbeddingError::InvalidResponse("embedding is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::InvalidResponse("non-numeric component".to_string()))
        })
        .collect()
}

/// Newlines become spaces and the text is cut to `max_chars` characters.
pub fn prepare_text(text: &str, max_chars: usize) -> String {
    let flat = text.replace(['\r', '\n'], " ");
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => flat[..idx].to_string(),
        None => flat,
    }
}

/// Client-side request pacing.
///
/// Each caller reserves the next free slot under the lock and sleeps
/// outside it, so concurrent workers share one request budget.
pub struct RateLimiter {
    interval: Option<Duration>,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// `0` means unlimited.
    pub fn per_minute(requests: u32) -> Self {
        let interval = if requests == 0 {
            None
        } else {
            Some(Duration::from_secs(60) / requests)
        };
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let Some(interval) = self.interval else {
            return;
        };
        let wait = {
            let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + interval);
            slot - now
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Batching, pacing and retries around an [`Embedder`].
pub struct EmbeddingClient {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    max_retries: u32,
    backoff_base: Duration,
    max_input_chars: usize,
    limiter: RateLimiter,
}

impl EmbeddingClient {
    pub fn new(embedder: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Self {
        Self {
            embedder,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            max_input_chars: config.max_input_chars,
            limiter: RateLimiter::per_minute(config.requests_per_minute),
        }
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn dims(&self) -> usize {
        self.embedder.dims()
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }

    /// Embed many texts in batches of `batch_size`.
    ///
    /// Returns one outcome per input. A batch that exhausts its retries
    /// fails all of its items; later batches are still attempted.
    pub async fn embed_texts(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            match self.embed_batch(batch).await {
                Ok(vectors) => out.extend(vectors.into_iter().map(Ok)),
                Err(e) => {
                    tracing::warn!(batch = batch.len(), error = %e, "embedding batch failed");
                    out.extend(batch.iter().map(|_| Err(e.clone())));
                }
            }
        }
        out
    }

    /// One batch with pacing and retries; vectors are validated against
    /// the batch size and the configured dimensionality.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let prepared: Vec<String> = texts
            .iter()
            .map(|t| prepare_text(t, self.max_input_chars))
            .collect();

        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let delay = self.backoff_base * (1u32 << (attempt - 1).min(5));
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying embedding batch");
                tokio::time::sleep(delay).await;
            }

            self.limiter.acquire().await;
            match self.embedder.embed(&prepared).await {
                Ok(vectors) => return self.validate(vectors, prepared.len()),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    tracing::debug!(error = %e, attempt, "transient embedding failure");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn validate(&self, vectors: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if vectors.len() != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                expected,
                vectors.len()
            )));
        }
        let dims = self.embedder.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} dimensions, got {}",
                dims,
                bad.len()
            )));
        }
        Ok(vectors)
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

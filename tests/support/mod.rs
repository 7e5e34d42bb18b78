//! Deterministic providers and config helpers shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use docs_expert::config::{parse_config, Config};
use docs_expert::embedding::{Embedder, EmbeddingClient};
use docs_expert::error::{EmbeddingError, GenerationError};
use docs_expert::generation::{DeltaStream, Generator, Prompt};

/// Vocabulary of the keyword embedder; the last dimension is a constant bias.
pub const VOCAB: &[&str] = &["alpha", "beta", "gamma", "delta", "install", "upgrade"];

/// Embeds text as keyword counts over [`VOCAB`]. Counts every batch it sees.
#[derive(Default)]
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
    /// Texts containing this word fail permanently.
    pub poison: Option<&'static str>,
}

impl KeywordEmbedder {
    pub fn poisoned(word: &'static str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            poison: Some(word),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = VOCAB
        .iter()
        .map(|w| lower.matches(w).count() as f32)
        .collect();
    v.push(0.05);
    v
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        VOCAB.len() + 1
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(word) = self.poison {
            if texts.iter().any(|t| t.contains(word)) {
                return Err(EmbeddingError::Permanent(format!("refused '{}'", word)));
            }
        }
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Streams a fixed answer, optionally failing after the deltas.
pub struct ScriptedGenerator {
    pub deltas: Vec<String>,
    pub fail_after: bool,
    pub last_prompt: Mutex<Option<Prompt>>,
}

impl ScriptedGenerator {
    pub fn answering(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            fail_after: false,
            last_prompt: Mutex::new(None),
        }
    }

    pub fn failing_after(deltas: &[&str]) -> Self {
        Self {
            fail_after: true,
            ..Self::answering(deltas)
        }
    }

    pub fn last_prompt(&self) -> Option<Prompt> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, prompt: &Prompt) -> Result<DeltaStream, GenerationError> {
        *self.last_prompt.lock().unwrap() = Some(prompt.clone());
        let mut items: Vec<Result<String, GenerationError>> =
            self.deltas.iter().cloned().map(Ok).collect();
        if self.fail_after {
            items.push(Err(GenerationError::Stream("connection reset".to_string())));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Config rooted at `root` with versions 17.0 and 18.0.
pub fn test_config(root: &Path) -> Config {
    let toml = format!(
        r#"[db]
path = "{root}/data/docs.sqlite"

[paths]
raw_dir = "{root}/raw"
markdown_dir = "{root}/markdown"

[docs]
versions = ["17.0", "18.0"]
base_url = "https://docs.example.com"

[embedding]
backoff_base_ms = 1
max_retries = 1

[ingest]
workers = 2

[server]
bearer_tokens = ["secret-token"]
"#,
        root = root.display()
    );
    parse_config(&toml).unwrap()
}

pub fn embedding_client(config: &Config, embedder: Arc<KeywordEmbedder>) -> Arc<EmbeddingClient> {
    Arc::new(EmbeddingClient::new(embedder, &config.embedding))
}

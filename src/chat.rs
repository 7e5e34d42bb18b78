//! Retrieval-augmented chat.
//!
//! Each request moves through
//! `RECEIVED → EMBEDDING_QUERY → RETRIEVING → GENERATING → STREAMING → DONE`
//! (or `FAILED`), logged under a per-request id. Everything up to
//! `GENERATING` fails the request outright; once streaming has started a
//! failure becomes a trailing [`ChatEvent::Error`] and no sources follow.

use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::{create_embedder, EmbeddingClient};
use crate::error::{ChatError, GenerationError, ValidationError};
use crate::generation::{create_generator, DeltaStream, Generator, Prompt};
use crate::models::{ConversationTurn, RetrievalResult, Source, Version};
use crate::store::Store;

/// Body of `/api/chat` and `/api/stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    /// `"18.0"` or the integer tag `180`.
    #[serde(deserialize_with = "version_string")]
    pub version: String,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
}

fn version_string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(de)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid version: {}", other))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone)]
pub enum ChatEvent {
    Delta(String),
    /// Sent once, after the last delta of a successful answer.
    Sources(Vec<Source>),
    Error(GenerationError),
}

pub type ChatStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

#[derive(Debug, Clone, Copy)]
enum Stage {
    Received,
    EmbeddingQuery,
    Retrieving,
    Generating,
    Streaming,
    Failed,
    Done,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::Received => "RECEIVED",
            Stage::EmbeddingQuery => "EMBEDDING_QUERY",
            Stage::Retrieving => "RETRIEVING",
            Stage::Generating => "GENERATING",
            Stage::Streaming => "STREAMING",
            Stage::Failed => "FAILED",
            Stage::Done => "DONE",
        }
    }
}

fn log_stage(request_id: &str, stage: Stage) {
    tracing::debug!(request_id, state = stage.as_str(), "chat");
}

pub struct ChatEngine {
    store: Arc<dyn Store>,
    embeddings: Arc<EmbeddingClient>,
    generator: Arc<dyn Generator>,
    versions: Vec<Version>,
    k: usize,
    max_history_turns: usize,
    system_prompt: String,
}

impl ChatEngine {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        embeddings: Arc<EmbeddingClient>,
        generator: Arc<dyn Generator>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            embeddings,
            generator,
            versions: config.docs.version_list()?,
            k: config.retrieval.k,
            max_history_turns: config.chat.max_history_turns,
            system_prompt: config.chat.system_prompt.clone(),
        })
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    fn validate(&self, request: &ChatRequest) -> Result<Version, ValidationError> {
        if request.query.trim().is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        let version: Version = request
            .version
            .parse()
            .map_err(|_| ValidationError::UnsupportedVersion(request.version.clone()))?;
        if !self.versions.contains(&version) {
            return Err(ValidationError::UnsupportedVersion(request.version.clone()));
        }
        Ok(version)
    }

    /// Answer as a stream of [`ChatEvent`]s.
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatStream, ChatError> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        log_stage(&request_id, Stage::Received);

        let result = self.prepare(&request_id, request).await;
        let (deltas, sources) = match result {
            Ok(ready) => ready,
            Err(e) => {
                log_stage(&request_id, Stage::Failed);
                tracing::info!(request_id, error = %e, "chat request failed");
                return Err(e);
            }
        };

        log_stage(&request_id, Stage::Streaming);
        Ok(answer_stream(deltas, sources, request_id, started))
    }

    async fn prepare(
        &self,
        request_id: &str,
        request: &ChatRequest,
    ) -> Result<(DeltaStream, Vec<Source>), ChatError> {
        let version = self.validate(request)?;

        log_stage(request_id, Stage::EmbeddingQuery);
        let query_vec = self.embeddings.embed_query(&request.query).await?;

        log_stage(request_id, Stage::Retrieving);
        let results = self.store.search(&query_vec, version, self.k).await?;
        if results.is_empty() {
            return Err(ChatError::NotFound);
        }
        tracing::debug!(request_id, %version, hits = results.len(), "retrieved");

        log_stage(request_id, Stage::Generating);
        let prompt = build_prompt(
            &self.system_prompt,
            &request.conversation_history,
            self.max_history_turns,
            &request.query,
            &results,
        );
        let deltas = self.generator.stream(&prompt).await?;

        Ok((deltas, dedup_sources(&results)))
    }

    /// Collect the whole answer. A mid-stream failure becomes the error.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError> {
        let mut events = self.stream_chat(request).await?;
        let mut answer = String::new();
        let mut sources = Vec::new();
        while let Some(event) = events.next().await {
            match event {
                ChatEvent::Delta(d) => answer.push_str(&d),
                ChatEvent::Sources(s) => sources = s,
                ChatEvent::Error(e) => return Err(e.into()),
            }
        }
        Ok(ChatResponse { answer, sources })
    }
}

struct AnswerState {
    deltas: DeltaStream,
    sources: Option<Vec<Source>>,
    finished: bool,
    request_id: String,
    started: Instant,
    chars: usize,
}

fn answer_stream(
    deltas: DeltaStream,
    sources: Vec<Source>,
    request_id: String,
    started: Instant,
) -> ChatStream {
    let state = AnswerState {
        deltas,
        sources: Some(sources),
        finished: false,
        request_id,
        started,
        chars: 0,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }
        match st.deltas.next().await {
            Some(Ok(delta)) => {
                st.chars += delta.len();
                Some((ChatEvent::Delta(delta), st))
            }
            Some(Err(e)) => {
                st.finished = true;
                log_stage(&st.request_id, Stage::Failed);
                tracing::warn!(request_id = %st.request_id, error = %e, "generation failed mid-stream");
                Some((ChatEvent::Error(e), st))
            }
            None => {
                st.finished = true;
                log_stage(&st.request_id, Stage::Done);
                let sources = st.sources.take().unwrap_or_default();
                tracing::info!(
                    request_id = %st.request_id,
                    chars = st.chars,
                    sources = sources.len(),
                    elapsed_ms = st.started.elapsed().as_millis() as u64,
                    "chat answered"
                );
                Some((ChatEvent::Sources(sources), st))
            }
        }
    }))
}

/// Unique sources by URL, first occurrence wins, in retrieval order.
pub fn dedup_sources(results: &[RetrievalResult]) -> Vec<Source> {
    let mut seen = std::collections::HashSet::new();
    results
        .iter()
        .filter(|r| seen.insert(r.url.as_str()))
        .map(|r| Source {
            url: r.url.clone(),
            title: r.title.clone(),
        })
        .collect()
}

/// Grounding prompt: recent history, the question, then the excerpts.
pub fn build_prompt(
    system: &str,
    history: &[ConversationTurn],
    max_turns: usize,
    query: &str,
    results: &[RetrievalResult],
) -> Prompt {
    let mut user = String::new();

    let recent = &history[history.len().saturating_sub(max_turns)..];
    if !recent.is_empty() {
        user.push_str("Previous conversation:\n");
        for turn in recent {
            user.push_str(&format!("User: {}\nAssistant: {}\n", turn.user, turn.assistant));
        }
        user.push('\n');
    }

    let context = results
        .iter()
        .map(|r| format!("Document: {}\nTitle: {}\nContent: {}", r.url, r.title, r.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    user.push_str(&format!(
        "Question: {}\n\nRelevant documentation:\nContext:\n{}",
        query, context
    ));

    Prompt {
        system: system.to_string(),
        user,
    }
}

/// `dex ask`: answer one question from the terminal, streaming the reply.
pub async fn run_ask(config: &Config, query: &str, version: &str) -> anyhow::Result<()> {
    let store = crate::db::open_store(config).await?;
    let embedder = create_embedder(&config.embedding)?;
    let embeddings = Arc::new(EmbeddingClient::new(embedder, &config.embedding));
    let generator = create_generator(&config.generation)?;
    let engine = ChatEngine::new(config, store, embeddings, generator)?;

    let request = ChatRequest {
        query: query.to_string(),
        version: version.to_string(),
        conversation_history: Vec::new(),
    };
    let mut events = engine.stream_chat(&request).await?;

    let mut out = std::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            ChatEvent::Delta(d) => {
                print!("{}", d);
                out.flush()?;
            }
            ChatEvent::Sources(sources) => {
                println!();
                println!();
                println!("Sources:");
                for s in sources {
                    println!("  - {} ({})", s.title, s.url);
                }
            }
            ChatEvent::Error(e) => {
                println!();
                anyhow::bail!("generation failed: {}", e);
            }
        }
    }
    Ok(())
}

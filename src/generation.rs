//! Answer generation providers.
//!
//! A [`Generator`] turns a [`Prompt`] into a [`DeltaStream`]: a stream of
//! text fragments in arrival order. Dropping the stream drops the HTTP
//! response body, which cancels the upstream request.
//!
//! | Config Value | Provider | Wire format |
//! |-------------|----------|-------------|
//! | `"openai"` | [`OpenAIGenerator`] | `POST /v1/chat/completions`, SSE `data:` lines ending in `[DONE]` |
//! | `"ollama"` | [`OllamaGenerator`] | `POST /api/chat`, newline-delimited JSON ending in `"done": true` |
//! | `"disabled"` | [`DisabledGenerator`] | always errors |
//!
//! A body that ends before its terminator is reported as
//! [`GenerationError::Stream`] after any deltas already received.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::GenerationError;

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// System instructions plus the assembled user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

impl Prompt {
    fn messages(&self) -> Vec<ChatMessage<'_>> {
        vec![
            ChatMessage {
                role: "system",
                content: &self.system,
            },
            ChatMessage {
                role: "user",
                content: &self.user,
            },
        ]
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Start generating. Errors before the first byte are returned here;
    /// later failures arrive as the stream's last item.
    async fn stream(&self, prompt: &Prompt) -> Result<DeltaStream, GenerationError>;
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn stream(&self, _prompt: &Prompt) -> Result<DeltaStream, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    // The timeout covers the whole streamed body, so it bounds answer length too.
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

async fn send(request: reqwest::RequestBuilder, who: &str) -> Result<reqwest::Response, GenerationError> {
    let response = request
        .send()
        .await
        .map_err(|e| GenerationError::Request(format!("{} request failed: {}", who, e)))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GenerationError::Request(format!("{} returned {}: {}", who, status, body)));
    }
    Ok(response)
}

// ============ OpenAI ============

pub struct OpenAIGenerator {
    client: reqwest::Client,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        if api_key.is_none() && config.url.is_none() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        let base = config
            .url
            .as_deref()
            .unwrap_or("https://api.openai.com")
            .trim_end_matches('/');

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model,
            endpoint: format!("{}/v1/chat/completions", base),
            api_key,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, prompt: &Prompt) -> Result<DeltaStream, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": prompt.messages(),
            "temperature": self.temperature,
            "stream": true,
        });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = send(request, "OpenAI").await?;
        Ok(line_stream(response.bytes_stream(), parse_sse_line))
    }
}

/// One SSE line of a chat-completions stream.
fn parse_sse_line(line: &str) -> Result<Parsed, GenerationError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, comments, `event:` and `id:` fields.
        return Ok(Parsed::default());
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Parsed {
            delta: None,
            done: true,
        });
    }

    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| GenerationError::Stream(format!("invalid stream payload: {}", e)))?;
    if let Some(err) = json.get("error") {
        return Err(GenerationError::Stream(error_message(err)));
    }
    let delta = json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    Ok(Parsed { delta, done: false })
}

// ============ Ollama ============

pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    temperature: f32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model,
            url,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, prompt: &Prompt) -> Result<DeltaStream, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": prompt.messages(),
            "stream": true,
            "options": { "temperature": self.temperature },
        });
        let request = self.client.post(format!("{}/api/chat", self.url)).json(&body);
        let response = send(request, "Ollama").await?;
        Ok(line_stream(response.bytes_stream(), parse_ndjson_line))
    }
}

fn parse_ndjson_line(line: &str) -> Result<Parsed, GenerationError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Parsed::default());
    }
    let json: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| GenerationError::Stream(format!("invalid stream payload: {}", e)))?;
    if let Some(err) = json.get("error") {
        return Err(GenerationError::Stream(error_message(err)));
    }
    let delta = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    let done = json.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    Ok(Parsed { delta, done })
}

fn error_message(err: &serde_json::Value) -> String {
    err.get("message")
        .and_then(|m| m.as_str())
        .or_else(|| err.as_str())
        .unwrap_or("provider reported an error")
        .to_string()
}

// ============ Line framing ============

#[derive(Debug, Default, PartialEq, Eq)]
struct Parsed {
    delta: Option<String>,
    done: bool,
}

type LineParser = fn(&str) -> Result<Parsed, GenerationError>;

struct LineState<S> {
    inner: Pin<Box<S>>,
    buf: Vec<u8>,
    queue: VecDeque<Result<String, GenerationError>>,
    parse: LineParser,
    finished: bool,
}

impl<S> LineState<S> {
    fn handle_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        match (self.parse)(line.trim_end_matches(['\r', '\n'])) {
            Ok(parsed) => {
                if let Some(delta) = parsed.delta {
                    self.queue.push_back(Ok(delta));
                }
                if parsed.done {
                    self.finished = true;
                }
            }
            Err(e) => {
                self.queue.push_back(Err(e));
                self.finished = true;
            }
        }
    }

    fn drain_lines(&mut self) {
        while !self.finished {
            let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.handle_line(&line);
        }
    }
}

/// Split a byte stream into lines and parse each into deltas.
fn line_stream<S, B, E>(inner: S, parse: LineParser) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = LineState {
        inner: Box::pin(inner),
        buf: Vec::new(),
        queue: VecDeque::new(),
        parse,
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.queue.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(bytes)) => {
                    st.buf.extend_from_slice(bytes.as_ref());
                    st.drain_lines();
                }
                Some(Err(e)) => {
                    st.queue.push_back(Err(GenerationError::Stream(e.to_string())));
                    st.finished = true;
                }
                None => {
                    if !st.buf.is_empty() {
                        let rest = std::mem::take(&mut st.buf);
                        st.handle_line(&rest);
                    }
                    if !st.finished {
                        st.queue.push_back(Err(GenerationError::Stream(
                            "response ended before completion".to_string(),
                        )));
                        st.finished = true;
                    }
                }
            }
        }
    }))
}

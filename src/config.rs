//! TOML configuration parsing and validation.
//!
//! Secrets never live in the file: provider keys are read from
//! `OPENAI_API_KEY` and extra bearer tokens from `BEARER_TOKEN`
//! (comma-separated), matching how the server is usually deployed.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::Version;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub paths: PathsConfig,
    pub docs: DocsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Mirrored upstream tree: `<raw_dir>/versions/<v>/content/**`.
    pub raw_dir: PathBuf,
    /// Converted output: `<markdown_dir>/versions/<v>/content/**.md`.
    pub markdown_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    /// Supported release lines, e.g. `["16.0", "17.0", "18.0"]`.
    pub versions: Vec<String>,
    pub base_url: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.rst".to_string(), "**/*.md".to_string()]
}

impl DocsConfig {
    /// Parsed version tags, in configured order.
    pub fn version_list(&self) -> Result<Vec<Version>> {
        self.versions
            .iter()
            .map(|v| {
                v.parse::<Version>()
                    .with_context(|| format!("invalid entry in docs.versions: '{}'", v))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub base_index: i64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            base_index: 0,
        }
    }
}

fn default_max_chars() -> usize {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible gateways, remote Ollama).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 0 disables client-side rate limiting.
    #[serde(default)]
    pub requests_per_minute: u32,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            timeout_secs: default_timeout_secs(),
            requests_per_minute: 0,
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_input_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            timeout_secs: default_generation_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: default_k() }
    }
}

fn default_k() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_history_turns: default_max_history_turns(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_max_history_turns() -> usize {
    3
}

fn default_system_prompt() -> String {
    "You are a documentation assistant. Answer only from the documentation excerpts \
     provided below. If they do not contain the answer, say so. Refer to the \
     documents you used by their URL."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub bearer_tokens: Vec<String>,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            bearer_tokens: Vec::new(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl ServerConfig {
    /// Configured tokens plus any from the `BEARER_TOKEN` environment variable.
    pub fn token_allow_list(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .bearer_tokens
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if let Ok(env_tokens) = std::env::var("BEARER_TOKEN") {
            tokens.extend(
                env_tokens
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty()),
            );
        }
        tokens
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.docs.versions.is_empty() {
        anyhow::bail!("docs.versions must list at least one version");
    }
    config.docs.version_list()?;

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.base_index < 0 {
        anyhow::bail!("chunking.base_index must be >= 0");
    }
    if config.retrieval.k == 0 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be >= 1");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.generation.model.is_none() {
                anyhow::bail!(
                    "generation.model must be specified when provider is '{}'",
                    config.generation.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/docs.sqlite"

[paths]
raw_dir = "./raw_data"
markdown_dir = "./markdown"

[docs]
versions = ["17.0", "18.0"]
base_url = "https://docs.example.com/documentation"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.chunking.max_chars, 5000);
        assert_eq!(cfg.chunking.base_index, 0);
        assert_eq!(cfg.retrieval.k, 6);
        assert_eq!(cfg.chat.max_history_turns, 3);
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.embedding.max_input_chars, 8000);
        assert_eq!(
            cfg.docs.version_list().unwrap(),
            vec![Version(170), Version(180)]
        );
        assert_eq!(cfg.server.cors_origins, vec!["*".to_string()]);
    }

    #[test]
    fn test_bad_version_rejected() {
        let bad = MINIMAL.replace("\"17.0\"", "\"seventeen\"");
        let err = parse_config(&bad).unwrap_err();
        assert!(err.to_string().contains("docs.versions"));
    }

    #[test]
    fn test_enabled_embedding_requires_dims() {
        let cfg = format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
            MINIMAL
        );
        let err = parse_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_generation_provider() {
        let cfg = format!("{}\n[generation]\nprovider = \"carrier-pigeon\"\n", MINIMAL);
        assert!(parse_config(&cfg).is_err());
    }
}

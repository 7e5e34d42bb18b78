//! # docs-expert
//!
//! Versioned documentation ingestion and retrieval-augmented chat.
//!
//! Sources (reStructuredText or Markdown) for each documentation version are
//! converted to Markdown, split into header-aware chunks, embedded, and
//! stored in SQLite keyed by `(url, chunk_number, version)`. Questions are
//! answered by retrieving the most similar chunks of one version and
//! streaming a grounded answer followed by its cited pages.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │ raw sources │──▶│ convert→chunk→embed  │──▶│  SQLite   │
//! │ per version │   │ (fingerprint gated)  │   │ doc_chunks│
//! └─────────────┘   └──────────────────────┘   └────┬─────┘
//!                                                   │
//!                      ┌────────────────────────────┤
//!                      ▼                            ▼
//!                 ┌──────────┐                ┌──────────┐
//!                 │   CLI    │                │   HTTP   │
//!                 │  (dex)   │                │ chat/SSE │
//!                 └──────────┘                └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed error taxonomy |
//! | [`convert`] | reStructuredText / Markdown to Markdown |
//! | [`chunk`] | Header-aware chunking |
//! | [`fingerprint`] | SHA-256 change detection |
//! | [`embedding`] | Embedding providers, batching, retry |
//! | [`store`] | Chunk store and vector retrieval |
//! | [`ingest`] | Per-version update pipeline |
//! | [`generation`] | Streaming chat-completion providers |
//! | [`chat`] | Retrieval-augmented answer orchestration |
//! | [`auth`] | Bearer token gate |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod auth;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod convert;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod server;
pub mod stats;
pub mod store;

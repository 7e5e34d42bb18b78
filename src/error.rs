//! Typed errors for the ingestion pipeline and the chat request path.
//!
//! Batch stages (conversion, embedding) report these per item and keep
//! going; request-serving code fails fast with a single [`ChatError`].

use thiserror::Error;

/// A source file could not be turned into markdown. Non-fatal to a batch.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    Encoding { path: String },

    #[error("{path}: {message} (line {line})")]
    Malformed {
        path: String,
        line: usize,
        message: String,
    },

    #[error("cannot derive a documentation URL from {0}")]
    Url(String),
}

/// Failure from the embedding provider.
#[derive(Error, Debug, Clone)]
pub enum EmbeddingError {
    /// Rate limits, 5xx responses and network errors. Retried.
    #[error("transient embedding failure: {0}")]
    Transient(String),

    /// Client errors and anything else retrying cannot fix.
    #[error("embedding failure: {0}")]
    Permanent(String),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding provider is disabled")]
    Disabled,
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Transient(_))
    }
}

/// A write or query against the chunk store failed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("embedding has {got} dimensions, store holds {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("corrupt row for {url}#{chunk_number}: {message}")]
    Corrupt {
        url: String,
        chunk_number: i64,
        message: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer credential")]
    Missing,

    #[error("invalid API token")]
    Invalid,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("query must not be empty")]
    EmptyQuery,

    #[error("invalid version tag: {0}")]
    MalformedVersion(String),

    #[error("metadata key '{0}' is reserved")]
    ReservedMetadataKey(String),
}

/// Failure from the answer generation provider.
#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Request(String),

    #[error("generation stream interrupted: {0}")]
    Stream(String),

    #[error("generation provider is disabled")]
    Disabled,
}

/// Everything that can end a chat request.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("no relevant documentation found")]
    NotFound,
}

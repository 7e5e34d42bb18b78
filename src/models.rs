//! Core data models used throughout docs-expert.
//!
//! These types represent the chunks, fingerprints, and retrieval results that
//! flow through the ingestion pipeline and the chat path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// A documentation release line, stored as `major * 10 + minor`.
///
/// `"18.0"` parses to `Version(180)` and displays as `18.0`. A bare integer
/// (`"180"`) is taken as the tag itself, matching what API clients send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u32);

impl Version {
    pub fn tag(self) -> u32 {
        self.0
    }
}

impl FromStr for Version {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let malformed = || ValidationError::MalformedVersion(s.to_string());

        match s.split_once('.') {
            Some((major, minor)) => {
                if minor.len() != 1 {
                    return Err(malformed());
                }
                let major: u32 = major.parse().map_err(|_| malformed())?;
                let minor: u32 = minor.parse().map_err(|_| malformed())?;
                major
                    .checked_mul(10)
                    .and_then(|m| m.checked_add(minor))
                    .map(Version)
                    .ok_or_else(malformed)
            }
            None => s.parse::<u32>().map(Version).map_err(|_| malformed()),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

/// Metadata keys owned by the pipeline. Free-form keys may not reuse them.
pub const RESERVED_METADATA_KEYS: &[&str] = &[
    "fingerprint",
    "header_path",
    "section_anchor",
    "source_path",
    "chunk_size",
    "version_str",
];

/// Provenance attached to every stored chunk.
///
/// Serialized as a flat JSON object: the reserved keys plus whatever
/// was added through [`ChunkMetadata::insert_extra`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// SHA-256 of the source file the chunk was derived from.
    pub fingerprint: String,
    #[serde(default)]
    pub header_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_anchor: Option<String>,
    #[serde(default)]
    pub source_path: String,
    #[serde(default)]
    pub chunk_size: usize,
    #[serde(default)]
    pub version_str: String,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl ChunkMetadata {
    pub fn new(
        fingerprint: impl Into<String>,
        source_path: impl Into<String>,
        version: Version,
    ) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            source_path: source_path.into(),
            version_str: version.to_string(),
            ..Default::default()
        }
    }

    pub fn insert_extra(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), ValidationError> {
        let key = key.into();
        if RESERVED_METADATA_KEYS.contains(&key.as_str()) {
            return Err(ValidationError::ReservedMetadataKey(key));
        }
        self.extra.insert(key, value);
        Ok(())
    }

    pub fn extra(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.extra
    }
}

/// A heading-aligned slice of a converted document, not yet embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_number: i64,
    /// Nearest enclosing heading.
    pub title: String,
    pub content: String,
    /// Enclosing headings, outermost first.
    pub header_path: Vec<String>,
    pub section_anchor: Option<String>,
}

/// A stored, embedded chunk. Identity is `(url, chunk_number, version)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DocChunk {
    pub url: String,
    pub chunk_number: i64,
    pub version: Version,
    pub title: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
    /// Unix seconds.
    pub created_at: i64,
}

/// Persisted fingerprint for one source file of one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub url: String,
    pub version: Version,
    pub source_path: String,
    pub fingerprint: String,
    pub chunk_count: i64,
    pub updated_at: i64,
}

/// One prior exchange supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}

/// A chunk returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub url: String,
    pub title: String,
    pub content: String,
    pub similarity: f64,
}

/// A cited source in a chat answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: String,
}

/// Row counts for one version, shown by `dex stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionStats {
    pub version: Version,
    pub sources: i64,
    pub chunks: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse_and_display() {
        let v: Version = "18.0".parse().unwrap();
        assert_eq!(v, Version(180));
        assert_eq!(v.to_string(), "18.0");
        assert_eq!("165".parse::<Version>().unwrap(), Version(165));
        assert_eq!(Version(165).to_string(), "16.5");
    }

    #[test]
    fn test_version_rejects_garbage() {
        assert!("18.00".parse::<Version>().is_err());
        assert!("latest".parse::<Version>().is_err());
        assert!("".parse::<Version>().is_err());
        assert_eq!(
            "429496730.0".parse::<Version>(),
            Err(ValidationError::MalformedVersion("429496730.0".to_string()))
        );
    }

    #[test]
    fn test_metadata_reserved_keys_rejected() {
        let mut meta = ChunkMetadata::default();
        let err = meta
            .insert_extra("fingerprint", serde_json::json!("x"))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::ReservedMetadataKey("fingerprint".to_string())
        );
        meta.insert_extra("filename", serde_json::json!("install.md"))
            .unwrap();
        assert_eq!(meta.extra().len(), 1);
    }

    #[test]
    fn test_metadata_serializes_flat() {
        let mut meta = ChunkMetadata::new("abc", "content/install.rst", Version(180));
        meta.header_path = vec!["Install".to_string()];
        meta.insert_extra("filename", serde_json::json!("install.md"))
            .unwrap();
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["fingerprint"], "abc");
        assert_eq!(json["filename"], "install.md");

        let back: ChunkMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}

//! Change detection over source files.
//!
//! Every source file is fingerprinted with SHA-256 over its raw bytes and
//! compared to the [`SourceRecord`] persisted by the last successful run.
//! Nothing is kept in memory between runs; the store is the only state.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::convert::page_url;
use crate::models::{SourceRecord, Version};

/// Hex SHA-256 of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    /// Fingerprint matches the stored record; nothing to do.
    Unchanged,
    /// A record exists with a different fingerprint.
    Changed,
    /// No record exists for this page.
    New,
}

pub fn decide(previous: Option<&SourceRecord>, fingerprint: &str) -> ChangeDecision {
    match previous {
        None => ChangeDecision::New,
        Some(rec) if rec.fingerprint == fingerprint => ChangeDecision::Unchanged,
        Some(_) => ChangeDecision::Changed,
    }
}

/// A source file found on disk for one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub url: String,
    /// Path relative to the version's content root, `/`-separated.
    pub source_path: String,
    pub abs_path: PathBuf,
    pub fingerprint: String,
}

/// Source tree of one version compared with what the store holds.
#[derive(Debug, Default, Clone)]
pub struct TreeDiff {
    pub added: Vec<SourceFile>,
    pub modified: Vec<SourceFile>,
    pub removed: Vec<SourceRecord>,
    pub unchanged: Vec<SourceFile>,
}

impl TreeDiff {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.modified.is_empty() || !self.removed.is_empty()
    }
}

/// Compare scanned files with persisted records. Output lists are sorted
/// by URL.
pub fn diff_tree(current: Vec<SourceFile>, persisted: Vec<SourceRecord>) -> TreeDiff {
    let mut records: HashMap<String, SourceRecord> =
        persisted.into_iter().map(|r| (r.url.clone(), r)).collect();
    let mut diff = TreeDiff::default();

    for file in current {
        let previous = records.remove(&file.url);
        match decide(previous.as_ref(), &file.fingerprint) {
            ChangeDecision::New => diff.added.push(file),
            ChangeDecision::Changed => diff.modified.push(file),
            ChangeDecision::Unchanged => diff.unchanged.push(file),
        }
    }

    diff.removed = records.into_values().collect();

    diff.added.sort_by(|a, b| a.url.cmp(&b.url));
    diff.modified.sort_by(|a, b| a.url.cmp(&b.url));
    diff.unchanged.sort_by(|a, b| a.url.cmp(&b.url));
    diff.removed.sort_by(|a, b| a.url.cmp(&b.url));
    diff
}

/// `<raw_dir>/versions/<v>/content`
pub fn content_root(raw_dir: &Path, version: Version) -> PathBuf {
    raw_dir
        .join("versions")
        .join(version.to_string())
        .join("content")
}

/// Walk a version's content root and fingerprint every included file.
/// A missing root yields an empty list so a newly configured version
/// simply has nothing to ingest yet.
pub fn scan_sources(
    root: &Path,
    include_globs: &[String],
    base_url: &str,
    version: Version,
) -> Result<Vec<SourceFile>> {
    if !root.exists() {
        tracing::warn!(root = %root.display(), %version, "content root does not exist");
        return Ok(Vec::new());
    }
    if !root.is_dir() {
        bail!("content root is not a directory: {}", root.display());
    }

    let include = build_globset(include_globs)?;
    let mut files = Vec::new();
    let mut seen_urls: HashMap<String, String> = HashMap::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");
        if !include.is_match(&rel_str) {
            continue;
        }

        let url = page_url(base_url, version, &rel_str)?;
        if let Some(other) = seen_urls.insert(url.clone(), rel_str.clone()) {
            tracing::warn!(%url, first = %other, skipped = %rel_str, "two sources map to the same page");
            continue;
        }

        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        files.push(SourceFile {
            url,
            source_path: rel_str,
            abs_path: path.to_path_buf(),
            fingerprint: fingerprint(&bytes),
        });
    }

    files.sort_by(|a, b| a.url.cmp(&b.url));
    Ok(files)
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

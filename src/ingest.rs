//! Ingestion pipeline orchestration.
//!
//! Coordinates the update flow for one version: scan sources →
//! fingerprint → diff against stored records → convert → chunk → embed →
//! upsert. Unchanged files are skipped without touching the store; removed
//! files lose their chunks and record.
//!
//! A file's new fingerprint is only recorded once every one of its chunks
//! has been written, so a partially failed file is retried next run. A
//! chunk that fails is deleted rather than left at its previous revision.

use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunk::chunk_markdown;
use crate::config::Config;
use crate::convert::Converter;
use crate::db;
use crate::embedding::{create_embedder, EmbeddingClient};
use crate::fingerprint::{self, content_root, decide, diff_tree, ChangeDecision, SourceFile, TreeDiff};
use crate::models::{Chunk, ChunkMetadata, DocChunk, SourceRecord, Version};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::store::Store;

/// Result of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// Fingerprint matched the stored record; nothing was written.
    Unchanged,
    Written {
        decision: ChangeDecision,
        chunks_written: usize,
        chunks_failed: usize,
        /// Rows removed by tail cleanup.
        tail_removed: u64,
    },
}

/// Tallies for one `process` run over a version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub version: Option<Version>,
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub chunks_written: usize,
    pub chunks_failed: usize,
    pub tail_removed: u64,
    /// `(source_path, error)` for files that could not be processed at all.
    pub files_failed: Vec<(String, String)>,
}

/// Tallies for one version of a `convert` run.
#[derive(Debug, Clone, Default)]
pub struct ConvertReport {
    pub version: Option<Version>,
    pub converted: usize,
    pub failed: Vec<(String, String)>,
}

pub struct Ingestor {
    store: Arc<dyn Store>,
    embeddings: Arc<EmbeddingClient>,
    converter: Converter,
    raw_dir: PathBuf,
    include_globs: Vec<String>,
    max_chars: usize,
    base_index: i64,
    workers: usize,
    progress: Box<dyn ProgressReporter>,
}

impl Ingestor {
    pub fn new(config: &Config, store: Arc<dyn Store>, embeddings: Arc<EmbeddingClient>) -> Self {
        Self {
            store,
            embeddings,
            converter: Converter::new(config.docs.base_url.clone()),
            raw_dir: config.paths.raw_dir.clone(),
            include_globs: config.docs.include_globs.clone(),
            max_chars: config.chunking.max_chars,
            base_index: config.chunking.base_index,
            workers: config.ingest.workers.max(1),
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Source tree of `version` compared with the stored records.
    pub async fn diff_version(&self, version: Version) -> Result<TreeDiff> {
        self.progress.report(ProgressEvent::Scanning { version });
        let root = content_root(&self.raw_dir, version);
        let files = fingerprint::scan_sources(
            &root,
            &self.include_globs,
            self.converter.base_url(),
            version,
        )?;
        let records = self.store.list_sources(version).await?;
        Ok(diff_tree(files, records))
    }

    /// Bring the store in line with the source tree of one version.
    pub async fn process_version(&self, version: Version) -> Result<IngestReport> {
        let diff = self.diff_version(version).await?;
        let mut report = IngestReport {
            version: Some(version),
            unchanged: diff.unchanged.len(),
            ..Default::default()
        };

        for record in &diff.removed {
            let removed = self.store.delete_page(&record.url, version).await?;
            self.store.delete_source(&record.url, version).await?;
            tracing::info!(url = %record.url, %version, chunks = removed, "removed source");
            report.removed += 1;
        }

        let changed: Vec<SourceFile> = diff.added.into_iter().chain(diff.modified).collect();
        let total = changed.len() as u64;
        let mut done = 0u64;

        let mut results = stream::iter(changed)
            .map(|file| async move {
                let outcome = self.process_file(&file, version).await;
                (file, outcome)
            })
            .buffer_unordered(self.workers);

        while let Some((file, outcome)) = results.next().await {
            done += 1;
            self.progress.report(ProgressEvent::Processing {
                version,
                n: done,
                total,
            });
            match outcome {
                Ok(DocumentOutcome::Unchanged) => report.unchanged += 1,
                Ok(DocumentOutcome::Written {
                    decision,
                    chunks_written,
                    chunks_failed,
                    tail_removed,
                }) => {
                    match decision {
                        ChangeDecision::New => report.added += 1,
                        _ => report.modified += 1,
                    }
                    report.chunks_written += chunks_written;
                    report.chunks_failed += chunks_failed;
                    report.tail_removed += tail_removed;
                }
                Err(e) => {
                    tracing::warn!(path = %file.source_path, error = %format!("{:#}", e), "failed to process source");
                    report.files_failed.push((file.source_path.clone(), format!("{:#}", e)));
                }
            }
        }

        Ok(report)
    }

    async fn process_file(&self, file: &SourceFile, version: Version) -> Result<DocumentOutcome> {
        let bytes = tokio::fs::read(&file.abs_path)
            .await
            .with_context(|| format!("Failed to read {}", file.abs_path.display()))?;
        self.ingest_document(&file.url, version, &file.source_path, &bytes)
            .await
    }

    /// Ingest one source document under `(url, version)`.
    ///
    /// `source_path` decides the markup dialect by extension. The document
    /// is skipped when its fingerprint matches the stored record.
    pub async fn ingest_document(
        &self,
        url: &str,
        version: Version,
        source_path: &str,
        source: &[u8],
    ) -> Result<DocumentOutcome> {
        let fp = fingerprint::fingerprint(source);
        let previous = self.store.get_source(url, version).await?;
        let decision = decide(previous.as_ref(), &fp);
        if decision == ChangeDecision::Unchanged {
            tracing::debug!(%url, %version, "unchanged");
            return Ok(DocumentOutcome::Unchanged);
        }

        let text = std::str::from_utf8(source)
            .map_err(|_| crate::error::ConversionError::Encoding {
                path: source_path.to_string(),
            })?;
        let markdown = self.converter.convert_source(text, source_path, version)?;
        let chunks = chunk_markdown(&markdown, self.max_chars, self.base_index);

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embeddings.embed_texts(&texts).await;

        let created_at = chrono::Utc::now().timestamp();
        let mut chunks_written = 0usize;
        let mut chunks_failed = 0usize;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            let stored = match vector {
                Ok(embedding) => {
                    let doc_chunk =
                        self.build_chunk(url, version, source_path, &fp, chunk, embedding, created_at)?;
                    self.store.upsert_chunk(&doc_chunk).await.map_err(|e| e.to_string())
                }
                Err(e) => Err(e.to_string()),
            };
            match stored {
                Ok(()) => chunks_written += 1,
                Err(error) => {
                    // The row under this number still holds the previous revision.
                    self.store
                        .delete_chunk(url, version, chunk.chunk_number)
                        .await?;
                    tracing::warn!(%url, chunk = chunk.chunk_number, %error, "chunk not written");
                    chunks_failed += 1;
                }
            }
        }

        let tail_removed = self
            .store
            .delete_chunks_from(url, version, self.base_index + chunks.len() as i64)
            .await?;

        if chunks_failed == 0 {
            self.store
                .put_source(&SourceRecord {
                    url: url.to_string(),
                    version,
                    source_path: source_path.to_string(),
                    fingerprint: fp,
                    chunk_count: chunks.len() as i64,
                    updated_at: created_at,
                })
                .await?;
        }

        tracing::info!(
            %url,
            %version,
            ?decision,
            chunks = chunks_written,
            failed = chunks_failed,
            tail_removed,
            "ingested"
        );

        Ok(DocumentOutcome::Written {
            decision,
            chunks_written,
            chunks_failed,
            tail_removed,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_chunk(
        &self,
        url: &str,
        version: Version,
        source_path: &str,
        fingerprint: &str,
        chunk: &Chunk,
        embedding: Vec<f32>,
        created_at: i64,
    ) -> Result<DocChunk> {
        let mut metadata = ChunkMetadata::new(fingerprint, source_path, version);
        metadata.header_path = chunk.header_path.clone();
        metadata.section_anchor = chunk.section_anchor.clone();
        metadata.chunk_size = chunk.content.chars().count();
        if let Some(name) = Path::new(source_path).file_name() {
            metadata.insert_extra("filename", serde_json::json!(name.to_string_lossy()))?;
        }

        Ok(DocChunk {
            url: url.to_string(),
            chunk_number: chunk.chunk_number,
            version,
            title: chunk.title.clone(),
            content: chunk.content.clone(),
            metadata,
            embedding,
            created_at,
        })
    }
}

/// Diff every configured version without writing anything.
pub async fn check_updates(
    config: &Config,
    store: &dyn Store,
) -> Result<Vec<(Version, TreeDiff)>> {
    let mut out = Vec::new();
    for version in config.docs.version_list()? {
        let root = content_root(&config.paths.raw_dir, version);
        let files = fingerprint::scan_sources(
            &root,
            &config.docs.include_globs,
            &config.docs.base_url,
            version,
        )?;
        let records = store.list_sources(version).await?;
        out.push((version, diff_tree(files, records)));
    }
    Ok(out)
}

/// Convert every source of every configured version into
/// `<markdown_dir>/versions/<v>/content/**.md`. Failures are per file.
pub fn convert_all(config: &Config) -> Result<Vec<ConvertReport>> {
    let converter = Converter::new(config.docs.base_url.clone());
    let mut reports = Vec::new();

    for version in config.docs.version_list()? {
        let root = content_root(&config.paths.raw_dir, version);
        let out_root = content_root(&config.paths.markdown_dir, version);
        let files = fingerprint::scan_sources(
            &root,
            &config.docs.include_globs,
            &config.docs.base_url,
            version,
        )?;

        let mut report = ConvertReport {
            version: Some(version),
            ..Default::default()
        };

        for file in files {
            match converter.convert_file(&file.abs_path, &file.source_path, version) {
                Ok(markdown) => {
                    let target = out_root.join(&file.source_path).with_extension("md");
                    write_markdown(&target, &markdown)?;
                    report.converted += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %file.source_path, error = %e, "conversion failed");
                    report.failed.push((file.source_path, e.to_string()));
                }
            }
        }

        tracing::info!(%version, converted = report.converted, failed = report.failed.len(), "converted");
        reports.push(report);
    }

    Ok(reports)
}

fn write_markdown(target: &Path, markdown: &str) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(target, markdown)
        .with_context(|| format!("Failed to write {}", target.display()))
}

fn selected_versions(config: &Config, version: Option<&str>) -> Result<Vec<Version>> {
    let configured = config.docs.version_list()?;
    match version {
        None => Ok(configured),
        Some(raw) => {
            let v: Version = raw.parse()?;
            if !configured.contains(&v) {
                bail!("version {} is not listed in docs.versions", v);
            }
            Ok(vec![v])
        }
    }
}

/// `dex process`: ingest one version, or every configured version.
pub async fn run_process(
    config: &Config,
    version: Option<&str>,
    dry_run: bool,
    progress: Box<dyn ProgressReporter>,
) -> Result<()> {
    let versions = selected_versions(config, version)?;
    let store = db::open_store(config).await?;

    if dry_run {
        for v in versions {
            let root = content_root(&config.paths.raw_dir, v);
            let files = fingerprint::scan_sources(
                &root,
                &config.docs.include_globs,
                &config.docs.base_url,
                v,
            )?;
            let diff = diff_tree(files, store.list_sources(v).await?);
            println!("process {} (dry-run)", v);
            print_diff(&diff);
        }
        return Ok(());
    }

    let embedder = create_embedder(&config.embedding)?;
    let embeddings = Arc::new(EmbeddingClient::new(embedder, &config.embedding));
    let ingestor = Ingestor::new(config, store, embeddings).with_progress(progress);

    let mut failed = false;
    for v in versions {
        let report = ingestor.process_version(v).await?;
        println!("process {}", v);
        println!("  added: {}", report.added);
        println!("  modified: {}", report.modified);
        println!("  removed: {}", report.removed);
        println!("  unchanged: {}", report.unchanged);
        println!("  chunks written: {}", report.chunks_written);
        if report.chunks_failed > 0 {
            println!("  chunks failed: {}", report.chunks_failed);
        }
        if report.tail_removed > 0 {
            println!("  stale chunks removed: {}", report.tail_removed);
        }
        for (path, error) in &report.files_failed {
            println!("  failed: {} ({})", path, error);
        }
        failed |= report.chunks_failed > 0 || !report.files_failed.is_empty();
    }

    if failed {
        println!("done with failures; rerun to retry");
    } else {
        println!("ok");
    }
    Ok(())
}

/// `dex check`: report pending changes for every configured version.
pub async fn run_check(config: &Config) -> Result<()> {
    let store = db::open_store(config).await?;
    let diffs = check_updates(config, store.as_ref()).await?;

    let mut pending = false;
    for (version, diff) in &diffs {
        println!("version {}", version);
        print_diff(diff);
        pending |= diff.has_changes();
    }

    if pending {
        println!("updates pending; run `dex process`");
    } else {
        println!("up to date");
    }
    Ok(())
}

/// `dex convert`: write Markdown exports for every configured version.
pub fn run_convert(config: &Config) -> Result<()> {
    let reports = convert_all(config)?;
    for report in &reports {
        if let Some(v) = report.version {
            println!("convert {}", v);
        }
        println!("  converted: {}", report.converted);
        for (path, error) in &report.failed {
            println!("  failed: {} ({})", path, error);
        }
    }
    println!("output: {}", config.paths.markdown_dir.display());
    Ok(())
}

fn print_diff(diff: &TreeDiff) {
    println!("  new: {}", diff.added.len());
    for f in &diff.added {
        println!("    + {}", f.source_path);
    }
    println!("  modified: {}", diff.modified.len());
    for f in &diff.modified {
        println!("    ~ {}", f.source_path);
    }
    println!("  removed: {}", diff.removed.len());
    for r in &diff.removed {
        println!("    - {}", r.source_path);
    }
    println!("  unchanged: {}", diff.unchanged.len());
}

//! Heading-aware markdown chunker.
//!
//! Splits converted markdown into [`Chunk`]s aligned with its section
//! structure. A new chunk starts at every ATX heading of level 1–4 that is
//! not inside a fenced code block. Sections longer than `max_chars` are
//! split on the nearest paragraph break, then line break, then space, and
//! as a last resort at a hard character boundary.
//!
//! Each chunk's content is prefixed with its rendered header path
//! (`[#] Install > [##] Linux`) so the embedding carries the section
//! context. Output is deterministic for a given input and settings.

use crate::convert::section_anchor;
use crate::models::Chunk;

/// Deepest heading level that opens a new chunk.
const MAX_SPLIT_LEVEL: usize = 4;

/// Fallback titles are cut to this many chars.
const TITLE_FALLBACK_CHARS: usize = 100;

struct Section {
    headers: Vec<(usize, String)>,
    body: String,
}

/// Split markdown into chunks numbered from `base_index`.
///
/// Returns no chunks for a document with no body text.
pub fn chunk_markdown(markdown: &str, max_chars: usize, base_index: i64) -> Vec<Chunk> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut next_number = base_index;

    for section in split_sections(markdown) {
        let body = section.body.trim();
        if body.is_empty() {
            continue;
        }

        let header_path: Vec<String> = section.headers.iter().map(|(_, h)| h.clone()).collect();
        let prefix = render_header_path(&section.headers);
        let title = match header_path.last() {
            Some(h) => h.clone(),
            None => fallback_title(body),
        };
        let anchor = header_path.last().map(|h| section_anchor(h)).filter(|a| !a.is_empty());

        for piece in split_oversize(body, max_chars) {
            let content = if prefix.is_empty() {
                piece.to_string()
            } else {
                format!("{}\n\n{}", prefix, piece)
            };
            chunks.push(Chunk {
                chunk_number: next_number,
                title: title.clone(),
                content,
                header_path: header_path.clone(),
                section_anchor: anchor.clone(),
            });
            next_number += 1;
        }
    }

    chunks
}

/// Walk the document and cut it at level 1–4 headings outside fences.
fn split_sections(markdown: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut body = String::new();
    let mut in_fence = false;

    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        if !in_fence {
            if let Some((level, text)) = parse_heading(line) {
                if level <= MAX_SPLIT_LEVEL {
                    // A heading with no body before the next heading
                    // contributes only to the header path.
                    if !body.trim().is_empty() {
                        sections.push(Section {
                            headers: stack.clone(),
                            body: std::mem::take(&mut body),
                        });
                    }
                    body.clear();
                    stack.retain(|(l, _)| *l < level);
                    stack.push((level, text));
                    continue;
                }
            }
        }

        body.push_str(line);
        body.push('\n');
    }

    if !body.trim().is_empty() {
        sections.push(Section {
            headers: stack,
            body,
        });
    }

    sections
}

/// `## Title ##` → `(2, "Title")`. Requires a space after the hashes.
fn parse_heading(line: &str) -> Option<(usize, String)> {
    if line.starts_with(' ') {
        return None;
    }
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    let text = rest.trim().trim_end_matches('#').trim_end().to_string();
    if text.is_empty() {
        return None;
    }
    Some((level, text))
}

fn render_header_path(headers: &[(usize, String)]) -> String {
    headers
        .iter()
        .map(|(level, text)| format!("[{}] {}", "#".repeat(*level), text))
        .collect::<Vec<_>>()
        .join(" > ")
}

fn fallback_title(body: &str) -> String {
    let first = body.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if first.chars().count() > TITLE_FALLBACK_CHARS {
        let cut: String = first.chars().take(TITLE_FALLBACK_CHARS).collect();
        format!("{}...", cut)
    } else {
        first.to_string()
    }
}

/// Split `text` into pieces of at most `max_chars` characters.
fn split_oversize(text: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = text;

    while remaining.chars().count() > max_chars {
        let limit = byte_offset(remaining, max_chars);
        let window = &remaining[..limit];
        let cut = window
            .rfind("\n\n")
            .or_else(|| window.rfind('\n'))
            .or_else(|| window.rfind(' '))
            .filter(|&pos| pos > 0)
            .unwrap_or(limit);

        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        remaining = remaining[cut..].trim_start();
    }

    let tail = remaining.trim();
    if !tail.is_empty() {
        pieces.push(tail);
    }
    pieces
}

/// Byte offset of the `n`th char of `s` (or `s.len()`).
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_per_section() {
        let md = "# Install\n\nIntro.\n\n## Linux\n\nUse apt.\n\n## Windows\n\nUse the installer.";
        let chunks = chunk_markdown(md, 5000, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].title, "Install");
        assert_eq!(chunks[1].title, "Linux");
        assert_eq!(chunks[1].header_path, vec!["Install", "Linux"]);
        assert_eq!(chunks[1].content, "[#] Install > [##] Linux\n\nUse apt.");
        assert_eq!(chunks[2].header_path, vec!["Install", "Windows"]);
        assert_eq!(chunks[2].section_anchor.as_deref(), Some("windows"));
    }

    #[test]
    fn test_numbers_dense_from_base_index() {
        let md = "# A\n\none\n\n# B\n\ntwo\n\n# C\n\nthree";
        let chunks = chunk_markdown(md, 5000, 10);
        let numbers: Vec<i64> = chunks.iter().map(|c| c.chunk_number).collect();
        assert_eq!(numbers, vec![10, 11, 12]);
    }

    #[test]
    fn test_heading_only_section_folds_into_next() {
        let md = "# Guide\n\n## Setup\n\n### Step one\n\nDo this.";
        let chunks = chunk_markdown(md, 5000, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].header_path, vec!["Guide", "Setup", "Step one"]);
        assert_eq!(chunks[0].title, "Step one");
    }

    #[test]
    fn test_headings_inside_fence_ignored() {
        let md = "# Script\n\n```bash\n# not a heading\necho hi\n```\n\nAfter.";
        let chunks = chunk_markdown(md, 5000, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("# not a heading"));
    }

    #[test]
    fn test_level_five_does_not_split() {
        let md = "# Top\n\nBody.\n\n##### Minor\n\nStill same chunk.";
        let chunks = chunk_markdown(md, 5000, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("##### Minor"));
    }

    #[test]
    fn test_title_fallback_without_heading() {
        let long_line = "x".repeat(150);
        let chunks = chunk_markdown(&format!("{}\n\nmore", long_line), 5000, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].title, format!("{}...", "x".repeat(100)));
        assert!(chunks[0].header_path.is_empty());
        assert!(chunks[0].section_anchor.is_none());
        assert!(!chunks[0].content.starts_with('['));
    }

    #[test]
    fn test_oversize_section_splits_on_paragraphs() {
        let para = "word ".repeat(20);
        let body = (0..10).map(|_| para.trim()).collect::<Vec<_>>().join("\n\n");
        let md = format!("# Big\n\n{}", body);
        let chunks = chunk_markdown(&md, 250, 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert_eq!(c.title, "Big");
            let body = c.content.trim_start_matches("[#] Big\n\n");
            assert!(body.chars().count() <= 250);
            assert!(body.ends_with("word"));
        }
    }

    #[test]
    fn test_hard_cut_on_unbroken_text() {
        let md = "é".repeat(25);
        let chunks = chunk_markdown(&md, 10, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content.chars().count(), 10);
        assert_eq!(chunks[2].content.chars().count(), 5);
    }

    #[test]
    fn test_empty_document() {
        assert!(chunk_markdown("", 5000, 0).is_empty());
        assert!(chunk_markdown("# Only a heading\n", 5000, 0).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let md = "# A\n\nalpha beta gamma\n\n## B\n\n".to_string() + &"delta ".repeat(100);
        let c1 = chunk_markdown(&md, 120, 0);
        let c2 = chunk_markdown(&md, 120, 0);
        assert_eq!(c1, c2);
    }
}

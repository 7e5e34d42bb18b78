//! reStructuredText → markdown conversion.
//!
//! Produces markdown whose ATX headings mirror the RST section structure
//! (so the chunker can find boundaries) and whose `:doc:` cross references
//! point at published page URLs. Hard-wrapped paragraphs are joined,
//! admonitions are flattened into `Note: …` paragraphs, and toctrees
//! become a `## Related content` link list.
//!
//! Markdown sources skip the RST pass and only go through the clean-up
//! stage (metadata stripping, fence validation).
//!
//! Conversion is per file and never panics on bad input: anything the
//! converter refuses is a [`ConversionError`] for that file alone.

use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;

use crate::error::ConversionError;
use crate::models::Version;

macro_rules! static_regex {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pat).expect("static regex is valid"))
        }
    };
}

static_regex!(directive_re, r"^\.\.\s+([A-Za-z][\w:-]*)::\s*(.*)$");
static_regex!(option_re, r"^:([\w-]+):\s*(.*)$");
static_regex!(metadata_field_re, r"^:(show-content|hide-page-toc|show-toc|nosearch|orphan|code-column|custom-css|classes)\b.*$");
static_regex!(list_item_re, r"^([-*+]|#\.|\d+\.|\d+\))\s+\S");
static_regex!(simple_table_re, r"^=+( +=+)+\s*$");
static_regex!(literal_re, r"``([^`]+)``");
static_regex!(doc_titled_re, r":doc:`([^`<]*?)\s*<([^>`]+)>`");
static_regex!(doc_bare_re, r":doc:`([^`]+)`");
static_regex!(ref_titled_re, r":ref:`([^`<]*?)\s*<[^>`]+>`");
static_regex!(ref_bare_re, r":ref:`([^`]+)`");
static_regex!(guilabel_re, r":guilabel:`([^`]+)`");
static_regex!(menuselection_re, r":menuselection:`([^`]+)`");
static_regex!(generic_role_re, r":[\w-]+:`([^`]+)`");
static_regex!(hyperlink_re, r"`([^`<]+?)\s*<([^>`]+)>`__?");
static_regex!(named_ref_re, r"`([^`]+)`__?");

const ADMONITIONS: &[(&str, &str)] = &[
    ("note", "Note"),
    ("tip", "Tip"),
    ("important", "Important"),
    ("warning", "Warning"),
    ("seealso", "See also"),
    ("danger", "Danger"),
    ("caution", "Caution"),
    ("attention", "Attention"),
    ("hint", "Hint"),
    ("error", "Error"),
    ("example", "Example"),
    ("exercise", "Exercise"),
];

/// Directives whose body is ordinary content and is kept.
const CONTAINERS: &[&str] = &[
    "container",
    "rst-class",
    "tabs",
    "tab",
    "group-tab",
    "code-tab",
    "only",
    "card",
    "cards",
    "topic",
    "sidebar",
    "rubric",
];

/// Converts documentation sources of one site into markdown.
#[derive(Debug, Clone)]
pub struct Converter {
    base_url: String,
}

/// Per-file state threaded through the RST pass.
struct FileContext<'a> {
    path: &'a str,
    /// Directory of the file relative to the content root, `/`-separated.
    doc_dir: String,
    version: Version,
    /// Adornment styles in order of first appearance; index = level - 1.
    heading_styles: Vec<(char, bool)>,
}

impl Converter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Read and convert one source file. `rel_path` is relative to the
    /// version's content root and decides both the dialect (by extension)
    /// and how relative `:doc:` links resolve.
    pub fn convert_file(
        &self,
        path: &Path,
        rel_path: &str,
        version: Version,
    ) -> Result<String, ConversionError> {
        let bytes = std::fs::read(path).map_err(|source| ConversionError::Read {
            path: rel_path.to_string(),
            source,
        })?;
        let text = String::from_utf8(bytes).map_err(|_| ConversionError::Encoding {
            path: rel_path.to_string(),
        })?;
        self.convert_source(&text, rel_path, version)
    }

    /// Convert already-decoded source text, dispatching on the extension of `rel_path`.
    pub fn convert_source(
        &self,
        text: &str,
        rel_path: &str,
        version: Version,
    ) -> Result<String, ConversionError> {
        if rel_path.ends_with(".md") || rel_path.ends_with(".markdown") {
            clean_markdown(text, rel_path)
        } else {
            self.rst_to_markdown(text, rel_path, version)
        }
    }

    pub fn rst_to_markdown(
        &self,
        text: &str,
        rel_path: &str,
        version: Version,
    ) -> Result<String, ConversionError> {
        let normalized = text.replace("\r\n", "\n").replace('\t', "    ");
        let lines: Vec<String> = normalized.lines().map(|l| l.trim_end().to_string()).collect();

        let doc_dir = rel_path
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();
        let mut ctx = FileContext {
            path: rel_path,
            doc_dir,
            version,
            heading_styles: Vec::new(),
        };

        let mut writer = MarkdownWriter::default();
        self.convert_block(&lines, 0, &mut ctx, &mut writer)?;
        let out = writer.finish().join("\n");
        Ok(out.trim().to_string())
    }

    /// Convert a block of lines whose minimum indentation is zero.
    /// `line_offset` is only used for error messages.
    fn convert_block(
        &self,
        lines: &[String],
        line_offset: usize,
        ctx: &mut FileContext<'_>,
        w: &mut MarkdownWriter,
    ) -> Result<(), ConversionError> {
        let mut i = 0;
        let mut pending_literal = false;
        let mut seen_content = false;

        while i < lines.len() {
            let line = lines[i].as_str();
            if line.trim().is_empty() {
                w.blank();
                i += 1;
                continue;
            }
            let indent = indent_of(line);

            if pending_literal {
                pending_literal = false;
                if indent > 0 {
                    let (block, next) = take_indented(lines, i);
                    w.code_block("", &dedent(&block));
                    i = next;
                    continue;
                }
            }

            if indent > 0 {
                let stripped = line.trim_start();
                if w.has_open_text() && !stripped.starts_with("..") {
                    // Continuation of a wrapped paragraph or list item.
                    let text = self.inline(stripped, ctx);
                    pending_literal = push_text(w, &text);
                    i += 1;
                    continue;
                }
                let (block, next) = take_indented(lines, i);
                self.convert_block(&dedent(&block), line_offset + i, ctx, w)?;
                i = next;
                continue;
            }

            let next_line = lines.get(i + 1).map(String::as_str).unwrap_or("");

            // Section title with overline.
            if let Some(c) = adornment_char(line) {
                if !next_line.trim().is_empty() && adornment_char(next_line).is_none() {
                    let under = lines.get(i + 2).map(String::as_str).unwrap_or("");
                    if adornment_char(under) != Some(c) {
                        return Err(ConversionError::Malformed {
                            path: ctx.path.to_string(),
                            line: line_offset + i + 1,
                            message: "section title overline without matching underline"
                                .to_string(),
                        });
                    }
                    let level = heading_level(ctx, (c, true));
                    let title = self.inline(next_line.trim(), ctx);
                    w.heading(level, &title);
                    seen_content = true;
                    i += 3;
                    continue;
                }
                // Transition.
                w.blank();
                i += 1;
                continue;
            }

            // Section title with underline only.
            if let Some(c) = adornment_char(next_line) {
                let level = heading_level(ctx, (c, false));
                let title = self.inline(line.trim(), ctx);
                w.heading(level, &title);
                seen_content = true;
                i += 2;
                continue;
            }

            if metadata_field_re().is_match(line) && !seen_content {
                i += 1;
                continue;
            }

            if line.starts_with("..") {
                i = self.explicit_markup(lines, i, line_offset, ctx, w)?;
                continue;
            }

            if line.starts_with('+') && (line.contains("-+") || line.contains("=+")) {
                w.blank();
                while i < lines.len() && (lines[i].starts_with('+') || lines[i].starts_with('|')) {
                    w.line(lines[i].clone());
                    i += 1;
                }
                w.blank();
                continue;
            }

            if simple_table_re().is_match(line) {
                let mut table = Vec::new();
                let mut borders = 0;
                while i < lines.len() {
                    let l = &lines[i];
                    if simple_table_re().is_match(l) {
                        borders += 1;
                    }
                    table.push(l.clone());
                    i += 1;
                    if borders == 3 || (borders == 2 && lines.get(i).map_or(true, |n| n.trim().is_empty())) {
                        break;
                    }
                }
                w.code_block("text", &table);
                continue;
            }

            seen_content = true;
            let text = self.inline(line, ctx);
            if list_item_re().is_match(line) {
                w.start_item(String::new());
            }
            pending_literal = push_text(w, &text);
            i += 1;
        }

        Ok(())
    }

    /// Handle a `..` line: directives, comments, targets, substitutions.
    /// Returns the index of the first line after the construct.
    fn explicit_markup(
        &self,
        lines: &[String],
        i: usize,
        line_offset: usize,
        ctx: &mut FileContext<'_>,
        w: &mut MarkdownWriter,
    ) -> Result<usize, ConversionError> {
        let (body, next) = take_indented(lines, i + 1);

        let caps = match directive_re().captures(&lines[i]) {
            Some(caps) => caps,
            // Comments, `.. _label:` targets, footnotes, substitution definitions.
            None => return Ok(next),
        };
        let name = caps[1].to_lowercase();
        let argument = caps[2].trim().to_string();

        let body = dedent(&body);
        let (options, content) = split_options(&body);
        let content_offset = line_offset + i + 1 + (body.len() - content.len());

        if let Some((_, label)) = ADMONITIONS.iter().find(|(n, _)| *n == name) {
            let mut inner = content.to_vec();
            if !argument.is_empty() {
                inner.insert(0, argument);
            }
            self.admonition(label, &inner, content_offset, ctx, w)?;
            return Ok(next);
        }

        match name.as_str() {
            "admonition" => {
                let label = if argument.is_empty() { "Note".to_string() } else { argument };
                self.admonition(&label, content, content_offset, ctx, w)?;
            }
            "code-block" | "code" | "sourcecode" => {
                w.code_block(&argument, &trim_blank_edges(content));
            }
            "toctree" => {
                let entries: Vec<String> = content
                    .iter()
                    .map(|l| l.trim())
                    .filter(|l| !l.is_empty())
                    .map(|entry| self.toctree_entry(entry, ctx))
                    .collect();
                if !entries.is_empty() {
                    w.heading(2, "Related content");
                    for entry in entries {
                        w.line(format!("- {}", entry));
                    }
                    w.blank();
                }
            }
            "image" | "figure" => {
                let alt = options
                    .iter()
                    .find(|(k, _)| k == "alt")
                    .map(|(_, v)| v.as_str())
                    .unwrap_or("");
                w.blank();
                w.line(format!("![{}]({})", alt, argument));
                w.blank();
                if name == "figure" {
                    self.convert_block(content, content_offset, ctx, w)?;
                }
            }
            n if CONTAINERS.contains(&n) => {
                if !argument.is_empty() && matches!(n, "tab" | "group-tab" | "code-tab" | "topic" | "sidebar" | "rubric" | "card") {
                    w.blank();
                    w.line(format!("**{}**", self.inline(&argument, ctx)));
                    w.blank();
                }
                self.convert_block(content, content_offset, ctx, w)?;
            }
            _ => {}
        }

        Ok(next)
    }

    fn admonition(
        &self,
        label: &str,
        content: &[String],
        content_offset: usize,
        ctx: &mut FileContext<'_>,
        w: &mut MarkdownWriter,
    ) -> Result<(), ConversionError> {
        let mut inner = MarkdownWriter::default();
        self.convert_block(content, content_offset, ctx, &mut inner)?;
        let mut body = inner.finish();
        match body.iter_mut().find(|l| !l.is_empty()) {
            Some(first) => *first = format!("{}: {}", label, first),
            None => body.push(format!("{}:", label)),
        }
        w.blank();
        for line in body {
            w.line(line);
        }
        w.blank();
        Ok(())
    }

    fn toctree_entry(&self, entry: &str, ctx: &FileContext<'_>) -> String {
        let (title, target) = match entry.rsplit_once('<') {
            Some((title, target)) if target.ends_with('>') => {
                (title.trim().to_string(), target.trim_end_matches('>').trim().to_string())
            }
            _ => (entry.to_string(), entry.to_string()),
        };
        if target.starts_with("http://") || target.starts_with("https://") {
            return format!("[{}]({})", title, target);
        }
        format!("[{}]({})", title, self.doc_url(&target, ctx))
    }

    /// Published URL for a `:doc:` target, relative targets resolved
    /// against the directory of the current file.
    fn doc_url(&self, target: &str, ctx: &FileContext<'_>) -> String {
        let joined = if let Some(abs) = target.strip_prefix('/') {
            abs.to_string()
        } else if ctx.doc_dir.is_empty() {
            target.to_string()
        } else {
            format!("{}/{}", ctx.doc_dir, target)
        };
        let mut parts: Vec<&str> = Vec::new();
        for seg in joined.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                s => parts.push(s),
            }
        }
        let path = strip_extension(&parts.join("/")).to_string();
        format!("{}/{}/{}.html", self.base_url, ctx.version, path)
    }

    /// Inline markup: roles, hyperlinks, literals.
    fn inline(&self, text: &str, ctx: &FileContext<'_>) -> String {
        let s = literal_re().replace_all(text, "`$1`");
        let s = doc_titled_re().replace_all(&s, |c: &Captures| {
            format!("[{}]({})", c[1].trim(), self.doc_url(&c[2], ctx))
        });
        let s = doc_bare_re().replace_all(&s, |c: &Captures| {
            format!("[{}]({})", &c[1], self.doc_url(&c[1], ctx))
        });
        let s = ref_titled_re().replace_all(&s, "$1");
        let s = ref_bare_re().replace_all(&s, |c: &Captures| c[1].replace(['-', '_'], " "));
        let s = guilabel_re().replace_all(&s, "**$1**");
        let s = menuselection_re().replace_all(&s, |c: &Captures| {
            format!("**{}**", c[1].replace("-->", "→"))
        });
        let s = generic_role_re().replace_all(&s, |c: &Captures| {
            c[1].split('<').next().unwrap_or("").trim().to_string()
        });
        let s = hyperlink_re().replace_all(&s, "[$1]($2)");
        let s = named_ref_re().replace_all(&s, "$1");
        s.into_owned()
    }
}

/// Clean-up for sources that are already markdown.
pub fn clean_markdown(text: &str, rel_path: &str) -> Result<String, ConversionError> {
    let normalized = text.replace("\r\n", "\n");
    let mut out: Vec<&str> = Vec::new();
    let mut in_fence = false;
    let mut fence_start = 0;
    let mut seen_content = false;

    for (n, line) in normalized.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            if !in_fence {
                fence_start = n + 1;
            }
            in_fence = !in_fence;
        }
        if !in_fence && !seen_content && metadata_field_re().is_match(trimmed) {
            continue;
        }
        if !trimmed.is_empty() {
            seen_content = true;
        }
        if !in_fence && trimmed.is_empty() && out.last().map_or(true, |l| l.trim().is_empty()) {
            continue;
        }
        out.push(line.trim_end());
    }

    if in_fence {
        return Err(ConversionError::Malformed {
            path: rel_path.to_string(),
            line: fence_start,
            message: "unterminated code fence".to_string(),
        });
    }

    Ok(out.join("\n").trim().to_string())
}

/// Published page URL for a source file, `rel_path` relative to the
/// version's content root.
pub fn page_url(base_url: &str, version: Version, rel_path: &str) -> Result<String, ConversionError> {
    let trimmed = rel_path.trim_start_matches("./").trim_start_matches('/');
    let trimmed = trimmed.strip_prefix("content/").unwrap_or(trimmed);
    let path = strip_extension(trimmed);
    if path.is_empty() {
        return Err(ConversionError::Url(rel_path.to_string()));
    }
    Ok(format!(
        "{}/{}/{}.html",
        base_url.trim_end_matches('/'),
        version,
        path.replace('\\', "/")
    ))
}

/// URL fragment for a section title: `"Invite / remove users"` → `"invite-remove-users"`.
pub fn section_anchor(title: &str) -> String {
    let mut cleaned = String::with_capacity(title.len());
    let mut in_custom_anchor = false;
    let mut chars = title.chars().peekable();
    while let Some(c) = chars.next() {
        if in_custom_anchor {
            if c == '}' {
                in_custom_anchor = false;
            }
            continue;
        }
        if c == '{' && chars.peek() == Some(&'#') {
            in_custom_anchor = true;
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '-' || c.is_whitespace() {
            cleaned.push(c.to_ascii_lowercase());
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join("-")
}

fn strip_extension(path: &str) -> &str {
    match path.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') && !stem.is_empty() => stem,
        _ => path,
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

/// Punctuation character of a section adornment line (`=====`, `-----`, …).
fn adornment_char(line: &str) -> Option<char> {
    let trimmed = line.trim_end();
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    if trimmed.len() < 3 || !"=-~^\"'`#*+_:.<>!$%&,/;?@[\\]{|}".contains(first) {
        return None;
    }
    if chars.all(|c| c == first) {
        Some(first)
    } else {
        None
    }
}

fn heading_level(ctx: &mut FileContext<'_>, style: (char, bool)) -> usize {
    let idx = match ctx.heading_styles.iter().position(|s| *s == style) {
        Some(idx) => idx,
        None => {
            ctx.heading_styles.push(style);
            ctx.heading_styles.len() - 1
        }
    };
    (idx + 1).min(6)
}

/// Lines from `start` that are blank or indented, up to the first
/// unindented non-blank line. Trailing blank lines are not included in the
/// block but are consumed.
fn take_indented(lines: &[String], start: usize) -> (Vec<String>, usize) {
    let mut end = start;
    while end < lines.len() && (lines[end].trim().is_empty() || indent_of(&lines[end]) > 0) {
        end += 1;
    }
    let block = trim_blank_edges(&lines[start..end]);
    (block, end)
}

fn trim_blank_edges(lines: &[String]) -> Vec<String> {
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    match (first, last) {
        (Some(a), Some(b)) => lines[a..=b].to_vec(),
        _ => Vec::new(),
    }
}

fn dedent(lines: &[String]) -> Vec<String> {
    let min = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| indent_of(l))
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|l| if l.len() >= min { l[min..].to_string() } else { String::new() })
        .collect()
}

/// Split leading `:option: value` lines off a directive body.
fn split_options(body: &[String]) -> (Vec<(String, String)>, &[String]) {
    let mut options = Vec::new();
    let mut idx = 0;
    while idx < body.len() {
        match option_re().captures(body[idx].trim()) {
            Some(caps) if !body[idx].trim().is_empty() => {
                options.push((caps[1].to_string(), caps[2].to_string()));
                idx += 1;
            }
            _ => break,
        }
    }
    (options, &body[idx..])
}

/// Append paragraph text, rewriting a trailing `::` literal marker.
/// Returns whether a literal block follows.
fn push_text(w: &mut MarkdownWriter, text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed == "::" {
        return true;
    }
    if let Some(stripped) = trimmed.strip_suffix("::") {
        let stripped = stripped.trim_end();
        if text.trim_end().ends_with(" ::") {
            w.text(stripped);
        } else {
            w.text(&format!("{}:", stripped));
        }
        return true;
    }
    w.text(trimmed);
    false
}

/// Accumulates output lines, joining hard-wrapped paragraph text.
#[derive(Default)]
struct MarkdownWriter {
    lines: Vec<String>,
    open: Option<String>,
}

impl MarkdownWriter {
    fn has_open_text(&self) -> bool {
        self.open.is_some()
    }

    fn text(&mut self, s: &str) {
        match &mut self.open {
            Some(p) if !p.is_empty() => {
                p.push(' ');
                p.push_str(s);
            }
            Some(p) => p.push_str(s),
            None => self.open = Some(s.to_string()),
        }
    }

    /// Start a new joinable line (list items) without a blank line before it.
    fn start_item(&mut self, prefix: String) {
        self.flush();
        self.open = Some(prefix);
    }

    fn flush(&mut self) {
        if let Some(p) = self.open.take() {
            if !p.is_empty() {
                self.lines.push(p);
            }
        }
    }

    fn blank(&mut self) {
        self.flush();
        if self.lines.last().is_some_and(|l| !l.is_empty()) {
            self.lines.push(String::new());
        }
    }

    fn line(&mut self, s: impl Into<String>) {
        self.flush();
        self.lines.push(s.into());
    }

    fn heading(&mut self, level: usize, text: &str) {
        self.blank();
        self.line(format!("{} {}", "#".repeat(level), text));
        self.blank();
    }

    fn code_block(&mut self, lang: &str, body: &[String]) {
        self.blank();
        self.line(format!("```{}", lang));
        for l in body {
            self.line(l.clone());
        }
        self.line("```");
        self.blank();
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        while self.lines.last().is_some_and(|l| l.is_empty()) {
            self.lines.pop();
        }
        self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(src: &str) -> String {
        Converter::new("https://docs.example.com/documentation")
            .rst_to_markdown(src, "applications/sales/invoicing.rst", Version(180))
            .unwrap()
    }

    #[test]
    fn test_headings_follow_adornment_order() {
        let md = convert("=====\nTitle\n=====\n\nIntro.\n\nSection\n=======\n\nBody.\n\nSub\n---\n\nMore.");
        assert!(md.starts_with("# Title"));
        assert!(md.contains("\n## Section\n"));
        assert!(md.contains("\n### Sub\n"));
    }

    #[test]
    fn test_wrapped_paragraph_is_joined() {
        let md = convert("Title\n=====\n\nThis line\nwraps onto\nthree lines.\n\nNext.");
        assert!(md.contains("This line wraps onto three lines."));
        assert!(md.contains("\n\nNext."));
    }

    #[test]
    fn test_metadata_fields_dropped() {
        let md = convert(":show-content:\n:hide-page-toc:\n\n=====\nSales\n=====\n\nText.");
        assert!(md.starts_with("# Sales"));
        assert!(!md.contains("show-content"));
    }

    #[test]
    fn test_admonition_flattened() {
        let md = convert("Title\n=====\n\n.. note::\n   Remember to\n   save.\n\nAfter.");
        assert!(md.contains("Note: Remember to save."));
        assert!(md.contains("After."));
    }

    #[test]
    fn test_doc_role_becomes_link() {
        let md = convert("Title\n=====\n\nSee :doc:`Quotations <quotes/templates>` and :doc:`/general/users`.");
        assert!(md.contains(
            "[Quotations](https://docs.example.com/documentation/18.0/applications/sales/quotes/templates.html)"
        ));
        assert!(md.contains(
            "[/general/users](https://docs.example.com/documentation/18.0/general/users.html)"
        ));
    }

    #[test]
    fn test_roles_and_links() {
        let md = convert(
            "Click :guilabel:`Save`, go to :menuselection:`Sales --> Orders`, read :ref:`the guide <sales/guide>` or `the site <https://example.com>`_ and run ``make``.",
        );
        assert!(md.contains("**Save**"));
        assert!(md.contains("**Sales → Orders**"));
        assert!(md.contains("read the guide or"));
        assert!(md.contains("[the site](https://example.com)"));
        assert!(md.contains("`make`"));
    }

    #[test]
    fn test_code_blocks() {
        let md = convert("Run this::\n\n    pip install foo\n\n.. code-block:: python\n\n   print(1)\n\nDone.");
        assert!(md.contains("Run this:\n\n```\npip install foo\n```"));
        assert!(md.contains("```python\nprint(1)\n```"));
        assert!(md.ends_with("Done."));
    }

    #[test]
    fn test_toctree_related_content() {
        let md = convert("Sales\n=====\n\n.. toctree::\n   :titlesonly:\n\n   sales/quotes\n   Invoicing <sales/invoicing>\n");
        assert!(md.contains("## Related content"));
        assert!(md.contains(
            "- [sales/quotes](https://docs.example.com/documentation/18.0/applications/sales/sales/quotes.html)"
        ));
        assert!(md.contains("- [Invoicing]("));
        assert!(!md.contains("titlesonly"));
    }

    #[test]
    fn test_unknown_directive_dropped_container_kept() {
        let md = convert("T\n=\n\n.. raw:: html\n\n   <div>x</div>\n\n.. container:: wrap\n\n   Kept text.\n");
        assert!(!md.contains("<div>"));
        assert!(md.contains("Kept text."));
    }

    #[test]
    fn test_list_items_keep_breaks() {
        let md = convert("T\n=\n\n- first item\n  continues\n- second item\n\nAfter.");
        assert!(md.contains("- first item continues\n- second item"));
    }

    #[test]
    fn test_overline_without_underline_is_error() {
        let err = Converter::new("https://x")
            .rst_to_markdown("=====\nTitle\nbody text", "a.rst", Version(180))
            .unwrap_err();
        assert!(matches!(err, ConversionError::Malformed { line: 1, .. }));
    }

    #[test]
    fn test_markdown_passthrough_and_unterminated_fence() {
        let conv = Converter::new("https://x");
        let md = conv
            .convert_source(":orphan:\n\n# Title\n\n\n\nBody", "a.md", Version(180))
            .unwrap();
        assert_eq!(md, "# Title\n\nBody");
        assert!(conv
            .convert_source("# T\n\n```\ncode", "a.md", Version(180))
            .is_err());
    }

    #[test]
    fn test_page_url() {
        assert_eq!(
            page_url("https://d.example/doc/", Version(170), "content/applications/sales.rst").unwrap(),
            "https://d.example/doc/17.0/applications/sales.html"
        );
        assert!(page_url("https://d.example", Version(170), "").is_err());
    }

    #[test]
    fn test_section_anchor() {
        assert_eq!(section_anchor("Installation"), "installation");
        assert_eq!(section_anchor("Invite / remove users"), "invite-remove-users");
        assert_eq!(section_anchor("Database Management {#db-mgmt}"), "database-management");
    }
}

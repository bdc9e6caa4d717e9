//! Input-side data model: the extracted document, its metadata, and the
//! chunks it is split into for remote formatting.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Header fields attached to the final Markdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub author: String,
    pub language: String,
    /// `YYYY-MM-DD`.
    pub date: String,
}

impl DocumentMetadata {
    /// Metadata dated today (local time).
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            language: language.into(),
            date: Local::now().format("%Y-%m-%d").to_string(),
        }
    }

    /// Render the `---` delimited header block, followed by a blank line.
    pub fn header(&self) -> String {
        format!(
            "---\ntitle: \"{}\"\nauthor: \"{}\"\nlanguage: \"{}\"\ndate: \"{}\"\n---\n\n",
            escape_quoted(&self.title),
            escape_quoted(&self.author),
            escape_quoted(&self.language),
            escape_quoted(&self.date),
        )
    }
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A source document after text extraction. Immutable once built.
#[derive(Debug, Clone)]
pub struct Document {
    pub source: PathBuf,
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(source: impl Into<PathBuf>, text: String, metadata: DocumentMetadata) -> Self {
        Self {
            source: source.into(),
            text,
            metadata,
        }
    }

    pub fn word_count(&self) -> usize {
        word_count(&self.text)
    }
}

/// Whitespace-separated word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Pick a title: the explicit one, else a short first line, else the file name.
pub fn derive_title(explicit: Option<&str>, text: &str, source: &Path) -> String {
    if let Some(t) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        return t.to_string();
    }

    let first_line = text.lines().next().unwrap_or("").trim();
    if !first_line.is_empty() && first_line.chars().count() < 100 {
        return first_line.to_string();
    }

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    title_case(&stem.replace('_', " "))
}

/// Upper-case the first letter of every word and lower-case the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// One paragraph-aligned slice of the document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// 1-based position.
    pub index: usize,
    pub total: usize,
    pub is_first: bool,
    pub is_last: bool,
}

impl Chunk {
    pub fn word_count(&self) -> usize {
        word_count(&self.text)
    }

    /// Context handed to the formatter. Single-chunk documents get none.
    pub fn context(&self) -> Option<FormattingContext> {
        if self.total > 1 {
            Some(FormattingContext {
                part: self.index,
                total_parts: self.total,
                is_first: self.is_first,
                is_last: self.is_last,
            })
        } else {
            None
        }
    }
}

/// Where a chunk sits in the document, so the remote call can adapt
/// (only the first part emits the top-level title).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormattingContext {
    pub part: usize,
    pub total_parts: usize,
    pub is_first: bool,
    pub is_last: bool,
}

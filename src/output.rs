//! Output types: per-chunk results, run statistics, and the final artefacts.

use crate::config::OutputFormat;
use crate::document::DocumentMetadata;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Text returned by the remote formatter for one chunk. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedChunk {
    /// 1-based part number.
    pub part: usize,
    pub text: String,
    /// Remote calls made for this chunk, including the successful one.
    pub attempts: u32,
}

/// How the consistency pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyOutcome {
    /// The remote call returned a revised body.
    Revised(String),
    /// The call failed or came back empty; the input is returned untouched.
    Unchanged { text: String, reason: String },
}

impl ConsistencyOutcome {
    pub fn text(&self) -> &str {
        match self {
            ConsistencyOutcome::Revised(t) => t,
            ConsistencyOutcome::Unchanged { text, .. } => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ConsistencyOutcome::Revised(t) => t,
            ConsistencyOutcome::Unchanged { text, .. } => text,
        }
    }

    pub fn is_revised(&self) -> bool {
        matches!(self, ConsistencyOutcome::Revised(_))
    }
}

/// Counters collected over one formatting run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormattingStats {
    pub chunk_count: usize,
    /// Remote calls across all chunks (retries included, consistency excluded).
    pub remote_calls: u32,
    pub consistency_applied: bool,
    pub input_words: usize,
    pub output_words: usize,
    pub duration_ms: u64,
}

impl FormattingStats {
    /// Relative change in word count, in percent. Markdown markers such as
    /// `#` or `-` count as words, so small positive drift is normal.
    pub fn word_drift_percent(&self) -> f64 {
        word_drift_percent(self.input_words, self.output_words)
    }
}

/// `|after - before| / before`, in percent. Zero when `before` is zero.
pub fn word_drift_percent(before: usize, after: usize) -> f64 {
    if before == 0 {
        return 0.0;
    }
    let diff = after as f64 - before as f64;
    diff.abs() / before as f64 * 100.0
}

/// The Markdown produced by the formatting pipeline.
#[derive(Debug, Clone)]
pub struct FormattedDocument {
    pub metadata: DocumentMetadata,
    /// Header plus body.
    pub markdown: String,
    /// `<work>/temp/<slug>_formatted.md`.
    pub markdown_path: PathBuf,
    pub stats: FormattingStats,
}

/// Result of a full document-to-ebook run.
#[derive(Debug, Clone)]
pub struct EbookOutput {
    pub document: FormattedDocument,
    pub format: OutputFormat,
    pub ebook_path: PathBuf,
}

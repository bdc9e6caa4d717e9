//! Error types for the edgequake-ebook library.
//!
//! Each pipeline stage owns a small error enum so callers (and tests) can match
//! on exactly the failure they care about:
//!
//! * [`ExtractionError`] — the source document could not be turned into text.
//! * [`ChunkError`] — the heading pattern is not a valid regex. Surfaces as
//!   [`EbookError::InvalidConfig`].
//! * [`FormattingError`] — a chunk could not be formatted after every retry.
//! * [`RenderError`] — the external converter is missing or failed.
//! * [`ConfigError`] — the YAML settings file is unreadable or malformed.
//!   The loader logs it and falls back to built-in defaults.
//!
//! [`EbookError`] wraps all of them and is the only error the top-level
//! `convert*` functions return. Every variant is fatal for the run; the one
//! failure that is *not* fatal (the consistency pass) never surfaces as an
//! error at all.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-ebook library.
#[derive(Debug, Error)]
pub enum EbookError {
    // ── Stage errors ──────────────────────────────────────────────────────
    /// Text extraction failed.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// A chunk could not be formatted.
    #[error(transparent)]
    Formatting(#[from] FormattingError),

    /// The ebook could not be rendered.
    #[error(transparent)]
    Render(#[from] RenderError),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider could not be initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output or scratch file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure to turn a source file into plain text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Extension is not one of `.docx`, `.txt`, `.md`.
    #[error("Unsupported file format '{extension}'. Supported formats: .docx, .txt, .md")]
    UnsupportedFormat { extension: String },

    /// Neither UTF-8 nor any fallback encoding could decode the file.
    #[error("Could not decode '{path}' as UTF-8 or any of: {tried}")]
    UndecodableEncoding { path: PathBuf, tried: String },

    /// Every DOCX extraction method failed.
    #[error("No extraction method could read '{path}': {detail}\nInstall pandoc or re-save the file as .docx.")]
    NoMethodAvailable { path: PathBuf, detail: String },

    /// Extraction produced nothing but whitespace.
    #[error("'{path}' is empty or no text could be extracted")]
    EmptyContent { path: PathBuf },

    /// Reading the file failed.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to plan chunks.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// The caller's heading regex does not compile.
    #[error("Invalid heading pattern '{pattern}': {source}")]
    InvalidHeadingPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl From<ChunkError> for EbookError {
    fn from(e: ChunkError) -> Self {
        EbookError::InvalidConfig(e.to_string())
    }
}

/// Failure to format one chunk through the remote service.
#[derive(Debug, Clone, Error)]
pub enum FormattingError {
    /// Every attempt returned an empty response or failed in transport.
    #[error("Part {part}: remote formatting failed after {attempts} attempts: {last_error}")]
    RemoteCallExhausted {
        part: usize,
        attempts: u32,
        last_error: String,
    },
}

/// Failure of the external document converter.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The converter binary could not be found or started.
    #[error("Document converter '{program}' not found.\nInstall it from https://pandoc.org/installing.html")]
    ConverterMissing { program: String },

    /// The converter ran and failed (after any fallback strategy).
    #[error("Rendering {format} failed: {detail}")]
    ConversionFailed { format: String, detail: String },

    /// Preparing styles, templates or the output directory failed.
    #[error("Failed to prepare '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to load the YAML settings file.
///
/// Never fatal: [`crate::config::Settings::load_or_default`] logs it and
/// continues with defaults.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config '{path}': {detail}")]
    Parse { path: PathBuf, detail: String },
}

/// Error reported by a [`crate::transformer::TextTransformer`] for one call.
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// The HTTP request failed or the service returned a non-success status.
    #[error("remote request failed: {0}")]
    Request(String),

    /// The response stream broke or carried an error event.
    #[error("response stream failed: {0}")]
    Stream(String),

    /// The response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

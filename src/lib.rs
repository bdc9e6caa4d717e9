//! # edgequake-ebook
//!
//! Turn a plain document (DOCX, TXT, Markdown) into a formatted ebook (EPUB,
//! PDF, HTML). A language model applies Markdown structure without touching
//! the wording; `pandoc` does the final rendering.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document
//!  │
//!  ├─ 1. Extract      DOCX container / pandoc, UTF-8 with encoding fallbacks
//!  ├─ 2. Chunk        paragraph-aligned parts when above the word threshold
//!  ├─ 3. Format       one streamed remote call per part, 3 attempts, 5 s backoff
//!  ├─ 4. Consistency  one best-effort pass over the reassembled body
//!  ├─ 5. Assemble     metadata header + body → temp/<slug>_formatted.md
//!  └─ 6. Render       pandoc → output/<format>/<slug>.<format>
//! ```
//!
//! Parts are formatted strictly in order with a fixed pause between calls.
//! A part that fails every attempt aborts the run; a failed consistency pass
//! only logs a warning.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ebook::{convert, EbookRequest, FormatterConfig, OutputFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FormatterConfig::builder()
//!         .api_key(std::env::var("ANTHROPIC_API_KEY")?)
//!         .build()?;
//!     let request = EbookRequest::new("manuscript.docx")
//!         .format(OutputFormat::Epub)
//!         .author("Ana Souza");
//!     let output = convert(&request, &config).await?;
//!     println!("{}", output.ebook_path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Testing without a network
//!
//! The remote model and the converter are traits ([`TextTransformer`],
//! [`DocumentRenderer`]). Inject stand-ins with
//! [`FormatterConfigBuilder::transformer`] and
//! [`FormatterConfigBuilder::renderer`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ebookfmt` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod transformer;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{FormatterConfig, FormatterConfigBuilder, OutputFormat, Settings};
pub use convert::{convert, convert_sync, format_markdown, EbookRequest};
pub use document::{Chunk, Document, DocumentMetadata, FormattingContext};
pub use error::{
    ChunkError, ConfigError, EbookError, ExtractionError, FormattingError, RenderError,
    TransformError,
};
pub use output::{ConsistencyOutcome, EbookOutput, FormattedChunk, FormattedDocument, FormattingStats};
pub use pipeline::chunk::{plan_chunks, ChunkPlan};
pub use pipeline::consistency::ensure_consistency;
pub use pipeline::extract::{extract_text, TextEncoding};
pub use pipeline::llm::format_chunk;
pub use pipeline::render::{DocumentRenderer, PandocRenderer, RenderJob};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use transformer::{AnthropicTransformer, FragmentStream, TextTransformer, TransformRequest};

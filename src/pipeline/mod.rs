//! Pipeline stages for document-to-ebook conversion.
//!
//! Each submodule implements exactly one step and is testable on its own;
//! [`crate::convert`] strings them together.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ chunk ──▶ llm ──▶ consistency ──▶ postprocess ──▶ render
//! (.docx/.txt) (plan)  (per part) (multi-part)   (cleanup)      (pandoc)
//! ```
//!
//! 1. [`extract`]     — file → plain text, with DOCX and encoding fallbacks
//! 2. [`chunk`]       — paragraph-aligned parts for long documents
//! 3. [`llm`]         — one remote formatting call per part, fixed-backoff retry
//! 4. [`consistency`] — best-effort normalisation of the reassembled body
//! 5. [`postprocess`] — deterministic cleanup of model output
//! 6. [`render`]      — external converter behind the `DocumentRenderer` trait

pub mod chunk;
pub mod consistency;
pub mod extract;
pub mod llm;
pub mod postprocess;
pub mod render;

//! Progress-callback trait for per-part formatting events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::FormatterConfigBuilder::progress_callback`] to follow a
//! run as it moves through extraction, each chunk, the consistency pass, and
//! rendering. The CLI drives an `indicatif` bar from it; tests count events.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ebook::{ConversionProgressCallback, FormatterConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_part_complete(&self, part: usize, total_parts: usize, markdown_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Part {}/{} done ({} bytes)", part, total_parts, markdown_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = FormatterConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes each part.
///
/// Parts are formatted strictly in order on one task, so events never
/// interleave. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after chunk planning.
    fn on_conversion_start(&self, total_parts: usize) {
        let _ = total_parts;
    }

    /// Called before the first remote call for a part.
    fn on_part_start(&self, part: usize, total_parts: usize) {
        let _ = (part, total_parts);
    }

    /// Called before a retry, after a failed attempt.
    fn on_part_retry(&self, part: usize, attempt: u32, error: &str) {
        let _ = (part, attempt, error);
    }

    /// Called when a part is formatted.
    fn on_part_complete(&self, part: usize, total_parts: usize, markdown_len: usize) {
        let _ = (part, total_parts, markdown_len);
    }

    /// Called when a part fails after every attempt. The run aborts next.
    fn on_part_error(&self, part: usize, total_parts: usize, error: &str) {
        let _ = (part, total_parts, error);
    }

    /// Called around the consistency pass (multi-part documents only).
    fn on_consistency_start(&self) {}

    fn on_consistency_complete(&self, revised: bool) {
        let _ = revised;
    }

    /// Called before the external converter runs.
    fn on_render_start(&self, format: &str) {
        let _ = format;
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::FormatterConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

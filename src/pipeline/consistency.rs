//! Consistency pass: one best-effort normalisation call over the whole
//! reassembled document.
//!
//! Only multi-part documents get here. Failure is never fatal: the caller
//! always receives usable text, either revised or exactly what it passed in.
//! A reply whose word count drifts beyond `word_count_tolerance` (typically
//! cut off at `max_tokens`) counts as a failure.

use crate::config::FormatterConfig;
use crate::document::{word_count, DocumentMetadata};
use crate::output::{word_drift_percent, ConsistencyOutcome};
use crate::pipeline::llm::{build_request, request_text};
use crate::prompts::{consistency_user_prompt, CONSISTENCY_RULES};
use crate::transformer::TextTransformer;
use tracing::{info, warn};

/// Ask the remote service to unify headings and remove part-boundary
/// artefacts in `combined`. Exactly one call, no retry.
pub async fn ensure_consistency(
    transformer: &dyn TextTransformer,
    combined: &str,
    metadata: &DocumentMetadata,
    config: &FormatterConfig,
) -> ConsistencyOutcome {
    info!("Running consistency pass over {} chars", combined.len());
    let request = build_request(
        CONSISTENCY_RULES.to_string(),
        consistency_user_prompt(combined, metadata),
        config,
    );

    let result = request_text(transformer, &request).await.and_then(|text| {
        // a truncated or rewritten reply must not replace the book
        let drift = word_drift_percent(word_count(combined), word_count(&text));
        if drift > f64::from(config.word_count_tolerance) {
            Err(format!(
                "revision changed the word count by {:.1}%, above the {}% tolerance",
                drift, config.word_count_tolerance
            ))
        } else {
            Ok(text)
        }
    });

    match result {
        Ok(text) => {
            info!("Consistency pass applied");
            ConsistencyOutcome::Revised(text)
        }
        Err(reason) => {
            warn!("Consistency pass failed ({}); keeping the combined text", reason);
            ConsistencyOutcome::Unchanged {
                text: combined.to_string(),
                reason,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::transformer::{FragmentStream, TransformRequest};
    use async_trait::async_trait;
    use futures::{stream, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        reply: Result<&'static str, TransformError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextTransformer for Fixed {
        async fn transform(&self, _request: &TransformRequest) -> Result<FragmentStream, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok(stream::iter(vec![Ok(text.to_string())]).boxed()),
                Err(e) => Err(e.clone()),
            }
        }
    }

    fn meta() -> DocumentMetadata {
        DocumentMetadata::new("Livro", "Ana", "pt-BR")
    }

    const COMBINED: &str = "# Livro\n\nParte um.\n\n## Seção\n\nParte dois.";

    #[tokio::test]
    async fn success_returns_revision() {
        let t = Fixed {
            reply: Ok("# Livro\n\nParte um.\n\n## Seção\n\nParte dois.\n"),
            calls: AtomicUsize::new(0),
        };
        let out = ensure_consistency(&t, COMBINED, &meta(), &FormatterConfig::default()).await;
        assert!(out.is_revised());
        assert_eq!(out.text(), "# Livro\n\nParte um.\n\n## Seção\n\nParte dois.");
    }

    #[tokio::test]
    async fn truncated_revision_keeps_combined_text() {
        let t = Fixed {
            reply: Ok("# Livro\n\nParte um."),
            calls: AtomicUsize::new(0),
        };
        let out = ensure_consistency(&t, COMBINED, &meta(), &FormatterConfig::default()).await;
        match out {
            ConsistencyOutcome::Unchanged { text, reason } => {
                assert_eq!(text, COMBINED);
                assert!(reason.contains("word count"), "{reason}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_is_identity_with_one_call() {
        let t = Fixed {
            reply: Err(TransformError::Request("timeout".into())),
            calls: AtomicUsize::new(0),
        };
        let out = ensure_consistency(&t, COMBINED, &meta(), &FormatterConfig::default()).await;
        assert_eq!(out.text(), COMBINED);
        assert!(!out.is_revised());
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_response_is_identity() {
        let t = Fixed {
            reply: Ok("   "),
            calls: AtomicUsize::new(0),
        };
        let out = ensure_consistency(&t, COMBINED, &meta(), &FormatterConfig::default()).await;
        match out {
            ConsistencyOutcome::Unchanged { text, reason } => {
                assert_eq!(text, COMBINED);
                assert_eq!(reason, "empty response");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

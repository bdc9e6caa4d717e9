//! Remote formatting of one chunk, with fixed-backoff retry.
//!
//! All prompt text lives in [`crate::prompts`]; this module only drives the
//! call. The retry loop is an explicit state machine:
//!
//! ```text
//! Pending ─▶ Sending ─┬─▶ Success
//!              ▲      ├─▶ RetryWait ─(backoff)─┐
//!              └──────┼────────────────────────┘
//!                     └─▶ Exhausted      (after max_attempts failures)
//! ```
//!
//! An empty (or whitespace-only) response counts as a failed attempt just
//! like a transport error. The backoff is fixed, not exponential: the call
//! sequence is strictly sequential, so there is no herd to spread out.

use crate::config::FormatterConfig;
use crate::document::{DocumentMetadata, FormattingContext};
use crate::error::{FormattingError, TransformError};
use crate::output::FormattedChunk;
use crate::pipeline::postprocess::clean_chunk;
use crate::prompts::{formatting_system_prompt, formatting_user_prompt};
use crate::transformer::{TextTransformer, TransformRequest};
use futures::StreamExt;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Where the retry loop for one chunk stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    Pending,
    Sending { attempt: u32 },
    /// `attempt` failed with `error`; the next one follows after the backoff.
    RetryWait { attempt: u32, error: String },
    Success { attempt: u32, text: String },
    Exhausted { attempts: u32, error: String },
}

/// Format one chunk through `transformer`.
///
/// `context` is `None` for single-chunk documents. The part number used in
/// logs and errors is taken from it (1 otherwise).
pub async fn format_chunk(
    transformer: &dyn TextTransformer,
    text: &str,
    metadata: &DocumentMetadata,
    heading_pattern: Option<&str>,
    context: Option<&FormattingContext>,
    config: &FormatterConfig,
) -> Result<FormattedChunk, FormattingError> {
    let part = context.map(|c| c.part).unwrap_or(1);
    let request = build_request(
        formatting_system_prompt(heading_pattern, context),
        formatting_user_prompt(text, metadata, context),
        config,
    );
    let max_attempts = config.max_attempts.max(1);
    let start = Instant::now();

    let mut state = CallState::Pending;
    loop {
        state = match state {
            CallState::Pending => CallState::Sending { attempt: 1 },

            CallState::Sending { attempt } => {
                debug!("Part {}: sending attempt {}/{}", part, attempt, max_attempts);
                match request_text(transformer, &request).await {
                    Ok(text) => CallState::Success { attempt, text },
                    Err(error) => {
                        warn!(
                            "Part {}: attempt {}/{} failed: {}",
                            part, attempt, max_attempts, error
                        );
                        if attempt >= max_attempts {
                            CallState::Exhausted {
                                attempts: attempt,
                                error,
                            }
                        } else {
                            CallState::RetryWait { attempt, error }
                        }
                    }
                }
            }

            CallState::RetryWait { attempt, error } => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_part_retry(part, attempt, &error);
                }
                debug!("Part {}: waiting {:?} before retry", part, config.retry_backoff);
                sleep(config.retry_backoff).await;
                CallState::Sending {
                    attempt: attempt + 1,
                }
            }

            CallState::Success { attempt, text } => {
                debug!(
                    "Part {}: {} chars after {} attempt(s), {:?}",
                    part,
                    text.len(),
                    attempt,
                    start.elapsed()
                );
                return Ok(FormattedChunk {
                    part,
                    text,
                    attempts: attempt,
                });
            }

            CallState::Exhausted { attempts, error } => {
                error!("Part {}: giving up after {} attempts", part, attempts);
                return Err(FormattingError::RemoteCallExhausted {
                    part,
                    attempts,
                    last_error: error,
                });
            }
        };
    }
}

pub(crate) fn build_request(
    system_prompt: String,
    user_prompt: String,
    config: &FormatterConfig,
) -> TransformRequest {
    TransformRequest {
        system_prompt,
        user_prompt,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}

/// One remote call: open the stream, concatenate every fragment, clean up.
///
/// Errors are flattened to strings since they only feed logs and the final
/// [`FormattingError`].
pub(crate) async fn request_text(
    transformer: &dyn TextTransformer,
    request: &TransformRequest,
) -> Result<String, String> {
    let mut fragments = transformer
        .transform(request)
        .await
        .map_err(|e| e.to_string())?;

    let mut raw = String::new();
    while let Some(fragment) = fragments.next().await {
        let fragment: Result<String, TransformError> = fragment;
        raw.push_str(&fragment.map_err(|e| e.to_string())?);
    }

    let text = clean_chunk(&raw);
    if text.trim().is_empty() {
        return Err("empty response".to_string());
    }
    Ok(text)
}

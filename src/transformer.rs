//! Remote text transformation: the seam between the pipeline and an LLM.
//!
//! The pipeline never talks to an API directly. It hands a
//! [`TransformRequest`] (system prompt, user prompt, sampling knobs) to a
//! [`TextTransformer`] and consumes the returned [`FragmentStream`]. Tests
//! inject scripted transformers; production uses one of:
//!
//! * [`AnthropicTransformer`] — the Anthropic Messages API with `stream: true`,
//!   parsed incrementally from server-sent events.
//! * [`ProviderTransformer`] — any `edgequake-llm` provider (OpenAI, Gemini,
//!   Ollama, Azure, …). Providers that stream are consumed through
//!   `chat_with_tools_stream`; the rest are called through `chat` and yield
//!   the whole completion as a single fragment.
//!
//! A reply cut off by the token limit is an error in both, never a shorter
//! fragment stream.

use crate::error::TransformError;
use async_trait::async_trait;
use edgequake_llm::traits::StreamChunk;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Incremental text fragments of one remote response.
pub type FragmentStream = BoxStream<'static, Result<String, TransformError>>;

/// One remote call: what to send and how to sample.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// A remote service that rewrites text according to a prompt.
///
/// Implementations must be `Send + Sync`; the pipeline holds them behind
/// `Arc<dyn TextTransformer>`.
#[async_trait]
pub trait TextTransformer: Send + Sync {
    /// Start the call and return its response as a stream of fragments.
    ///
    /// An `Err` here means the request never produced a response (transport
    /// failure, non-success status). Errors inside the stream mean the
    /// response broke part-way.
    async fn transform(&self, request: &TransformRequest) -> Result<FragmentStream, TransformError>;
}

// ── Anthropic ────────────────────────────────────────────────────────────

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Streaming client for the Anthropic Messages API.
pub struct AnthropicTransformer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl fmt::Debug for AnthropicTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicTransformer")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl AnthropicTransformer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            endpoint: ANTHROPIC_URL.to_string(),
        }
    }

    /// Point the client at a different Messages-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    system: &'a str,
    messages: Vec<MessageParam<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct MessageParam<'a> {
    role: &'a str,
    content: &'a str,
}

/// The subset of Anthropic stream events the pipeline cares about.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: Delta },
    MessageDelta { delta: MessageDeltaBody },
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[async_trait]
impl TextTransformer for AnthropicTransformer {
    async fn transform(&self, request: &TransformRequest) -> Result<FragmentStream, TransformError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system_prompt,
            messages: vec![MessageParam {
                role: "user",
                content: &request.user_prompt,
            }],
            stream: true,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransformError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(TransformError::Request(format!("HTTP {}: {}", status, text)));
        }

        debug!("Anthropic stream opened (model {})", self.model);

        // SSE events may be split across network chunks, so complete lines
        // are carved out of a running byte buffer.
        let mut pending: Vec<u8> = Vec::new();
        let fragments = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => {
                    pending.extend_from_slice(&bytes);
                    let mut out = Vec::new();
                    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line);
                        if let Some(item) = parse_sse_line(line.trim_end()) {
                            out.push(item);
                        }
                    }
                    out
                }
                Err(e) => vec![Err(TransformError::Stream(e.to_string()))],
            })
            .flat_map(stream::iter);

        Ok(fragments.boxed())
    }
}

/// Interpret one SSE line. Only `data:` lines carrying text or errors matter.
fn parse_sse_line(line: &str) -> Option<Result<String, TransformError>> {
    let data = line.strip_prefix("data:")?.trim_start();
    match serde_json::from_str::<StreamEvent>(data) {
        Ok(StreamEvent::ContentBlockDelta {
            delta: Delta::TextDelta { text },
        }) => Some(Ok(text)),
        Ok(StreamEvent::MessageDelta { delta }) => match delta.stop_reason {
            Some(reason) if is_truncation(&reason) => Some(Err(truncated(&reason))),
            _ => None,
        },
        Ok(StreamEvent::Error { error }) => Some(Err(TransformError::Stream(error.message))),
        Ok(_) => None,
        Err(e) => Some(Err(TransformError::InvalidResponse(format!(
            "unparseable stream event: {e}"
        )))),
    }
}

// ── edgequake-llm providers ──────────────────────────────────────────────

/// Adapter from an `edgequake-llm` provider to [`TextTransformer`].
pub struct ProviderTransformer {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderTransformer {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl TextTransformer for ProviderTransformer {
    async fn transform(&self, request: &TransformRequest) -> Result<FragmentStream, TransformError> {
        let messages = vec![
            ChatMessage::system(request.system_prompt.as_str()),
            ChatMessage::user(request.user_prompt.as_str()),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        if self.provider.supports_tool_streaming() {
            let chunks = self
                .provider
                .chat_with_tools_stream(&messages, &[], None, Some(&options))
                .await
                .map_err(|e| TransformError::Request(e.to_string()))?;
            debug!("{} stream opened", self.provider.name());
            return Ok(chunks
                .filter_map(|chunk| futures::future::ready(chunk_to_fragment(chunk)))
                .boxed());
        }

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| TransformError::Request(e.to_string()))?;

        debug!(
            "Provider response: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        if let Some(reason) = response.finish_reason.as_deref().filter(|r| is_truncation(r)) {
            return Err(truncated(reason));
        }

        Ok(stream::once(async move { Ok(response.content) }).boxed())
    }
}

fn chunk_to_fragment(
    chunk: edgequake_llm::Result<StreamChunk>,
) -> Option<Result<String, TransformError>> {
    match chunk {
        Ok(StreamChunk::Content(text)) => Some(Ok(text)),
        Ok(StreamChunk::Finished { reason, .. }) if is_truncation(&reason) => {
            Some(Err(truncated(&reason)))
        }
        Ok(_) => None,
        Err(e) => Some(Err(TransformError::Stream(e.to_string()))),
    }
}

/// Stop reasons meaning the token limit cut the reply short.
fn is_truncation(reason: &str) -> bool {
    matches!(reason, "max_tokens" | "length")
}

fn truncated(reason: &str) -> TransformError {
    TransformError::Stream(format!("response truncated at the token limit ({reason})"))
}

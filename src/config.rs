//! Configuration types for document-to-ebook conversion.
//!
//! Two layers:
//!
//! * [`FormatterConfig`] — every runtime knob of the pipeline, built through
//!   [`FormatterConfigBuilder`]. Injected collaborators (transformer,
//!   renderer, progress callback) and the API credential live here too, so the
//!   orchestrator never reads process-global state.
//! * [`Settings`] — the user-editable `config.yaml` (ebook defaults, model,
//!   tolerance). A broken file is logged and replaced by defaults; it never
//!   aborts a run.

use crate::error::{ConfigError, EbookError};
use crate::pipeline::extract::TextEncoding;
use crate::pipeline::render::DocumentRenderer;
use crate::progress::ProgressCallback;
use crate::transformer::TextTransformer;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Model used when neither the settings file nor the caller names one.
pub const DEFAULT_MODEL: &str = "claude-3-opus-20240229";

/// Configuration for a document-to-ebook conversion.
///
/// # Example
/// ```rust
/// use edgequake_ebook::FormatterConfig;
///
/// let config = FormatterConfig::builder()
///     .chunk_threshold_words(3000)
///     .heading_pattern(r"^Chapter \d+")
///     .api_key("sk-ant-...")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct FormatterConfig {
    /// Documents with more words than this are chunked. Default: 4000.
    pub chunk_threshold_words: usize,

    /// Lower bound on the planned chunk count for chunked documents. Default: 12.
    pub min_chunks: usize,

    /// Regex marking heading paragraphs. None uses the built-in patterns.
    pub heading_pattern: Option<String>,

    /// Remote calls attempted per chunk before giving up. Default: 3.
    pub max_attempts: u32,

    /// Fixed wait before each retry. Default: 5 s.
    pub retry_backoff: Duration,

    /// Fixed wait between successive chunk calls. Default: 2 s.
    pub inter_chunk_delay: Duration,

    /// Model identifier. None uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// Provider name. None (or "anthropic") uses the streaming Anthropic
    /// client; anything else goes through the edgequake-llm factory.
    pub provider_name: Option<String>,

    /// Credential for the Anthropic client.
    pub api_key: Option<String>,

    /// Pre-constructed transformer. Takes precedence over provider settings.
    pub transformer: Option<Arc<dyn TextTransformer>>,

    /// Pre-constructed renderer. None uses pandoc.
    pub renderer: Option<Arc<dyn DocumentRenderer>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Output-token cap per remote call. Default: 4000.
    pub max_tokens: usize,

    /// Run the consistency pass on multi-chunk documents. Default: true.
    pub consistency_pass: bool,

    /// Language written to the metadata header. Default: "pt-BR".
    pub language: String,

    /// Author used when the request names none. Default: empty.
    pub default_author: String,

    /// EPUB cover image, relative to `work_dir` unless absolute.
    pub cover_image: Option<PathBuf>,

    /// Allowed word-count drift in percent before a warning. Default: 5.
    pub word_count_tolerance: f32,

    /// Encodings tried, in order, when a text file is not UTF-8.
    pub fallback_encodings: Vec<TextEncoding>,

    /// Root of `temp/`, `output/`, `content/`, `styles/`, `templates/`. Default: ".".
    pub work_dir: PathBuf,

    /// Converter executable. Default: "pandoc".
    pub pandoc_path: String,

    /// Per-part progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            chunk_threshold_words: 4000,
            min_chunks: 12,
            heading_pattern: None,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(5),
            inter_chunk_delay: Duration::from_secs(2),
            model: None,
            provider_name: None,
            api_key: None,
            transformer: None,
            renderer: None,
            temperature: 0.1,
            max_tokens: 4000,
            consistency_pass: true,
            language: "pt-BR".to_string(),
            default_author: String::new(),
            cover_image: None,
            word_count_tolerance: 5.0,
            fallback_encodings: TextEncoding::default_fallbacks(),
            work_dir: PathBuf::from("."),
            pandoc_path: "pandoc".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for FormatterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterConfig")
            .field("chunk_threshold_words", &self.chunk_threshold_words)
            .field("min_chunks", &self.min_chunks)
            .field("heading_pattern", &self.heading_pattern)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff", &self.retry_backoff)
            .field("inter_chunk_delay", &self.inter_chunk_delay)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("transformer", &self.transformer.as_ref().map(|_| "<dyn TextTransformer>"))
            .field("renderer", &self.renderer.as_ref().map(|_| "<dyn DocumentRenderer>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("consistency_pass", &self.consistency_pass)
            .field("language", &self.language)
            .field("work_dir", &self.work_dir)
            .finish()
    }
}

impl FormatterConfig {
    /// Create a new builder for `FormatterConfig`.
    pub fn builder() -> FormatterConfigBuilder {
        FormatterConfigBuilder {
            config: Self::default(),
        }
    }

    /// Start a builder pre-filled from a loaded settings file.
    pub fn from_settings(settings: &Settings) -> FormatterConfigBuilder {
        let mut builder = Self::builder()
            .language(settings.ebook.language.clone())
            .default_author(settings.ebook.author.clone())
            .temperature(settings.ai.temperature)
            .max_tokens(settings.ai.max_tokens)
            .word_count_tolerance(settings.formatting.word_count_tolerance)
            .chunk_threshold_words(settings.formatting.chunk_threshold_words)
            .min_chunks(settings.formatting.min_chunks);
        if let Some(ref model) = settings.ai.model {
            builder = builder.model(model.clone());
        }
        if let Some(ref provider) = settings.ai.provider {
            builder = builder.provider_name(provider.clone());
        }
        if let Some(ref cover) = settings.ebook.cover_image {
            if !cover.is_empty() {
                builder = builder.cover_image(cover);
            }
        }
        builder
    }

    /// The model to request, falling back to [`DEFAULT_MODEL`].
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`FormatterConfig`].
pub struct FormatterConfigBuilder {
    config: FormatterConfig,
}

impl fmt::Debug for FormatterConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl FormatterConfigBuilder {
    pub fn chunk_threshold_words(mut self, words: usize) -> Self {
        self.config.chunk_threshold_words = words;
        self
    }

    pub fn min_chunks(mut self, n: usize) -> Self {
        self.config.min_chunks = n.max(1);
        self
    }

    pub fn heading_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.heading_pattern = Some(pattern.into());
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    pub fn inter_chunk_delay(mut self, delay: Duration) -> Self {
        self.config.inter_chunk_delay = delay;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn transformer(mut self, transformer: Arc<dyn TextTransformer>) -> Self {
        self.config.transformer = Some(transformer);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.config.renderer = Some(renderer);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 1.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn consistency_pass(mut self, v: bool) -> Self {
        self.config.consistency_pass = v;
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn default_author(mut self, author: impl Into<String>) -> Self {
        self.config.default_author = author.into();
        self
    }

    pub fn cover_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cover_image = Some(path.into());
        self
    }

    pub fn word_count_tolerance(mut self, percent: f32) -> Self {
        self.config.word_count_tolerance = percent.max(0.0);
        self
    }

    pub fn fallback_encodings(mut self, encodings: Vec<TextEncoding>) -> Self {
        self.config.fallback_encodings = encodings;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn pandoc_path(mut self, program: impl Into<String>) -> Self {
        self.config.pandoc_path = program.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<FormatterConfig, EbookError> {
        let c = &self.config;
        if c.chunk_threshold_words < 2 {
            return Err(EbookError::InvalidConfig(format!(
                "Chunk threshold must be ≥ 2 words, got {}",
                c.chunk_threshold_words
            )));
        }
        if c.max_attempts == 0 {
            return Err(EbookError::InvalidConfig(
                "Max attempts must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(EbookError::InvalidConfig("Max tokens must be ≥ 1".into()));
        }
        if let Some(ref pattern) = c.heading_pattern {
            Regex::new(pattern).map_err(|e| {
                EbookError::InvalidConfig(format!("Invalid heading pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(self.config)
    }
}

// ── Output format ────────────────────────────────────────────────────────

/// Final ebook format produced by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Epub,
    Pdf,
    Html,
}

impl OutputFormat {
    /// Lowercase name, also used as file extension and output sub-directory.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Epub => "epub",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Html => "html",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "epub" => Ok(OutputFormat::Epub),
            "pdf" => Ok(OutputFormat::Pdf),
            "html" => Ok(OutputFormat::Html),
            other => Err(format!(
                "Invalid output format '{}'. Expected: epub, pdf, or html",
                other
            )),
        }
    }
}

// ── Settings file ────────────────────────────────────────────────────────

/// Contents of `config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ebook: EbookSettings,
    pub ai: AiSettings,
    pub formatting: FormattingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EbookSettings {
    pub title: String,
    pub subtitle: String,
    pub author: String,
    pub language: String,
    pub cover_image: Option<String>,
}

impl Default for EbookSettings {
    fn default() -> Self {
        Self {
            title: "Ebook".to_string(),
            subtitle: String::new(),
            author: String::new(),
            language: "pt-BR".to_string(),
            cover_image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            provider: None,
            model: Some(DEFAULT_MODEL.to_string()),
            temperature: 0.1,
            max_tokens: 4000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormattingSettings {
    pub word_count_tolerance: f32,
    pub chunk_threshold_words: usize,
    pub min_chunks: usize,
}

impl Default for FormattingSettings {
    fn default() -> Self {
        Self {
            word_count_tolerance: 5.0,
            chunk_threshold_words: 4000,
            min_chunks: 12,
        }
    }
}

impl Settings {
    /// Parse a settings file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw, path)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// Load settings, never failing.
    ///
    /// A missing file is replaced by defaults, which are also written to
    /// `path` for the user to edit. A malformed file is logged and ignored.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            let defaults = Self::default();
            match serde_yaml::to_string(&defaults) {
                Ok(yaml) => match std::fs::write(path, yaml) {
                    Ok(()) => info!("Default settings written to {}", path.display()),
                    Err(e) => warn!("Could not write default settings to {}: {}", path.display(), e),
                },
                Err(e) => warn!("Could not serialise default settings: {}", e),
            }
            return defaults;
        }

        match Self::load(path) {
            Ok(settings) => {
                info!("Settings loaded from {}", path.display());
                settings
            }
            Err(e) => {
                warn!("{}; using built-in defaults", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_constants() {
        let c = FormatterConfig::default();
        assert_eq!(c.chunk_threshold_words, 4000);
        assert_eq!(c.min_chunks, 12);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.retry_backoff, Duration::from_secs(5));
        assert_eq!(c.inter_chunk_delay, Duration::from_secs(2));
        assert_eq!(c.max_tokens, 4000);
        assert!((c.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(c.model_or_default(), DEFAULT_MODEL);
    }

    #[test]
    fn build_rejects_invalid_heading_pattern() {
        let err = FormatterConfig::builder()
            .heading_pattern("(unclosed")
            .build()
            .unwrap_err();
        assert!(matches!(err, EbookError::InvalidConfig(_)));
    }

    #[test]
    fn build_rejects_zero_attempts() {
        assert!(FormatterConfig::builder().max_attempts(0).build().is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = FormatterConfig::builder().api_key("sk-secret").build().unwrap();
        assert!(!format!("{:?}", c).contains("sk-secret"));
    }

    #[test]
    fn output_format_parses_case_insensitively() {
        assert_eq!("EPUB".parse::<OutputFormat>(), Ok(OutputFormat::Epub));
        assert_eq!("pdf".parse::<OutputFormat>(), Ok(OutputFormat::Pdf));
        assert!("docx".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = "ebook:\n  author: \"Ana Souza\"\nai:\n  temperature: 0.2\n";
        let s = Settings::parse(yaml, Path::new("config.yaml")).unwrap();
        assert_eq!(s.ebook.author, "Ana Souza");
        assert_eq!(s.ebook.language, "pt-BR");
        assert_eq!(s.ai.max_tokens, 4000);
        assert!((s.ai.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = Settings::parse("ebook: [unterminated", Path::new("bad.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_or_default_writes_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let s = Settings::load_or_default(&path);
        assert_eq!(s, Settings::default());
        assert!(path.exists());
        assert_eq!(Settings::load(&path).unwrap(), Settings::default());
    }

    #[test]
    fn load_or_default_survives_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "ai: {temperature: [not a number]}").unwrap();
        assert_eq!(Settings::load_or_default(&path), Settings::default());
    }

    #[test]
    fn settings_flow_into_builder() {
        let mut s = Settings::default();
        s.ebook.author = "Carlos".into();
        s.ebook.language = "en".into();
        s.ai.model = Some("claude-3-haiku-20240307".into());
        let c = FormatterConfig::from_settings(&s).build().unwrap();
        assert_eq!(c.default_author, "Carlos");
        assert_eq!(c.language, "en");
        assert_eq!(c.model_or_default(), "claude-3-haiku-20240307");
    }
}

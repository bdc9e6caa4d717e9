//! Conversion entry points.
//!
//! [`format_markdown`] runs extraction, chunking, remote formatting and the
//! consistency pass, and leaves the final Markdown in `<work>/temp/`.
//! [`convert`] does the same and then renders the ebook. Intermediate files
//! are written as each stage completes, so a failed run still leaves
//! everything up to the failure on disk.

use crate::config::{FormatterConfig, OutputFormat};
use crate::document::{derive_title, word_count, Document, DocumentMetadata};
use crate::error::EbookError;
use crate::output::{ConsistencyOutcome, EbookOutput, FormattedDocument, FormattingStats};
use crate::pipeline::chunk::{plan_chunks, ChunkPlan};
use crate::pipeline::consistency::ensure_consistency;
use crate::pipeline::extract::{extract_text_with, ExtractOptions};
use crate::pipeline::llm::format_chunk;
use crate::pipeline::postprocess::clean_body;
use crate::pipeline::render::{DocumentRenderer, PandocRenderer, RenderJob};
use crate::transformer::{AnthropicTransformer, ProviderTransformer, TextTransformer};
use crate::workspace::{slugify, write_atomic, Workspace};
use edgequake_llm::ProviderFactory;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What to convert and how to name the result.
#[derive(Debug, Clone)]
pub struct EbookRequest {
    pub input: PathBuf,
    pub format: OutputFormat,
    /// Absolute: used as-is. Relative: only the file name is kept and the
    /// file lands in `<work>/output/<format>/`.
    pub output_file: Option<PathBuf>,
    pub title: Option<String>,
    pub author: Option<String>,
}

impl EbookRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            format: OutputFormat::default(),
            output_file: None,
            title: None,
            author: None,
        }
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// Convert a document to an ebook.
///
/// # Errors
/// Every error is fatal for the run:
/// - extraction failures (missing file, unsupported format, …)
/// - a part that could not be formatted after all attempts
/// - the converter missing or failing after its fallback. The formatted
///   Markdown stays in `<work>/temp/` in that case.
pub async fn convert(
    request: &EbookRequest,
    config: &FormatterConfig,
) -> Result<EbookOutput, EbookError> {
    let document = format_markdown(request, config).await?;
    let workspace = Workspace::new(&config.work_dir);

    // ── Step 9: Render ───────────────────────────────────────────────────
    let slug = slugify(&document.metadata.title);
    let ebook_path =
        workspace.resolve_output_path(request.output_file.as_deref(), &slug, request.format);
    let job = RenderJob {
        markdown_path: document.markdown_path.clone(),
        output_path: ebook_path.clone(),
        format: request.format,
        metadata: document.metadata.clone(),
        cover_image: match request.format {
            OutputFormat::Epub => resolve_cover(config),
            _ => None,
        },
    };

    if let Some(ref cb) = config.progress_callback {
        cb.on_render_start(request.format.as_str());
    }
    let renderer = resolve_renderer(config, &workspace);
    renderer.render(&job).await?;

    info!("Ebook ready: {}", ebook_path.display());
    Ok(EbookOutput {
        document,
        format: request.format,
        ebook_path,
    })
}

/// Run the pipeline up to and including the final Markdown file.
pub async fn format_markdown(
    request: &EbookRequest,
    config: &FormatterConfig,
) -> Result<FormattedDocument, EbookError> {
    let total_start = Instant::now();
    let workspace = Workspace::new(&config.work_dir);
    info!("Starting conversion: {}", request.input.display());

    // ── Step 1: Extract text ─────────────────────────────────────────────
    let options = ExtractOptions {
        fallback_encodings: config.fallback_encodings.clone(),
        pandoc_path: config.pandoc_path.clone(),
    };
    let text = extract_text_with(&request.input, &options).await?;

    // ── Step 2: Metadata ─────────────────────────────────────────────────
    let title = derive_title(request.title.as_deref(), &text, &request.input);
    let author = request
        .author
        .clone()
        .unwrap_or_else(|| config.default_author.clone());
    let metadata = DocumentMetadata::new(title, author, config.language.clone());
    let document = Document::new(&request.input, text, metadata);
    let slug = slugify(&document.metadata.title);
    info!(
        "Title: \"{}\", {} words",
        document.metadata.title,
        document.word_count()
    );

    // ── Step 3: Resolve transformer ──────────────────────────────────────
    let transformer = resolve_transformer(config)?;

    // ── Step 4: Plan chunks ──────────────────────────────────────────────
    let chunks = plan_chunks(&document.text, &ChunkPlan::from_config(config))?;
    let total = chunks.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(total);
    }

    // ── Step 5: Format each part in order ────────────────────────────────
    let mut formatted: Vec<String> = Vec::with_capacity(total);
    let mut remote_calls = 0u32;
    for chunk in &chunks {
        if chunk.index > 1 && !config.inter_chunk_delay.is_zero() {
            debug!("Waiting {:?} before part {}", config.inter_chunk_delay, chunk.index);
            tokio::time::sleep(config.inter_chunk_delay).await;
        }
        if let Some(ref cb) = config.progress_callback {
            cb.on_part_start(chunk.index, total);
        }

        if chunk.text.trim().is_empty() {
            // only blank separators ended up here; nothing to format
            debug!("Part {}: blank, kept verbatim", chunk.index);
            formatted.push(chunk.text.clone());
            if let Some(ref cb) = config.progress_callback {
                cb.on_part_complete(chunk.index, total, chunk.text.len());
            }
            continue;
        }

        info!(
            "Formatting part {}/{} ({} words)",
            chunk.index,
            total,
            chunk.word_count()
        );
        let context = chunk.context();
        let result = format_chunk(
            transformer.as_ref(),
            &chunk.text,
            &document.metadata,
            config.heading_pattern.as_deref(),
            context.as_ref(),
            config,
        )
        .await;

        let part = match result {
            Ok(part) => part,
            Err(e) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_part_error(chunk.index, total, &e.to_string());
                }
                return Err(e.into());
            }
        };
        remote_calls += part.attempts;
        if let Some(ref cb) = config.progress_callback {
            cb.on_part_complete(chunk.index, total, part.text.len());
        }
        if total > 1 {
            workspace
                .write_artifact(&slug, &format!("part_{}.txt", chunk.index), &part.text)
                .await?;
        }
        formatted.push(part.text);
    }

    // ── Step 6: Reassemble ───────────────────────────────────────────────
    let combined = formatted.join("\n\n");

    // ── Step 7: Consistency pass (multi-part only) ───────────────────────
    let mut consistency_applied = false;
    let body = if total > 1 {
        workspace
            .write_artifact(&slug, "combined_raw.txt", &combined)
            .await?;
        if config.consistency_pass {
            workspace
                .write_artifact(&slug, "pre_consistency.txt", &combined)
                .await?;
            if let Some(ref cb) = config.progress_callback {
                cb.on_consistency_start();
            }
            let outcome =
                ensure_consistency(transformer.as_ref(), &combined, &document.metadata, config)
                    .await;
            consistency_applied = outcome.is_revised();
            if let Some(ref cb) = config.progress_callback {
                cb.on_consistency_complete(consistency_applied);
            }
            if let ConsistencyOutcome::Revised(ref revised) = outcome {
                workspace
                    .write_artifact(&slug, "post_consistency.txt", revised)
                    .await?;
            }
            outcome.into_text()
        } else {
            combined
        }
    } else {
        combined
    };

    // ── Step 8: Header, drift check, persist ─────────────────────────────
    let body = clean_body(&body);
    let input_words = document.word_count();
    let output_words = word_count(&body);
    let stats = FormattingStats {
        chunk_count: total,
        remote_calls,
        consistency_applied,
        input_words,
        output_words,
        duration_ms: total_start.elapsed().as_millis() as u64,
    };
    let drift = stats.word_drift_percent();
    if drift > f64::from(config.word_count_tolerance) {
        warn!(
            "Word count changed by {:.1}% ({} → {}), above the {}% tolerance",
            drift, input_words, output_words, config.word_count_tolerance
        );
    } else {
        debug!("Word count drift {:.1}%", drift);
    }

    let markdown = format!("{}{}", document.metadata.header(), body);
    let markdown_path = workspace
        .write_artifact(&slug, "formatted.md", &markdown)
        .await?;
    workspace
        .write_artifact(&slug, "formatted_backup.txt", &markdown)
        .await?;
    let copy = workspace
        .formatted_dir()
        .join(format!("{}_formatted.md", slug));
    write_atomic(&copy, &markdown).await?;
    info!("Markdown saved: {}", markdown_path.display());

    Ok(FormattedDocument {
        metadata: document.metadata,
        markdown,
        markdown_path,
        stats,
    })
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    request: &EbookRequest,
    config: &FormatterConfig,
) -> Result<EbookOutput, EbookError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| EbookError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(request, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Pick the transformer, from most to least specific:
///
/// 1. a pre-built transformer in the config (tests, custom middleware);
/// 2. the streaming Anthropic client when no provider, or `anthropic`, is
///    named (needs `config.api_key`);
/// 3. any other provider name through the edgequake-llm factory, which reads
///    that provider's own key from the environment.
fn resolve_transformer(config: &FormatterConfig) -> Result<Arc<dyn TextTransformer>, EbookError> {
    if let Some(ref transformer) = config.transformer {
        return Ok(Arc::clone(transformer));
    }

    match config.provider_name.as_deref() {
        None | Some("anthropic") => {
            let key = config
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .ok_or_else(|| EbookError::ProviderNotConfigured {
                    provider: "anthropic".to_string(),
                    hint: "Set ANTHROPIC_API_KEY or pass an API key in the configuration.".to_string(),
                })?;
            Ok(Arc::new(AnthropicTransformer::new(
                key,
                config.model_or_default(),
            )))
        }
        Some(name) => {
            let model = config.model_or_default();
            let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
                EbookError::ProviderNotConfigured {
                    provider: name.to_string(),
                    hint: format!("{e}"),
                }
            })?;
            Ok(Arc::new(ProviderTransformer::new(provider)))
        }
    }
}

fn resolve_renderer(config: &FormatterConfig, workspace: &Workspace) -> Arc<dyn DocumentRenderer> {
    match config.renderer {
        Some(ref renderer) => Arc::clone(renderer),
        None => Arc::new(PandocRenderer::new(
            config.pandoc_path.clone(),
            workspace.styles_dir(),
            workspace.templates_dir(),
        )),
    }
}

/// The configured cover, if it exists. Relative paths are taken from the
/// work directory.
fn resolve_cover(config: &FormatterConfig) -> Option<PathBuf> {
    let cover = config.cover_image.as_deref()?;
    let path = if cover.is_absolute() {
        cover.to_path_buf()
    } else {
        Path::new(&config.work_dir).join(cover)
    };
    if path.exists() {
        Some(path)
    } else {
        warn!("Cover image not found: {}", path.display());
        None
    }
}

//! Offline integration tests for edgequake-ebook.
//!
//! The remote model and the converter are replaced by in-process stand-ins
//! injected through the config builder, so every test runs without network
//! access or a pandoc install. Each test gets its own temporary work dir.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use edgequake_ebook::{
    convert, format_markdown, plan_chunks, ChunkPlan, DocumentRenderer, EbookError,
    EbookRequest, FormatterConfig, FormatterConfigBuilder, FormattingError, FragmentStream,
    OutputFormat, RenderError, RenderJob, TextTransformer, TransformError, TransformRequest,
};
use futures::stream;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// How the stand-in answers the consistency call.
#[derive(Clone, Copy)]
enum ConsistencyReply {
    Echo,
    Fail,
    /// Only the first paragraph, as a reply cut off at the token limit.
    Truncated,
}

/// Returns the content between the `<document>` tags unchanged, split into
/// two fragments.
struct EchoTransformer {
    requests: Mutex<Vec<TransformRequest>>,
    consistency: ConsistencyReply,
}

impl EchoTransformer {
    fn new() -> Arc<Self> {
        Self::with_consistency(ConsistencyReply::Echo)
    }

    fn failing_consistency() -> Arc<Self> {
        Self::with_consistency(ConsistencyReply::Fail)
    }

    fn with_consistency(consistency: ConsistencyReply) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            consistency,
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn is_consistency(request: &TransformRequest) -> bool {
    request.user_prompt.contains("needs uniform formatting")
}

fn between_tags(prompt: &str) -> String {
    let start = prompt.find("<document>\n").expect("opening tag") + "<document>\n".len();
    let end = prompt.rfind("\n</document>").expect("closing tag");
    prompt[start..end].to_string()
}

#[async_trait]
impl TextTransformer for EchoTransformer {
    async fn transform(&self, request: &TransformRequest) -> Result<FragmentStream, TransformError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut content = between_tags(&request.user_prompt);
        if is_consistency(request) {
            match self.consistency {
                ConsistencyReply::Echo => {}
                ConsistencyReply::Fail => {
                    return Err(TransformError::Request("HTTP 529 overloaded".into()))
                }
                ConsistencyReply::Truncated => {
                    content = content.split("\n\n").next().unwrap_or("").to_string();
                }
            }
        }
        let mid = content
            .char_indices()
            .map(|(i, _)| i)
            .nth(content.chars().count() / 2)
            .unwrap_or(0);
        let (a, b) = content.split_at(mid);
        Ok(Box::pin(stream::iter(vec![
            Ok(a.to_string()),
            Ok(b.to_string()),
        ])))
    }
}

/// Always answers with nothing.
struct SilentTransformer {
    calls: Mutex<usize>,
}

#[async_trait]
impl TextTransformer for SilentTransformer {
    async fn transform(&self, _request: &TransformRequest) -> Result<FragmentStream, TransformError> {
        *self.calls.lock().unwrap() += 1;
        Ok(Box::pin(stream::iter(vec![Ok("   \n".to_string())])))
    }
}

/// Writes a placeholder ebook and remembers every job.
#[derive(Default)]
struct RecordingRenderer {
    jobs: Mutex<Vec<RenderJob>>,
}

#[async_trait]
impl DocumentRenderer for RecordingRenderer {
    async fn render(&self, job: &RenderJob) -> Result<(), RenderError> {
        if let Some(parent) = job.output_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&job.output_path, b"ebook").unwrap();
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}

/// Captures formatted log output for assertions.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

fn paragraph(words: usize, seed: usize) -> String {
    (0..words)
        .map(|i| format!("palavra{}x{}", seed, i))
        .collect::<Vec<_>>()
        .join(" ")
}

fn document(paragraphs: usize, words_each: usize) -> String {
    (0..paragraphs)
        .map(|p| paragraph(words_each, p))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn write_input(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

/// No pauses, no consistency surprises; callers add what they test.
fn base_config(work: &Path, transformer: Arc<dyn TextTransformer>) -> FormatterConfigBuilder {
    FormatterConfig::builder()
        .work_dir(work)
        .transformer(transformer)
        .retry_backoff(Duration::ZERO)
        .inter_chunk_delay(Duration::ZERO)
}

fn body_of(markdown: &str) -> &str {
    let rest = markdown.strip_prefix("---\n").expect("front matter");
    let end = rest.find("\n---\n\n").expect("front matter end");
    &rest[end + "\n---\n\n".len()..]
}

// ── Single-part documents ────────────────────────────────────────────────────

#[tokio::test]
async fn short_text_is_one_call_with_metadata_header() {
    let work = tempfile::tempdir().unwrap();
    let text = document(5, 100);
    let input = write_input(work.path(), "notes.txt", &text);
    let echo = EchoTransformer::new();
    let renderer = Arc::new(RecordingRenderer::default());
    let config = base_config(work.path(), echo.clone())
        .renderer(renderer.clone())
        .build()
        .unwrap();

    let request = EbookRequest::new(&input)
        .title("Field Notes")
        .author("Ana Souza");
    let output = convert(&request, &config).await.unwrap();

    assert_eq!(echo.calls(), 1);
    let md = &output.document.markdown;
    assert!(md.starts_with("---\ntitle: \"Field Notes\"\nauthor: \"Ana Souza\"\n"), "{md}");
    assert!(md.contains("language: \"pt-BR\""));
    assert_eq!(body_of(md).trim_end(), text);

    let stats = &output.document.stats;
    assert_eq!(stats.chunk_count, 1);
    assert_eq!(stats.remote_calls, 1);
    assert!(!stats.consistency_applied);
    assert_eq!(stats.input_words, 500);
    assert_eq!(stats.output_words, 500);

    // single part: no part/combined artefacts
    let temp = work.path().join("temp");
    assert!(temp.join("field_notes_formatted.md").exists());
    assert!(!temp.join("field_notes_part_1.txt").exists());
    assert!(!temp.join("field_notes_combined_raw.txt").exists());

    assert_eq!(
        output.ebook_path,
        work.path().join("output/epub/field_notes.epub")
    );
    let jobs = renderer.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].format, OutputFormat::Epub);
    assert_eq!(jobs[0].metadata.author, "Ana Souza");
}

#[tokio::test]
async fn title_falls_back_to_first_short_line() {
    let work = tempfile::tempdir().unwrap();
    let text = format!("Diário de Bordo\n\n{}", document(3, 40));
    let input = write_input(work.path(), "raw_log.md", &text);
    let config = base_config(work.path(), EchoTransformer::new())
        .default_author("Equipe")
        .build()
        .unwrap();

    let doc = format_markdown(&EbookRequest::new(&input), &config)
        .await
        .unwrap();

    assert_eq!(doc.metadata.title, "Diário de Bordo");
    assert_eq!(doc.metadata.author, "Equipe");
    assert!(doc
        .markdown_path
        .ends_with("temp/diário_de_bordo_formatted.md"));
    assert!(work
        .path()
        .join("content/formatted/diário_de_bordo_formatted.md")
        .exists());
}

// ── Multi-part documents ─────────────────────────────────────────────────────

#[test]
fn long_markdown_is_split_into_bounded_parts() {
    // 250 paragraphs × 80 words = 20 000 words
    let text = document(250, 80);
    let plan = ChunkPlan::default();
    let (target, budget) = plan.budget(20_000);
    assert_eq!(target, 12);

    let chunks = plan_chunks(&text, &plan).unwrap();
    assert!(chunks.len() >= 12, "got {} chunks", chunks.len());
    for chunk in &chunks {
        assert!(
            chunk.word_count() <= budget + 80,
            "part {} has {} words (budget {budget})",
            chunk.index,
            chunk.word_count()
        );
    }
    let rebuilt: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(rebuilt.join("\n\n"), text);
}

#[tokio::test]
async fn long_document_formats_every_part_and_runs_consistency() {
    let work = tempfile::tempdir().unwrap();
    let text = document(250, 80);
    let input = write_input(work.path(), "livro.md", &text);
    let echo = EchoTransformer::new();
    let config = base_config(work.path(), echo.clone()).build().unwrap();

    let doc = format_markdown(&EbookRequest::new(&input).title("Livro"), &config)
        .await
        .unwrap();

    let parts = doc.stats.chunk_count;
    assert!(parts >= 12);
    // one call per part plus the consistency pass
    assert_eq!(echo.calls(), parts + 1);
    assert_eq!(doc.stats.remote_calls as usize, parts);
    assert!(doc.stats.consistency_applied);
    assert_eq!(doc.stats.output_words, 20_000);

    let requests = echo.requests.lock().unwrap();
    assert!(requests[0].user_prompt.contains(&format!("part 1 of {parts}")));
    assert!(requests[parts - 1]
        .system_prompt
        .contains(&format!("This is part {parts} of {parts}.")));
    assert!(is_consistency(&requests[parts]));
}

#[tokio::test]
async fn multi_part_run_writes_every_artifact() {
    let work = tempfile::tempdir().unwrap();
    let text = document(3, 30);
    let input = write_input(work.path(), "short.txt", &text);
    let config = base_config(work.path(), EchoTransformer::new())
        .chunk_threshold_words(20)
        .min_chunks(3)
        .build()
        .unwrap();

    let doc = format_markdown(&EbookRequest::new(&input).title("Short"), &config)
        .await
        .unwrap();
    assert_eq!(doc.stats.chunk_count, 3);

    let temp = work.path().join("temp");
    for suffix in [
        "part_1.txt",
        "part_2.txt",
        "part_3.txt",
        "combined_raw.txt",
        "pre_consistency.txt",
        "post_consistency.txt",
        "formatted.md",
        "formatted_backup.txt",
    ] {
        let path = temp.join(format!("short_{suffix}"));
        assert!(path.exists(), "missing {}", path.display());
    }
    let part_2 = std::fs::read_to_string(temp.join("short_part_2.txt")).unwrap();
    assert_eq!(part_2, paragraph(30, 1));
    let backup = std::fs::read_to_string(temp.join("short_formatted_backup.txt")).unwrap();
    assert_eq!(backup, doc.markdown);
}

#[tokio::test]
async fn failed_consistency_keeps_combined_text() {
    let work = tempfile::tempdir().unwrap();
    let text = document(3, 30);
    let input = write_input(work.path(), "short.txt", &text);
    let echo = EchoTransformer::failing_consistency();
    let config = base_config(work.path(), echo.clone())
        .chunk_threshold_words(20)
        .min_chunks(3)
        .build()
        .unwrap();

    let doc = format_markdown(&EbookRequest::new(&input).title("Short"), &config)
        .await
        .unwrap();

    assert!(!doc.stats.consistency_applied);
    assert_eq!(echo.calls(), 4);
    let combined =
        std::fs::read_to_string(work.path().join("temp/short_combined_raw.txt")).unwrap();
    assert_eq!(body_of(&doc.markdown).trim_end(), combined);
    assert_eq!(combined, text);
    assert!(!work.path().join("temp/short_post_consistency.txt").exists());
}

#[tokio::test]
async fn truncated_consistency_reply_keeps_the_whole_book() {
    let work = tempfile::tempdir().unwrap();
    let text = document(250, 80);
    let input = write_input(work.path(), "livro.md", &text);
    let echo = EchoTransformer::with_consistency(ConsistencyReply::Truncated);
    let config = base_config(work.path(), echo.clone()).build().unwrap();

    let doc = format_markdown(&EbookRequest::new(&input).title("Livro"), &config)
        .await
        .unwrap();

    assert!(!doc.stats.consistency_applied);
    assert_eq!(doc.stats.output_words, 20_000);
    assert_eq!(body_of(&doc.markdown).trim_end(), text);
    assert!(!work.path().join("temp/livro_post_consistency.txt").exists());
}

#[tokio::test]
async fn consistency_pass_can_be_disabled() {
    let work = tempfile::tempdir().unwrap();
    let input = write_input(work.path(), "short.txt", &document(3, 30));
    let echo = EchoTransformer::new();
    let config = base_config(work.path(), echo.clone())
        .chunk_threshold_words(20)
        .min_chunks(3)
        .consistency_pass(false)
        .build()
        .unwrap();

    let doc = format_markdown(&EbookRequest::new(&input).title("Short"), &config)
        .await
        .unwrap();

    assert_eq!(echo.calls(), 3);
    assert!(!doc.stats.consistency_applied);
    assert!(!work.path().join("temp/short_pre_consistency.txt").exists());
}

#[tokio::test(start_paused = true)]
async fn parts_are_spaced_by_the_inter_chunk_delay() {
    let work = tempfile::tempdir().unwrap();
    let input = write_input(work.path(), "short.txt", &document(3, 30));
    let config = base_config(work.path(), EchoTransformer::new())
        .chunk_threshold_words(20)
        .min_chunks(3)
        .inter_chunk_delay(Duration::from_secs(2))
        .consistency_pass(false)
        .build()
        .unwrap();

    let start = tokio::time::Instant::now();
    let doc = format_markdown(&EbookRequest::new(&input).title("Short"), &config)
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(doc.stats.chunk_count, 3);
    // a pause before parts 2 and 3, none before the first
    assert!(elapsed >= Duration::from_secs(4), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(6), "elapsed {elapsed:?}");
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_responses_exhaust_retries_and_abort() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let work = tempfile::tempdir().unwrap();
    let input = write_input(work.path(), "notes.txt", &document(2, 50));
    let silent = Arc::new(SilentTransformer {
        calls: Mutex::new(0),
    });
    let config = base_config(work.path(), silent.clone()).build().unwrap();

    let err = format_markdown(&EbookRequest::new(&input).title("Notes"), &config)
        .await
        .unwrap_err();

    match err {
        EbookError::Formatting(FormattingError::RemoteCallExhausted {
            part, attempts, ..
        }) => {
            assert_eq!(part, 1);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(*silent.calls.lock().unwrap(), 3);

    let log = logs.contents();
    for attempt in 1..=3 {
        assert!(
            log.contains(&format!("attempt {attempt}/3 failed")),
            "missing attempt {attempt} in:\n{log}"
        );
    }
    assert!(log.contains("giving up after 3 attempts"), "{log}");
    assert!(!work.path().join("temp/notes_formatted.md").exists());
}

#[tokio::test]
async fn missing_converter_keeps_formatted_markdown() {
    let work = tempfile::tempdir().unwrap();
    let input = write_input(work.path(), "notes.txt", &document(2, 50));
    let config = base_config(work.path(), EchoTransformer::new())
        .pandoc_path("/nonexistent/bin/pandoc-not-installed")
        .build()
        .unwrap();

    let request = EbookRequest::new(&input).title("Missing Converter");
    let err = convert(&request, &config).await.unwrap_err();

    assert!(
        matches!(err, EbookError::Render(RenderError::ConverterMissing { .. })),
        "unexpected error: {err}"
    );
    assert!(work
        .path()
        .join("temp/missing_converter_formatted.md")
        .exists());
}

#[tokio::test]
async fn unsupported_input_fails_before_any_call() {
    let work = tempfile::tempdir().unwrap();
    let input = write_input(work.path(), "slides.odt", "not really");
    let echo = EchoTransformer::new();
    let config = base_config(work.path(), echo.clone()).build().unwrap();

    let err = convert(&EbookRequest::new(&input), &config)
        .await
        .unwrap_err();

    assert!(matches!(err, EbookError::Extraction(_)), "{err}");
    assert_eq!(echo.calls(), 0);
}

#[tokio::test]
async fn invalid_heading_pattern_is_a_config_error() {
    let work = tempfile::tempdir().unwrap();
    let result = base_config(work.path(), EchoTransformer::new())
        .heading_pattern("(unclosed")
        .build();
    assert!(matches!(result, Err(EbookError::InvalidConfig(_))));
}

// ── Output placement ─────────────────────────────────────────────────────────

#[tokio::test]
async fn relative_output_name_lands_under_format_dir() {
    let work = tempfile::tempdir().unwrap();
    let input = write_input(work.path(), "notes.txt", &document(2, 50));
    let renderer = Arc::new(RecordingRenderer::default());
    let config = base_config(work.path(), EchoTransformer::new())
        .renderer(renderer.clone())
        .build()
        .unwrap();

    let request = EbookRequest::new(&input)
        .title("Notes")
        .format(OutputFormat::Pdf)
        .output_file("some/dir/final.pdf");
    let output = convert(&request, &config).await.unwrap();

    assert_eq!(output.ebook_path, work.path().join("output/pdf/final.pdf"));
    assert!(output.ebook_path.exists());
    let jobs = renderer.jobs.lock().unwrap();
    assert!(jobs[0].cover_image.is_none());
}

#[tokio::test]
async fn epub_job_carries_existing_cover() {
    let work = tempfile::tempdir().unwrap();
    std::fs::write(work.path().join("cover.jpg"), b"jpeg").unwrap();
    let input = write_input(work.path(), "notes.txt", &document(2, 50));
    let renderer = Arc::new(RecordingRenderer::default());
    let config = base_config(work.path(), EchoTransformer::new())
        .renderer(renderer.clone())
        .cover_image("cover.jpg")
        .build()
        .unwrap();

    convert(&EbookRequest::new(&input).title("Notes"), &config)
        .await
        .unwrap();

    let jobs = renderer.jobs.lock().unwrap();
    assert_eq!(
        jobs[0].cover_image.as_deref(),
        Some(work.path().join("cover.jpg").as_path())
    );
}

//! CLI binary for edgequake-ebook.
//!
//! A thin shim over the library crate: maps flags and `config.yaml` to a
//! `FormatterConfig`, wires logging and the progress bar, and turns the
//! outcome into an exit code.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_ebook::{
    convert, ConversionProgressCallback, EbookOutput, EbookRequest, FormatterConfig,
    OutputFormat, ProgressCallback, Settings,
};
use edgequake_ebook::workspace::copy_into;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while extracting, then one bar tick per part, one log line per
/// event above the bar.
struct CliProgressCallback {
    bar: ProgressBar,
    part_started: Mutex<Option<Instant>>,
    retries: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            part_started: Mutex::new(None),
            retries: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} parts  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Formatting");
    }

    fn elapsed_secs(&self) -> f64 {
        self.part_started
            .lock()
            .map(|g| g.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0))
            .unwrap_or(0.0)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_parts: usize) {
        self.activate_bar(total_parts);
        let what = if total_parts == 1 {
            "Formatting document in a single part…".to_string()
        } else {
            format!("Formatting document in {total_parts} parts…")
        };
        self.bar.println(format!("{} {}", cyan("◆"), bold(&what)));
    }

    fn on_part_start(&self, part: usize, _total_parts: usize) {
        if let Ok(mut started) = self.part_started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.set_message(format!("part {part}"));
    }

    fn on_part_retry(&self, part: usize, attempt: u32, error: &str) {
        self.retries.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Part {:>3}  attempt {} failed: {}",
            yellow("↻"),
            part,
            attempt,
            dim(error),
        ));
    }

    fn on_part_complete(&self, part: usize, total_parts: usize, markdown_len: usize) {
        self.bar.println(format!(
            "  {} Part {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            part,
            total_parts,
            dim(&format!("{markdown_len:>6} chars")),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_part_error(&self, part: usize, total_parts: usize, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Part {:>3}/{:<3}  {}",
            red("✗"),
            part,
            total_parts,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_consistency_start(&self) {
        self.bar.set_prefix("Unifying");
        self.bar.set_message("consistency pass");
    }

    fn on_consistency_complete(&self, revised: bool) {
        let line = if revised {
            format!("  {} Consistency pass applied", green("✓"))
        } else {
            format!("  {} Consistency pass skipped, keeping combined text", yellow("⚠"))
        };
        self.bar.println(line);
    }

    fn on_render_start(&self, format: &str) {
        self.bar.set_prefix("Rendering");
        self.bar.set_message(format!("pandoc → {format}"));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # DOCX to EPUB (default format)
  ebookfmt manuscript.docx

  # Plain text to PDF with explicit metadata
  ebookfmt notes.txt -f pdf -t "Field Notes" -a "Ana Souza"

  # Custom chapter detection for chunking and heading hints
  ebookfmt book.md -p "^Capítulo [0-9]+" -o /tmp/book.epub

  # Another provider through edgequake-llm
  ebookfmt book.docx --provider openai --model gpt-4.1-mini

FILES (relative to --work-dir):
  config.yaml            ebook / ai / formatting defaults (created if missing)
  temp/                  per-part output, pre/post consistency snapshots,
                         <slug>_formatted.md
  content/formatted/     copy of every final Markdown file
  output/<format>/       rendered ebooks
  styles/ templates/     pandoc CSS and HTML template (created if missing)
  logs/                  one log file per run

  The finished ebook is also copied into the current directory
  (disable with --no-copy).

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY      Anthropic API key (prompted for if missing)
  EBOOKFMT_PROVIDER      Provider other than anthropic (openai, gemini, ollama, …)
  EBOOKFMT_MODEL         Model ID override
  RUST_LOG               Override the stderr log filter

REQUIREMENTS:
  pandoc must be on PATH for rendering (https://pandoc.org/installing.html).
  PDF output also needs wkhtmltopdf or weasyprint.
"#;

/// Turn DOCX/TXT/MD documents into formatted ebooks using an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "ebookfmt",
    version,
    about = "Turn DOCX/TXT/MD documents into formatted ebooks (EPUB, PDF, HTML)",
    long_about = "Extract the text of a document, let a language model apply Markdown structure \
without changing a word, and render the result with pandoc. Long documents are split into \
parts at paragraph and chapter boundaries and reassembled afterwards.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Source document (.docx, .txt or .md).
    input: PathBuf,

    /// Ebook format.
    #[arg(short = 'f', long, value_enum, default_value = "epub")]
    output_format: FormatArg,

    /// Output file. Relative names are placed under output/<format>/.
    #[arg(short = 'o', long)]
    output_file: Option<PathBuf>,

    /// Ebook title. Defaults to the first short line or the file name.
    #[arg(short = 't', long)]
    title: Option<String>,

    /// Ebook author. Defaults to ebook.author in config.yaml.
    #[arg(short = 'a', long)]
    author: Option<String>,

    /// Regular expression that marks chapter/section headings.
    #[arg(short = 'p', long)]
    headings_pattern: Option<String>,

    /// Settings file, relative to --work-dir unless absolute.
    #[arg(long, env = "EBOOKFMT_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Root of temp/, output/, content/, styles/, templates/ and logs/.
    #[arg(long, env = "EBOOKFMT_WORK_DIR", default_value = ".")]
    work_dir: PathBuf,

    /// LLM provider: anthropic (default), openai, gemini, ollama, azure, …
    #[arg(long, env = "EBOOKFMT_PROVIDER")]
    provider: Option<String>,

    /// Model ID. Defaults to ai.model in config.yaml.
    #[arg(long, env = "EBOOKFMT_MODEL")]
    model: Option<String>,

    /// Anthropic API key.
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Skip the consistency pass on multi-part documents.
    #[arg(long)]
    no_consistency: bool,

    /// Do not copy the finished ebook into the current directory.
    #[arg(long)]
    no_copy: bool,

    /// Disable progress bar.
    #[arg(long, env = "EBOOKFMT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level logs on stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Epub,
    Pdf,
    Html,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Epub => OutputFormat::Epub,
            FormatArg::Pdf => OutputFormat::Pdf,
            FormatArg::Html => OutputFormat::Html,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar gives all the feedback that matters, so stderr only
    // carries errors while it is active. The log file always gets DEBUG.
    let show_progress = !cli.quiet && !cli.no_progress;
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    let log_path = match init_logging(&cli.work_dir, level) {
        Ok(path) => Some(path),
        Err(e) => {
            eprintln!("{} could not open log file: {e:#}", yellow("⚠"));
            None
        }
    };

    // Ask for the key before the spinner takes over the terminal.
    let settings = load_settings(&cli);
    let api_key = match resolve_api_key(&cli, &settings) {
        Ok(key) => key,
        Err(e) => {
            eprintln!("{} {e:#}", red("✘"));
            return ExitCode::FAILURE;
        }
    };

    let progress = if show_progress {
        Some(CliProgressCallback::new())
    } else {
        None
    };

    let started = Instant::now();
    let result = run(
        &cli,
        &settings,
        api_key,
        progress.clone().map(|p| p as ProgressCallback),
    )
    .await;
    if let Some(ref p) = progress {
        p.finish();
    }

    match result {
        Ok(output) => {
            if !cli.quiet {
                print_summary(&output, started, progress.as_deref());
            }
            if !cli.no_copy {
                copy_to_current_dir(&output.ebook_path, cli.quiet).await;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            eprintln!("{} {e:#}", red("✘"));
            if let Some(path) = log_path {
                eprintln!("  {}", dim(&format!("details: {}", path.display())));
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(
    cli: &Cli,
    settings: &Settings,
    api_key: Option<String>,
    progress: Option<ProgressCallback>,
) -> Result<EbookOutput> {
    let config = build_config(cli, settings, api_key, progress)?;

    let mut request = EbookRequest::new(&cli.input).format(cli.output_format.into());
    if let Some(ref path) = cli.output_file {
        request = request.output_file(path);
    }
    if let Some(ref title) = cli.title {
        request = request.title(title);
    }
    if let Some(ref author) = cli.author {
        request = request.author(author);
    }

    let output = convert(&request, &config)
        .await
        .context("Conversion failed")?;
    Ok(output)
}

fn load_settings(cli: &Cli) -> Settings {
    let path = if cli.config.is_absolute() {
        cli.config.clone()
    } else {
        cli.work_dir.join(&cli.config)
    };
    Settings::load_or_default(&path)
}

/// The Anthropic key from flag/env, else one stdin prompt. `None` when
/// another provider is selected.
fn resolve_api_key(cli: &Cli, settings: &Settings) -> Result<Option<String>> {
    let uses_anthropic = cli
        .provider
        .as_deref()
        .or(settings.ai.provider.as_deref())
        .map_or(true, |p| p == "anthropic");
    if !uses_anthropic {
        return Ok(None);
    }
    match cli.api_key.as_deref().map(str::trim) {
        Some(k) if !k.is_empty() => Ok(Some(k.to_string())),
        _ => prompt_api_key().map(Some),
    }
}

/// Map `config.yaml` and CLI args to `FormatterConfig`. Flags win.
fn build_config(
    cli: &Cli,
    settings: &Settings,
    api_key: Option<String>,
    progress: Option<ProgressCallback>,
) -> Result<FormatterConfig> {
    let mut builder = FormatterConfig::from_settings(settings)
        .work_dir(&cli.work_dir)
        .consistency_pass(!cli.no_consistency);
    if let Some(ref pattern) = cli.headings_pattern {
        builder = builder.heading_pattern(pattern.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    if let Some(key) = api_key {
        builder = builder.api_key(key);
    }

    Ok(builder.build()?)
}

/// Ask once on stdin. The key only lives in the config for this process.
fn prompt_api_key() -> Result<String> {
    eprint!("{} ", bold("ANTHROPIC_API_KEY not set. Enter your API key:"));
    io::stderr().flush().ok();
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read API key from stdin")?;
    let key = line.trim().to_string();
    if key.is_empty() {
        anyhow::bail!("An Anthropic API key is required");
    }
    Ok(key)
}

/// stderr at `level` (overridable through RUST_LOG), plus a DEBUG plain-text
/// file under `<work>/logs/`.
fn init_logging(work_dir: &Path, level: &str) -> Result<PathBuf> {
    let logs_dir = work_dir.join("logs");
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create {:?}", logs_dir))?;
    let path = logs_dir.join(format!(
        "ebookfmt_{}.log",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ));
    let file = std::fs::File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;

    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_filter(stderr_filter),
        )
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(EnvFilter::new("debug")),
        )
        .init();
    Ok(path)
}

/// Best effort: a failed copy is reported but never fails the run.
async fn copy_to_current_dir(ebook: &Path, quiet: bool) {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            warn!("Could not determine the current directory: {e}");
            return;
        }
    };
    match copy_into(ebook, &cwd).await {
        Ok(copy) if !quiet => {
            eprintln!("   {}", dim(&format!("copy: {}", copy.display())));
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Could not copy the ebook to {}: {e}", cwd.display());
            if !quiet {
                eprintln!("{} could not copy the ebook here: {e}", yellow("⚠"));
            }
        }
    }
}

fn print_summary(output: &EbookOutput, started: Instant, progress: Option<&CliProgressCallback>) {
    let stats = &output.document.stats;
    eprintln!(
        "{}  {}  →  {}",
        green("✔"),
        bold(&output.document.metadata.title),
        bold(&output.ebook_path.display().to_string()),
    );
    let retries = progress
        .map(|p| p.retries.load(Ordering::SeqCst))
        .unwrap_or(0);
    eprintln!(
        "   {} parts  /  {} remote calls{}  /  {} → {} words  /  {:.1}s",
        stats.chunk_count,
        stats.remote_calls,
        if retries > 0 {
            format!(" ({retries} retries)")
        } else {
            String::new()
        },
        dim(&stats.input_words.to_string()),
        dim(&stats.output_words.to_string()),
        started.elapsed().as_secs_f64(),
    );
    eprintln!(
        "   {}",
        dim(&format!("markdown: {}", output.document.markdown_path.display()))
    );
}

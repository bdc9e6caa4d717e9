//! Final rendering: Markdown → EPUB / PDF / HTML through an external converter.
//!
//! The pipeline only knows the [`DocumentRenderer`] trait. Production uses
//! [`PandocRenderer`], which shells out to `pandoc` via `tokio::process` and
//! makes at most two attempts per job:
//!
//! | Format | First attempt                          | Fallback                         |
//! |--------|----------------------------------------|----------------------------------|
//! | EPUB   | `--css`, optional cover                | none                             |
//! | PDF    | `--pdf-engine=wkhtmltopdf`             | `--pdf-engine=weasyprint`        |
//! | HTML   | custom template, embedded resources    | plain `--standalone`             |
//!
//! A missing `pandoc` binary short-circuits to
//! [`RenderError::ConverterMissing`]; there is nothing to fall back to.

use crate::config::OutputFormat;
use crate::document::DocumentMetadata;
use crate::error::RenderError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything a renderer needs for one ebook.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub markdown_path: PathBuf,
    pub output_path: PathBuf,
    pub format: OutputFormat,
    pub metadata: DocumentMetadata,
    /// Existing cover image (EPUB only).
    pub cover_image: Option<PathBuf>,
}

/// Turns a Markdown file into the requested ebook format.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, job: &RenderJob) -> Result<(), RenderError>;
}

/// [`DocumentRenderer`] backed by the `pandoc` executable.
#[derive(Debug, Clone)]
pub struct PandocRenderer {
    program: String,
    styles_dir: PathBuf,
    templates_dir: PathBuf,
}

enum RunFailure {
    Missing,
    Failed(String),
}

impl PandocRenderer {
    /// `styles_dir` / `templates_dir` receive the default CSS and HTML
    /// template the first time they are needed. Existing files are never
    /// overwritten, so users can edit them.
    pub fn new(
        program: impl Into<String>,
        styles_dir: impl Into<PathBuf>,
        templates_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            styles_dir: styles_dir.into(),
            templates_dir: templates_dir.into(),
        }
    }

    /// Argument lists to try in order for `job`, given the prepared assets.
    fn attempts(&self, job: &RenderJob, css: &Path, template: Option<&Path>) -> Vec<Vec<String>> {
        let meta = &job.metadata;
        let author = if meta.author.trim().is_empty() {
            "Autor"
        } else {
            meta.author.as_str()
        };
        let io = |writer: &str| -> Vec<String> {
            vec![
                job.markdown_path.display().to_string(),
                "-f".into(),
                "markdown".into(),
                "-t".into(),
                writer.into(),
                "-o".into(),
                job.output_path.display().to_string(),
            ]
        };
        let common = vec![
            "--toc".to_string(),
            "--toc-depth=3".to_string(),
            format!("--css={}", css.display()),
            format!("--metadata=title:{}", meta.title),
            format!("--metadata=author:{}", author),
            format!("--metadata=lang:{}", meta.language),
        ];

        match job.format {
            OutputFormat::Epub => {
                let mut args = io("epub3");
                args.extend(common);
                if let Some(ref cover) = job.cover_image {
                    args.push(format!("--epub-cover-image={}", cover.display()));
                }
                vec![args]
            }
            OutputFormat::Pdf => ["wkhtmltopdf", "weasyprint"]
                .iter()
                .map(|engine| {
                    let mut args = io("html5");
                    args.extend(common.iter().cloned());
                    args.push(format!("--pdf-engine={}", engine));
                    args
                })
                .collect(),
            OutputFormat::Html => {
                let mut primary = io("html5");
                primary.push("--standalone".into());
                primary.push("--embed-resources".into());
                if let Some(t) = template {
                    primary.push(format!("--template={}", t.display()));
                }
                primary.extend(common);

                let mut simple = io("html5");
                simple.extend([
                    "--toc".to_string(),
                    "--standalone".to_string(),
                    "--embed-resources".to_string(),
                    format!("--metadata=title:{}", meta.title),
                ]);
                vec![primary, simple]
            }
        }
    }

    async fn run(&self, args: &[String]) -> Result<(), RunFailure> {
        debug!("{} {}", self.program, args.join(" "));
        let output = tokio::process::Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => RunFailure::Missing,
                _ => RunFailure::Failed(e.to_string()),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(RunFailure::Failed(if stderr.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                stderr
            }))
        }
    }
}

#[async_trait]
impl DocumentRenderer for PandocRenderer {
    async fn render(&self, job: &RenderJob) -> Result<(), RenderError> {
        info!("Rendering {} → {}", job.format, job.output_path.display());

        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RenderError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let css = self.styles_dir.join(format!("{}.css", job.format));
        ensure_asset(&css, default_css(job.format)).await?;
        let template = match job.format {
            OutputFormat::Html => {
                let t = self.templates_dir.join("html.template");
                ensure_asset(&t, DEFAULT_HTML_TEMPLATE).await?;
                Some(t)
            }
            _ => None,
        };

        let mut failures: Vec<String> = Vec::new();
        for (i, args) in self.attempts(job, &css, template.as_deref()).iter().enumerate() {
            if i > 0 {
                warn!("Retrying {} with fallback options", job.format);
            }
            match self.run(args).await {
                Ok(()) => {
                    info!("{} written: {}", job.format, job.output_path.display());
                    return Ok(());
                }
                Err(RunFailure::Missing) => {
                    return Err(RenderError::ConverterMissing {
                        program: self.program.clone(),
                    })
                }
                Err(RunFailure::Failed(detail)) => {
                    warn!("{} attempt {} failed: {}", job.format, i + 1, detail);
                    failures.push(detail);
                }
            }
        }

        Err(RenderError::ConversionFailed {
            format: job.format.to_string(),
            detail: failures.join(" | "),
        })
    }
}

async fn ensure_asset(path: &Path, contents: &str) -> Result<(), RenderError> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }
    let io_err = |e: std::io::Error| RenderError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(path, contents).await.map_err(io_err)?;
    debug!("Default asset written: {}", path.display());
    Ok(())
}

// ── Default assets ───────────────────────────────────────────────────────

fn default_css(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Epub => DEFAULT_EPUB_CSS,
        OutputFormat::Pdf => DEFAULT_PDF_CSS,
        OutputFormat::Html => DEFAULT_HTML_CSS,
    }
}

const DEFAULT_EPUB_CSS: &str = r#"body {
  font-family: Georgia, "Times New Roman", serif;
  line-height: 1.5;
  margin: 0 5%;
  text-align: justify;
}
h1, h2, h3, h4 {
  font-family: "Helvetica Neue", Arial, sans-serif;
  line-height: 1.2;
  text-align: left;
  page-break-after: avoid;
}
h1 { font-size: 1.8em; margin: 1.5em 0 1em; page-break-before: always; }
h2 { font-size: 1.4em; margin: 1.2em 0 0.6em; }
h3 { font-size: 1.15em; margin: 1em 0 0.5em; }
p { margin: 0 0 0.8em; }
blockquote { margin: 1em 2em; font-style: italic; color: #555; }
pre, code { font-family: "Courier New", monospace; font-size: 0.9em; }
pre { background: #f5f5f5; padding: 0.8em; white-space: pre-wrap; }
table { border-collapse: collapse; width: 100%; margin: 1em 0; }
th, td { border: 1px solid #ccc; padding: 0.4em; }
th { background: #eee; }
"#;

const DEFAULT_PDF_CSS: &str = r#"@page { size: A4; margin: 2.5cm 2cm; }
body {
  font-family: Georgia, "Times New Roman", serif;
  font-size: 11pt;
  line-height: 1.5;
  text-align: justify;
}
h1, h2, h3, h4 { font-family: "Helvetica Neue", Arial, sans-serif; page-break-after: avoid; }
h1 { font-size: 22pt; page-break-before: always; }
h2 { font-size: 16pt; }
h3 { font-size: 13pt; }
pre, code { font-family: "Courier New", monospace; font-size: 9pt; }
pre { background: #f5f5f5; padding: 8pt; white-space: pre-wrap; page-break-inside: avoid; }
table { border-collapse: collapse; width: 100%; page-break-inside: avoid; }
th, td { border: 1px solid #ccc; padding: 4pt; }
#TOC { page-break-after: always; }
"#;

const DEFAULT_HTML_CSS: &str = r#":root {
  --primary-color: #3A86FF;
  --secondary-color: #FF006E;
  --text-color: #333333;
  --code-bg: #f8f8f8;
  --border-color: #eee;
  --toc-bg: #f5f5f5;
}
body {
  max-width: 46em;
  margin: 0 auto;
  padding: 2em 1em;
  font-family: Georgia, "Times New Roman", serif;
  line-height: 1.6;
  color: var(--text-color);
}
h1, h2, h3 { color: var(--primary-color); font-family: "Helvetica Neue", Arial, sans-serif; }
h1, h2 { border-bottom: 1px solid var(--border-color); padding-bottom: 0.3em; }
pre, code { background-color: var(--code-bg); font-family: "Courier New", monospace; }
pre { padding: 1em; overflow-x: auto; }
blockquote { border-left: 4px solid var(--secondary-color); margin: 1em 0; padding-left: 1em; }
table { border-collapse: collapse; width: 100%; }
th, td { border: 1px solid var(--border-color); padding: 0.5em; }
#TOC { background-color: var(--toc-bg); padding: 1em 2em; margin-bottom: 2em; }
"#;

const DEFAULT_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" lang="$lang$" xml:lang="$lang$"$if(dir)$ dir="$dir$"$endif$>
<head>
  <meta charset="utf-8" />
  <meta name="generator" content="pandoc" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0, user-scalable=yes" />
$for(author-meta)$
  <meta name="author" content="$author-meta$" />
$endfor$
  <title>$pagetitle$</title>
  <style>
    $styles.html()$
  </style>
$for(css)$
  <link rel="stylesheet" href="$css$" />
$endfor$
</head>
<body>
$if(title)$
<header id="title-block-header">
<h1 class="title">$title$</h1>
$for(author)$
<p class="author">$author$</p>
$endfor$
</header>
$endif$
$if(toc)$
<nav id="$idprefix$TOC" role="doc-toc">
$table-of-contents$
</nav>
$endif$
$body$
</body>
</html>
"#;

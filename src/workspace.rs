//! On-disk layout of a run.
//!
//! ```text
//! <work>/
//!   temp/                 scratch artefacts, kept for diagnosis
//!   content/formatted/    copy of every final Markdown file
//!   output/<format>/      rendered ebooks
//!   styles/ templates/    converter assets (see pipeline::render)
//!   logs/                 per-run log files (CLI)
//! ```

use crate::config::OutputFormat;
use crate::error::EbookError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

static NON_SLUG_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());

/// File-name stem derived from a title: characters outside `[\w\s-]` are
/// dropped, spaces become `_`, and the result is lower-cased.
pub fn slugify(title: &str) -> String {
    let slug = NON_SLUG_CHARS
        .replace_all(title, "")
        .replace(' ', "_")
        .to_lowercase();
    if slug.trim().is_empty() {
        "document".to_string()
    } else {
        slug
    }
}

/// Paths under one working directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn formatted_dir(&self) -> PathBuf {
        self.root.join("content").join("formatted")
    }

    pub fn output_dir(&self, format: OutputFormat) -> PathBuf {
        self.root.join("output").join(format.as_str())
    }

    pub fn styles_dir(&self) -> PathBuf {
        self.root.join("styles")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// `temp/<slug>_<suffix>`.
    pub fn artifact_path(&self, slug: &str, suffix: &str) -> PathBuf {
        self.temp_dir().join(format!("{}_{}", slug, suffix))
    }

    /// Where the ebook goes.
    ///
    /// An absolute explicit path is used as-is. A relative one keeps only its
    /// file name and lands in `output/<format>/`. Without one the slug names
    /// the file.
    pub fn resolve_output_path(
        &self,
        explicit: Option<&Path>,
        slug: &str,
        format: OutputFormat,
    ) -> PathBuf {
        match explicit {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => match p.file_name() {
                Some(name) => self.output_dir(format).join(name),
                None => self.output_dir(format).join(format!("{}.{}", slug, format)),
            },
            None => self.output_dir(format).join(format!("{}.{}", slug, format)),
        }
    }

    /// Write a scratch artefact to `temp/` and return its path.
    pub async fn write_artifact(
        &self,
        slug: &str,
        suffix: &str,
        contents: &str,
    ) -> Result<PathBuf, EbookError> {
        let path = self.artifact_path(slug, suffix);
        write_atomic(&path, contents).await?;
        debug!("Saved {}", path.display());
        Ok(path)
    }
}

/// Write `contents` to `path` through a sibling temp file and a rename, so a
/// crash never leaves a half-written file behind. Parent directories are
/// created as needed.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), EbookError> {
    let write_err = |e: std::io::Error| EbookError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

/// Copy `file` into `dir` under the same name and return the copy's path.
/// A file already in `dir` is left alone.
pub async fn copy_into(file: &Path, dir: &Path) -> Result<PathBuf, EbookError> {
    let name = file.file_name().ok_or_else(|| {
        EbookError::Internal(format!("'{}' has no file name", file.display()))
    })?;
    let target = dir.join(name);
    let same = match (tokio::fs::canonicalize(file).await, tokio::fs::canonicalize(dir).await) {
        (Ok(f), Ok(d)) => f.parent() == Some(d.as_path()),
        _ => false,
    };
    if !same {
        tokio::fs::copy(file, &target)
            .await
            .map_err(|e| EbookError::OutputWriteFailed {
                path: target.clone(),
                source: e,
            })?;
    }
    Ok(target)
}

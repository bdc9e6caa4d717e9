//! Text extraction: turn a `.docx`, `.txt` or `.md` file into plain text.
//!
//! ## DOCX
//!
//! Two methods, tried in order:
//!
//! 1. **Container read** — open the ZIP, parse `word/document.xml`, one output
//!    line per `<w:p>` paragraph. Runs in `spawn_blocking` since `zip` is
//!    synchronous.
//! 2. **pandoc** — `pandoc -t plain --wrap=none`, for files the container
//!    reader cannot handle (strict OOXML, odd producers).
//!
//! ## Plain text
//!
//! UTF-8 first (a leading BOM is dropped), then each configured fallback
//! encoding in order. `latin-1` accepts every byte sequence, so the chain only
//! fails when the caller narrows it.

use crate::document::word_count;
use crate::error::ExtractionError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Options for [`extract_text_with`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub fallback_encodings: Vec<TextEncoding>,
    pub pandoc_path: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            fallback_encodings: TextEncoding::default_fallbacks(),
            pandoc_path: "pandoc".to_string(),
        }
    }
}

/// Extract text with default options.
pub async fn extract_text(path: &Path) -> Result<String, ExtractionError> {
    extract_text_with(path, &ExtractOptions::default()).await
}

/// Extract normalised text from `path`.
///
/// Fails with [`ExtractionError::EmptyContent`] when nothing but whitespace
/// comes out.
pub async fn extract_text_with(
    path: &Path,
    options: &ExtractOptions,
) -> Result<String, ExtractionError> {
    if !path.exists() {
        return Err(ExtractionError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let text = match extension.as_str() {
        "docx" => extract_docx(path, &options.pandoc_path).await?,
        "txt" | "md" => {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| ExtractionError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            decode_text(&bytes, &options.fallback_encodings).map_err(|tried| {
                ExtractionError::UndecodableEncoding {
                    path: path.to_path_buf(),
                    tried,
                }
            })?
        }
        other => {
            return Err(ExtractionError::UnsupportedFormat {
                extension: format!(".{}", other),
            })
        }
    };

    if text.trim().is_empty() {
        return Err(ExtractionError::EmptyContent {
            path: path.to_path_buf(),
        });
    }

    info!("Extracted {} words from {}", word_count(&text), path.display());
    Ok(text)
}

// ── DOCX ─────────────────────────────────────────────────────────────────

async fn extract_docx(path: &Path, pandoc: &str) -> Result<String, ExtractionError> {
    let owned: PathBuf = path.to_path_buf();
    let primary = tokio::task::spawn_blocking(move || read_docx_container(&owned))
        .await
        .unwrap_or_else(|e| Err(format!("extraction task panicked: {e}")));

    let primary_err = match primary {
        Ok(text) if !text.trim().is_empty() => {
            debug!("DOCX read from container: {}", path.display());
            return Ok(text);
        }
        Ok(_) => "document.xml contains no text".to_string(),
        Err(e) => e,
    };
    warn!(
        "Container read failed for {} ({}); trying pandoc",
        path.display(),
        primary_err
    );

    match docx_via_pandoc(path, pandoc).await {
        Ok(text) => Ok(text),
        Err(secondary_err) => Err(ExtractionError::NoMethodAvailable {
            path: path.to_path_buf(),
            detail: format!("container: {primary_err}; pandoc: {secondary_err}"),
        }),
    }
}

fn read_docx_container(path: &Path) -> Result<String, String> {
    let file = std::fs::File::open(path).map_err(|e| e.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| format!("not a DOCX archive: {e}"))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| format!("word/document.xml: {e}"))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| format!("word/document.xml: {e}"))?;
    Ok(document_xml_to_text(&xml))
}

async fn docx_via_pandoc(path: &Path, pandoc: &str) -> Result<String, String> {
    let output = tokio::process::Command::new(pandoc)
        .arg(path)
        .args(["-t", "plain", "--wrap=none"])
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => format!("'{pandoc}' not found"),
            _ => e.to_string(),
        })?;

    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

static RE_XML_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(/?)([A-Za-z][\w:.-]*)[^>]*?(/?)>|([^<]+)").unwrap());

/// Flatten WordprocessingML to text: one line per paragraph, runs joined,
/// `<w:tab/>` → tab, `<w:br/>`/`<w:cr/>` → newline. Tabs and breaks only
/// count inside a `<w:r>` run; `<w:tab>` in `<w:pPr><w:tabs>` is a tab-stop
/// definition, not content.
fn document_xml_to_text(xml: &str) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_run = false;
    let mut in_text = false;

    for caps in RE_XML_TOKEN.captures_iter(xml) {
        if let Some(text) = caps.get(4) {
            if in_text {
                current.push_str(&decode_entities(text.as_str()));
            }
            continue;
        }

        let closing = !caps[1].is_empty();
        let self_closing = !caps[3].is_empty();
        match &caps[2] {
            "w:p" if self_closing => paragraphs.push(String::new()),
            "w:p" if closing => {
                paragraphs.push(std::mem::take(&mut current));
                in_run = false;
            }
            "w:p" => current.clear(),
            "w:r" => in_run = !closing && !self_closing,
            "w:t" => in_text = !closing && !self_closing,
            "w:tab" if in_run && !closing => current.push('\t'),
            "w:br" | "w:cr" if in_run && !closing => current.push('\n'),
            _ => {}
        }
    }

    paragraphs.join("\n")
}

static RE_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#x[0-9A-Fa-f]+|#[0-9]+|amp|lt|gt|quot|apos);").unwrap());

fn decode_entities(s: &str) -> String {
    RE_ENTITY
        .replace_all(s, |caps: &Captures| {
            let name = &caps[1];
            let decoded = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ if name.starts_with("#x") => {
                    u32::from_str_radix(&name[2..], 16).ok().and_then(char::from_u32)
                }
                _ => name[1..].parse::<u32>().ok().and_then(char::from_u32),
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

// ── Plain text ───────────────────────────────────────────────────────────

/// Single-byte encodings tried after UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Latin1,
    Windows1252,
    Iso8859_1,
}

impl TextEncoding {
    /// `latin-1`, `windows-1252`, `iso-8859-1`.
    pub fn default_fallbacks() -> Vec<TextEncoding> {
        vec![
            TextEncoding::Latin1,
            TextEncoding::Windows1252,
            TextEncoding::Iso8859_1,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Latin1 => "latin-1",
            TextEncoding::Windows1252 => "windows-1252",
            TextEncoding::Iso8859_1 => "iso-8859-1",
        }
    }

    /// Decode `bytes`, or `None` if a byte has no mapping.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Latin1 | TextEncoding::Iso8859_1 => {
                Some(bytes.iter().map(|&b| b as char).collect())
            }
            TextEncoding::Windows1252 => bytes
                .iter()
                .map(|&b| match b {
                    0x80..=0x9F => WINDOWS_1252_HIGH[(b - 0x80) as usize],
                    _ => Some(b as char),
                })
                .collect(),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "latin-1" | "latin1" => Ok(TextEncoding::Latin1),
            "windows-1252" | "cp1252" => Ok(TextEncoding::Windows1252),
            "iso-8859-1" | "iso8859-1" => Ok(TextEncoding::Iso8859_1),
            other => Err(format!("Unknown encoding '{}'", other)),
        }
    }
}

/// 0x80–0x9F in Windows-1252. Five positions are unassigned.
const WINDOWS_1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), None,             Some('\u{201A}'), Some('\u{0192}'),
    Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
    Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
    Some('\u{0152}'), None,             Some('\u{017D}'), None,
    None,             Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
    Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
    Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
    Some('\u{0153}'), None,             Some('\u{017E}'), Some('\u{0178}'),
];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Decode as UTF-8, then each fallback in order. On failure returns the
/// comma-separated list of encodings tried.
pub fn decode_text(bytes: &[u8], fallbacks: &[TextEncoding]) -> Result<String, String> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if let Ok(s) = std::str::from_utf8(bytes) {
        return Ok(s.to_string());
    }

    for encoding in fallbacks {
        if let Some(s) = encoding.decode(bytes) {
            warn!("File is not UTF-8; decoded as {}", encoding);
            return Ok(s);
        }
        debug!("Decoding as {} failed", encoding);
    }

    let tried = std::iter::once("utf-8")
        .chain(fallbacks.iter().map(TextEncoding::name))
        .collect::<Vec<_>>()
        .join(", ");
    Err(tried)
}

//! Post-processing: deterministic cleanup of model-formatted Markdown.
//!
//! Models are told to return bare Markdown, yet they still wrap answers in
//! ```` ```markdown ```` fences, echo the `<document>` tags of the prompt, or
//! emit `\r\n`. These rules undo that. None of them adds, drops or rewrites a
//! word; they only touch fences, tags, whitespace and invisible characters.
//!
//! Rules run in a fixed order: fences and tags are stripped before line
//! endings are normalised, and blank-line collapsing runs after trailing
//! whitespace is gone so whitespace-only lines count as blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one formatted chunk. The result has no leading or trailing blank
/// lines, so chunks can be joined with `"\n\n"`.
pub fn clean_chunk(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = strip_document_tags(&s);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = normalise_heading_spacing(&s);
    let s = remove_invisible_chars(&s);
    s.trim_matches('\n').to_string()
}

/// Clean the reassembled body before the header is attached.
pub fn clean_body(input: &str) -> String {
    ensure_final_newline(&clean_chunk(input))
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Strip echoed <document> tags ─────────────────────────────────────

static RE_DOCUMENT_TAGS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*<document>\s*\n?(.*?)\n?\s*</document>\s*$").unwrap());

fn strip_document_tags(input: &str) -> String {
    if let Some(caps) = RE_DOCUMENT_TAGS.captures(input) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 3: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 6: Blank line before ATX headings ───────────────────────────────────

static RE_ATX_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s").unwrap());

/// Pandoc only recognises a heading after a blank line. Lines inside fenced
/// code blocks are left alone.
fn normalise_heading_spacing(input: &str) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(input.len() / 32 + 1);
    let mut in_code = false;
    for line in input.lines() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
        }
        let needs_gap = !in_code
            && RE_ATX_HEADING.is_match(line)
            && out.last().is_some_and(|prev| !prev.is_empty());
        if needs_gap {
            out.push("");
        }
        out.push(line);
    }
    out.join("\n")
}

// ── Rule 7: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 8: Ensure file ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

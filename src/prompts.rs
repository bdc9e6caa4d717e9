//! Prompts for the remote formatting and consistency calls.
//!
//! Everything the model is told lives here so prompt changes touch one file
//! and unit tests can inspect the exact text without a live model.
//!
//! Document content is always wrapped in `<document>` tags. The model is told
//! to return only the Markdown, never the tags.

use crate::document::{DocumentMetadata, FormattingContext};

/// Fixed rules for the per-chunk formatting call.
pub const FORMATTING_RULES: &str = r#"You are an expert ebook typesetter. Your ONLY task is to improve the visual formatting of a document by turning it into well-structured Markdown, without changing the original content in any way.

ABSOLUTE RULES:
1. Do NOT change ANY word of the original content
2. Do NOT remove ANY information, however detailed or technical
3. Do NOT simplify, summarise or condense ANYTHING
4. Do NOT add new content beyond Markdown formatting
5. Preserve ALL code samples, prompts and technical details EXACTLY as written
6. Preserve ALL lists, tables and structures, only improving their presentation

FOCUS EXCLUSIVELY ON:
- Correct Markdown syntax for the existing text
- Heading structure (# for the main title, ## for sections, ### for subsections)
- Readable tables
- Numbered and bulleted lists
- **bold** or *italic* for terms that are already emphasised
- Fenced code blocks with ```
- Consistent spacing between sections

The length and detail of the material are deliberate. The result must contain exactly the same content, only presented more legibly.

OUTPUT: return ONLY the formatted Markdown. No commentary, no <document> tags, no ```markdown fence around the whole answer."#;

/// Rules for the single normalisation call over the reassembled document.
pub const CONSISTENCY_RULES: &str = r#"You are an expert in document formatting and standardisation. Make the formatting of the following document consistent across headings, styles and structure.

TASKS:
1. Check that the heading hierarchy is consistent (# Title, ## Section, ### Subsection)
2. Standardise any formatting inconsistency
3. Remove any marker or artefact that reveals the document was split into parts
4. Do NOT change the content, only correct and unify the formatting
5. Keep all original information

OUTPUT: return ONLY the corrected Markdown, without explanations and without <document> tags."#;

/// System prompt for formatting one chunk.
///
/// Part position and the caller's heading pattern, when present, are spelled
/// out so the model can decide which heading levels to emit.
pub fn formatting_system_prompt(
    heading_pattern: Option<&str>,
    context: Option<&FormattingContext>,
) -> String {
    let mut prompt = String::from(FORMATTING_RULES);

    if let Some(ctx) = context {
        prompt.push_str(&format!(
            "\n\nPART CONTEXT\nThis document is processed in parts. This is part {} of {}.",
            ctx.part, ctx.total_parts
        ));
        if ctx.is_first {
            prompt.push_str("\nThis is the first part: create the appropriate top-level headings.");
        } else {
            prompt.push_str(
                "\nThis is not the first part: continue the heading structure of the previous part and do not emit a new top-level title.",
            );
        }
        if ctx.is_last {
            prompt.push_str("\nThis is the last part: close the document properly.");
        }
    }

    if let Some(pattern) = heading_pattern {
        prompt.push_str(&format!(
            "\n\nHEADINGS\nSection titles match the regular expression \"{}\". Use it to detect headings and convert them to proper Markdown headings.",
            pattern
        ));
    }

    prompt
}

/// User prompt carrying one chunk of content.
pub fn formatting_user_prompt(
    content: &str,
    metadata: &DocumentMetadata,
    context: Option<&FormattingContext>,
) -> String {
    let part_line = context
        .map(|ctx| format!("\nThis is part {} of {} of the complete document.", ctx.part, ctx.total_parts))
        .unwrap_or_default();

    format!(
        "Apply proper Markdown formatting to the following document, PRESERVING 100% OF THE ORIGINAL CONTENT.\n\n\
         DOCUMENT TITLE: {}{}\n\n\
         <document>\n{}\n</document>\n\n\
         Do not change, remove or add any words. Only improve the presentation with Markdown.",
        metadata.title, part_line, content
    )
}

/// User prompt for the consistency pass.
pub fn consistency_user_prompt(content: &str, metadata: &DocumentMetadata) -> String {
    format!(
        "This document was formatted in parts and now needs uniform formatting.\n\
         Its main title is \"{}\".\n\n\
         Check that:\n\
         - the heading hierarchy is consistent\n\
         - there are no visible breaks or inconsistencies between the parts\n\
         - Markdown formatting is applied uniformly\n\
         - there are no references to the split, such as \"This is part X of Y\"\n\
         - spacing between sections is consistent\n\n\
         <document>\n{}\n</document>\n\n\
         Return only the corrected document.",
        metadata.title, content
    )
}

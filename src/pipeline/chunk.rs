//! Chunk planning: split long text into paragraph-aligned parts.
//!
//! ## Algorithm
//!
//! ```text
//! words <= threshold ─▶ one chunk, the text verbatim
//! otherwise:
//!   paragraphs  = split on "\n\n"  (or regroup lines, see split_paragraphs)
//!   target      = max(min_chunks, words / (threshold / 2))
//!   budget      = words / target
//!   greedy pack:
//!     heading && size > budget/2 && non-empty      → close, last_was_heading = true
//!     size + para > budget && non-empty && !last_was_heading → close
//!     else                                         → append
//! ```
//!
//! The target deliberately over-splits relative to the threshold so each
//! remote call stays small. A heading-triggered split wins over a
//! size-triggered one, and a chunk that just opened on a heading is allowed
//! to exceed the budget by one paragraph so the heading keeps its body.

use crate::config::FormatterConfig;
use crate::document::{word_count, Chunk};
use crate::error::ChunkError;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

/// Chapter, part, numbered and Roman-numeral headings, each anchored at the
/// start of the paragraph.
pub const DEFAULT_HEADING_PATTERNS: [&str; 4] = [
    r"^(?:Capítulo|CAPÍTULO|Chapter|CHAPTER)\s+\d+",
    r"^(?:Parte|PARTE|Part|PART)\s+\d+",
    r"^\d+\.\s+[A-Z]",
    r"^[IVX]+\.\s+",
];

pub(crate) static DEFAULT_HEADINGS: Lazy<Regex> = Lazy::new(|| {
    let joined = DEFAULT_HEADING_PATTERNS
        .iter()
        .map(|p| format!("(?:{})", p))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&joined).unwrap()
});

/// Parameters of one planning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub threshold_words: usize,
    pub min_chunks: usize,
    pub heading_pattern: Option<String>,
}

impl Default for ChunkPlan {
    fn default() -> Self {
        Self {
            threshold_words: 4000,
            min_chunks: 12,
            heading_pattern: None,
        }
    }
}

impl ChunkPlan {
    pub fn from_config(config: &FormatterConfig) -> Self {
        Self {
            threshold_words: config.chunk_threshold_words,
            min_chunks: config.min_chunks,
            heading_pattern: config.heading_pattern.clone(),
        }
    }

    /// `(target chunk count, approximate words per chunk)` for a text of
    /// `total_words` words.
    pub fn budget(&self, total_words: usize) -> (usize, usize) {
        let half = (self.threshold_words / 2).max(1);
        let target = self.min_chunks.max(total_words / half).max(1);
        (target, total_words / target)
    }
}

/// Split `text` into ordered chunks that together cover it.
pub fn plan_chunks(text: &str, plan: &ChunkPlan) -> Result<Vec<Chunk>, ChunkError> {
    let custom = match plan.heading_pattern {
        Some(ref pattern) => Some(Regex::new(pattern).map_err(|e| {
            ChunkError::InvalidHeadingPattern {
                pattern: pattern.clone(),
                source: e,
            }
        })?),
        None => None,
    };
    let headings = custom.as_ref().unwrap_or(&DEFAULT_HEADINGS);

    let total_words = word_count(text);
    if total_words <= plan.threshold_words {
        debug!("{} words: below threshold, single chunk", total_words);
        return Ok(number(vec![text.to_string()]));
    }

    let paragraphs = split_paragraphs(text);
    let (target, budget) = plan.budget(total_words);
    info!(
        "Splitting {} words into at least {} parts (~{} words each)",
        total_words, target, budget
    );

    let mut groups: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_size = 0usize;
    let mut last_was_heading = false;

    for para in &paragraphs {
        let para_size = word_count(para);
        let is_heading = headings.is_match(para);

        if is_heading && current_size > budget / 2 && !current.is_empty() {
            groups.push(std::mem::take(&mut current));
            current.push(para);
            current_size = para_size;
            last_was_heading = true;
        } else if current_size + para_size > budget && !current.is_empty() && !last_was_heading {
            groups.push(std::mem::take(&mut current));
            current.push(para);
            current_size = para_size;
            last_was_heading = is_heading;
        } else {
            current.push(para);
            current_size += para_size;
            last_was_heading = is_heading;
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    let texts: Vec<String> = groups.into_iter().map(|g| g.join("\n\n")).collect();
    info!("Document split into {} parts", texts.len());
    Ok(number(texts))
}

/// Paragraph units of `text`.
///
/// With blank lines present the split on `"\n\n"` is verbatim (empty units
/// included) so joining with `"\n\n"` gives back the input. Otherwise lines
/// are regrouped: a line with fewer than three non-blank characters ends the
/// current paragraph and is dropped.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    if text.contains("\n\n") {
        return text.split("\n\n").map(str::to_string).collect();
    }

    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        if line.trim().chars().count() < 3 {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
}

fn number(texts: Vec<String>) -> Vec<Chunk> {
    let total = texts.len();
    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            text,
            index: i + 1,
            total,
            is_first: i == 0,
            is_last: i + 1 == total,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(words: usize, seed: usize) -> String {
        (0..words)
            .map(|i| format!("w{}x{}", seed, i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn document(paragraph_sizes: &[usize]) -> String {
        paragraph_sizes
            .iter()
            .enumerate()
            .map(|(i, n)| paragraph(*n, i))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn joined(chunks: &[Chunk]) -> String {
        chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn short_text_is_one_chunk() {
        let text = "Capítulo 1\n\nUm texto curto.\n\n\nCom espaços.  ";
        let chunks = plan_chunks(text, &ChunkPlan::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert!(chunks[0].is_first && chunks[0].is_last);
        assert!(chunks[0].context().is_none());
    }

    #[test]
    fn exactly_at_threshold_is_not_split() {
        let plan = ChunkPlan {
            threshold_words: 50,
            ..Default::default()
        };
        let text = document(&[25, 25]);
        assert_eq!(plan_chunks(&text, &plan).unwrap().len(), 1);
    }

    #[test]
    fn budget_formula() {
        let plan = ChunkPlan::default();
        assert_eq!(plan.budget(20_000), (12, 1666));
        assert_eq!(plan.budget(60_000), (30, 2000));
    }

    #[test]
    fn reassembly_is_lossless_with_odd_paragraphs() {
        let plan = ChunkPlan {
            threshold_words: 40,
            min_chunks: 3,
            heading_pattern: None,
        };
        // includes empty units produced by runs of blank lines
        let text = format!(
            "{}\n\n\n\n{}\n\n{}\n\n\n{}",
            paragraph(30, 1),
            paragraph(20, 2),
            paragraph(15, 3),
            paragraph(25, 4)
        );
        let chunks = plan_chunks(&text, &plan).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(joined(&chunks), text);
    }

    #[test]
    fn paragraphs_are_never_split() {
        let sizes: Vec<usize> = (0..120).map(|i| 20 + (i * 37) % 90).collect();
        let text = document(&sizes);
        let chunks = plan_chunks(&text, &ChunkPlan::default()).unwrap();
        let paragraphs = split_paragraphs(&text);
        for p in &paragraphs {
            let holders = chunks
                .iter()
                .filter(|c| c.text.split("\n\n").any(|u| u == p))
                .count();
            assert_eq!(holders, 1, "paragraph in {holders} chunks");
        }
    }

    #[test]
    fn chunk_flags_and_numbering() {
        let text = document(&[100; 100]);
        let chunks = plan_chunks(&text, &ChunkPlan::default()).unwrap();
        let n = chunks.len();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i + 1);
            assert_eq!(c.total, n);
            assert_eq!(c.is_first, i == 0);
            assert_eq!(c.is_last, i + 1 == n);
        }
    }

    #[test]
    fn heading_starts_new_chunk_once_half_full() {
        let plan = ChunkPlan {
            threshold_words: 100,
            min_chunks: 2,
            heading_pattern: None,
        };
        // 240 words → target max(2, 240/50)=4, budget 60
        let text = [
            paragraph(40, 1),
            "Capítulo 2 o retorno".to_string(),
            paragraph(50, 2),
            paragraph(50, 3),
            paragraph(50, 4),
            paragraph(46, 5),
        ]
        .join("\n\n");
        let chunks = plan_chunks(&text, &plan).unwrap();
        assert_eq!(chunks[0].text, paragraph(40, 1));
        assert!(chunks[1].text.starts_with("Capítulo 2"));
    }

    #[test]
    fn chunk_opened_by_heading_takes_next_paragraph() {
        let plan = ChunkPlan {
            threshold_words: 100,
            min_chunks: 2,
            heading_pattern: None,
        };
        let text = [
            paragraph(45, 1),
            "Chapter 7 big one".to_string(),
            paragraph(90, 2),
            paragraph(90, 3),
        ]
        .join("\n\n");
        let chunks = plan_chunks(&text, &plan).unwrap();
        // heading chunk absorbs the oversized paragraph that follows it
        assert!(chunks[1].text.starts_with("Chapter 7 big one\n\n"));
        assert!(chunks[1].text.ends_with(&paragraph(90, 2)));
    }

    #[test]
    fn custom_pattern_matches_anywhere() {
        let plan = ChunkPlan {
            threshold_words: 100,
            min_chunks: 2,
            heading_pattern: Some(r"SECTION-\d".into()),
        };
        let text = [
            paragraph(45, 1),
            "intro SECTION-2 here".to_string(),
            paragraph(40, 2),
            paragraph(40, 3),
            paragraph(40, 4),
        ]
        .join("\n\n");
        let chunks = plan_chunks(&text, &plan).unwrap();
        assert!(chunks[1].text.starts_with("intro SECTION-2 here"));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let plan = ChunkPlan {
            heading_pattern: Some("[unclosed".into()),
            ..Default::default()
        };
        let err = plan_chunks("x", &plan).unwrap_err();
        assert!(matches!(err, ChunkError::InvalidHeadingPattern { .. }));
    }

    #[test]
    fn line_regroup_without_blank_lines() {
        let text = "first line one\nfirst line two\n--\nsecond para\n \nthird para\nab";
        assert_eq!(
            split_paragraphs(text),
            vec!["first line one\nfirst line two", "second para", "third para"]
        );
    }

    #[test]
    fn default_headings() {
        for h in [
            "Capítulo 3",
            "CAPÍTULO 10 — Fim",
            "Parte 2",
            "Chapter 1",
            "PART 4",
            "12. Conceitos",
            "IV. Conclusão",
        ] {
            assert!(DEFAULT_HEADINGS.is_match(h), "{h}");
        }
        for p in ["texto Capítulo 3", "1.5 mm", "ii. roman lower", "Capítulos"] {
            assert!(!DEFAULT_HEADINGS.is_match(p), "{p}");
        }
    }
}

//! Results-document classification.
//!
//! Remote folders hold flyers, entry lists and regulations next to the
//! actual result sheets. Each document gets a heuristic score computed from
//! the text of its first pages; only documents at or above the threshold are
//! handed to the result extractor.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Default minimum score for a results document.
pub const DEFAULT_THRESHOLD: i64 = 6;
/// Default number of leading pages inspected.
pub const DEFAULT_MAX_PAGES: usize = 2;

const SOFTWARE_SIGNATURES: &[&str] = &["SPLASH MEET MANAGER"];
const RESULTS_KEYWORDS: &[&str] = &["RESULTADOS", "RESULTS"];
const RANK_HEADERS: &[&str] = &["CLASIFICACIÓN", "CLASIFICACION", "CLASSIFICATION"];
const TIME_HEADERS: &[&str] = &["TIEMPO", "TIME"];
const MAX_RANK_LINE_POINTS: i64 = 6;

static EVENT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:PRUEBA|EVENT)\s+\d+\b").unwrap());
static RANK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,3})\.\s+.+\s+(\d+:\d{2}[.,]\d{1,2}|\d+:\d{2})\s*$").unwrap()
});

/// Outcome of classifying one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub is_results: bool,
    pub score: i64,
}

impl Detection {
    /// Classification used when the document text could not be read.
    pub fn unreadable() -> Self {
        Self {
            is_results: false,
            score: 0,
        }
    }
}

/// Score the concatenated text of a document's leading pages.
pub fn score_results_document(text: &str) -> i64 {
    let up = text.to_uppercase();
    let mut score = 0;

    if SOFTWARE_SIGNATURES.iter().any(|s| up.contains(s)) {
        score += 3;
    }
    if RESULTS_KEYWORDS.iter().any(|k| up.contains(k)) {
        score += 2;
    }
    if EVENT_MARKER.is_match(&up) {
        score += 2;
    }
    if RANK_HEADERS.iter().any(|h| up.contains(h)) && TIME_HEADERS.iter().any(|h| up.contains(h))
    {
        score += 2;
    }

    let hits = text
        .lines()
        .filter(|line| RANK_LINE.is_match(line.trim()))
        .take(MAX_RANK_LINE_POINTS as usize)
        .count() as i64;

    score + hits
}

/// Classify a document from the text of its first pages.
pub fn is_results_document(text: &str, threshold: i64) -> Detection {
    let score = score_results_document(text);
    Detection {
        is_results: score >= threshold,
        score,
    }
}

/// Join the first `max_pages` pages for scoring.
pub fn leading_text(pages: &[String], max_pages: usize) -> String {
    pages
        .iter()
        .take(max_pages)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n")
}

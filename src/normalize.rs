//! Time and name normalization.
//!
//! Turns textual clock tokens into seconds and swimmer names into either a
//! display form (accents stripped, case kept) or a join key (accents
//! stripped, uppercased, punctuation collapsed).

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Returned when a token does not look like any supported clock shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeParseError {
    #[error("invalid time format: {0:?}")]
    InvalidFormat(String),
}

static MIN_SEC_FRAC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+):(\d{2})[.,](\d{1,2})$").unwrap());
static MIN_SEC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+):(\d{2})$").unwrap());
static SEC_FRAC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})[.,](\d{1,2})$").unwrap());
static NON_KEY_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Z0-9]+").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Parse `M:SS.cc`, `M:SS,cc`, `M:SS`, `SS.cc` or `SS,cc` into seconds.
///
/// A single fraction digit means tenths (`58.7` is 58.70 s).
pub fn time_to_seconds(text: &str) -> Result<f64, TimeParseError> {
    let t = text.trim();
    let parsed = if let Some(c) = MIN_SEC_FRAC.captures(t) {
        hundredths(&c[1], &c[2], &c[3])
    } else if let Some(c) = MIN_SEC.captures(t) {
        hundredths(&c[1], &c[2], "")
    } else if let Some(c) = SEC_FRAC.captures(t) {
        hundredths("0", &c[1], &c[2])
    } else {
        None
    };
    parsed.ok_or_else(|| TimeParseError::InvalidFormat(t.to_string()))
}

fn to_u64(s: &str) -> Option<u64> {
    s.parse().ok()
}

/// Combine into an exact hundredths count before dividing, so `1:05.30`
/// lands on the same `f64` as the literal `65.3`.
fn hundredths(minutes: &str, seconds: &str, frac: &str) -> Option<f64> {
    let minutes = to_u64(minutes)?;
    let seconds = to_u64(seconds)?;
    let mut centis = if frac.is_empty() { 0 } else { to_u64(frac)? };
    if frac.len() == 1 {
        centis *= 10;
    }
    let total = minutes.checked_mul(6000)?.checked_add(seconds * 100 + centis)?;
    Some(total as f64 / 100.0)
}

/// NFKD-decompose and drop combining marks.
pub fn strip_accents(s: &str) -> String {
    s.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Identity join key: `"José  Pérez-López"` → `"JOSE PEREZ LOPEZ"`.
pub fn normalize_swimmer_key(name: &str) -> String {
    let upper = strip_accents(name).to_uppercase();
    // Uppercasing can expand into decomposable characters; strip again.
    let upper = strip_accents(&upper);
    NON_KEY_CHARS.replace_all(&upper, " ").trim().to_string()
}

/// Display form: accents stripped, whitespace collapsed, case preserved.
pub fn normalize_display_name(name: &str) -> String {
    let s = strip_accents(name.trim());
    WHITESPACE.replace_all(&s, " ").trim().to_string()
}

/// Collapse runs of whitespace to one space and trim.
pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

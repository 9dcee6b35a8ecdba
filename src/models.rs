//! Core data models used throughout swimstats.
//!
//! These types represent the remote documents, parsed race results, and
//! stored rows that flow through the sync pipeline.

use serde::Serialize;

use crate::normalize::normalize_swimmer_key;

/// One entry from a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    /// Path relative to the share root, no leading or trailing slash.
    pub path: String,
    pub is_dir: bool,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    /// Raw `getlastmodified` value (usually an RFC 2822 HTTP date).
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

impl RemoteEntry {
    pub fn is_pdf(&self) -> bool {
        !self.is_dir
            && (self
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.to_lowercase().contains("pdf"))
                || self.path.to_lowercase().ends_with(".pdf"))
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            etag: self.etag.clone(),
            size: self.size,
        }
    }
}

/// The `(etag, size)` pair used as the only staleness signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub etag: Option<String>,
    pub size: Option<i64>,
}

/// Meet context read from the first lines of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MeetHeader {
    pub name: Option<String>,
    pub place: Option<String>,
    /// Date as printed, `dd/mm/yyyy`.
    pub date: Option<String>,
}

impl MeetHeader {
    /// Printed meet date as `YYYY-MM-DD`, when it parses.
    pub fn date_iso(&self) -> Option<String> {
        let raw = self.date.as_deref()?;
        chrono::NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y")
            .ok()
            .map(|d| d.format("%Y-%m-%d").to_string())
    }
}

/// One result line recognized by the parser.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedResult {
    pub meet: MeetHeader,
    pub event_num: Option<u32>,
    /// `FEM` or `MASC`, from the last event header.
    pub sex: Option<String>,
    pub event: String,
    pub event_category: Option<String>,
    /// Display-normalized swimmer name.
    pub swimmer: String,
    /// Last two digits of the birth year.
    pub birth_year: Option<u8>,
    pub time_seconds: f64,
    pub raw_line: String,
}

/// Event name used when a result appears before any event header.
pub const UNKNOWN_EVENT: &str = "UNKNOWN";

/// A result row as persisted in the `results` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub category: String,
    pub event: String,
    pub swimmer: String,
    pub swimmer_key: String,
    pub sex: Option<String>,
    pub age: Option<i64>,
    pub dataset_tag: String,
    pub time_seconds: Option<f64>,
    pub raw_line: String,
    pub meet_date_iso: Option<String>,
    pub meet_name: Option<String>,
    pub event_category: Option<String>,
}

impl ResultRow {
    /// Attach caller context (scope path, dataset tag, document date) to a
    /// parsed result.
    pub fn from_parsed(
        parsed: &ParsedResult,
        category: &str,
        dataset_tag: &str,
        document_date_iso: Option<&str>,
    ) -> Self {
        Self {
            category: category.to_string(),
            event: parsed.event.clone(),
            swimmer: parsed.swimmer.clone(),
            swimmer_key: normalize_swimmer_key(&parsed.swimmer),
            sex: parsed.sex.clone(),
            age: parsed.birth_year.map(i64::from),
            dataset_tag: dataset_tag.to_string(),
            time_seconds: Some(parsed.time_seconds),
            raw_line: parsed.raw_line.clone(),
            meet_date_iso: parsed
                .meet
                .date_iso()
                .or_else(|| document_date_iso.map(str::to_string)),
            meet_name: parsed.meet.name.clone(),
            event_category: parsed.event_category.clone(),
        }
    }
}

/// Stored metadata for one remote document (`files` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub etag: Option<String>,
    pub size: Option<i64>,
    pub last_modified_raw: Option<String>,
    pub last_modified_iso: Option<String>,
    pub is_results: bool,
    pub results_score: i64,
    pub dataset_tag: String,
}

/// Aggregate outcome of one or more sync scopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounters {
    pub dirs: u64,
    pub pdfs_found: u64,
    pub processed: u64,
    pub skipped_unchanged: u64,
    pub results_docs: u64,
    pub non_results_docs: u64,
    pub results_but_zero_rows: u64,
    pub failed: u64,
    pub rows_written: u64,
}

impl SyncCounters {
    pub fn absorb(&mut self, other: &SyncCounters) {
        self.dirs += other.dirs;
        self.pdfs_found += other.pdfs_found;
        self.processed += other.processed;
        self.skipped_unchanged += other.skipped_unchanged;
        self.results_docs += other.results_docs;
        self.non_results_docs += other.non_results_docs;
        self.results_but_zero_rows += other.results_but_zero_rows;
        self.failed += other.failed;
        self.rows_written += other.rows_written;
    }
}

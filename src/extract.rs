//! Per-page text extraction for downloaded documents.
//!
//! The parser works on plain text, one string per page in page order.
//! Extraction sits behind [`PageExtractor`] so the sync engine can be driven
//! by PDFs in production and by plain-text fixtures in tests or debugging.

use std::panic::{catch_unwind, AssertUnwindSafe};

use thiserror::Error;

/// Page separator understood by [`PlainTextPages`] (form feed, as emitted by
/// `pdftotext`).
pub const PAGE_BREAK: char = '\u{0c}';

/// Whole-document extraction failure. A single unreadable page is not an
/// error; it comes back as an empty string.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("PDF extraction panicked: {0}")]
    Panicked(String),
    #[error("document is empty")]
    Empty,
}

/// Turns raw document bytes into page texts.
pub trait PageExtractor: Send + Sync {
    fn pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError>;
}

/// PDF text extraction via `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfPageExtractor;

impl PageExtractor for PdfPageExtractor {
    fn pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        if bytes.is_empty() {
            return Err(ExtractError::Empty);
        }
        // pdf-extract panics on some malformed inputs; treat that like any
        // other unreadable stream.
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(bytes)
        }));
        match outcome {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
            Err(payload) => Err(ExtractError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

/// UTF-8 text with pages separated by [`PAGE_BREAK`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextPages;

impl PageExtractor for PlainTextPages {
    fn pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        if bytes.is_empty() {
            return Err(ExtractError::Empty);
        }
        let text = String::from_utf8_lossy(bytes);
        Ok(text.split(PAGE_BREAK).map(str::to_string).collect())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

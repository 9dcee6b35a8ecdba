//! Sync progress reporting.
//!
//! The sync engine announces each stage boundary (directory start, scan,
//! download, detect, parse-and-store, per-document done) to a
//! [`SyncProgressReporter`]. Reporters are observers only: they cannot stop
//! or alter a run, and a reporter that panics is ignored by [`notify`].
//!
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use serde::Serialize;

/// Stage boundary reached by the sync engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    /// A scope is about to be listed; `done`/`total` count scopes.
    DirStart,
    /// Listing finished; `total` documents found.
    Scan,
    SkipUnchanged,
    Download,
    Detect,
    ParseStore,
    /// Document finished; `done` counts it.
    Done,
    Failed,
    /// Scope finished.
    DirDone,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::DirStart => "dir_start",
            SyncStage::Scan => "scan",
            SyncStage::SkipUnchanged => "skip_unchanged",
            SyncStage::Download => "download",
            SyncStage::Detect => "detect",
            SyncStage::ParseStore => "parse_store",
            SyncStage::Done => "done",
            SyncStage::Failed => "failed",
            SyncStage::DirDone => "dir_done",
        }
    }
}

/// A single progress event for sync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncProgressEvent {
    /// Documents finished in the current scope.
    pub done: u64,
    /// Documents found in the current scope (0 before the scan completes).
    pub total: u64,
    /// Scope directory or document path.
    pub path: String,
    pub stage: SyncStage,
}

/// Receives sync progress. Implemented by the stock reporters below and by
/// any `Fn(&SyncProgressEvent)` closure.
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: &SyncProgressEvent);
}

impl<F> SyncProgressReporter for F
where
    F: Fn(&SyncProgressEvent) + Send + Sync,
{
    fn report(&self, event: &SyncProgressEvent) {
        self(event)
    }
}

/// Deliver an event, swallowing any panic raised by the reporter.
pub fn notify(reporter: &dyn SyncProgressReporter, event: &SyncProgressEvent) {
    let _ = catch_unwind(AssertUnwindSafe(|| reporter.report(event)));
}

/// Human-friendly progress on stderr:
/// `sync 2. TENERIFE/Liga R1.pdf  download  12 / 340  eta 4m10s`.
pub struct StderrProgress {
    started: Instant,
}

impl StderrProgress {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for StderrProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: &SyncProgressEvent) {
        let line = match event.stage {
            SyncStage::DirStart => format!(
                "sync {}  scope {} / {}  listing...\n",
                event.path,
                event.done + 1,
                event.total
            ),
            SyncStage::DirDone => format!(
                "sync {}  scope {} / {} finished\n",
                event.path, event.done, event.total
            ),
            _ => {
                let eta = fmt_eta(self.started.elapsed().as_secs_f64(), event.done, event.total)
                    .map(|e| format!("  eta {}", e))
                    .unwrap_or_default();
                format!(
                    "sync {}  {}  {} / {}{}\n",
                    event.path,
                    event.stage.as_str(),
                    format_number(event.done),
                    format_number(event.total),
                    eta
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: &SyncProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "stage": event.stage,
            "path": event.path,
            "done": event.done,
            "total": event.total,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: &SyncProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Remaining time estimate from the average rate so far. `None` until at
/// least one document has finished.
fn fmt_eta(elapsed_secs: f64, done: u64, total: u64) -> Option<String> {
    if done == 0 || total <= done {
        return None;
    }
    let per_doc = elapsed_secs / done as f64;
    let remaining = (per_doc * (total - done) as f64).round() as u64;
    Some(if remaining >= 60 {
        format!("{}m{:02}s", remaining / 60, remaining % 60)
    } else {
        format!("{}s", remaining)
    })
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress::new()),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

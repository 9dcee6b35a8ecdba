//! Incremental sync orchestration.
//!
//! Walks one or more remote scopes, compares each listed PDF against the
//! stored `(etag, size)` fingerprint, and reprocesses only new or changed
//! documents: download → classify → extract → replace rows. Unchanged
//! documents are never downloaded, so a second run over an unchanged tree
//! performs no downloads and no writes.
//!
//! Documents are handled one at a time, scopes one after another.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::{Config, DetectionConfig};
use crate::db;
use crate::detect::{is_results_document, leading_text, Detection};
use crate::extract::{PageExtractor, PdfPageExtractor, PlainTextPages};
use crate::migrate;
use crate::models::{ParsedResult, RemoteEntry, ResultRow, SyncCounters};
use crate::parse::parse_pages;
use crate::progress::{notify, NoProgress, ProgressMode, SyncProgressEvent, SyncProgressReporter, SyncStage};
use crate::store;
use crate::webdav::{RemoteStore, WebDavClient};

static NO_PROGRESS: NoProgress = NoProgress;

/// What happened to one processed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocOutcome {
    Results { rows: u64 },
    NonResults,
}

/// Sync engine bound to one store, one remote and one text extractor.
pub struct Syncer<'a> {
    pool: &'a SqlitePool,
    remote: &'a dyn RemoteStore,
    extractor: &'a dyn PageExtractor,
    detection: DetectionConfig,
    progress: &'a dyn SyncProgressReporter,
    keep_going: bool,
    exclude: Option<GlobSet>,
}

impl<'a> Syncer<'a> {
    pub fn new(
        pool: &'a SqlitePool,
        remote: &'a dyn RemoteStore,
        extractor: &'a dyn PageExtractor,
    ) -> Self {
        Self {
            pool,
            remote,
            extractor,
            detection: DetectionConfig::default(),
            progress: &NO_PROGRESS,
            keep_going: false,
            exclude: None,
        }
    }

    pub fn with_detection(mut self, detection: DetectionConfig) -> Self {
        self.detection = detection;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn SyncProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Count per-document download failures instead of aborting the run.
    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    /// Skip remote paths matching any of these globs.
    pub fn with_exclude_globs(mut self, patterns: &[String]) -> Result<Self> {
        self.exclude = if patterns.is_empty() {
            None
        } else {
            Some(build_globset(patterns)?)
        };
        Ok(self)
    }

    fn emit(&self, done: u64, total: u64, path: &str, stage: SyncStage) {
        notify(
            self.progress,
            &SyncProgressEvent {
                done,
                total,
                path: path.to_string(),
                stage,
            },
        );
    }

    /// Sync every scope in order under one dataset tag and sum the counters.
    pub async fn sync_many_scopes<S: AsRef<str>>(
        &self,
        scopes: &[S],
        dataset_tag: &str,
    ) -> Result<SyncCounters> {
        let total_dirs = scopes.len() as u64;
        let mut total = SyncCounters::default();

        for (i, scope) in scopes.iter().enumerate() {
            let scope = scope.as_ref();
            self.emit(i as u64, total_dirs, scope, SyncStage::DirStart);
            let counters = self.sync_one_scope(scope, dataset_tag).await?;
            total.absorb(&counters);
            self.emit(i as u64 + 1, total_dirs, scope, SyncStage::DirDone);
        }

        Ok(total)
    }

    /// Sync one remote directory (recursively) under `dataset_tag`.
    pub async fn sync_one_scope(&self, scope: &str, dataset_tag: &str) -> Result<SyncCounters> {
        let dataset_tag = dataset_tag.trim();
        if dataset_tag.is_empty() {
            bail!("dataset tag must not be empty");
        }
        let scope = scope.trim_matches('/');

        let mut pdfs = self
            .remote
            .list_pdfs(scope)
            .await
            .with_context(|| format!("failed to list remote scope '{}'", scope))?;
        if let Some(exclude) = &self.exclude {
            pdfs.retain(|e| !exclude.is_match(&e.path));
        }

        let total = pdfs.len() as u64;
        let mut counters = SyncCounters {
            dirs: 1,
            pdfs_found: total,
            ..Default::default()
        };
        let mut done = 0u64;
        info!(scope, documents = total, "scanned scope");
        self.emit(done, total, scope, SyncStage::Scan);

        for entry in &pdfs {
            if !store::file_is_new_or_changed(self.pool, entry).await? {
                counters.skipped_unchanged += 1;
                done += 1;
                self.emit(done, total, &entry.path, SyncStage::SkipUnchanged);
                continue;
            }

            self.emit(done, total, &entry.path, SyncStage::Download);
            let bytes = match self.remote.download(&entry.path).await {
                Ok(bytes) => bytes,
                Err(e) if self.keep_going => {
                    warn!(path = %entry.path, error = %e, "download failed; continuing");
                    counters.failed += 1;
                    done += 1;
                    self.emit(done, total, &entry.path, SyncStage::Failed);
                    continue;
                }
                Err(e) => {
                    return Err(e.context(format!("failed to download '{}'", entry.path)));
                }
            };

            match self
                .process_document(entry, &bytes, scope, dataset_tag, done, total)
                .await?
            {
                DocOutcome::Results { rows } => {
                    counters.results_docs += 1;
                    counters.rows_written += rows;
                    if rows == 0 {
                        counters.results_but_zero_rows += 1;
                    }
                }
                DocOutcome::NonResults => counters.non_results_docs += 1,
            }

            counters.processed += 1;
            done += 1;
            self.emit(done, total, &entry.path, SyncStage::Done);
        }

        info!(
            scope,
            processed = counters.processed,
            skipped = counters.skipped_unchanged,
            rows = counters.rows_written,
            "scope synced"
        );
        Ok(counters)
    }

    /// Classify, extract and store one downloaded document.
    async fn process_document(
        &self,
        entry: &RemoteEntry,
        bytes: &[u8],
        scope: &str,
        dataset_tag: &str,
        done: u64,
        total: u64,
    ) -> Result<DocOutcome> {
        self.emit(done, total, &entry.path, SyncStage::Detect);
        let (pages, detection) = classify(self.extractor, bytes, &self.detection, &entry.path);

        if !detection.is_results {
            debug!(path = %entry.path, score = detection.score, "not a results document");
            store::store_document(self.pool, entry, &detection, &[], dataset_tag).await?;
            return Ok(DocOutcome::NonResults);
        }

        self.emit(done, total, &entry.path, SyncStage::ParseStore);
        let document_date = store::normalize_iso(entry.last_modified.as_deref());
        let rows: Vec<ResultRow> = parse_pages(&pages)
            .iter()
            .map(|p| ResultRow::from_parsed(p, scope, dataset_tag, document_date.as_deref()))
            .collect();

        let written =
            store::store_document(self.pool, entry, &detection, &rows, dataset_tag).await?;
        if written == 0 {
            warn!(path = %entry.path, score = detection.score, "results document produced no rows");
        }
        Ok(DocOutcome::Results { rows: written })
    }
}

/// Extract pages and score them. Unreadable documents come back as
/// non-results with no pages.
fn classify(
    extractor: &dyn PageExtractor,
    bytes: &[u8],
    config: &DetectionConfig,
    path: &str,
) -> (Vec<String>, Detection) {
    match extractor.pages(bytes) {
        Ok(pages) => {
            let text = leading_text(&pages, config.max_pages);
            let detection = is_results_document(&text, config.threshold);
            (pages, detection)
        }
        Err(e) => {
            warn!(path, error = %e, "text extraction failed");
            (Vec::new(), Detection::unreadable())
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// `swim sync`: sync the given scopes (or every enabled category) and print
/// the aggregated counters.
pub async fn run_sync(
    config: &Config,
    scopes: &[String],
    dataset_tag: &str,
    progress: ProgressMode,
    json: bool,
) -> Result<()> {
    if dataset_tag.trim().is_empty() {
        bail!("--tag must not be empty");
    }

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let scopes: Vec<String> = if scopes.is_empty() {
        store::list_included_categories(&pool, true)
            .await?
            .into_iter()
            .map(|c| c.path)
            .collect()
    } else {
        scopes.to_vec()
    };
    if scopes.is_empty() {
        bail!("no scopes given and no enabled categories; add one with `swim categories add <path>`");
    }

    let remote = WebDavClient::new(config.remote()?)?;
    let extractor = PdfPageExtractor;
    let reporter = progress.reporter();

    let syncer = Syncer::new(&pool, &remote, &extractor)
        .with_detection(config.detection.clone())
        .with_progress(reporter.as_ref())
        .keep_going(config.sync.keep_going)
        .with_exclude_globs(&config.sync.exclude_globs)?;

    let counters = syncer.sync_many_scopes(&scopes, dataset_tag).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&counters)?);
    } else {
        print_counters(dataset_tag, &counters);
    }

    pool.close().await;
    Ok(())
}

fn print_counters(dataset_tag: &str, c: &SyncCounters) {
    println!("sync {}", dataset_tag);
    println!("  scopes: {}", c.dirs);
    println!("  pdfs found: {}", c.pdfs_found);
    println!("  processed: {}", c.processed);
    println!("  skipped unchanged: {}", c.skipped_unchanged);
    println!("  results documents: {}", c.results_docs);
    println!("  non-results documents: {}", c.non_results_docs);
    println!("  results with zero rows: {}", c.results_but_zero_rows);
    if c.failed > 0 {
        println!("  failed: {}", c.failed);
    }
    println!("  rows written: {}", c.rows_written);
    println!("ok");
}

// ============ Local document inspection ============

/// Outcome of parsing one local file, used by `swim parse`.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub path: PathBuf,
    pub detection: Detection,
    pub pages: usize,
    pub events: Vec<String>,
    pub rows: Vec<ParsedResult>,
}

/// Classify and parse a local file. `.txt` files are read as form-feed
/// separated pages; anything else goes through the PDF extractor.
pub fn inspect_document(path: &Path, detection: &DetectionConfig) -> Result<DocumentReport> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let is_text = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
    let extractor: &dyn PageExtractor = if is_text {
        &PlainTextPages
    } else {
        &PdfPageExtractor
    };

    let (pages, det) = classify(extractor, &bytes, detection, &path.display().to_string());
    let rows = if det.is_results {
        parse_pages(&pages)
    } else {
        Vec::new()
    };

    let mut events: Vec<String> = Vec::new();
    for row in &rows {
        if !events.contains(&row.event) {
            events.push(row.event.clone());
        }
    }

    Ok(DocumentReport {
        path: path.to_path_buf(),
        detection: det,
        pages: pages.len(),
        events,
        rows,
    })
}

/// `swim parse`: inspect one file, or every `.pdf`/`.txt` under a directory.
pub fn run_parse(config: &Config, target: &Path, json: bool) -> Result<()> {
    let files: Vec<PathBuf> = if target.is_dir() {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(target)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("pdf") || e.eq_ignore_ascii_case("txt"))
            })
            .collect();
        files.sort();
        files
    } else {
        vec![target.to_path_buf()]
    };

    for file in &files {
        let report = inspect_document(file, &config.detection)?;
        if json {
            println!("{}", serde_json::to_string(&report)?);
            continue;
        }
        println!("{}", report.path.display());
        println!(
            "  score: {} ({})",
            report.detection.score,
            if report.detection.is_results {
                "results"
            } else {
                "not results"
            }
        );
        println!("  pages: {}", report.pages);
        println!("  rows: {}", report.rows.len());
        println!("  events: {}", report.events.join(" | "));
        for row in &report.rows {
            println!("  {}", serde_json::to_string(row)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const RESULTS_DOC: &str = "\
Splash Meet Manager, 11.76543
LIGA CANARIA DE CLUBES
Santa Cruz de Tenerife, 14/12/2024
Resultados
PRUEBA 3 FEM., 100 m Libre Alevín
Clasificación Año Tiempo
1. GARCIA, Ana 12 CN Tenerife 1:02.45
2. PEREZ LOPEZ, Marta 12 CN Echeyde 1:03.10
3. DIAZ, Lucia 12 CN Tenerife 1:04.00
";

    /// Flat in-memory tree: every entry lives under one directory.
    struct FakeRemote {
        files: HashMap<String, (String, Vec<u8>)>,
        downloads: Mutex<Vec<String>>,
        broken: Vec<String>,
    }

    impl FakeRemote {
        fn new(files: &[(&str, &str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(p, etag, body)| {
                        (p.to_string(), (etag.to_string(), body.as_bytes().to_vec()))
                    })
                    .collect(),
                downloads: Mutex::new(Vec::new()),
                broken: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl RemoteStore for FakeRemote {
        async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>> {
            let prefix = format!("{}/", path);
            Ok(self
                .files
                .iter()
                .filter(|(p, _)| p.starts_with(&prefix))
                .map(|(p, (etag, body))| RemoteEntry {
                    path: p.clone(),
                    is_dir: false,
                    content_type: Some("application/pdf".into()),
                    size: Some(body.len() as i64),
                    last_modified: Some("Sat, 14 Dec 2024 10:00:00 GMT".into()),
                    etag: Some(etag.clone()),
                })
                .collect())
        }

        async fn download(&self, path: &str) -> Result<Vec<u8>> {
            if self.broken.iter().any(|b| b == path) {
                bail!("connection reset");
            }
            self.downloads.lock().unwrap().push(path.to_string());
            Ok(self
                .files
                .get(path)
                .map(|(_, body)| body.clone())
                .unwrap_or_default())
        }
    }

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::minimal(tmp.path().join("swim.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        (tmp, pool)
    }

    #[tokio::test]
    async fn results_and_flyer_are_classified() {
        let (_tmp, pool) = test_pool().await;
        let remote = FakeRemote::new(&[
            ("tf/r1.pdf", "\"1\"", RESULTS_DOC),
            ("tf/flyer.pdf", "\"2\"", "Trofeo de Navidad\nPrecio 12.50\n1. Inscripciones 3:00\n"),
        ]);
        let syncer = Syncer::new(&pool, &remote, &PlainTextPages);

        let c = syncer.sync_one_scope("tf", "2024-25").await.unwrap();
        assert_eq!(c.pdfs_found, 2);
        assert_eq!(c.processed, 2);
        assert_eq!(c.results_docs, 1);
        assert_eq!(c.non_results_docs, 1);
        assert_eq!(c.rows_written, 3);

        assert_eq!(store::count_results_for_file(&pool, "tf/flyer.pdf").await.unwrap(), 0);
        let flyer = store::get_file(&pool, "tf/flyer.pdf").await.unwrap().unwrap();
        assert!(!flyer.is_results);
    }

    #[tokio::test]
    async fn rows_carry_scope_tag_and_meet_date() {
        let (_tmp, pool) = test_pool().await;
        let remote = FakeRemote::new(&[("tf/r1.pdf", "\"1\"", RESULTS_DOC)]);
        Syncer::new(&pool, &remote, &PlainTextPages)
            .sync_one_scope("/tf/", "2024-25")
            .await
            .unwrap();

        let (category, tag, date, key, age): (String, String, String, String, i64) =
            sqlx::query_as(
                "SELECT category, dataset_tag, meet_date_iso, swimmer_key, age \
                 FROM results ORDER BY id LIMIT 1",
            )
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(category, "tf");
        assert_eq!(tag, "2024-25");
        assert_eq!(date, "2024-12-14");
        assert_eq!(key, "GARCIA ANA");
        assert_eq!(age, 12);
    }

    #[tokio::test]
    async fn unreadable_document_is_non_results() {
        let (_tmp, pool) = test_pool().await;
        let remote = FakeRemote::new(&[("tf/empty.pdf", "\"1\"", "")]);
        let c = Syncer::new(&pool, &remote, &PlainTextPages)
            .sync_one_scope("tf", "t")
            .await
            .unwrap();
        assert_eq!(c.processed, 1);
        assert_eq!(c.non_results_docs, 1);
        let file = store::get_file(&pool, "tf/empty.pdf").await.unwrap().unwrap();
        assert_eq!(file.results_score, 0);
    }

    #[tokio::test]
    async fn download_failure_aborts_or_counts() {
        let (_tmp, pool) = test_pool().await;
        let mut remote = FakeRemote::new(&[
            ("tf/a.pdf", "\"1\"", RESULTS_DOC),
            ("tf/b.pdf", "\"1\"", RESULTS_DOC),
        ]);
        remote.broken.push("tf/a.pdf".into());

        let err = Syncer::new(&pool, &remote, &PlainTextPages)
            .sync_one_scope("tf", "t")
            .await;
        assert!(err.is_err());
        assert!(store::get_file(&pool, "tf/a.pdf").await.unwrap().is_none());

        let c = Syncer::new(&pool, &remote, &PlainTextPages)
            .keep_going(true)
            .sync_one_scope("tf", "t")
            .await
            .unwrap();
        assert_eq!(c.failed, 1);
        assert_eq!(c.processed, 1);
        assert!(store::get_file(&pool, "tf/a.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn excluded_paths_are_not_downloaded() {
        let (_tmp, pool) = test_pool().await;
        let remote = FakeRemote::new(&[
            ("tf/r1.pdf", "\"1\"", RESULTS_DOC),
            ("tf/Inscritos/list.pdf", "\"1\"", RESULTS_DOC),
        ]);
        let c = Syncer::new(&pool, &remote, &PlainTextPages)
            .with_exclude_globs(&["**/Inscritos/**".to_string()])
            .unwrap()
            .sync_one_scope("tf", "t")
            .await
            .unwrap();
        assert_eq!(c.pdfs_found, 1);
        assert_eq!(*remote.downloads.lock().unwrap(), vec!["tf/r1.pdf".to_string()]);
    }

    #[tokio::test]
    async fn empty_tag_is_rejected() {
        let (_tmp, pool) = test_pool().await;
        let remote = FakeRemote::new(&[]);
        assert!(Syncer::new(&pool, &remote, &PlainTextPages)
            .sync_one_scope("tf", "  ")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn progress_stages_in_order() {
        let (_tmp, pool) = test_pool().await;
        let remote = FakeRemote::new(&[("tf/r1.pdf", "\"1\"", RESULTS_DOC)]);
        let stages = Mutex::new(Vec::new());
        let reporter = |e: &SyncProgressEvent| stages.lock().unwrap().push(e.stage);

        let syncer = Syncer::new(&pool, &remote, &PlainTextPages).with_progress(&reporter);
        syncer.sync_many_scopes(&["tf"], "t").await.unwrap();
        syncer.sync_many_scopes(&["tf"], "t").await.unwrap();

        use SyncStage::*;
        assert_eq!(
            *stages.lock().unwrap(),
            vec![
                DirStart, Scan, Download, Detect, ParseStore, Done, DirDone,
                DirStart, Scan, SkipUnchanged, DirDone,
            ]
        );
    }

    #[tokio::test]
    async fn panicking_observer_does_not_abort() {
        let (_tmp, pool) = test_pool().await;
        let remote = FakeRemote::new(&[("tf/r1.pdf", "\"1\"", RESULTS_DOC)]);
        let reporter = |_: &SyncProgressEvent| panic!("observer bug");
        let c = Syncer::new(&pool, &remote, &PlainTextPages)
            .with_progress(&reporter)
            .sync_one_scope("tf", "t")
            .await
            .unwrap();
        assert_eq!(c.rows_written, 3);
    }

    #[test]
    fn inspect_text_fixture() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("r1.txt");
        std::fs::write(&path, RESULTS_DOC).unwrap();
        let report = inspect_document(&path, &DetectionConfig::default()).unwrap();
        assert!(report.detection.is_results);
        assert_eq!(report.pages, 1);
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.events, vec!["100m Libre".to_string()]);
    }
}

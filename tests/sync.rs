//! End-to-end sync against an in-memory share with plain-text "PDFs".

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tempfile::TempDir;

use swimstats::config::Config;
use swimstats::extract::PlainTextPages;
use swimstats::ingest::Syncer;
use swimstats::models::RemoteEntry;
use swimstats::webdav::{self, RemoteStore};
use swimstats::{db, migrate, store};

const LIGA_R1: &str = "\
Splash Meet Manager, 11.76543
LIGA CANARIA DE CLUBES
Santa Cruz de Tenerife, 14/12/2024
Resultados
PRUEBA 3 FEM., 100 m Libre Alevín
Clasificación Año Tiempo
1. PEREZ LOPEZ, Marta 08 CN Echeyde 1:01.10
2. DIAZ, Lucia 08 CN Tenerife 1:02.00
3. GARCIA, Ana 08 1:02.45
";

const LIGA_R2: &str = "\
Splash Meet Manager, 11.76543
LIGA CANARIA DE CLUBES
La Laguna, 25/01/2025
Resultados
PRUEBA 7 MASC., 50 m Espalda
Clasificación Año Tiempo
1. LEON, Pablo 09 CN Tenerife 35.20
2. SOSA, Mario 09 CN Echeyde 36.85
";

const FLYER: &str = "\
TROFEO DE NAVIDAD
Inscripciones abiertas hasta el 1 de diciembre
Precio 12.50 por nadador
";

/// Directory tree held in memory. Directories are implied by file paths.
struct MemoryShare {
    files: Mutex<BTreeMap<String, (String, Vec<u8>)>>,
    downloads: Mutex<Vec<String>>,
}

impl MemoryShare {
    fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            downloads: Mutex::new(Vec::new()),
        }
    }

    fn put(&self, path: &str, etag: &str, body: &str) {
        self.files.lock().unwrap().insert(
            path.to_string(),
            (etag.to_string(), body.as_bytes().to_vec()),
        );
    }

    fn take_downloads(&self) -> Vec<String> {
        std::mem::take(&mut *self.downloads.lock().unwrap())
    }
}

#[async_trait]
impl RemoteStore for MemoryShare {
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        let files = self.files.lock().unwrap();
        let mut out: BTreeMap<String, RemoteEntry> = BTreeMap::new();
        for (p, (etag, body)) in files.iter() {
            let Some(rest) = p.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    let dir_path = format!("{}{}", prefix, dir);
                    out.entry(dir_path.clone()).or_insert(RemoteEntry {
                        path: dir_path,
                        is_dir: true,
                        content_type: None,
                        size: None,
                        last_modified: None,
                        etag: None,
                    });
                }
                None => {
                    out.insert(
                        p.clone(),
                        RemoteEntry {
                            path: p.clone(),
                            is_dir: false,
                            content_type: Some("application/pdf".into()),
                            size: Some(body.len() as i64),
                            last_modified: Some("Mon, 27 Jan 2025 09:30:00 GMT".into()),
                            etag: Some(etag.clone()),
                        },
                    );
                }
            }
        }
        Ok(out.into_values().collect())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        self.downloads.lock().unwrap().push(path.to_string());
        match self.files.lock().unwrap().get(path) {
            Some((_, body)) => Ok(body.clone()),
            None => bail!("404 Not Found: {}", path),
        }
    }
}

fn seeded_share() -> MemoryShare {
    let share = MemoryShare::new();
    share.put("2. TENERIFE/Liga/R1 resultados.pdf", "\"a1\"", LIGA_R1);
    share.put("2. TENERIFE/Liga/R2 resultados.pdf", "\"b1\"", LIGA_R2);
    share.put("2. TENERIFE/Cartel navidad.pdf", "\"c1\"", FLYER);
    share.put("3. GRAN CANARIA/otros.pdf", "\"d1\"", LIGA_R2);
    share
}

async fn test_pool() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config = Config::minimal(tmp.path().join("data").join("swim.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, pool)
}

async fn rows_of(pool: &SqlitePool, path: &str) -> Vec<(String, Option<f64>, String)> {
    sqlx::query_as(
        "SELECT swimmer_key, time_seconds, raw_line FROM results WHERE file_path = ? ORDER BY id",
    )
    .bind(path)
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn first_sync_ingests_scope_recursively() {
    let (_tmp, pool) = test_pool().await;
    let share = seeded_share();
    let syncer = Syncer::new(&pool, &share, &PlainTextPages);

    let c = syncer.sync_one_scope("2. TENERIFE", "2024-25").await.unwrap();
    assert_eq!(c.pdfs_found, 3);
    assert_eq!(c.processed, 3);
    assert_eq!(c.results_docs, 2);
    assert_eq!(c.non_results_docs, 1);
    assert_eq!(c.rows_written, 5);
    assert_eq!(c.skipped_unchanged, 0);

    // The other scope was not touched.
    assert!(store::get_file(&pool, "3. GRAN CANARIA/otros.pdf")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn ranked_line_becomes_one_row() {
    let (_tmp, pool) = test_pool().await;
    let share = seeded_share();
    Syncer::new(&pool, &share, &PlainTextPages)
        .sync_one_scope("2. TENERIFE", "2024-25")
        .await
        .unwrap();

    let (event, sex, age, time, date, category): (String, String, i64, f64, String, String) =
        sqlx::query_as(
            "SELECT event, sex, age, time_seconds, meet_date_iso, category FROM results \
             WHERE swimmer_key = 'GARCIA ANA'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(event, "100m Libre");
    assert_eq!(sex, "FEM");
    assert_eq!(age, 8);
    assert!((time - 62.45).abs() < 1e-9);
    assert_eq!(date, "2024-12-14");
    assert_eq!(category, "2. TENERIFE");
}

#[tokio::test]
async fn second_sync_downloads_nothing() {
    let (_tmp, pool) = test_pool().await;
    let share = seeded_share();
    let syncer = Syncer::new(&pool, &share, &PlainTextPages);

    syncer.sync_one_scope("2. TENERIFE", "2024-25").await.unwrap();
    assert_eq!(share.take_downloads().len(), 3);
    let before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM results")
        .fetch_one(&pool)
        .await
        .unwrap();

    let c = syncer.sync_one_scope("2. TENERIFE", "2024-25").await.unwrap();
    assert!(share.take_downloads().is_empty());
    assert_eq!(c.pdfs_found, 3);
    assert_eq!(c.skipped_unchanged, 3);
    assert_eq!(c.processed, 0);
    assert_eq!(c.rows_written, 0);

    let after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM results")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn changed_document_replaces_only_its_rows() {
    let (_tmp, pool) = test_pool().await;
    let share = seeded_share();
    let syncer = Syncer::new(&pool, &share, &PlainTextPages);
    syncer.sync_one_scope("2. TENERIFE", "2024-25").await.unwrap();
    share.take_downloads();

    let r1 = "2. TENERIFE/Liga/R1 resultados.pdf";
    let r2 = "2. TENERIFE/Liga/R2 resultados.pdf";
    let r2_before = rows_of(&pool, r2).await;

    // Corrected sheet: one swimmer disqualified afterwards.
    let corrected = LIGA_R1.replace("2. DIAZ, Lucia 08 CN Tenerife 1:02.00\n", "");
    share.put(r1, "\"a2\"", &corrected);

    let c = syncer.sync_one_scope("2. TENERIFE", "2024-25").await.unwrap();
    assert_eq!(share.take_downloads(), vec![r1.to_string()]);
    assert_eq!(c.processed, 1);
    assert_eq!(c.skipped_unchanged, 2);
    assert_eq!(c.rows_written, 2);

    let keys: Vec<String> = rows_of(&pool, r1).await.into_iter().map(|r| r.0).collect();
    assert_eq!(keys, vec!["PEREZ LOPEZ MARTA", "GARCIA ANA"]);
    assert_eq!(rows_of(&pool, r2).await, r2_before);

    let file = store::get_file(&pool, r1).await.unwrap().unwrap();
    assert_eq!(file.etag.as_deref(), Some("\"a2\""));
}

#[tokio::test]
async fn many_scopes_share_one_tag() {
    let (_tmp, pool) = test_pool().await;
    let share = seeded_share();
    let c = Syncer::new(&pool, &share, &PlainTextPages)
        .sync_many_scopes(&["2. TENERIFE", "3. GRAN CANARIA"], "2024-25")
        .await
        .unwrap();
    assert_eq!(c.dirs, 2);
    assert_eq!(c.pdfs_found, 4);
    assert_eq!(c.rows_written, 7);

    let tags: Vec<String> = sqlx::query_scalar("SELECT DISTINCT dataset_tag FROM results")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(tags, vec!["2024-25"]);
}

#[tokio::test]
async fn deleting_a_file_removes_its_rows() {
    let (_tmp, pool) = test_pool().await;
    let share = seeded_share();
    Syncer::new(&pool, &share, &PlainTextPages)
        .sync_one_scope("2. TENERIFE", "2024-25")
        .await
        .unwrap();

    let r1 = "2. TENERIFE/Liga/R1 resultados.pdf";
    assert_eq!(store::count_results_for_file(&pool, r1).await.unwrap(), 3);
    assert!(store::delete_file(&pool, r1).await.unwrap());
    assert_eq!(store::count_results_for_file(&pool, r1).await.unwrap(), 0);
    assert!(!store::delete_file(&pool, r1).await.unwrap());
}

#[tokio::test]
async fn directory_browsing() {
    let share = seeded_share();
    let top = webdav::list_directories(&share, "").await.unwrap();
    assert_eq!(top, vec!["2. TENERIFE", "3. GRAN CANARIA"]);

    let all = webdav::list_directories_recursive(&share, "", 6).await;
    assert_eq!(all, vec!["2. TENERIFE", "2. TENERIFE/Liga", "3. GRAN CANARIA"]);

    let shallow = webdav::list_directories_recursive(&share, "", 1).await;
    assert_eq!(shallow, top);
}

//! Persistence operations over the SQLite store.
//!
//! A document's stored result set is always the output of its latest
//! successful parse: rows are replaced wholesale, never patched, and the
//! metadata upsert that records the new fingerprint commits in the same
//! transaction as the replacement.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::detect::Detection;
use crate::models::{FileRecord, Fingerprint, RemoteEntry, ResultRow};

/// `YYYY-MM-DD` from an ISO-8601 string or an RFC 2822 HTTP date.
pub fn normalize_iso(value: Option<&str>) -> Option<String> {
    let v = value?.trim();
    if v.is_empty() {
        return None;
    }
    let bytes = v.as_bytes();
    if v.len() >= 10 && bytes[4] == b'-' && bytes[7] == b'-' {
        return v.get(..10).map(str::to_string);
    }
    chrono::DateTime::parse_from_rfc2822(v)
        .ok()
        .map(|dt| dt.date_naive().format("%Y-%m-%d").to_string())
}

/// Persisted `(etag, size)` for a path, if the document was seen before.
pub async fn stored_fingerprint(pool: &SqlitePool, path: &str) -> Result<Option<Fingerprint>> {
    let row: Option<(Option<String>, Option<i64>)> =
        sqlx::query_as("SELECT etag, size FROM files WHERE path = ?")
            .bind(path)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(etag, size)| Fingerprint { etag, size }))
}

/// Whether a listed entry must be downloaded and processed.
pub async fn file_is_new_or_changed(pool: &SqlitePool, entry: &RemoteEntry) -> Result<bool> {
    Ok(match stored_fingerprint(pool, &entry.path).await? {
        None => true,
        Some(stored) => stored != entry.fingerprint(),
    })
}

/// Insert or update the `files` row for a document.
pub async fn upsert_file(
    conn: &mut SqliteConnection,
    entry: &RemoteEntry,
    detection: &Detection,
    dataset_tag: &str,
) -> Result<()> {
    let last_modified_iso = normalize_iso(entry.last_modified.as_deref());
    sqlx::query(
        r#"
        INSERT INTO files
            (path, etag, size, last_modified_raw, last_modified_iso,
             is_results, results_score, dataset_tag)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            etag = excluded.etag,
            size = excluded.size,
            last_modified_raw = excluded.last_modified_raw,
            last_modified_iso = excluded.last_modified_iso,
            is_results = excluded.is_results,
            results_score = excluded.results_score,
            dataset_tag = excluded.dataset_tag
        "#,
    )
    .bind(&entry.path)
    .bind(&entry.etag)
    .bind(entry.size)
    .bind(&entry.last_modified)
    .bind(&last_modified_iso)
    .bind(detection.is_results as i64)
    .bind(detection.score)
    .bind(dataset_tag)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Delete every result of `file_path` and insert `rows`. Runs on the
/// caller's connection so it can share a transaction.
pub async fn replace_results(
    conn: &mut SqliteConnection,
    file_path: &str,
    rows: &[ResultRow],
) -> Result<u64> {
    sqlx::query("DELETE FROM results WHERE file_path = ?")
        .bind(file_path)
        .execute(&mut *conn)
        .await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO results (
                file_path, category, event, swimmer, swimmer_key, sex, age,
                dataset_tag, time_seconds, raw_line, meet_date_iso,
                meet_name, event_category
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file_path)
        .bind(&row.category)
        .bind(&row.event)
        .bind(&row.swimmer)
        .bind(&row.swimmer_key)
        .bind(&row.sex)
        .bind(row.age)
        .bind(&row.dataset_tag)
        .bind(row.time_seconds)
        .bind(&row.raw_line)
        .bind(&row.meet_date_iso)
        .bind(&row.meet_name)
        .bind(&row.event_category)
        .execute(&mut *conn)
        .await?;
    }

    Ok(rows.len() as u64)
}

/// Record a processed document: metadata upsert plus full row replacement,
/// committed together. Returns the number of rows written.
pub async fn store_document(
    pool: &SqlitePool,
    entry: &RemoteEntry,
    detection: &Detection,
    rows: &[ResultRow],
    dataset_tag: &str,
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    upsert_file(&mut tx, entry, detection, dataset_tag).await?;
    let written = replace_results(&mut tx, &entry.path, rows).await?;
    tx.commit().await?;
    debug!(path = %entry.path, rows = written, score = detection.score, "stored document");
    Ok(written)
}

/// Replace the rows of an already recorded document in one transaction.
pub async fn replace_results_for_file(
    pool: &SqlitePool,
    file_path: &str,
    rows: &[ResultRow],
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let written = replace_results(&mut tx, file_path, rows).await?;
    tx.commit().await?;
    Ok(written)
}

/// Remove a document's metadata; its results go with it.
pub async fn delete_file(pool: &SqlitePool, path: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM files WHERE path = ?")
        .bind(path)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn get_file(pool: &SqlitePool, path: &str) -> Result<Option<FileRecord>> {
    let row = sqlx::query(
        "SELECT path, etag, size, last_modified_raw, last_modified_iso, is_results, \
         results_score, dataset_tag FROM files WHERE path = ?",
    )
    .bind(path)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(FileRecord {
        path: row.try_get("path")?,
        etag: row.try_get("etag")?,
        size: row.try_get("size")?,
        last_modified_raw: row.try_get("last_modified_raw")?,
        last_modified_iso: row.try_get("last_modified_iso")?,
        is_results: row.try_get::<i64, _>("is_results")? != 0,
        results_score: row.try_get("results_score")?,
        dataset_tag: row
            .try_get::<Option<String>, _>("dataset_tag")?
            .unwrap_or_default(),
    }))
}

pub async fn count_results_for_file(pool: &SqlitePool, path: &str) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM results WHERE file_path = ?")
        .bind(path)
        .fetch_one(pool)
        .await?;
    Ok(n)
}

// ============ Included categories ============

/// A remote directory registered as a sync scope for this store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncludedCategory {
    pub path: String,
    pub enabled: bool,
    pub added_at_iso: Option<String>,
    pub note: String,
}

fn clean_paths<S: AsRef<str>>(paths: &[S]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.as_ref().trim().trim_matches('/').to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

pub async fn list_included_categories(
    pool: &SqlitePool,
    enabled_only: bool,
) -> Result<Vec<IncludedCategory>> {
    let sql = if enabled_only {
        "SELECT category_path, enabled, added_at_iso, note FROM included_categories \
         WHERE enabled = 1 ORDER BY category_path"
    } else {
        "SELECT category_path, enabled, added_at_iso, note FROM included_categories \
         ORDER BY category_path"
    };
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    rows.iter()
        .map(|row| -> Result<IncludedCategory> {
            Ok(IncludedCategory {
                path: row.try_get("category_path")?,
                enabled: row.try_get::<i64, _>("enabled")? != 0,
                added_at_iso: row.try_get("added_at_iso")?,
                note: row
                    .try_get::<Option<String>, _>("note")?
                    .unwrap_or_default(),
            })
        })
        .collect()
}

/// Register directories as sync scopes. Re-adding a disabled directory
/// enables it again. Returns the cleaned paths.
pub async fn add_included_categories<S: AsRef<str>>(
    pool: &SqlitePool,
    paths: &[S],
) -> Result<Vec<String>> {
    let paths = clean_paths(paths);
    let mut tx = pool.begin().await?;
    for path in &paths {
        sqlx::query(
            r#"
            INSERT INTO included_categories (category_path, enabled)
            VALUES (?, 1)
            ON CONFLICT(category_path) DO UPDATE SET enabled = 1
            "#,
        )
        .bind(path)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(paths)
}

/// Returns how many registrations were removed.
pub async fn remove_included_categories<S: AsRef<str>>(
    pool: &SqlitePool,
    paths: &[S],
) -> Result<u64> {
    let mut removed = 0;
    let mut tx = pool.begin().await?;
    for path in clean_paths(paths) {
        removed += sqlx::query("DELETE FROM included_categories WHERE category_path = ?")
            .bind(&path)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;
    Ok(removed)
}

/// Returns false when the directory is not registered.
pub async fn set_category_enabled(pool: &SqlitePool, path: &str, enabled: bool) -> Result<bool> {
    let res = sqlx::query("UPDATE included_categories SET enabled = ? WHERE category_path = ?")
        .bind(enabled as i64)
        .bind(path.trim().trim_matches('/'))
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::minimal(tmp.path().join("swim.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        (tmp, pool)
    }

    fn entry(path: &str, etag: &str, size: i64) -> RemoteEntry {
        RemoteEntry {
            path: path.to_string(),
            is_dir: false,
            content_type: Some("application/pdf".into()),
            size: Some(size),
            last_modified: Some("Sat, 14 Dec 2024 10:00:00 GMT".into()),
            etag: Some(etag.to_string()),
        }
    }

    fn row(swimmer: &str, seconds: f64) -> ResultRow {
        ResultRow {
            category: "2. TENERIFE".into(),
            event: "100m Libre".into(),
            swimmer: swimmer.into(),
            swimmer_key: crate::normalize::normalize_swimmer_key(swimmer),
            sex: Some("FEM".into()),
            age: Some(12),
            dataset_tag: "2024-25".into(),
            time_seconds: Some(seconds),
            raw_line: format!("1. {} 12 {}", swimmer, seconds),
            meet_date_iso: Some("2024-12-14".into()),
            meet_name: None,
            event_category: Some("ALEVÍN".into()),
        }
    }

    const RESULTS: Detection = Detection {
        is_results: true,
        score: 12,
    };

    #[test]
    fn iso_from_http_date_or_iso() {
        assert_eq!(
            normalize_iso(Some("Sat, 14 Dec 2024 10:00:00 GMT")).as_deref(),
            Some("2024-12-14")
        );
        assert_eq!(
            normalize_iso(Some("2024-03-07T09:00:00Z")).as_deref(),
            Some("2024-03-07")
        );
        assert_eq!(normalize_iso(Some("yesterday")), None);
        assert_eq!(normalize_iso(Some("  ")), None);
        assert_eq!(normalize_iso(None), None);
    }

    #[tokio::test]
    async fn fingerprint_drives_change_detection() {
        let (_tmp, pool) = test_pool().await;
        let e = entry("a/r1.pdf", "\"v1\"", 100);
        assert!(file_is_new_or_changed(&pool, &e).await.unwrap());

        store_document(&pool, &e, &RESULTS, &[], "t").await.unwrap();
        assert!(!file_is_new_or_changed(&pool, &e).await.unwrap());

        let new_etag = entry("a/r1.pdf", "\"v2\"", 100);
        assert!(file_is_new_or_changed(&pool, &new_etag).await.unwrap());
        let new_size = entry("a/r1.pdf", "\"v1\"", 101);
        assert!(file_is_new_or_changed(&pool, &new_size).await.unwrap());
    }

    #[tokio::test]
    async fn store_replaces_rows_wholesale() {
        let (_tmp, pool) = test_pool().await;
        let e = entry("a/r1.pdf", "\"v1\"", 100);

        let n = store_document(
            &pool,
            &e,
            &RESULTS,
            &[row("GARCIA, Ana", 62.45), row("DIAZ, Lucia", 64.0)],
            "2024-25",
        )
        .await
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(count_results_for_file(&pool, "a/r1.pdf").await.unwrap(), 2);

        store_document(&pool, &e, &RESULTS, &[row("PEREZ, Marta", 63.1)], "2024-25")
            .await
            .unwrap();
        assert_eq!(count_results_for_file(&pool, "a/r1.pdf").await.unwrap(), 1);

        let file = get_file(&pool, "a/r1.pdf").await.unwrap().unwrap();
        assert!(file.is_results);
        assert_eq!(file.results_score, 12);
        assert_eq!(file.last_modified_iso.as_deref(), Some("2024-12-14"));
        assert_eq!(file.dataset_tag, "2024-25");
    }

    #[tokio::test]
    async fn non_results_document_clears_rows() {
        let (_tmp, pool) = test_pool().await;
        let e = entry("a/r1.pdf", "\"v1\"", 100);
        store_document(&pool, &e, &RESULTS, &[row("GARCIA, Ana", 62.45)], "t")
            .await
            .unwrap();

        let flyer = Detection {
            is_results: false,
            score: 2,
        };
        store_document(&pool, &entry("a/r1.pdf", "\"v2\"", 90), &flyer, &[], "t")
            .await
            .unwrap();
        assert_eq!(count_results_for_file(&pool, "a/r1.pdf").await.unwrap(), 0);
        let file = get_file(&pool, "a/r1.pdf").await.unwrap().unwrap();
        assert!(!file.is_results);
        assert_eq!(file.results_score, 2);
    }

    #[tokio::test]
    async fn deleting_file_cascades() {
        let (_tmp, pool) = test_pool().await;
        let e = entry("a/r1.pdf", "\"v1\"", 100);
        store_document(&pool, &e, &RESULTS, &[row("GARCIA, Ana", 62.45)], "t")
            .await
            .unwrap();
        assert!(delete_file(&pool, "a/r1.pdf").await.unwrap());
        assert_eq!(count_results_for_file(&pool, "a/r1.pdf").await.unwrap(), 0);
        assert!(!delete_file(&pool, "a/r1.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn rows_without_file_are_rejected() {
        let (_tmp, pool) = test_pool().await;
        let err = replace_results_for_file(&pool, "missing.pdf", &[row("X, Y", 30.0)]).await;
        assert!(err.is_err(), "foreign key must reject orphan rows");
        assert_eq!(count_results_for_file(&pool, "missing.pdf").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn category_lifecycle() {
        let (_tmp, pool) = test_pool().await;
        let added = add_included_categories(&pool, &["/2. TENERIFE/", "1. GRAN CANARIA", "  "])
            .await
            .unwrap();
        assert_eq!(added, vec!["2. TENERIFE", "1. GRAN CANARIA"]);

        assert!(set_category_enabled(&pool, "2. TENERIFE", false).await.unwrap());
        assert!(!set_category_enabled(&pool, "nope", false).await.unwrap());

        let enabled = list_included_categories(&pool, true).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].path, "1. GRAN CANARIA");

        // Re-adding re-enables.
        add_included_categories(&pool, &["2. TENERIFE"]).await.unwrap();
        let all = list_included_categories(&pool, true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|c| c.enabled));
        assert!(all[0].added_at_iso.is_some());

        assert_eq!(
            remove_included_categories(&pool, &["1. GRAN CANARIA/"]).await.unwrap(),
            1
        );
        assert_eq!(list_included_categories(&pool, false).await.unwrap().len(), 1);
    }
}

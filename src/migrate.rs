use anyhow::Result;
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::Config;
use crate::db;

/// Columns added after the first schema version. Applying one to a store
/// that already has it fails with "duplicate column name", which is ignored.
const ADDITIVE_COLUMNS: &[&str] = &[
    "ALTER TABLE files ADD COLUMN dataset_tag TEXT DEFAULT ''",
    "ALTER TABLE results ADD COLUMN dataset_tag TEXT DEFAULT ''",
    "ALTER TABLE results ADD COLUMN meet_name TEXT",
    "ALTER TABLE results ADD COLUMN event_category TEXT",
];

/// Create or upgrade the store named in the config.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create missing tables and indexes, then apply additive columns.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            path TEXT PRIMARY KEY,
            etag TEXT,
            size INTEGER,
            last_modified_raw TEXT,
            last_modified_iso TEXT,
            is_results INTEGER NOT NULL DEFAULT 0,
            results_score INTEGER NOT NULL DEFAULT 0,
            dataset_tag TEXT DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL,
            category TEXT,
            event TEXT,
            swimmer TEXT,
            swimmer_key TEXT,
            sex TEXT,
            age INTEGER,
            dataset_tag TEXT DEFAULT '',
            time_seconds REAL,
            raw_line TEXT,
            meet_date_iso TEXT,
            meet_name TEXT,
            event_category TEXT,
            FOREIGN KEY (file_path) REFERENCES files(path) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS included_categories (
            category_path TEXT PRIMARY KEY,
            enabled INTEGER NOT NULL DEFAULT 1,
            added_at_iso TEXT DEFAULT (DATE('now')),
            note TEXT DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    for &sql in ADDITIVE_COLUMNS {
        match sqlx::query(sql).execute(pool).await {
            Ok(_) => debug!(sql, "applied additive migration"),
            Err(e) if is_duplicate_column(&e) => {}
            Err(e) => return Err(e.into()),
        }
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_results_lookup \
         ON results (dataset_tag, sex, age, event, swimmer_key)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_file_path ON results (file_path)")
        .execute(pool)
        .await?;

    Ok(())
}

fn is_duplicate_column(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.message().contains("duplicate column"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn column_names(pool: &SqlitePool, table: &str) -> Vec<String> {
        sqlx::query_scalar(&format!("SELECT name FROM pragma_table_info('{}')", table))
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::minimal(tmp.path().join("swim.sqlite"));
        run_migrations(&config).await.unwrap();
        run_migrations(&config).await.unwrap();

        let pool = db::connect(&config).await.unwrap();
        let cols = column_names(&pool, "results").await;
        assert!(cols.contains(&"meet_name".to_string()));
        assert!(cols.contains(&"event_category".to_string()));
    }

    #[tokio::test]
    async fn legacy_store_gains_new_columns() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::minimal(tmp.path().join("legacy.sqlite"));
        let pool = db::connect(&config).await.unwrap();

        sqlx::query(
            "CREATE TABLE files (path TEXT PRIMARY KEY, etag TEXT, size INTEGER, \
             last_modified_raw TEXT, last_modified_iso TEXT, is_results INTEGER, \
             results_score INTEGER)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE results (id INTEGER PRIMARY KEY AUTOINCREMENT, file_path TEXT, \
             category TEXT, event TEXT, swimmer TEXT, swimmer_key TEXT, sex TEXT, age INTEGER, \
             time_seconds REAL, raw_line TEXT, meet_date_iso TEXT, \
             FOREIGN KEY (file_path) REFERENCES files(path) ON DELETE CASCADE)",
        )
        .execute(&pool)
        .await
        .unwrap();

        apply(&pool).await.unwrap();

        assert!(column_names(&pool, "files")
            .await
            .contains(&"dataset_tag".to_string()));
        let cols = column_names(&pool, "results").await;
        for col in ["dataset_tag", "meet_name", "event_category"] {
            assert!(cols.contains(&col.to_string()), "missing {col}");
        }
    }
}

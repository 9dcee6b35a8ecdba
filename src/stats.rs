//! Database statistics and health overview.
//!
//! Summarizes what a store holds: documents seen (results vs. other),
//! result rows per dataset tag, and registered sync scopes. Used by
//! `swim stats` to check that a sync did what was expected.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::{db, migrate};

/// Per-tag breakdown of result rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagStats {
    pub tag: String,
    pub documents: i64,
    pub results: i64,
    pub swimmers: i64,
    /// Latest meet date among the tag's rows.
    pub latest_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreOverview {
    pub files: i64,
    pub results_files: i64,
    pub non_results_files: i64,
    pub results: i64,
    pub untimed_results: i64,
    pub categories: i64,
    pub enabled_categories: i64,
    pub by_tag: Vec<TagStats>,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<StoreOverview> {
    let (files, results_files): (i64, i64) =
        sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(is_results), 0) FROM files")
            .fetch_one(pool)
            .await?;

    let (results, untimed_results): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN time_seconds IS NULL THEN 1 ELSE 0 END), 0) \
         FROM results",
    )
    .fetch_one(pool)
    .await?;

    let (categories, enabled_categories): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(enabled), 0) FROM included_categories",
    )
    .fetch_one(pool)
    .await?;

    let tag_rows = sqlx::query(
        r#"
        SELECT
            COALESCE(dataset_tag, '') AS tag,
            COUNT(DISTINCT file_path) AS documents,
            COUNT(*) AS results,
            COUNT(DISTINCT swimmer_key) AS swimmers,
            MAX(meet_date_iso) AS latest_date
        FROM results
        GROUP BY COALESCE(dataset_tag, '')
        ORDER BY tag
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut by_tag = Vec::with_capacity(tag_rows.len());
    for row in &tag_rows {
        by_tag.push(TagStats {
            tag: row.try_get("tag")?,
            documents: row.try_get("documents")?,
            results: row.try_get("results")?,
            swimmers: row.try_get("swimmers")?,
            latest_date: row.try_get("latest_date")?,
        });
    }

    Ok(StoreOverview {
        files,
        results_files,
        non_results_files: files - results_files,
        results,
        untimed_results,
        categories,
        enabled_categories,
        by_tag,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let overview = collect_stats(&pool).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&overview)?);
        return Ok(());
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("swimstats: database stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!(
        "  Documents:   {} ({} results, {} other)",
        overview.files, overview.results_files, overview.non_results_files
    );
    println!("  Results:     {}", overview.results);
    if overview.untimed_results > 0 {
        println!("  Untimed:     {}", overview.untimed_results);
    }
    println!(
        "  Scopes:      {} ({} enabled)",
        overview.categories, overview.enabled_categories
    );

    if !overview.by_tag.is_empty() {
        println!();
        println!("  By dataset tag:");
        println!(
            "  {:<16} {:>6} {:>9} {:>9}   {}",
            "TAG", "DOCS", "RESULTS", "SWIMMERS", "LATEST MEET"
        );
        println!("  {}", "-".repeat(62));
        for t in &overview.by_tag {
            let tag = if t.tag.is_empty() { "(none)" } else { t.tag.as_str() };
            println!(
                "  {:<16} {:>6} {:>9} {:>9}   {}",
                tag,
                t.documents,
                t.results,
                t.swimmers,
                t.latest_date.as_deref().unwrap_or("-")
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

//! Read-side queries for reports.
//!
//! Every query can be narrowed by a set of dataset tags and an inclusive
//! ISO date range. Dates compare against the row's meet date, falling back
//! to the document's last-modified date; rows with neither are always
//! included.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

/// Optional narrowing shared by all queries. Empty tags mean every tag.
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    pub tags: Vec<String>,
    /// Inclusive lower bound, `YYYY-MM-DD`.
    pub date_from: Option<String>,
    /// Inclusive upper bound, `YYYY-MM-DD`.
    pub date_to: Option<String>,
}

const ROW_DATE: &str = "COALESCE(r.meet_date_iso, f.last_modified_iso)";

impl ResultFilter {
    fn tags(&self) -> Vec<&str> {
        self.tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// SQL conditions (each starting with `AND`) plus their parameters, in
    /// bind order. Expects `results r LEFT JOIN files f`.
    fn clause(&self) -> (String, Vec<String>) {
        let tags = self.tags();
        let mut sql = String::new();
        let mut params: Vec<String> = Vec::new();

        if !tags.is_empty() {
            let placeholders = vec!["?"; tags.len()].join(",");
            sql.push_str(&format!(" AND r.dataset_tag IN ({})", placeholders));
            params.extend(tags.iter().map(|t| t.to_string()));
        }
        sql.push_str(&format!(
            " AND ({d} IS NULL OR {d} >= ?) AND ({d} IS NULL OR {d} <= ?)",
            d = ROW_DATE
        ));
        params.push(
            self.date_from
                .clone()
                .unwrap_or_else(|| "0001-01-01".to_string()),
        );
        params.push(
            self.date_to
                .clone()
                .unwrap_or_else(|| "9999-12-31".to_string()),
        );
        (sql, params)
    }
}

/// Distinct non-empty dataset tags.
pub async fn dataset_tags(pool: &SqlitePool) -> Result<Vec<String>> {
    let tags: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT dataset_tag FROM results \
         WHERE dataset_tag IS NOT NULL AND dataset_tag <> '' ORDER BY dataset_tag",
    )
    .fetch_all(pool)
    .await?;
    Ok(tags)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwimmerSummary {
    pub swimmer_key: String,
    pub swimmer: String,
    pub results: i64,
}

/// Swimmers of one `(sex, YY)` group, most results first.
pub async fn swimmers(
    pool: &SqlitePool,
    filter: &ResultFilter,
    sex: &str,
    yy: i64,
) -> Result<Vec<SwimmerSummary>> {
    let tags = filter.tags();
    let tag_sql = if tags.is_empty() {
        String::new()
    } else {
        format!(" AND dataset_tag IN ({})", vec!["?"; tags.len()].join(","))
    };
    let sql = format!(
        "SELECT swimmer_key, MIN(swimmer) AS swimmer, COUNT(*) AS n \
         FROM results WHERE 1=1{} AND sex = ? AND age = ? \
         GROUP BY swimmer_key ORDER BY n DESC, swimmer ASC",
        tag_sql
    );

    let mut q = sqlx::query_as::<_, (String, String, i64)>(&sql);
    for tag in tags {
        q = q.bind(tag);
    }
    let rows = q.bind(sex).bind(yy).fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(|(swimmer_key, swimmer, results)| SwimmerSummary {
            swimmer_key,
            swimmer,
            results,
        })
        .collect())
}

/// Events in which a swimmer has a timed result.
pub async fn swimmer_events(
    pool: &SqlitePool,
    filter: &ResultFilter,
    sex: &str,
    yy: i64,
    swimmer_key: &str,
) -> Result<Vec<String>> {
    let (cond, params) = filter.clause();
    let sql = format!(
        "SELECT DISTINCT r.event FROM results r LEFT JOIN files f ON f.path = r.file_path \
         WHERE r.sex = ? AND r.age = ? AND r.swimmer_key = ? AND r.time_seconds IS NOT NULL \
         AND r.event IS NOT NULL AND r.event <> ''{} ORDER BY r.event",
        cond
    );

    let mut q = sqlx::query_scalar::<_, String>(&sql)
        .bind(sex)
        .bind(yy)
        .bind(swimmer_key);
    for p in params {
        q = q.bind(p);
    }
    Ok(q.fetch_all(pool).await?)
}

/// Best time on a given date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    /// `YYYY-MM-DD`, or empty when the row has no date at all.
    pub date: String,
    pub time_seconds: f64,
}

/// A swimmer's best time per date for one event, oldest first.
pub async fn swimmer_series(
    pool: &SqlitePool,
    filter: &ResultFilter,
    sex: &str,
    yy: i64,
    swimmer_key: &str,
    event: &str,
) -> Result<Vec<SeriesPoint>> {
    let (cond, params) = filter.clause();
    let sql = format!(
        "SELECT {d} AS day, MIN(r.time_seconds) AS best \
         FROM results r LEFT JOIN files f ON f.path = r.file_path \
         WHERE r.sex = ? AND r.age = ? AND r.swimmer_key = ? AND r.event = ? \
         AND r.time_seconds IS NOT NULL{c} \
         GROUP BY {d} ORDER BY {d} ASC",
        d = ROW_DATE,
        c = cond
    );

    let mut q = sqlx::query_as::<_, (Option<String>, f64)>(&sql)
        .bind(sex)
        .bind(yy)
        .bind(swimmer_key)
        .bind(event);
    for p in params {
        q = q.bind(p);
    }
    let rows = q.fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(|(date, time_seconds)| SeriesPoint {
            date: date.unwrap_or_default(),
            time_seconds,
        })
        .collect())
}

/// Every timed result of an event within a `(sex, YY)` group.
pub async fn event_times(
    pool: &SqlitePool,
    filter: &ResultFilter,
    sex: &str,
    yy: i64,
    event: &str,
) -> Result<Vec<f64>> {
    let (cond, params) = filter.clause();
    let sql = format!(
        "SELECT r.time_seconds FROM results r LEFT JOIN files f ON f.path = r.file_path \
         WHERE r.sex = ? AND r.age = ? AND r.event = ? AND r.time_seconds IS NOT NULL{}",
        cond
    );

    let mut q = sqlx::query_scalar::<_, f64>(&sql)
        .bind(sex)
        .bind(yy)
        .bind(event);
    for p in params {
        q = q.bind(p);
    }
    Ok(q.fetch_all(pool).await?)
}

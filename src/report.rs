//! Per-swimmer event report.
//!
//! For each event a swimmer has swum, combines their best-per-date series
//! with the distribution of every time in their `(sex, YY)` group: group
//! percentiles, the swimmer's percentile positions and a rank estimate.
//! Rendering is plain text or JSON; charts are left to other tools.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::analysis::{
    compute_percentiles, percentile_position, rank_estimate, seconds_to_time_str,
    PercentilePosition, RankEstimate, DEFAULT_PERCENTILES,
};
use crate::config::Config;
use crate::query::{self, ResultFilter, SeriesPoint};
use crate::{db, migrate};

/// Minimum group size before percentiles are reported.
pub const DEFAULT_MIN_N: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwimmerStanding {
    pub best: f64,
    pub last: f64,
    pub best_position: PercentilePosition,
    pub last_position: PercentilePosition,
    pub rank: RankEstimate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventReport {
    pub event: String,
    pub series: Vec<SeriesPoint>,
    /// Number of times in the group for this event.
    pub field: usize,
    /// `(percentile, seconds)`; empty when the field is below the minimum.
    pub percentiles: Vec<(f64, f64)>,
    /// Absent when the field is below the minimum or the series is empty.
    pub standing: Option<SwimmerStanding>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwimmerReport {
    pub swimmer_key: String,
    pub sex: String,
    pub yy: i64,
    pub events: Vec<EventReport>,
}

fn event_report(event: String, series: Vec<SeriesPoint>, times: &[f64], min_n: usize) -> EventReport {
    if times.len() < min_n {
        return EventReport {
            event,
            series,
            field: times.len(),
            percentiles: Vec::new(),
            standing: None,
        };
    }

    let best = series
        .iter()
        .map(|p| p.time_seconds)
        .min_by(f64::total_cmp);
    let last = series.last().map(|p| p.time_seconds);
    let standing = match (best, last) {
        (Some(best), Some(last)) => {
            match (percentile_position(times, best), percentile_position(times, last)) {
                (Some(best_position), Some(last_position)) => Some(SwimmerStanding {
                    best,
                    last,
                    best_position,
                    last_position,
                    rank: rank_estimate(times, best),
                }),
                _ => None,
            }
        }
        _ => None,
    };

    EventReport {
        event,
        series,
        field: times.len(),
        percentiles: compute_percentiles(times, &DEFAULT_PERCENTILES),
        standing,
    }
}

pub async fn build_swimmer_report(
    pool: &SqlitePool,
    filter: &ResultFilter,
    sex: &str,
    yy: i64,
    swimmer_key: &str,
    min_n: usize,
) -> Result<SwimmerReport> {
    let mut events = Vec::new();
    for event in query::swimmer_events(pool, filter, sex, yy, swimmer_key).await? {
        let series = query::swimmer_series(pool, filter, sex, yy, swimmer_key, &event).await?;
        let times = query::event_times(pool, filter, sex, yy, &event).await?;
        events.push(event_report(event, series, &times, min_n));
    }
    Ok(SwimmerReport {
        swimmer_key: swimmer_key.to_string(),
        sex: sex.to_string(),
        yy,
        events,
    })
}

/// Arguments of `swim report`.
#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub sex: String,
    pub yy: i64,
    pub swimmer_key: String,
    pub filter: ResultFilter,
    pub min_n: usize,
}

pub async fn run_report(config: &Config, req: &ReportRequest, json: bool) -> Result<()> {
    for date in [&req.filter.date_from, &req.filter.date_to].into_iter().flatten() {
        if chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            bail!("invalid date '{}', expected YYYY-MM-DD", date);
        }
    }

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let key = crate::normalize::normalize_swimmer_key(&req.swimmer_key);
    let sex = req.sex.trim().to_uppercase();
    let report = build_swimmer_report(&pool, &req.filter, &sex, req.yy, &key, req.min_n).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}  {} YY{:02}", report.swimmer_key, report.sex, report.yy);
    if report.events.is_empty() {
        println!("  no timed results");
        return Ok(());
    }

    for ev in &report.events {
        println!();
        println!("  {}  (field: {})", ev.event, ev.field);
        for point in &ev.series {
            let date = if point.date.is_empty() {
                "undated"
            } else {
                point.date.as_str()
            };
            println!("    {:<10}  {}", date, seconds_to_time_str(point.time_seconds));
        }
        if ev.percentiles.is_empty() {
            println!(
                "    not enough results for percentiles (minimum {})",
                req.min_n
            );
            continue;
        }
        let pcts: Vec<String> = ev
            .percentiles
            .iter()
            .map(|(p, v)| format!("P{}={}", p, seconds_to_time_str(*v)))
            .collect();
        println!("    group: {}", pcts.join("  "));
        if let Some(s) = &ev.standing {
            println!(
                "    best {}  P{:.1}  faster than {:.1}%  rank ~{}/{}  ties {:.1}%",
                seconds_to_time_str(s.best),
                s.best_position.p_time,
                s.best_position.faster_than,
                s.rank.rank,
                s.rank.field,
                s.rank.tie_share
            );
            println!(
                "    last {}  P{:.1}  faster than {:.1}%",
                seconds_to_time_str(s.last),
                s.last_position.p_time,
                s.last_position.faster_than
            );
        }
    }
    Ok(())
}

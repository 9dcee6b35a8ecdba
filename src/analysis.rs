//! Percentile and rank math over a field of times.
//!
//! All functions take times in seconds; lower is better.

use serde::Serialize;

/// Percentiles reported for every event group.
pub const DEFAULT_PERCENTILES: [f64; 5] = [0.01, 25.0, 50.0, 75.0, 99.9];

/// Linear-interpolated quantiles (the "linear" method: position
/// `(n - 1) * p / 100` between the two nearest order statistics).
///
/// Returns `(p, value)` pairs in the order of `percentiles`, or an empty
/// vector when there are no times.
pub fn compute_percentiles(times: &[f64], percentiles: &[f64]) -> Vec<(f64, f64)> {
    let mut sorted: Vec<f64> = times.iter().copied().filter(|t| t.is_finite()).collect();
    if sorted.is_empty() {
        return Vec::new();
    }
    sorted.sort_by(f64::total_cmp);

    let last = (sorted.len() - 1) as f64;
    percentiles
        .iter()
        .map(|&p| {
            let pos = (p / 100.0).clamp(0.0, 1.0) * last;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            (p, sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
        })
        .collect()
}

/// Where a time sits in the field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentilePosition {
    /// Share of times `<=` the value (its percentile as a time).
    pub p_time: f64,
    /// Share of times `>=` the value (how many it is at least as fast as).
    pub faster_than: f64,
}

pub fn percentile_position(times: &[f64], value: f64) -> Option<PercentilePosition> {
    if times.is_empty() {
        return None;
    }
    let n = times.len() as f64;
    let le = times.iter().filter(|&&t| t <= value).count() as f64;
    let ge = times.iter().filter(|&&t| t >= value).count() as f64;
    Some(PercentilePosition {
        p_time: 100.0 * le / n,
        faster_than: 100.0 * ge / n,
    })
}

/// Estimated placing of a time within the field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankEstimate {
    /// `1 + number of strictly faster times`.
    pub rank: usize,
    pub field: usize,
    /// Percentage of the field with exactly this time.
    pub tie_share: f64,
}

pub fn rank_estimate(times: &[f64], value: f64) -> RankEstimate {
    let field = times.len();
    let faster = times.iter().filter(|&&t| t < value).count();
    let ties = times.iter().filter(|&&t| t == value).count();
    RankEstimate {
        rank: 1 + faster,
        field,
        tie_share: if field > 0 {
            100.0 * ties as f64 / field as f64
        } else {
            0.0
        },
    }
}

/// `M:SS.cc` above a minute, `SS.cc` below. Non-finite input yields "".
pub fn seconds_to_time_str(seconds: f64) -> String {
    if !seconds.is_finite() {
        return String::new();
    }
    let hundredths = (seconds * 100.0).round() as i64;
    let minutes = hundredths / 6000;
    let rest = hundredths % 6000;
    if minutes > 0 {
        format!("{}:{:02}.{:02}", minutes, rest / 100, rest % 100)
    } else {
        format!("{}.{:02}", rest / 100, rest % 100)
    }
}

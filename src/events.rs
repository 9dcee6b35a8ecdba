//! Event classification.
//!
//! Maps free-text event descriptions ("100 m Libre", "50 FLY", "200m Estilos
//! Absoluto") to a canonical `{distance, stroke}` pair. Stroke names come in
//! Spanish and English spellings plus abbreviations.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::normalize::collapse_whitespace;

/// Canonical stroke categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stroke {
    Freestyle,
    Backstroke,
    Breaststroke,
    Butterfly,
    Medley,
}

impl Stroke {
    pub const ALL: [Stroke; 5] = [
        Stroke::Freestyle,
        Stroke::Backstroke,
        Stroke::Breaststroke,
        Stroke::Butterfly,
        Stroke::Medley,
    ];

    /// Canonical key stored alongside events.
    pub fn canonical(&self) -> &'static str {
        match self {
            Stroke::Freestyle => "LIBRE",
            Stroke::Backstroke => "ESPALDA",
            Stroke::Breaststroke => "BRAZA",
            Stroke::Butterfly => "MARIPOSA",
            Stroke::Medley => "ESTILOS",
        }
    }

    /// Capitalized form used in event display names.
    pub fn display(&self) -> &'static str {
        match self {
            Stroke::Freestyle => "Libre",
            Stroke::Backstroke => "Espalda",
            Stroke::Breaststroke => "Braza",
            Stroke::Butterfly => "Mariposa",
            Stroke::Medley => "Estilos",
        }
    }

    /// Surface tokens recognized for this stroke.
    pub fn variants(&self) -> &'static [&'static str] {
        match self {
            Stroke::Freestyle => &["LIBRE", "LIBRES", "CROL", "CRAWL", "FREE", "FREESTYLE"],
            Stroke::Backstroke => &["ESPALDA", "BACK", "BACKSTROKE"],
            Stroke::Breaststroke => &["BRAZA", "BRASA", "BREAST", "BREASTSTROKE"],
            Stroke::Butterfly => &["MARIPOSA", "FLY", "BUTTERFLY"],
            Stroke::Medley => &["ESTILOS", "MEDLEY", "IM"],
        }
    }

    /// Resolve a surface token (any case) to its stroke.
    pub fn from_token(token: &str) -> Option<Stroke> {
        let t = token.trim().to_uppercase();
        Stroke::ALL
            .into_iter()
            .find(|s| s.variants().iter().any(|v| *v == t))
    }
}

/// Result of [`normalize_event_name`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    pub name: String,
    pub distance: Option<u32>,
    pub stroke: Option<Stroke>,
}

/// Distance, optional unit marker, stroke token. Variants are ordered
/// longest first so `FREESTYLE` wins over `FREE`.
static EVENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    let mut variants: Vec<&str> = Stroke::ALL
        .iter()
        .flat_map(|s| s.variants().iter().copied())
        .collect();
    variants.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    variants.dedup();
    let alternation = variants
        .iter()
        .map(|v| regex::escape(v))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r"(?i)\b(?P<dist>\d{{2,4}})\s*(?:m\b)?\s*(?P<stroke>{alternation})\b"
    ))
    .unwrap()
});

/// First 2–4 digit run that is not part of a longer number.
static BARE_DISTANCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)(\d{2,4})(?:\D|$)").unwrap());

fn event_display(distance: u32, stroke: Stroke) -> String {
    format!("{}m {}", distance, stroke.display())
}

/// Normalize a raw event description.
///
/// On a stroke match returns `"{distance}m {Stroke}"`. Otherwise the
/// whitespace-collapsed input is kept as the name and the distance is the
/// first standalone 2–4 digit run, so `"4x100 Estilos"` yields distance 100
/// and no stroke.
pub fn normalize_event_name(raw: &str) -> NormalizedEvent {
    let s = collapse_whitespace(raw);
    if let Some(caps) = EVENT_RE.captures(&s) {
        let stroke = Stroke::from_token(&caps["stroke"]);
        if let (Ok(distance), Some(stroke)) = (caps["dist"].parse::<u32>(), stroke) {
            return NormalizedEvent {
                name: event_display(distance, stroke),
                distance: Some(distance),
                stroke: Some(stroke),
            };
        }
    }
    let distance = BARE_DISTANCE
        .captures(&s)
        .and_then(|c| c[1].parse::<u32>().ok());
    NormalizedEvent {
        name: s,
        distance,
        stroke: None,
    }
}

/// Split an event header remainder into the canonical event name and the
/// surrounding qualifier text (category, heat), uppercased.
///
/// `"100 m Libre Alevín"` → `("100m Libre", Some("ALEVÍN"))`.
pub fn extract_event_and_category(text: &str) -> (String, Option<String>) {
    let s = collapse_whitespace(text);
    let Some(caps) = EVENT_RE.captures(&s) else {
        return (normalize_event_name(&s).name, None);
    };
    let Some(whole) = caps.get(0) else {
        return (normalize_event_name(&s).name, None);
    };

    let event = match (caps["dist"].parse::<u32>(), Stroke::from_token(&caps["stroke"])) {
        (Ok(distance), Some(stroke)) => event_display(distance, stroke),
        _ => normalize_event_name(&s).name,
    };

    let residual = format!("{} {}", &s[..whole.start()], &s[whole.end()..]);
    let residual = collapse_whitespace(&residual).to_uppercase();
    let category = if residual.is_empty() {
        None
    } else {
        Some(residual)
    };
    (event, category)
}

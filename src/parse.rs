//! Result extraction from meet-manager result sheets.
//!
//! Works line by line over the extracted text of each page. The extractor
//! keeps two pieces of state: the meet header (read once from the top of the
//! first page) and the current event, replaced whenever an event header line
//! (`PRUEBA 3 FEM., 100 m Libre Alevín`) goes by. Every other line is either
//! a ranked result (`3. GARCIA, Ana 08 CN Tenerife 1:02.45`) or noise.
//!
//! Malformed lines are dropped, never reported as errors.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::events::extract_event_and_category;
use crate::models::{MeetHeader, ParsedResult, UNKNOWN_EVENT};
use crate::normalize::{collapse_whitespace, normalize_display_name, time_to_seconds};

/// Number of lines at the top of the first page searched for the meet header.
const HEADER_LINES: usize = 10;

const MEET_NAME_KEYWORDS: &[&str] = &["LIGA", "CONTROL", "CAMPEON", "TROFEO"];
const NON_FINISH_PREFIXES: &[&str] = &["DSQ", "NP", "BAJA", "DNS", "DNF"];

static PLACE_DATE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<place>.+),\s*(?P<date>\d{1,2}/\d{1,2}/\d{4})\s*$").unwrap());

static EVENT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:PRUEBA|EVENT)\s+(?P<num>\d+)\s+(?P<sex>FEM\.|MASC\.)\s*,?\s*(?P<rest>.+?)\s*$",
    )
    .unwrap()
});

static TIME_AT_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<time>\d+:\d{2}(?:[.,]\s*\d{1,2})?|\d{1,3}[.,]\s*\d{1,2})\s*$").unwrap()
});

static RANK_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{1,3}\.\s+").unwrap());
static RANK_PREFIX_AT_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,3}\.\s+$").unwrap());

static NAME_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-ZÁÉÍÓÚÜÑ][A-ZÁÉÍÓÚÜÑ ]+,\s*[A-Za-zÁÉÍÓÚÜÑáéíóúüñ]").unwrap()
});

static TRAILING_DELTA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+[+-]\d{1,3}[.,]\d{2}\s*$").unwrap());
static TRAILING_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\d{1,5}\s*$").unwrap());
static TRAILING_POINTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\d{1,4},\d{2}\s*$").unwrap());
static TRAILING_DASH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*[-–—]\s*$").unwrap());

static SHORT_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{1,2}\b").unwrap());
static RANK_OR_NUMBER_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{1,3}$").unwrap());

/// The event block currently being read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CurrentEvent {
    pub number: Option<u32>,
    pub sex: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
}

/// Running extractor state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractorState {
    pub meet: MeetHeader,
    pub event: CurrentEvent,
}

/// What a single (already split) line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// Event header; state was updated.
    EventHeader,
    /// Disqualified, absent or withdrawn entry.
    NonFinish,
    /// Header, footer or page noise.
    NoData,
    /// Looked like a result but the time token did not parse.
    BadTime,
    Result(ParsedResult),
}

/// Read meet name, place and date from the top lines of the first page.
pub fn read_meet_header(lines: &[&str]) -> MeetHeader {
    let mut meet = MeetHeader::default();
    for line in lines.iter().take(HEADER_LINES) {
        let up = line.to_uppercase();
        if meet.name.is_none() && MEET_NAME_KEYWORDS.iter().any(|k| up.contains(k)) {
            meet.name = Some(line.trim().to_string());
        }
        if meet.date.is_none() {
            if let Some(caps) = PLACE_DATE_LINE.captures(line) {
                meet.place = Some(caps["place"].trim().to_string());
                meet.date = Some(caps["date"].trim().to_string());
            }
        }
    }
    meet
}

/// Split a physical line holding several `SURNAME, Name` entries into one
/// sub-line per entry. A rank prefix right before a name travels with it.
pub fn split_multi_swimmer_line(line: &str) -> Vec<String> {
    let mut starts: Vec<usize> = NAME_START.find_iter(line).map(|m| m.start()).collect();
    if starts.len() <= 1 {
        return vec![line.to_string()];
    }

    for start in starts.iter_mut().skip(1) {
        if let Some(rank) = RANK_PREFIX_AT_END.find(&line[..*start]) {
            *start = rank.start();
        }
    }
    starts[0] = 0;
    starts.push(line.len());

    starts
        .windows(2)
        .map(|w| line[w[0]..w[1]].trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Remove trailing score deltas, points columns and placeholder dashes so
/// the finish time ends the line.
///
/// The passes repeat until nothing changes, since columns can appear in
/// either order (`1:05.10 +0,72 512`).
pub fn strip_trailing_noise(line: &str) -> String {
    let mut s = line.trim_end().to_string();
    loop {
        let before = s.len();
        s = TRAILING_DELTA.replace(&s, "").into_owned();
        // `1:02. 45`: the trailing digits are the time's own fraction.
        let without_integer = TRAILING_INTEGER.replace(&s, "");
        if !without_integer.trim_end().ends_with(['.', ',']) {
            s = without_integer.into_owned();
        }
        // A comma decimal may be the finish time itself; only drop it when
        // a time token is still left at the end.
        let without_points = TRAILING_POINTS.replace(&s, "");
        if TIME_AT_END.is_match(&without_points) {
            s = without_points.into_owned();
        }
        s = TRAILING_DASH.replace(&s, "").into_owned();
        if s.len() == before {
            return s;
        }
    }
}

/// Split the text before the time token into swimmer name and two-digit
/// birth year.
///
/// Glued columns are pulled apart first (`Lola12A.D.` → `Lola 12 A.D.`);
/// then the rightmost 1–2 digit number is the birth year and everything
/// before it is the name.
pub fn extract_name_and_birth_year(prefix: &str) -> (String, Option<u8>) {
    let s = collapse_whitespace(&RANK_PREFIX.replace(prefix.trim(), ""));
    let s = collapse_whitespace(&unglue_columns(&s));

    if let Some(m) = SHORT_NUMBER.find_iter(&s).last() {
        if m.start() > 0 {
            if let Ok(yy) = m.as_str().parse::<u8>() {
                return (normalize_display_name(&s[..m.start()]), Some(yy));
            }
        }
    }

    let name: Vec<&str> = s
        .split(' ')
        .take_while(|t| !RANK_OR_NUMBER_TOKEN.is_match(t))
        .collect();
    (normalize_display_name(&name.join(" ")), None)
}

fn unglue_columns(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev: Option<char> = None;
    for c in s.chars() {
        if let Some(p) = prev {
            let letter_digit = p.is_alphabetic() && c.is_ascii_digit();
            let digit_letter = p.is_ascii_digit() && c.is_alphabetic();
            if letter_digit || digit_letter {
                out.push(' ');
            }
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Run one line through the state machine.
pub fn classify_line(line: &str, state: &mut ExtractorState) -> LineKind {
    let line = line.trim();

    if let Some(caps) = EVENT_LINE.captures(line) {
        let (name, category) = extract_event_and_category(&caps["rest"]);
        state.event = CurrentEvent {
            number: caps["num"].parse().ok(),
            sex: Some(caps["sex"].replace('.', "").to_uppercase()),
            name: Some(name),
            category,
        };
        return LineKind::EventHeader;
    }

    let up = line.to_uppercase();
    if NON_FINISH_PREFIXES.iter().any(|p| up.starts_with(p)) {
        return LineKind::NonFinish;
    }

    let cleaned = strip_trailing_noise(line);
    let Some(caps) = TIME_AT_END.captures(&cleaned) else {
        return LineKind::NoData;
    };
    if !RANK_PREFIX.is_match(&cleaned) {
        return LineKind::NoData;
    }
    let Some(time_match) = caps.name("time") else {
        return LineKind::NoData;
    };

    let time_str: String = time_match
        .as_str()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let Ok(time_seconds) = time_to_seconds(&time_str) else {
        return LineKind::BadTime;
    };

    let (swimmer, birth_year) = extract_name_and_birth_year(&cleaned[..time_match.start()]);

    LineKind::Result(ParsedResult {
        meet: state.meet.clone(),
        event_num: state.event.number,
        sex: state.event.sex.clone(),
        event: state
            .event
            .name
            .clone()
            .unwrap_or_else(|| UNKNOWN_EVENT.to_string()),
        event_category: state.event.category.clone(),
        swimmer,
        birth_year,
        time_seconds,
        raw_line: line.to_string(),
    })
}

/// Extract all results from a document's pages, in page then line order.
pub fn parse_pages(pages: &[String]) -> Vec<ParsedResult> {
    let mut state = ExtractorState::default();
    let mut rows = Vec::new();

    for (page_idx, text) in pages.iter().enumerate() {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        if page_idx == 0 {
            state.meet = read_meet_header(&lines);
        }

        for physical in &lines {
            for line in split_multi_swimmer_line(physical) {
                if let LineKind::Result(row) = classify_line(&line, &mut state) {
                    rows.push(row);
                }
            }
        }
    }

    rows
}

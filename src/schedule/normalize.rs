use std::sync::OnceLock;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use regex::Regex;

use super::models::{MatchRecord, MatchStatus, RawMatch, Score};

/// Naive timestamp layouts accepted besides RFC 3339 and the site's own format.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M",
];

/// Source states that mark a fixture as not being played as scheduled.
const POSTPONED_MARKERS: &[&str] = &["postpone", "cancel", "ppd", "abandon", "suspend"];

/// Collapse runs of whitespace (including non-breaking spaces) and trim.
pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn score_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d{1,3})\s*[-:]\s*(\d{1,3})\s*$").expect("score regex is valid"))
}

/// Parse "4 - 2", "4-2" or "4:2".
pub fn parse_score(s: &str) -> Option<Score> {
    let caps = score_re().captures(s)?;
    Some(Score {
        home: caps[1].parse().ok()?,
        away: caps[2].parse().ok()?,
    })
}

pub fn classify_status(score: Option<Score>, state: Option<&str>) -> MatchStatus {
    let postponed = state
        .map(|s| s.to_lowercase())
        .is_some_and(|s| POSTPONED_MARKERS.iter().any(|m| s.contains(m)));

    if postponed {
        MatchStatus::Postponed
    } else if score.is_some() {
        MatchStatus::Completed
    } else {
        MatchStatus::Scheduled
    }
}

/// Parse a source timestamp into the canonical offset-aware form.
///
/// Timestamps without an offset are taken as local time in `offset`. The
/// site's own format (`Wed 09/03 7:15 PM`) has no year: the year is chosen
/// among the reference year and its neighbours so the weekday matches and the
/// date lands closest to `reference`.
pub fn parse_date(
    s: &str,
    offset: FixedOffset,
    reference: NaiveDate,
) -> Option<DateTime<FixedOffset>> {
    let s = normalize_ws(s);

    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt.with_timezone(&offset));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&s, fmt).ok())
        .or_else(|| parse_yearless(&s, reference))?;

    offset.from_local_datetime(&naive).single()
}

fn parse_yearless(s: &str, reference: NaiveDate) -> Option<NaiveDateTime> {
    let (weekday, rest) = match s.split_once(' ') {
        Some((first, rest)) if first.chars().all(|c| c.is_ascii_alphabetic()) => {
            (Some(first.to_lowercase()), rest)
        }
        _ => (None, s),
    };

    let year = reference.year();
    (year - 1..=year + 1)
        .filter_map(|y| NaiveDateTime::parse_from_str(&format!("{} {}", rest, y), "%m/%d %I:%M %p %Y").ok())
        .filter(|dt| match &weekday {
            Some(w) => {
                let day = dt.format("%a").to_string().to_lowercase();
                w.len() >= 3 && (w.starts_with(&day) || day.starts_with(w.as_str()))
            }
            None => true,
        })
        .min_by_key(|dt| (dt.date() - reference).num_days().abs())
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| normalize_ws(&v)).filter(|v| !v.is_empty())
}

/// Validate a raw entry and build a `MatchRecord` from it.
pub fn normalize_match(
    raw: RawMatch,
    offset: FixedOffset,
    reference: NaiveDate,
) -> Result<MatchRecord, String> {
    let date_str = clean(raw.date).ok_or("missing date")?;
    let date = parse_date(&date_str, offset, reference)
        .ok_or_else(|| format!("unrecognized date '{}'", date_str))?;
    let home_team = clean(raw.home_team).ok_or("missing home team")?;
    let away_team = clean(raw.away_team).ok_or("missing away team")?;

    let score = clean(raw.score).and_then(|s| parse_score(&s));
    let state = clean(raw.state);
    let status = classify_status(score, state.as_deref());

    Ok(MatchRecord {
        date,
        home_team,
        away_team,
        competition: clean(raw.competition),
        venue: clean(raw.venue),
        score,
        status,
    })
}

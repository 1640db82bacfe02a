//! iCalendar (RFC 5545) rendering of match records, and the reverse
//! direction for checking exported files.
//!
//! Round-tripping is lossy: only kick-off instant and the two team names come
//! back. Competition, venue, score and status are flattened into the event
//! description, and start times are written in UTC.

use std::collections::HashMap;
use std::io::BufRead;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::schedule::{MatchRecord, MatchStatus};

const PRODID: &str = "-//soccer-schedule//EN";
const MAX_LINE_OCTETS: usize = 75;
const UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Event layout for the exported calendar
#[derive(Debug, Clone)]
pub struct CalendarOptions {
    /// X-WR-CALNAME
    pub name: Option<String>,
    pub game_duration: chrono::Duration,
    /// Display reminder this long before kick-off
    pub alarm_before: Option<chrono::Duration>,
    /// Street address of the facility
    pub location: Option<String>,
}

impl Default for CalendarOptions {
    fn default() -> Self {
        CalendarOptions {
            name: None,
            game_duration: chrono::Duration::minutes(45),
            alarm_before: Some(chrono::Duration::minutes(40)),
            location: None,
        }
    }
}

/// What survives a write/read cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEntry {
    pub start: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
}

impl From<&MatchRecord> for CalendarEntry {
    fn from(record: &MatchRecord) -> Self {
        CalendarEntry {
            start: record.date.with_timezone(&Utc),
            home_team: record.home_team.clone(),
            away_team: record.away_team.clone(),
        }
    }
}

pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

pub fn unescape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Fold a content line into chunks of at most 75 octets (continuation lines
/// count their leading space). Breaks never split a character and, where the
/// chunk allows it, never sit next to whitespace, since some readers trim it.
fn fold_line(line: &str) -> String {
    if line.len() <= MAX_LINE_OCTETS {
        return line.to_string();
    }
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len() + line.len() / 37);
    let mut start = 0;

    while start < chars.len() {
        let budget = if start == 0 { MAX_LINE_OCTETS } else { MAX_LINE_OCTETS - 1 };
        let mut end = start;
        let mut width = 0;
        while end < chars.len() && width + chars[end].len_utf8() <= budget {
            width += chars[end].len_utf8();
            end += 1;
        }
        if end < chars.len() {
            let greedy = end;
            while end > start + 1 && (chars[end - 1].is_whitespace() || chars[end].is_whitespace()) {
                end -= 1;
            }
            if end == start + 1 {
                end = greedy;
            }
        }

        if start > 0 {
            out.push_str("\r\n ");
        }
        out.extend(&chars[start..end]);
        start = end;
    }
    out
}

fn slug(s: &str) -> String {
    let mut out = String::new();
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn event_uid(record: &MatchRecord) -> String {
    format!(
        "{}-{}-vs-{}@soccer-schedule",
        record.date.with_timezone(&Utc).format(UTC_FORMAT),
        slug(&record.home_team),
        slug(&record.away_team)
    )
}

fn description(record: &MatchRecord) -> String {
    let mut lines = Vec::new();
    if let Some(venue) = &record.venue {
        lines.push(venue.clone());
    }
    if let Some(competition) = &record.competition {
        lines.push(competition.clone());
    }
    match (record.status, record.score) {
        (MatchStatus::Postponed, _) => lines.push("Postponed".to_string()),
        (_, Some(score)) => lines.push(format!("Final: {}", score)),
        _ => {}
    }
    lines.push(record.title());
    lines.join("\n")
}

/// Trigger value like `-PT40M`.
fn trigger(before: chrono::Duration) -> String {
    format!("-PT{}M", before.num_minutes().max(0))
}

fn push_event(lines: &mut Vec<String>, record: &MatchRecord, opts: &CalendarOptions, stamp: &str) {
    let start = record.date.with_timezone(&Utc);
    let end = start + opts.game_duration;

    lines.push("BEGIN:VEVENT".into());
    lines.push(format!("UID:{}", event_uid(record)));
    lines.push(format!("DTSTAMP:{}", stamp));
    lines.push(format!("DTSTART:{}", start.format(UTC_FORMAT)));
    lines.push(format!("DTEND:{}", end.format(UTC_FORMAT)));
    lines.push(format!("SUMMARY:{}", escape_text(&record.title())));
    if let Some(location) = &opts.location {
        lines.push(format!("LOCATION:{}", escape_text(location)));
    }
    lines.push(format!("DESCRIPTION:{}", escape_text(&description(record))));
    let status = match record.status {
        MatchStatus::Postponed => "CANCELLED",
        _ => "CONFIRMED",
    };
    lines.push(format!("STATUS:{}", status));
    lines.push(format!("X-HOME-TEAM:{}", escape_text(&record.home_team)));
    lines.push(format!("X-AWAY-TEAM:{}", escape_text(&record.away_team)));
    if let Some(before) = opts.alarm_before {
        lines.push("BEGIN:VALARM".into());
        lines.push("ACTION:DISPLAY".into());
        lines.push(format!("DESCRIPTION:{}", escape_text(&record.title())));
        lines.push(format!("TRIGGER:{}", trigger(before)));
        lines.push("END:VALARM".into());
    }
    lines.push("END:VEVENT".into());
}

/// Render `records` as one VCALENDAR with CRLF line endings.
pub fn render_calendar(
    records: &[MatchRecord],
    opts: &CalendarOptions,
    generated_at: DateTime<Utc>,
) -> String {
    let stamp = generated_at.format(UTC_FORMAT).to_string();

    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        format!("PRODID:{}", PRODID),
        "CALSCALE:GREGORIAN".to_string(),
        "METHOD:PUBLISH".to_string(),
    ];
    if let Some(name) = &opts.name {
        lines.push(format!("X-WR-CALNAME:{}", escape_text(name)));
    }
    for record in records {
        push_event(&mut lines, record, opts, &stamp);
    }
    lines.push("END:VCALENDAR".into());

    let mut out = String::new();
    for line in &lines {
        out.push_str(&fold_line(line));
        out.push_str("\r\n");
    }
    out
}

fn parse_utc(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    let naive = NaiveDateTime::parse_from_str(value, UTC_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S"))
        .with_context(|| format!("unsupported DTSTART '{}'", value))?;
    Ok(naive.and_utc())
}

/// Read back the events of every calendar in `reader`.
pub fn read_calendar<R: BufRead>(reader: R) -> Result<Vec<CalendarEntry>> {
    let mut entries = Vec::new();

    for calendar in ical::IcalParser::new(reader) {
        let calendar = calendar.map_err(|e| anyhow::anyhow!("invalid calendar: {}", e))?;
        for (i, event) in calendar.events.iter().enumerate() {
            let props: HashMap<&str, String> = event
                .properties
                .iter()
                .filter_map(|p| {
                    let value = p.value.as_deref()?.trim_end_matches('\r');
                    Some((p.name.as_str(), unescape_text(value)))
                })
                .collect();

            let start = props
                .get("DTSTART")
                .with_context(|| format!("event {} has no DTSTART", i))
                .and_then(|v| parse_utc(v))?;

            let (home_team, away_team) = match (props.get("X-HOME-TEAM"), props.get("X-AWAY-TEAM")) {
                (Some(home), Some(away)) => (home.clone(), away.clone()),
                _ => {
                    let summary = props
                        .get("SUMMARY")
                        .with_context(|| format!("event {} has no SUMMARY", i))?;
                    let (home, away) = summary
                        .split_once(" vs ")
                        .with_context(|| format!("event {} summary is not 'home vs away'", i))?;
                    (home.trim().to_string(), away.trim().to_string())
                }
            };

            entries.push(CalendarEntry {
                start,
                home_team,
                away_team,
            });
        }
    }

    Ok(entries)
}

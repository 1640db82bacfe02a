//! Payload parsing: turns a team schedule page into raw schedule entries.
//!
//! Two payload shapes are understood:
//! - the league site's HTML team page, where every five-cell table row is a
//!   game (`date | field | home | away | result`) and the season number sits
//!   in the block right after the team header;
//! - a JSON array of match objects, bare or wrapped in an object under
//!   `matches`, `games` or `events`.

use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use super::models::RawMatch;
use super::normalize::{normalize_ws, parse_score};

/// Number of cells in a game row of the team schedule table.
const GAME_ROW_CELLS: usize = 5;

/// Raw content of one team page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    pub season: Option<String>,
    pub entries: Vec<RawMatch>,
}

/// Parse a response body, detecting JSON vs HTML from its first non-blank byte.
pub fn parse_payload(body: &str) -> Result<ParsedPage> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        parse_json(trimmed)
    } else {
        parse_html(body)
    }
}

fn season_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Season:\s*(\d+)").expect("season regex is valid"))
}

// ── JSON ─────────────────────────────────────────────────────────────────────

fn parse_json(body: &str) -> Result<ParsedPage> {
    let raw: Value = serde_json::from_str(body).context("response is not valid JSON")?;

    let items = match &raw {
        Value::Array(items) => items,
        Value::Object(map) => ["matches", "games", "events"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .context("JSON object has no matches/games/events array")?,
        _ => anyhow::bail!("JSON payload is neither an array nor an object"),
    };

    let entries = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<RawMatch>(item.clone())
                .with_context(|| format!("match entry {} has an unexpected shape", i))
        })
        .collect::<Result<Vec<_>>>()?;

    let season = raw.get("season").and_then(|s| match s {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Ok(ParsedPage { season, entries })
}

// ── HTML ─────────────────────────────────────────────────────────────────────

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("Failed to create selector '{}': {}", css, e))
}

fn parse_html(body: &str) -> Result<ParsedPage> {
    let document = Html::parse_document(body);
    let season = extract_season(&document)?;

    let row_selector = selector("tr")?;
    let cell_selector = selector("td")?;
    let span_selector = selector("span")?;

    let entries = document
        .select(&row_selector)
        .filter_map(|row| {
            let cells: Vec<ElementRef> = row.select(&cell_selector).collect();
            if cells.len() != GAME_ROW_CELLS {
                return None;
            }
            Some(game_row(&cells, &span_selector))
        })
        .collect();

    Ok(ParsedPage { season, entries })
}

fn game_row(cells: &[ElementRef], span_selector: &Selector) -> RawMatch {
    let result = non_empty(text_of(&cells[4]));
    let (score, state) = match result {
        Some(r) if parse_score(&r).is_some() => (Some(r), None),
        other => (None, other),
    };

    RawMatch {
        date: non_empty(text_of(&cells[0])),
        venue: non_empty(text_of(&cells[1])),
        home_team: team_cell(&cells[2], span_selector),
        away_team: team_cell(&cells[3], span_selector),
        competition: None,
        score,
        state,
    }
}

/// Team names are wrapped in a `<span>` next to decorations like color chips.
fn team_cell(cell: &ElementRef, span_selector: &Selector) -> Option<String> {
    cell.select(span_selector)
        .map(|span| text_of(&span))
        .find(|t| !t.is_empty())
        .or_else(|| non_empty(text_of(cell)))
}

/// Season number from the block right after the team header, falling back to
/// anywhere on the page.
fn extract_season(document: &Html) -> Result<Option<String>> {
    let header_selector = selector("h4.text-md-40-24")?;

    let near_header = document.select(&header_selector).find_map(|header| {
        let next = header.next_siblings().find_map(ElementRef::wrap)?;
        let text = text_of(&next);
        season_re().captures(&text).map(|c| c[1].to_string())
    });
    if near_header.is_some() {
        return Ok(near_header);
    }

    let all_text = normalize_ws(&document.root_element().text().collect::<String>());
    Ok(season_re().captures(&all_text).map(|c| c[1].to_string()))
}

fn text_of(element: &ElementRef) -> String {
    normalize_ws(&element.text().collect::<String>())
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

pub mod fetcher;
pub mod models;
pub mod normalize;
pub mod parse;
pub mod source;

pub use fetcher::{fetch_team, FetchOptions};
pub use models::{MatchRecord, MatchStatus, TeamSchedule, TeamSummary};
pub use source::{HttpGet, ReqwestSource};

use std::collections::{BTreeMap, HashSet};

use tracing::{info, warn};

/// Outcome of one batch: whatever could be fetched plus what could not.
#[derive(Debug, Clone, Default)]
pub struct ScheduleBatch {
    /// Merged, deduplicated records in kick-off order
    pub results: Vec<MatchRecord>,
    /// Team id -> error description
    pub errors: BTreeMap<String, String>,
    /// Successfully fetched teams, in request order
    pub schedules: Vec<TeamSchedule>,
}

impl ScheduleBatch {
    pub fn team_summaries(&self) -> BTreeMap<String, TeamSummary> {
        self.schedules
            .iter()
            .map(|s| (s.team_id.clone(), TeamSummary::from(s)))
            .collect()
    }
}

/// Preference among duplicates: scored records first, then ones with a
/// definite status, then ones carrying more optional detail.
fn detail_rank(record: &MatchRecord) -> (bool, bool, usize) {
    (
        record.score.is_some(),
        record.status != MatchStatus::Scheduled,
        record.competition.is_some() as usize + record.venue.is_some() as usize,
    )
}

/// Collapse duplicates by `(date, home_team, away_team)` and sort by date,
/// then home team, then away team.
pub fn merge_records<I>(records: I) -> Vec<MatchRecord>
where
    I: IntoIterator<Item = MatchRecord>,
{
    let mut merged: Vec<MatchRecord> = Vec::new();
    for record in records {
        match merged.iter_mut().find(|m| m.key() == record.key()) {
            Some(existing) => {
                if detail_rank(&record) > detail_rank(existing) {
                    *existing = record;
                }
            }
            None => merged.push(record),
        }
    }
    merged.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.home_team.cmp(&b.home_team))
            .then_with(|| a.away_team.cmp(&b.away_team))
    });
    merged
}

/// Fetch every requested team one after another and merge the results.
///
/// Per-team failures land in `errors` and never abort the batch. Repeated
/// identifiers are fetched once.
pub async fn fetch_schedule(
    source: &dyn HttpGet,
    team_ids: &[String],
    opts: &FetchOptions,
) -> ScheduleBatch {
    let mut batch = ScheduleBatch::default();
    if team_ids.is_empty() {
        return batch;
    }

    let mut seen = HashSet::new();
    for raw_id in team_ids {
        let team_id = raw_id.trim();
        if !seen.insert(team_id.to_string()) {
            continue;
        }
        match fetch_team(source, team_id, opts).await {
            Ok(schedule) => batch.schedules.push(schedule),
            Err(e) => {
                warn!("Team '{}' failed: {}", team_id, e);
                let key = e.team_id().unwrap_or(team_id).to_string();
                batch.errors.insert(key, e.to_string());
            }
        }
    }

    batch.results = merge_records(
        batch
            .schedules
            .iter()
            .flat_map(|s| s.records.iter().cloned()),
    );
    info!(
        "Fetched {} match(es) for {} team(s), {} failed",
        batch.results.len(),
        batch.schedules.len(),
        batch.errors.len()
    );
    batch
}

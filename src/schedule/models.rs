use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// One normalized fixture/result entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Kick-off, in the league's UTC offset
    pub date: DateTime<FixedOffset>,
    pub home_team: String,
    pub away_team: String,
    pub competition: Option<String>,
    /// e.g. "Field 3"
    pub venue: Option<String>,
    /// Final score, only for concluded matches
    pub score: Option<Score>,
    pub status: MatchStatus,
}

impl MatchRecord {
    /// Identity used for deduplication.
    pub fn key(&self) -> (DateTime<FixedOffset>, &str, &str) {
        (self.date, &self.home_team, &self.away_team)
    }

    pub fn involves(&self, team: &str) -> bool {
        self.home_team == team || self.away_team == team
    }

    pub fn title(&self) -> String {
        format!("{} vs {}", self.home_team, self.away_team)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.home, self.away)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Scheduled,
    Completed,
    Postponed,
}

/// Schedule entry as extracted from the source payload, before validation.
///
/// JSON sources are deserialized straight into this shape; the HTML table
/// parser fills it cell by cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawMatch {
    #[serde(default, alias = "datetime", alias = "dateTime", alias = "start", alias = "kickoff")]
    pub date: Option<String>,
    #[serde(default, alias = "homeTeam", alias = "home")]
    pub home_team: Option<String>,
    #[serde(default, alias = "awayTeam", alias = "away")]
    pub away_team: Option<String>,
    #[serde(default, alias = "league", alias = "division")]
    pub competition: Option<String>,
    #[serde(default, alias = "field", alias = "location")]
    pub venue: Option<String>,
    #[serde(default, alias = "result")]
    pub score: Option<String>,
    #[serde(default, alias = "status")]
    pub state: Option<String>,
}

/// Matches and metadata scraped for one team identifier
#[derive(Debug, Clone, PartialEq)]
pub struct TeamSchedule {
    pub team_id: String,
    /// Most frequent team name in the team's matches
    pub team_name: Option<String>,
    pub season: Option<String>,
    pub records: Vec<MatchRecord>,
}

/// Per-team summary returned alongside the merged results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub team_name: Option<String>,
    pub season: Option<String>,
    pub match_count: usize,
}

impl From<&TeamSchedule> for TeamSummary {
    fn from(schedule: &TeamSchedule) -> Self {
        TeamSummary {
            team_name: schedule.team_name.clone(),
            season: schedule.season.clone(),
            match_count: schedule.records.len(),
        }
    }
}

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, Utc};
use rand::Rng;
use tracing::{debug, info, warn};
use url::Url;

use super::merge_records;
use super::models::{MatchRecord, TeamSchedule};
use super::normalize::normalize_match;
use super::parse::parse_payload;
use super::source::HttpGet;
use crate::error::ScheduleError;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Settings for one batch of schedule fetches.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Team pages live at `{base_url}/{team_id}`
    pub base_url: Url,
    /// Per-request timeout, enforced by the HTTP source
    pub timeout: Duration,
    /// Retries after the first attempt, transient failures only
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Offset for source timestamps that carry none
    pub utc_offset: FixedOffset,
    /// Anchor for year inference; today in `utc_offset` when unset
    pub reference_date: Option<NaiveDate>,
}

impl FetchOptions {
    fn reference_date(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Utc::now().with_timezone(&self.utc_offset).date_naive())
    }
}

/// Reject identifiers that are empty or unsafe as a URL path segment.
pub fn validate_team_id(team_id: &str) -> Result<(), ScheduleError> {
    let invalid = |reason: &str| ScheduleError::Validation {
        team_id: team_id.to_string(),
        reason: reason.to_string(),
    };

    if team_id.is_empty() {
        return Err(invalid("identifier is empty"));
    }
    if team_id.len() > 64 {
        return Err(invalid("identifier is longer than 64 characters"));
    }
    if !team_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid("only ASCII letters, digits, '-' and '_' are allowed"));
    }
    Ok(())
}

pub fn team_url(base_url: &Url, team_id: &str) -> Result<Url, ScheduleError> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| ScheduleError::Validation {
            team_id: team_id.to_string(),
            reason: format!("base URL {} cannot take a path segment", base_url),
        })?
        .pop_if_empty()
        .push(team_id);
    Ok(url)
}

/// Exponential backoff with up to 25% random jitter, capped at `MAX_BACKOFF`.
fn backoff_delay(base: Duration, retry: u32) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let exp = base.saturating_mul(2u32.saturating_pow(retry)).min(MAX_BACKOFF);
    let jitter_ms = rand::thread_rng().gen_range(0..=(exp.as_millis() as u64) / 4);
    (exp + Duration::from_millis(jitter_ms)).min(MAX_BACKOFF)
}

/// GET `url`, retrying transport errors and transient statuses.
async fn fetch_with_retry(
    source: &dyn HttpGet,
    team_id: &str,
    url: &str,
    opts: &FetchOptions,
) -> Result<String, ScheduleError> {
    let max_attempts = opts.max_retries + 1;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let failure = match source.get(url).await {
            Ok(resp) if resp.is_success() => return Ok(resp.body),
            Ok(resp) if !resp.is_transient() => {
                return Err(ScheduleError::Fetch {
                    team_id: team_id.to_string(),
                    attempts: attempt,
                    reason: format!("HTTP {}", resp.status),
                });
            }
            Ok(resp) => format!("HTTP {}", resp.status),
            Err(e) => format!("{:#}", e),
        };

        if attempt >= max_attempts {
            return Err(ScheduleError::Fetch {
                team_id: team_id.to_string(),
                attempts: attempt,
                reason: failure,
            });
        }

        let delay = backoff_delay(opts.retry_backoff, attempt - 1);
        warn!(
            "Team {}: attempt {}/{} failed ({}), retrying in {:?}",
            team_id, attempt, max_attempts, failure, delay
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// The team name that appears in the most matches; ties go to the
/// lexically smallest name.
pub fn infer_team_name(records: &[MatchRecord]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(&record.home_team).or_default() += 1;
        *counts.entry(&record.away_team).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(name, _)| name.to_string())
}

/// Fetch, parse and normalize the schedule of a single team.
pub async fn fetch_team(
    source: &dyn HttpGet,
    team_id: &str,
    opts: &FetchOptions,
) -> Result<TeamSchedule, ScheduleError> {
    validate_team_id(team_id)?;
    let url = team_url(&opts.base_url, team_id)?;

    let body = fetch_with_retry(source, team_id, url.as_str(), opts).await?;
    debug!("Team {}: fetched {} bytes", team_id, body.len());

    let page = parse_payload(&body).map_err(|e| ScheduleError::Parse {
        team_id: team_id.to_string(),
        reason: format!("{:#}", e),
    })?;

    let reference = opts.reference_date();
    let total = page.entries.len();
    let mut records = Vec::with_capacity(total);
    let mut last_error = None;
    for (i, raw) in page.entries.into_iter().enumerate() {
        match normalize_match(raw, opts.utc_offset, reference) {
            Ok(record) => records.push(record),
            Err(reason) => {
                warn!("Team {}: skipping entry {}: {}", team_id, i, reason);
                last_error = Some(reason);
            }
        }
    }
    if records.is_empty() {
        if let Some(reason) = last_error {
            return Err(ScheduleError::Parse {
                team_id: team_id.to_string(),
                reason: format!("none of {} entries is valid (last: {})", total, reason),
            });
        }
    }

    let team_name = infer_team_name(&records);
    if let Some(name) = &team_name {
        let before = records.len();
        records.retain(|r| r.involves(name));
        if records.len() < before {
            debug!(
                "Team {}: dropped {} match(es) not involving {}",
                team_id,
                before - records.len(),
                name
            );
        }
    }
    let records = merge_records(records);

    info!(
        "Team {} ({}): {} match(es), season {}",
        team_id,
        team_name.as_deref().unwrap_or("unknown"),
        records.len(),
        page.season.as_deref().unwrap_or("unknown")
    );

    Ok(TeamSchedule {
        team_id: team_id.to_string(),
        team_name,
        season: page.season,
        records,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schedule::models::{MatchStatus, Score, TeamSummary};
    use crate::schedule::source::HttpResponse;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    pub(crate) const TEAM_PAGE: &str = include_str!("../../tests/fixtures/team_schedule.html");

    /// Serves canned responses per URL suffix and records every request.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        responses: Mutex<HashMap<String, VecDeque<Result<HttpResponse, String>>>>,
        pub requests: Mutex<Vec<String>>,
    }

    impl FakeSource {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a response for URLs ending in `/{team_id}`; the last queued
        /// response repeats once the queue drains.
        pub fn respond(self, team_id: &str, status: u16, body: &str) -> Self {
            self.push(team_id, Ok(HttpResponse { status, body: body.to_string() }))
        }

        pub fn fail(self, team_id: &str, message: &str) -> Self {
            self.push(team_id, Err(message.to_string()))
        }

        fn push(self, team_id: &str, response: Result<HttpResponse, String>) -> Self {
            self.responses
                .lock()
                .unwrap()
                .entry(team_id.to_string())
                .or_default()
                .push_back(response);
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpGet for FakeSource {
        async fn get(&self, url: &str) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(url.to_string());
            let team_id = url.rsplit('/').next().unwrap_or_default().to_string();
            let mut responses = self.responses.lock().unwrap();
            let queue = responses.get_mut(&team_id);
            let next = match queue {
                Some(q) if q.len() > 1 => q.pop_front(),
                Some(q) => q.front().cloned(),
                None => None,
            };
            match next {
                Some(Ok(resp)) => Ok(resp),
                Some(Err(msg)) => Err(anyhow::anyhow!(msg)),
                None => Ok(HttpResponse { status: 404, body: "not found".into() }),
            }
        }
    }

    pub(crate) fn options() -> FetchOptions {
        FetchOptions {
            base_url: Url::parse("https://example.test/4/teamSchedule").unwrap(),
            timeout: Duration::from_secs(1),
            max_retries: 2,
            retry_backoff: Duration::ZERO,
            utc_offset: FixedOffset::east_opt(-7 * 3600).unwrap(),
            reference_date: NaiveDate::from_ymd_opt(2025, 9, 1),
        }
    }

    #[test]
    fn test_validate_team_id() {
        assert!(validate_team_id("1234").is_ok());
        assert!(validate_team_id("team_a-1").is_ok());
        assert!(matches!(
            validate_team_id(""),
            Err(ScheduleError::Validation { .. })
        ));
        assert!(validate_team_id("12/34").is_err());
        assert!(validate_team_id("12 34").is_err());
        assert!(validate_team_id(&"9".repeat(65)).is_err());
    }

    #[test]
    fn test_team_url_appends_segment() {
        let base = Url::parse("https://example.test/4/teamSchedule").unwrap();
        assert_eq!(
            team_url(&base, "1234").unwrap().as_str(),
            "https://example.test/4/teamSchedule/1234"
        );
        let base = Url::parse("https://example.test/4/teamSchedule/").unwrap();
        assert_eq!(
            team_url(&base, "1234").unwrap().as_str(),
            "https://example.test/4/teamSchedule/1234"
        );
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let base = Duration::from_millis(100);
        let first = backoff_delay(base, 0);
        assert!(first >= base && first <= Duration::from_millis(125));
        let third = backoff_delay(base, 2);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 20), MAX_BACKOFF);
        assert_eq!(backoff_delay(Duration::ZERO, 3), Duration::ZERO);
    }

    #[test]
    fn test_infer_team_name_prefers_most_frequent_then_lexical() {
        let mut records = Vec::new();
        let date = chrono::DateTime::parse_from_rfc3339("2025-09-03T19:15:00-07:00").unwrap();
        for (home, away) in [("B", "A"), ("A", "C"), ("D", "A")] {
            records.push(MatchRecord {
                date,
                home_team: home.into(),
                away_team: away.into(),
                competition: None,
                venue: None,
                score: None,
                status: MatchStatus::Scheduled,
            });
        }
        assert_eq!(infer_team_name(&records).as_deref(), Some("A"));
        assert_eq!(infer_team_name(&records[..1]).as_deref(), Some("A"));
        assert_eq!(infer_team_name(&[]), None);
    }

    #[tokio::test]
    async fn test_fetch_team_from_html_page() {
        let source = FakeSource::new().respond("1234", 200, TEAM_PAGE);
        let schedule = fetch_team(&source, "1234", &options()).await.unwrap();

        assert_eq!(schedule.team_name.as_deref(), Some("Boise Ballers"));
        assert_eq!(schedule.season.as_deref(), Some("37"));
        assert_eq!(schedule.records.len(), 4);
        assert!(schedule.records.iter().all(|r| r.involves("Boise Ballers")));

        let first = &schedule.records[0];
        assert_eq!(first.date.to_rfc3339(), "2025-09-03T19:15:00-07:00");
        assert_eq!(first.score, Some(Score { home: 4, away: 2 }));
        assert_eq!(first.status, MatchStatus::Completed);
        assert_eq!(schedule.records[1].status, MatchStatus::Postponed);
        assert_eq!(schedule.records[2].status, MatchStatus::Scheduled);
        assert_eq!(
            source.requests.lock().unwrap()[0],
            "https://example.test/4/teamSchedule/1234"
        );
    }

    #[tokio::test]
    async fn test_team_records_are_unique_and_sorted() {
        let page = r#"[
            {"date": "2025-09-17 18:30", "home": "Boise Ballers", "away": "Net Gains"},
            {"date": "2025-09-01 20:00", "home": "Net Gains", "away": "Kick Start"},
            {"date": "2025-09-17 18:30", "home": "Boise Ballers", "away": "Net Gains", "score": "3-1"}
        ]"#;
        let source = FakeSource::new().respond("1234", 200, page);
        let schedule = fetch_team(&source, "1234", &options()).await.unwrap();

        assert_eq!(schedule.team_name.as_deref(), Some("Net Gains"));
        assert_eq!(schedule.records.len(), 2);
        assert_eq!(schedule.records[0].away_team, "Kick Start");
        assert_eq!(schedule.records[1].score, Some(Score { home: 3, away: 1 }));
        assert_eq!(TeamSummary::from(&schedule).match_count, 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let source = FakeSource::new()
            .respond("1234", 503, "busy")
            .fail("1234", "connection reset")
            .respond("1234", 200, TEAM_PAGE);
        let schedule = fetch_team(&source, "1234", &options()).await.unwrap();
        assert_eq!(schedule.records.len(), 4);
        assert_eq!(source.request_count(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let source = FakeSource::new().fail("1234", "timed out");
        let err = fetch_team(&source, "1234", &options()).await.unwrap_err();
        match err {
            ScheduleError::Fetch { attempts, reason, .. } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(source.request_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_status_is_not_retried() {
        let source = FakeSource::new();
        let err = fetch_team(&source, "9999", &options()).await.unwrap_err();
        assert!(matches!(err, ScheduleError::Fetch { attempts: 1, .. }));
        assert_eq!(source.request_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_id_makes_no_request() {
        let source = FakeSource::new();
        let err = fetch_team(&source, "../admin", &options()).await.unwrap_err();
        assert!(matches!(err, ScheduleError::Validation { .. }));
        assert_eq!(source.request_count(), 0);
    }

    #[tokio::test]
    async fn test_page_with_only_invalid_entries_is_a_parse_error() {
        let source = FakeSource::new().respond("1234", 200, r#"[{"date": "someday", "home": "A", "away": "B"}]"#);
        let err = fetch_team(&source, "1234", &options()).await.unwrap_err();
        assert!(matches!(err, ScheduleError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_page_without_games_is_empty_not_an_error() {
        let source = FakeSource::new().respond("1234", 200, "<html><body><p>No games yet</p></body></html>");
        let schedule = fetch_team(&source, "1234", &options()).await.unwrap();
        assert!(schedule.records.is_empty());
        assert!(schedule.team_name.is_none());
    }
}

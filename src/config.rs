use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::FixedOffset;
use clap::{Parser, Subcommand};
use url::Url;

use crate::calendar::CalendarOptions;
use crate::schedule::FetchOptions;

/// Upper bound for game length and reminder lead time: one day.
const MAX_CALENDAR_MINUTES: i64 = 24 * 60;

/// Soccer schedule scraper and calendar exporter
#[derive(Parser, Debug, Clone)]
#[command(name = "soccer-schedule", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    /// Base URL of the team schedule pages; the team id is appended as a path segment
    #[arg(
        long,
        env = "SCHEDULE_BASE_URL",
        default_value = "https://www.letsplaysoccer.com/4/teamSchedule",
        global = true
    )]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "10", global = true)]
    pub request_timeout_secs: u64,

    /// Retries after the first attempt for transient network/HTTP failures
    #[arg(long, env = "MAX_RETRIES", default_value = "3", global = true)]
    pub max_retries: u32,

    /// Base delay for exponential retry backoff, in milliseconds
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value = "500", global = true)]
    pub retry_backoff_ms: u64,

    /// UTC offset (hours) of the league's local time, used for naive source timestamps
    #[arg(
        long,
        env = "UTC_OFFSET_HOURS",
        default_value = "-7",
        allow_hyphen_values = true,
        global = true
    )]
    pub utc_offset_hours: i32,

    /// Length of one game in the exported calendar (minutes)
    #[arg(long, env = "GAME_DURATION_MINUTES", default_value = "45", global = true)]
    pub game_duration_minutes: i64,

    /// Reminder before each game in the exported calendar (minutes, 0 disables)
    #[arg(long, env = "ALARM_MINUTES_BEFORE", default_value = "40", global = true)]
    pub alarm_minutes_before: i64,

    /// Street address used as the calendar event location
    #[arg(
        long,
        env = "VENUE_ADDRESS",
        default_value = "Let's Play Soccer, 11448 W President Dr #8967, Boise, ID 83713, USA",
        global = true
    )]
    pub venue_address: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a single invocation: read `{"team_ids": [...]}` JSON and print the result JSON
    Invoke {
        /// Invocation event file (reads stdin when omitted)
        #[arg(long)]
        event: Option<PathBuf>,
    },

    /// Serve invocations over HTTP (`POST /invoke`)
    Serve {
        /// Listen address
        #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        listen_addr: String,
    },

    /// Scrape the given teams and write an iCalendar file
    Export {
        /// Team identifiers (comma separated or repeated)
        #[arg(
            long = "team-ids",
            env = "TEAM_IDS",
            value_delimiter = ',',
            num_args = 1..,
            required = true
        )]
        team_ids: Vec<String>,

        /// Output file, or output directory with --split
        #[arg(long, short, env = "CALENDAR_OUTPUT", default_value = "schedule.ics")]
        output: PathBuf,

        /// Write one `{season}_{team}_{team_id}.ics` file per team into the output directory
        #[arg(long, default_value = "false")]
        split: bool,
    },
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("base_url is not a valid URL: {}", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("base_url must be http or https, got {}", url.scheme());
        }
        if url.cannot_be_a_base() {
            anyhow::bail!("base_url cannot be used as a base URL: {}", self.base_url);
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }
        if self.max_retries > 10 {
            anyhow::bail!("max_retries must be at most 10");
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            anyhow::bail!("utc_offset_hours must be between -12 and 14");
        }
        if !(1..=MAX_CALENDAR_MINUTES).contains(&self.game_duration_minutes) {
            anyhow::bail!(
                "game_duration_minutes must be between 1 and {}",
                MAX_CALENDAR_MINUTES
            );
        }
        if !(0..=MAX_CALENDAR_MINUTES).contains(&self.alarm_minutes_before) {
            anyhow::bail!(
                "alarm_minutes_before must be between 0 and {}",
                MAX_CALENDAR_MINUTES
            );
        }
        Ok(())
    }

    pub fn fetch_options(&self) -> anyhow::Result<FetchOptions> {
        let base_url = Url::parse(&self.base_url).context("Invalid base_url")?;
        let utc_offset = FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .context("utc_offset_hours out of range")?;
        Ok(FetchOptions {
            base_url,
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            utc_offset,
            reference_date: None,
        })
    }

    pub fn calendar_options(&self) -> CalendarOptions {
        CalendarOptions {
            name: None,
            game_duration: chrono::Duration::minutes(self.game_duration_minutes),
            alarm_before: (self.alarm_minutes_before > 0)
                .then(|| chrono::Duration::minutes(self.alarm_minutes_before)),
            location: Some(self.venue_address.clone()).filter(|s| !s.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["soccer-schedule"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_validate() {
        let config = parse(&["invoke"]);
        config.validate().unwrap();
        assert_eq!(config.utc_offset_hours, -7);
        assert_eq!(config.max_retries, 3);

        let opts = config.fetch_options().unwrap();
        assert_eq!(opts.utc_offset.local_minus_utc(), -7 * 3600);
        assert_eq!(opts.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_export_team_ids_comma_separated() {
        let config = parse(&["export", "--team-ids", "111,222", "-o", "out.ics"]);
        match config.command {
            Command::Export { team_ids, output, split } => {
                assert_eq!(team_ids, vec!["111", "222"]);
                assert_eq!(output, PathBuf::from("out.ics"));
                assert!(!split);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = parse(&["invoke"]);
        config.base_url = "ftp://example.com".into();
        assert!(config.validate().is_err());

        let mut config = parse(&["invoke"]);
        config.request_timeout_secs = 0;
        assert!(config.validate().is_err());

        let config = parse(&["invoke", "--utc-offset-hours", "-20"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_calendar_minutes_are_bounded() {
        let config = parse(&["invoke", "--game-duration-minutes", "1440", "--alarm-minutes-before", "1440"]);
        config.validate().unwrap();

        let config = parse(&["invoke", "--game-duration-minutes", "1441"]);
        assert!(config.validate().is_err());

        let config = parse(&["invoke", "--game-duration-minutes", "0"]);
        assert!(config.validate().is_err());

        let config = parse(&["invoke", "--alarm-minutes-before", "9223372036854775807"]);
        assert!(config.validate().is_err());

        let mut config = parse(&["invoke"]);
        config.alarm_minutes_before = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_alarm_disables_reminder() {
        let config = parse(&["invoke", "--alarm-minutes-before", "0"]);
        assert!(config.calendar_options().alarm_before.is_none());
    }
}

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::ics::{read_calendar, render_calendar, CalendarEntry, CalendarOptions};
use crate::error::ScheduleError;
use crate::schedule::{MatchRecord, ScheduleBatch, TeamSchedule};

/// Write `contents` to a temp file next to `path`, ready to be renamed into
/// place. Dropping the returned file deletes it.
fn stage(path: &Path, contents: &str) -> Result<NamedTempFile, ScheduleError> {
    let write_err = |source: std::io::Error| ScheduleError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".soccer-schedule-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    Ok(tmp)
}

/// Write `contents` to `path` through a temp file in the same directory and
/// a rename, so readers see either the old file or the complete new one.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), ScheduleError> {
    // On failure the temp file is dropped along with the error, which deletes it.
    stage(path, contents)?
        .persist(path)
        .map_err(|e| ScheduleError::Write {
            path: path.to_path_buf(),
            source: e.error,
        })?;
    Ok(())
}

/// Render `records` and write them to `path`.
pub fn write_calendar(
    records: &[MatchRecord],
    path: &Path,
    opts: &CalendarOptions,
    generated_at: DateTime<Utc>,
) -> Result<(), ScheduleError> {
    let ics = render_calendar(records, opts, generated_at);
    write_atomic(path, &ics)?;
    info!("Wrote {} event(s) to {}", records.len(), path.display());
    Ok(())
}

/// Re-read a written calendar and check it holds exactly the kick-off and
/// teams of `records`.
pub fn verify_calendar(path: &Path, records: &[MatchRecord]) -> anyhow::Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to reopen {}", path.display()))?;
    let entries = read_calendar(std::io::BufReader::new(file))?;
    let expected: Vec<CalendarEntry> = records.iter().map(CalendarEntry::from).collect();
    if entries != expected {
        anyhow::bail!(
            "{} does not match the exported schedule ({} event(s) read, {} expected)",
            path.display(),
            entries.len(),
            expected.len()
        );
    }
    Ok(())
}

fn file_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string()
}

/// `{season}_{team}_{team_id}.ics`
pub fn team_file_name(schedule: &TeamSchedule) -> String {
    format!(
        "{}_{}_{}.ics",
        file_component(schedule.season.as_deref().unwrap_or("Unknown")),
        file_component(schedule.team_name.as_deref().unwrap_or("Unknown")),
        file_component(&schedule.team_id)
    )
}

/// One calendar per team in `dir`.
///
/// Every file is staged before any is renamed into place. If a rename
/// fails, the files already renamed by this call are removed again.
pub fn write_team_calendars(
    schedules: &[TeamSchedule],
    dir: &Path,
    opts: &CalendarOptions,
    generated_at: DateTime<Utc>,
) -> Result<Vec<PathBuf>, ScheduleError> {
    std::fs::create_dir_all(dir).map_err(|source| ScheduleError::Write {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut staged = Vec::with_capacity(schedules.len());
    for schedule in schedules {
        let path = dir.join(team_file_name(schedule));
        let team_opts = CalendarOptions {
            name: schedule.team_name.clone().or_else(|| opts.name.clone()),
            ..opts.clone()
        };
        let ics = render_calendar(&schedule.records, &team_opts, generated_at);
        staged.push((stage(&path, &ics)?, path, schedule.records.len()));
    }

    let mut written: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for (tmp, path, events) in staged {
        if let Err(e) = tmp.persist(&path) {
            for done in &written {
                if let Err(err) = std::fs::remove_file(done) {
                    warn!("Could not remove {}: {}", done.display(), err);
                }
            }
            return Err(ScheduleError::Write {
                path,
                source: e.error,
            });
        }
        info!("Wrote {} event(s) to {}", events, path.display());
        written.push(path);
    }
    Ok(written)
}

/// Write a fetched batch as one calendar at `output`, or with `split` one
/// calendar per team inside the `output` directory, and verify what was
/// written. Nothing is written when every requested team failed.
pub fn export_batch(
    batch: &ScheduleBatch,
    output: &Path,
    split: bool,
    opts: &CalendarOptions,
    generated_at: DateTime<Utc>,
) -> anyhow::Result<Vec<PathBuf>> {
    if batch.schedules.is_empty() && !batch.errors.is_empty() {
        anyhow::bail!("No team schedule could be fetched; nothing written");
    }

    if split {
        let written = write_team_calendars(&batch.schedules, output, opts, generated_at)?;
        for (path, team) in written.iter().zip(&batch.schedules) {
            verify_calendar(path, &team.records)?;
        }
        return Ok(written);
    }

    let name = match batch.schedules.as_slice() {
        [only] => only.team_name.clone(),
        _ => None,
    };
    let opts = CalendarOptions {
        name: name.or_else(|| opts.name.clone()),
        ..opts.clone()
    };
    write_calendar(&batch.results, output, &opts, generated_at)?;
    verify_calendar(output, &batch.results)?;
    Ok(vec![output.to_path_buf()])
}

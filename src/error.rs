use std::path::PathBuf;

use thiserror::Error;

/// Failure kinds of the schedule pipeline.
///
/// `Validation`, `Fetch` and `Parse` are scoped to one team identifier and end
/// up in the batch error map. `Write` is fatal for the invocation.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid team id '{team_id}': {reason}")]
    Validation { team_id: String, reason: String },

    #[error("fetch failed for team {team_id} after {attempts} attempt(s): {reason}")]
    Fetch {
        team_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("could not parse schedule for team {team_id}: {reason}")]
    Parse { team_id: String, reason: String },

    #[error("failed to write calendar to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScheduleError {
    /// Team identifier the error belongs to, if any.
    pub fn team_id(&self) -> Option<&str> {
        match self {
            ScheduleError::Validation { team_id, .. }
            | ScheduleError::Fetch { team_id, .. }
            | ScheduleError::Parse { team_id, .. } => Some(team_id),
            ScheduleError::Write { .. } => None,
        }
    }
}

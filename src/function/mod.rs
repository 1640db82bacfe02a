//! Cloud-function contract: `{"team_ids": [...]}` in, results plus a per-team
//! error map out. Served over HTTP by `serve` and run once by `invoke`.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::calendar::{render_calendar, CalendarOptions};
use crate::schedule::{fetch_schedule, FetchOptions, HttpGet, MatchRecord, TeamSummary};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationInput {
    #[serde(default)]
    pub team_ids: Vec<String>,
    /// Also return the results rendered as an iCalendar document
    #[serde(default)]
    pub include_calendar: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationOutput {
    pub results: Vec<MatchRecord>,
    pub errors: BTreeMap<String, String>,
    pub teams: BTreeMap<String, TeamSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar: Option<String>,
}

/// Parse an invocation event. A malformed event fails the whole invocation.
pub fn parse_event(raw: &str) -> anyhow::Result<InvocationInput> {
    serde_json::from_str(raw).context("Invocation event is not a valid {\"team_ids\": [...]} object")
}

/// Run one invocation end to end.
pub async fn handle_invocation(
    source: &dyn HttpGet,
    input: &InvocationInput,
    fetch: &FetchOptions,
    calendar_opts: &CalendarOptions,
) -> InvocationOutput {
    info!("Invocation for {} team id(s)", input.team_ids.len());
    let batch = fetch_schedule(source, &input.team_ids, fetch).await;
    let teams = batch.team_summaries();

    let calendar = input.include_calendar.then(|| {
        let name = match batch.schedules.as_slice() {
            [only] => only.team_name.clone(),
            _ => None,
        };
        let opts = CalendarOptions {
            name: name.or_else(|| calendar_opts.name.clone()),
            ..calendar_opts.clone()
        };
        render_calendar(&batch.results, &opts, Utc::now())
    });

    InvocationOutput {
        results: batch.results,
        errors: batch.errors,
        teams,
        calendar,
    }
}

#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn HttpGet>,
    pub fetch: FetchOptions,
    pub calendar: CalendarOptions,
}

/// Build the Axum router for the invocation endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/invoke", post(invoke_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// GET /health
async fn health_handler() -> &'static str {
    "ok"
}

/// POST /invoke
///
/// Malformed bodies are rejected by the `Json` extractor with a 4xx status.
async fn invoke_handler(
    State(state): State<Arc<AppState>>,
    Json(input): Json<InvocationInput>,
) -> Json<InvocationOutput> {
    let output = handle_invocation(state.source.as_ref(), &input, &state.fetch, &state.calendar).await;
    Json(output)
}

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

mod calendar;
mod config;
mod error;
mod function;
mod schedule;

use config::{Command, Config};
use function::AppState;
use schedule::ReqwestSource;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging. stdout is reserved for `invoke` output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    config.validate()?;

    let fetch = config.fetch_options()?;
    let calendar_opts = config.calendar_options();
    let source = ReqwestSource::new(fetch.timeout)?;
    info!(
        "Schedule source: {} (timeout {:?}, {} retries)",
        fetch.base_url, fetch.timeout, fetch.max_retries
    );

    match &config.command {
        Command::Invoke { event } => {
            let raw = match event {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read event file {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read invocation event from stdin")?;
                    buf
                }
            };
            let input = function::parse_event(&raw)?;
            let output = function::handle_invocation(&source, &input, &fetch, &calendar_opts).await;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Serve { listen_addr } => {
            let addr: SocketAddr = listen_addr
                .parse()
                .with_context(|| format!("Invalid listen address {}", listen_addr))?;
            let app = function::router(AppState {
                source: Arc::new(source),
                fetch,
                calendar: calendar_opts,
            });
            info!("Invocation endpoint listening on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }

        Command::Export {
            team_ids,
            output,
            split,
        } => {
            let batch = schedule::fetch_schedule(&source, team_ids, &fetch).await;
            for (team_id, err) in &batch.errors {
                warn!("Skipped team '{}': {}", team_id, err);
            }
            let written = calendar::export_batch(&batch, output, *split, &calendar_opts, Utc::now())?;
            for path in &written {
                info!("Calendar file '{}' created", path.display());
            }

            info!(
                "Processing complete: {} team(s) exported, {} failed",
                batch.schedules.len(),
                batch.errors.len()
            );
        }
    }

    Ok(())
}

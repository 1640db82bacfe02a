use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// Status and body of one HTTP GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Statuses worth retrying: request timeout, rate limiting and server errors.
    pub fn is_transient(&self) -> bool {
        matches!(self.status, 408 | 429) || (500..600).contains(&self.status)
    }
}

/// HTTP capability the fetcher depends on.
///
/// An `Err` is a transport failure (connect error, timeout, broken body) and
/// is always treated as transient.
#[async_trait]
pub trait HttpGet: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// reqwest-backed implementation with a fixed per-request timeout.
#[derive(Clone)]
pub struct ReqwestSource {
    http: Client,
}

impl ReqwestSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("soccer-schedule/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(ReqwestSource { http })
    }
}

#[async_trait]
impl HttpGet for ReqwestSource {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        debug!("GET {}", url);
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .with_context(|| format!("failed to read response body from {}", url))?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_status_classification() {
        assert!(resp(200).is_success());
        assert!(!resp(404).is_success());
        assert!(resp(503).is_transient());
        assert!(resp(429).is_transient());
        assert!(resp(408).is_transient());
        assert!(!resp(404).is_transient());
        assert!(!resp(200).is_transient());
    }
}

use chrono::{DateTime, Utc};
use log::debug;
use reqwest::Client;
use std::time::Duration;
use url::Url;

use crate::error::{Result, TriageError};

/// A successfully fetched bug report, consumed once by the crash table
/// parser. A failed fetch never produces a `RawReport`.
#[derive(Debug, Clone)]
pub struct RawReport {
    /// URL the content was fetched from; crash table links resolve against it
    pub url: Url,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
}

/// HTTP fetch primitive for bug reports and the artifacts they reference.
///
/// Every triage attempt re-fetches; there is no local caching and no
/// automatic retry. A failed fetch is fatal for the bug being triaged, not
/// for the run.
pub struct ReportFetcher {
    client: Client,
}

impl ReportFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("syztriage/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| TriageError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Validate a URL syntactically. Rejected URLs never reach the network.
    pub fn parse_url(raw: &str) -> Result<Url> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TriageError::InvalidUrl {
                url: raw.to_string(),
                reason: "empty URL".to_string(),
            });
        }

        let url = Url::parse(trimmed).map_err(|e| TriageError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(TriageError::InvalidUrl {
                url: raw.to_string(),
                reason: format!("unsupported scheme '{other}'"),
            }),
        }
    }

    pub async fn fetch_report(&self, url: &Url) -> Result<RawReport> {
        let content = self.fetch_text(url).await?;
        Ok(RawReport {
            url: url.clone(),
            content,
            fetched_at: Utc::now(),
        })
    }

    /// Fetch a text artifact (report page, kernel config).
    pub async fn fetch_text(&self, url: &Url) -> Result<String> {
        let response = self.get_checked(url).await?;
        response.text().await.map_err(|e| TriageError::Fetch {
            url: url.to_string(),
            source: e,
        })
    }

    /// Fetch a binary artifact (reproducer source).
    pub async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self.get_checked(url).await?;
        let bytes = response.bytes().await.map_err(|e| TriageError::Fetch {
            url: url.to_string(),
            source: e,
        })?;
        Ok(bytes.to_vec())
    }

    async fn get_checked(&self, url: &Url) -> Result<reqwest::Response> {
        debug!("GET {url}");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| TriageError::Fetch {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TriageError::FetchStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }
}

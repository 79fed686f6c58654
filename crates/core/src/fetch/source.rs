//! Upstream unit source: the directory of a work and per-unit content.
//!
//! Transport-level failures (timeouts, connection errors, non-2xx statuses,
//! undecodable bodies) are reported as [`SourceError`] and retried by the
//! fetcher. Application-level rejections of a unit arrive as a decoded
//! envelope with `success == false`; a rejected directory is
//! [`SourceError::Refused`] and is never retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use super::outcome::{TransientError, UnitRef};
use crate::config::FetchConfig;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("upstream refused the request: {0}")]
    Refused(String),
}

impl SourceError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::Refused(_) | SourceError::Client(_))
    }

    pub fn transient_kind(&self) -> TransientError {
        match self {
            SourceError::Timeout => TransientError::Timeout,
            other => TransientError::Network(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::Status(status.as_u16())
        } else {
            SourceError::Network(e.to_string())
        }
    }
}

/// Body returned for one unit: `{success, content?, message?}`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ContentEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ContentEnvelope {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    #[serde(alias = "id")]
    item_id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct DirectoryEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default, alias = "chapters")]
    data: Vec<DirectoryEntry>,
    #[serde(default)]
    message: Option<String>,
}

/// Remote source of units.
#[async_trait]
pub trait UnitSource: Send + Sync {
    /// Ordered directory of a work.
    async fn list_units(&self, resource_id: i64) -> Result<Vec<UnitRef>, SourceError>;

    /// One request for one unit.
    async fn fetch_unit(&self, unit_id: &str) -> Result<ContentEnvelope, SourceError>;
}

/// `reqwest`-backed source talking to `{base}/content` and `{base}/directory`.
pub struct HttpSource {
    client: Client,
    base_url: String,
}

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)";

impl HttpSource {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self, SourceError> {
        Self::new(
            config.api_base_url.clone(),
            config.connect_timeout,
            config.request_timeout,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl UnitSource for HttpSource {
    async fn list_units(&self, resource_id: i64) -> Result<Vec<UnitRef>, SourceError> {
        let url = format!("{}/directory", self.base_url);
        let body: DirectoryEnvelope = self
            .client
            .get(&url)
            .query(&[("book_id", resource_id.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !body.success {
            let message = body
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "directory request rejected".to_string());
            warn!(resource_id, message = %message, "Directory listing refused");
            return Err(SourceError::Refused(message));
        }

        Ok(body
            .data
            .into_iter()
            .map(|entry| {
                let title = if entry.title.is_empty() {
                    format!("Chapter {}", entry.item_id)
                } else {
                    entry.title
                };
                UnitRef::new(entry.item_id, title)
            })
            .collect())
    }

    async fn fetch_unit(&self, unit_id: &str) -> Result<ContentEnvelope, SourceError> {
        let url = format!("{}/content", self.base_url);
        let envelope = self
            .client
            .get(&url)
            .query(&[("item_id", unit_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope)
    }
}

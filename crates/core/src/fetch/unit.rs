//! Unit Fetcher: one unit, bounded retries, jittered pacing.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};

use super::content::{extract_label, strip_watermarks};
use super::outcome::{FetchOutcome, Unit, UnitRef};
use super::policy::{RetryDecision, RetryPolicy};
use super::source::{ContentEnvelope, SourceError, UnitSource};
use crate::config::FetchConfig;

/// Fetches single units from a [`UnitSource`].
///
/// Every request is preceded by a delay drawn uniformly from
/// `[min_wait, max_wait]`. Transport failures are retried with exponential
/// backoff until `policy.max_attempts` requests have been made; application
/// rejections and empty payloads are returned immediately.
pub struct UnitFetcher {
    source: Arc<dyn UnitSource>,
    policy: RetryPolicy,
    min_wait: Duration,
    max_wait: Duration,
    watermarks: Vec<String>,
}

impl UnitFetcher {
    pub fn new(source: Arc<dyn UnitSource>, config: &FetchConfig) -> Self {
        Self {
            source,
            policy: RetryPolicy::new(config.max_retries, config.backoff_base),
            min_wait: config.min_wait,
            max_wait: config.max_wait.max(config.min_wait),
            watermarks: config.watermarks.clone(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch one unit. Never fails: every failure is a typed outcome.
    pub async fn fetch(&self, unit_id: &str, label_hint: &str) -> FetchOutcome {
        let req_id = correlation_token(unit_id);
        let mut attempt = 0u32;

        loop {
            tokio::time::sleep(self.jitter()).await;
            attempt += 1;
            debug!(req_id = %req_id, unit_id, label = label_hint, attempt, "Requesting unit");

            let err = match self.source.fetch_unit(unit_id).await {
                Ok(envelope) => return self.interpret(&req_id, unit_id, label_hint, envelope),
                Err(err) => err,
            };

            match self.policy.decide(attempt) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        req_id = %req_id,
                        label = label_hint,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::NoRetry => {
                    error!(
                        req_id = %req_id,
                        label = label_hint,
                        attempts = attempt,
                        error = %err,
                        "Giving up on unit"
                    );
                    return FetchOutcome::ExhaustedRetries {
                        label: label_hint.to_string(),
                        attempts: attempt,
                        last_error: err.transient_kind(),
                    };
                }
            }
        }
    }

    /// Fetch a work's directory, retrying transport failures with the same
    /// backoff as unit requests (no jitter). A refusal is returned at once.
    pub async fn list_units(&self, resource_id: i64) -> Result<Vec<UnitRef>, SourceError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.source.list_units(resource_id).await {
                Ok(units) => return Ok(units),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => match self.policy.decide(attempt) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(resource_id, attempt, error = %err, "Directory request failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::NoRetry => return Err(err),
                },
            }
        }
    }

    fn interpret(
        &self,
        req_id: &str,
        unit_id: &str,
        label_hint: &str,
        envelope: ContentEnvelope,
    ) -> FetchOutcome {
        if !envelope.success {
            let message = envelope
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "API request failed".to_string());
            error!(req_id = %req_id, label = label_hint, message = %message, "Upstream rejected unit");
            return FetchOutcome::TerminalApiError {
                label: label_hint.to_string(),
                message,
            };
        }

        let raw = envelope.content.unwrap_or_default();
        let label = extract_label(&raw, label_hint);
        let content = strip_watermarks(&raw, &self.watermarks);

        if content.trim().is_empty() {
            warn!(req_id = %req_id, label = %label, "Empty content");
            return FetchOutcome::EmptyContent { label };
        }

        info!(req_id = %req_id, label = %label, bytes = content.len(), "Unit retrieved");
        FetchOutcome::Retrieved(Unit {
            id: unit_id.to_string(),
            label,
            content,
        })
    }

    fn jitter(&self) -> Duration {
        let min = self.min_wait.as_millis() as u64;
        let max = self.max_wait.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// `<first 4 chars of unit id>-<random 4 digits>`, shared by every log line
/// of one `fetch` call.
pub fn correlation_token(unit_id: &str) -> String {
    let prefix: String = unit_id.chars().take(4).collect();
    let suffix: u16 = rand::thread_rng().gen_range(1000..=9999);
    format!("{prefix}-{suffix}")
}

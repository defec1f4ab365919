//! HTTP delivery channel.
//!
//! Forwards the stored payload bytes as-is via HTTP POST to the job's
//! destination endpoint.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response, header};

use crate::error::{DeliveryError, Result};
use crate::types::{DeliveryJob, DeliveryResult};

/// Header naming the relay that forwarded the request.
pub const SOURCE_HEADER: &str = "X-Webhook-Source";

/// Header carrying the inbound identifier the notification arrived with.
pub const PHONE_NUMBER_ID_HEADER: &str = "X-Phone-Number-ID";

/// Bytes of a failed response body kept in the job's `last_error`.
const ERROR_BODY_LIMIT: usize = 512;

/// Trait for delivery channels.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Channel name for logging and metrics.
    fn name(&self) -> &str;

    /// Perform one delivery attempt for the job.
    ///
    /// Transport failures are reported as an unsuccessful [`DeliveryResult`],
    /// not as an error.
    async fn deliver(&self, job: &DeliveryJob) -> Result<DeliveryResult>;
}

/// Settings for [`HttpChannel`].
#[derive(Debug, Clone)]
pub struct HttpChannelConfig {
    /// Whole-request timeout for one attempt
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Value of the `X-Webhook-Source` header
    pub source_name: String,
    pub user_agent: String,
}

impl Default for HttpChannelConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            source_name: "hookrelay".into(),
            user_agent: format!("hookrelay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP POST delivery channel.
pub struct HttpChannel {
    client: Client,
    config: HttpChannelConfig,
}

impl HttpChannel {
    /// Create a new HTTP channel.
    pub fn new(config: HttpChannelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| DeliveryError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl DeliveryChannel for HttpChannel {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&self, job: &DeliveryJob) -> Result<DeliveryResult> {
        let start = Instant::now();

        let response = self
            .client
            .post(&job.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, self.config.user_agent.as_str())
            .header(SOURCE_HEADER, self.config.source_name.as_str())
            .header(PHONE_NUMBER_ID_HEADER, job.phone_number_id.as_str())
            .body(job.payload.clone())
            .send()
            .await;

        let elapsed = start.elapsed().as_millis() as u32;

        match response {
            Ok(resp) => {
                let status = resp.status();

                if status.is_success() {
                    tracing::debug!(
                        job_id = %job.id,
                        endpoint = %job.endpoint,
                        status = status.as_u16(),
                        elapsed_ms = elapsed,
                        "HTTP delivery succeeded"
                    );
                    Ok(DeliveryResult::success(status.as_u16(), elapsed))
                } else {
                    let error_body = read_prefix(resp, ERROR_BODY_LIMIT).await;
                    tracing::debug!(
                        job_id = %job.id,
                        endpoint = %job.endpoint,
                        status = status.as_u16(),
                        error = %error_body,
                        elapsed_ms = elapsed,
                        "HTTP delivery failed with HTTP error"
                    );
                    Ok(DeliveryResult::http_failure(
                        status.as_u16(),
                        format!("HTTP {}: {error_body}", status.as_u16()),
                        elapsed,
                    ))
                }
            }
            Err(e) => {
                let error = if e.is_timeout() {
                    format!(
                        "timed out after {}ms",
                        self.config.timeout.as_millis()
                    )
                } else if e.is_connect() {
                    format!("connection error: {e}")
                } else {
                    e.to_string()
                };
                tracing::debug!(
                    job_id = %job.id,
                    endpoint = %job.endpoint,
                    error = %error,
                    elapsed_ms = elapsed,
                    "HTTP delivery failed with network error"
                );
                Ok(DeliveryResult::failure(error, elapsed))
            }
        }
    }
}

/// Read at most `limit` bytes of the body and drop the rest unread.
async fn read_prefix(mut resp: Response, limit: usize) -> String {
    let mut prefix = Vec::with_capacity(limit);
    while prefix.len() < limit {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(limit - prefix.len());
                prefix.extend_from_slice(&chunk[..take]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    let text = String::from_utf8_lossy(&prefix);
    truncate(&text, limit).to_string()
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_channel_name() {
        let channel = HttpChannel::new(HttpChannelConfig::default()).unwrap();
        assert_eq!(channel.name(), "http");
    }

    #[test]
    fn test_default_user_agent_names_relay() {
        let config = HttpChannelConfig::default();
        assert!(config.user_agent.starts_with("hookrelay/"));
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("héllo", 2), "h");
    }
}

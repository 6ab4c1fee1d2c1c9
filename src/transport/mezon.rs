//! Mezon chat-platform HTTP transport.
//!
//! Speaks the minimal subset of the platform API the bot needs: posting
//! a channel message, optionally as a reply. Each call gets its own
//! exponential-backoff retry for rate limits, timeouts, and network
//! drops; anything else surfaces immediately so the queue can decide
//! what to do with it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{SendReceipt, SendRequest, Transport, TransportError};

/// Connection settings for the Mezon API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MezonConfig {
    /// API base URL.
    pub base_url: String,
    /// Bot token, sent as a bearer credential.
    pub token: String,
    /// Attempts per send before giving up (minimum 1).
    pub max_retries: u32,
    /// Base backoff delay in milliseconds; doubles per attempt.
    pub base_delay_ms: u64,
}

impl Default for MezonConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mezon.ai".to_owned(),
            token: String::new(),
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Wire body for posting a channel message.
#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    content: MessageContentBody<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    mentions: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

/// Mezon message content envelope (`t` is the text field on the wire).
#[derive(Debug, Serialize)]
struct MessageContentBody<'a> {
    t: &'a str,
}

/// Response for a successful send.
#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    message_id: String,
}

/// HTTP implementation of [`Transport`] against the Mezon API.
pub struct MezonTransport {
    http: reqwest::Client,
    cfg: MezonConfig,
}

impl MezonTransport {
    /// Build a transport with its own connection pool.
    pub fn new(cfg: MezonConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }

    /// One attempt, no retry.
    async fn send_once(&self, request: &SendRequest) -> Result<SendReceipt, TransportError> {
        let url = format!(
            "{}/v1/channels/{}/messages",
            self.cfg.base_url.trim_end_matches('/'),
            request.channel_id
        );
        let body = SendMessageBody {
            content: MessageContentBody {
                t: &request.payload.text,
            },
            attachments: request.payload.attachments.clone(),
            mentions: request.payload.mentions.clone(),
            reply_to: request.reply_to.as_deref(),
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.cfg.token)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let parsed: SendMessageResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Transient(format!("malformed send response: {e}")))?;
        Ok(SendReceipt {
            message_id: parsed.message_id,
        })
    }
}

#[async_trait::async_trait]
impl Transport for MezonTransport {
    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, TransportError> {
        let attempts = self.cfg.max_retries.max(1);
        let mut last = TransportError::Transient("no attempt made".to_owned());

        for attempt in 0..attempts {
            match self.send_once(request).await {
                Ok(receipt) => {
                    if attempt > 0 {
                        debug!(
                            channel_id = %request.channel_id,
                            attempt,
                            "send succeeded after retry"
                        );
                    }
                    return Ok(receipt);
                }
                Err(e) if e.is_retryable() && attempt.saturating_add(1) < attempts => {
                    let delay = backoff_delay(self.cfg.base_delay_ms, attempt);
                    warn!(
                        channel_id = %request.channel_id,
                        attempt,
                        delay = ?delay,
                        error = %e,
                        "send attempt failed, backing off"
                    );
                    sleep(delay).await;
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }
}

/// Map an HTTP status to the queue-facing error taxonomy.
fn classify_status(status: u16, detail: &str) -> TransportError {
    match status {
        429 => TransportError::RateLimited,
        408 => TransportError::Transient(format!("request timeout: {detail}")),
        s if s >= 500 => TransportError::Transient(format!("server error {s}: {detail}")),
        s => TransportError::Permanent(format!("status {s}: {detail}")),
    }
}

/// Client-side failures: timeouts and connection drops are retryable,
/// a request we couldn't even build is not.
fn classify_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_builder() {
        TransportError::Permanent(format!("invalid request: {e}"))
    } else {
        TransportError::Transient(format!("network error: {e}"))
    }
}

/// `base * 2^attempt`, saturating.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt)))
}

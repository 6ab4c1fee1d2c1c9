//! Chat-platform transport seam.
//!
//! The delivery queue only knows this trait; the real HTTP client lives
//! in [`mezon`], and tests drive the queue with mock implementations.

pub mod mezon;

use async_trait::async_trait;

use crate::queue::MessagePayload;

pub use mezon::{MezonConfig, MezonTransport};

/// One outbound send, as seen by the transport.
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Destination channel.
    pub channel_id: String,
    /// Message content.
    pub payload: MessagePayload,
    /// Platform message id to reply to, when already known.
    pub reply_to: Option<String>,
}

/// Acknowledgement of a delivered message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Platform-assigned message id.
    pub message_id: String,
}

/// Classified send failures. The queue requeues retryable errors and
/// drops the rest.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The platform is throttling us. Worth retrying on a later pass.
    #[error("rate limited by the platform")]
    RateLimited,

    /// Network hiccup, timeout, or server-side failure.
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// The platform rejected the message (bad payload, unknown
    /// channel). Retrying will not help.
    #[error("send rejected: {0}")]
    Permanent(String),
}

impl TransportError {
    /// Whether the queue should put the message back for another pass.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

/// Sends messages to the chat platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one message and return the platform-assigned id.
    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, TransportError>;
}

//! Outbound message model.
//!
//! A queued message is plain data: the engine never looks inside
//! [`MessagePayload`], it only routes on the queueing fields (priority,
//! role, header linkage).

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default priority for messages that don't ask for anything special.
/// Lower values are dispatched first.
pub const DEFAULT_PRIORITY: u8 = 5;

/// How a message participates in header/reply chaining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    /// An ordinary message with no ordering dependency.
    Standalone,
    /// Sent first so that a later message can reply to it. Its
    /// platform-assigned id is recorded when the send succeeds.
    Header,
    /// Replies to a header. Not eligible for dispatch until the header's
    /// platform id is known.
    Reply,
}

/// Transport-facing message content. Opaque to the queue engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Message text.
    pub text: String,
    /// Attachment descriptors, passed through to the platform as-is.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<serde_json::Value>,
    /// Mention descriptors, passed through to the platform as-is.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<serde_json::Value>,
}

impl MessagePayload {
    /// Text-only payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// A unit of outbound work held by the delivery queue.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Queue-local id. Generated at enqueue time if empty; preserved
    /// across requeues so duplicates can be traced in logs.
    pub id: String,
    /// Destination channel.
    pub channel_id: String,
    /// Content handed to the transport.
    pub payload: MessagePayload,
    /// Id of the domain entity (e.g. a confession) that produced this
    /// message. When set on a non-header message, the platform-assigned
    /// message id is written back to the store after a successful send.
    pub correlation_id: Option<String>,
    /// Dispatch priority, lower first. Ties break by enqueue order.
    pub priority: u8,
    /// Chaining role.
    pub role: MessageRole,
    /// Queue-local id of the header this message replies to.
    /// Only meaningful for [`MessageRole::Reply`].
    pub reply_to_header: Option<String>,
    /// Platform id of the resolved header. Set exactly once, by the
    /// engine, when the referenced header has been delivered.
    pub reply_target: Option<String>,
    /// How many times this message has been requeued after a retryable
    /// send failure. Maintained by the engine.
    pub requeues: u32,
}

impl OutboundMessage {
    /// A standalone message at the default priority.
    pub fn standalone(channel_id: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            id: String::new(),
            channel_id: channel_id.into(),
            payload,
            correlation_id: None,
            priority: DEFAULT_PRIORITY,
            role: MessageRole::Standalone,
            reply_to_header: None,
            reply_target: None,
            requeues: 0,
        }
    }

    /// A header message. Headers carry a pre-generated id so that the
    /// reply can reference them before either is enqueued.
    pub fn header(channel_id: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            id: generate_id(),
            role: MessageRole::Header,
            ..Self::standalone(channel_id, payload)
        }
    }

    /// A reply gated on `header_id` being delivered first.
    pub fn reply_to(
        channel_id: impl Into<String>,
        payload: MessagePayload,
        header_id: impl Into<String>,
    ) -> Self {
        Self {
            role: MessageRole::Reply,
            reply_to_header: Some(header_id.into()),
            ..Self::standalone(channel_id, payload)
        }
    }

    /// Set the dispatch priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Attach the originating entity id for store write-back.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Whether this message may be picked by a drain pass. Replies wait
    /// until their header's platform id has been filled in.
    pub fn is_eligible(&self) -> bool {
        self.role != MessageRole::Reply || self.reply_target.is_some()
    }
}

/// Generate a queue-local message id: unix millis plus a short random
/// suffix. Uniqueness is the requirement here, not unpredictability.
pub fn generate_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(7)
        .map(char::from)
        .collect();
    format!("msg_{millis}_{suffix}")
}

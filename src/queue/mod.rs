//! Outbound message delivery queue.
//!
//! Producers build [`OutboundMessage`]s (or header/reply pairs) and hand
//! them to the [`DeliveryQueue`]; a periodic drain pass picks eligible
//! messages by priority, dispatches up to `max_concurrent` of them at
//! once, and reconciles header ids so queued replies become eligible.
//!
//! The queue is in-memory only. Delivery is at-least-once: a send whose
//! response is lost may be re-sent on a later pass.

pub mod engine;
pub mod message;

pub use engine::{DeliveryQueue, QueueConfig};
pub use message::{MessagePayload, MessageRole, OutboundMessage, DEFAULT_PRIORITY};

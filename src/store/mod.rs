//! Persistence seam for delivered-message bookkeeping.
//!
//! After a successful send, the queue reports the platform-assigned
//! message id back here so later features (reaction counting, top
//! confessions) can find the posted message again. The write is best
//! effort from the queue's point of view: failures are logged by the
//! caller and never undo a delivery.

pub mod sqlite;

use async_trait::async_trait;

pub use sqlite::SqliteDeliveryStore;

/// Errors from delivery bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No entity with the given correlation id exists.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
}

/// Records which platform message a domain entity was posted as.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Attach the platform message id and channel to the entity behind
    /// `correlation_id`.
    async fn record_delivered(
        &self,
        correlation_id: &str,
        message_id: &str,
        channel_id: &str,
    ) -> Result<(), StoreError>;
}

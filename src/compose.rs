//! Confession formatting and message-pair construction.
//!
//! Approved confessions are posted as a dated header followed by the
//! confession body replying to it, so the channel reads as grouped
//! threads. The pair is linked through the queue: the body is enqueued
//! as a reply gated on the header's queue id.

use chrono::{Datelike, Local, NaiveDate};

use crate::queue::{MessagePayload, OutboundMessage};

/// Priority for header messages: dispatched before everything else.
pub const HEADER_PRIORITY: u8 = 1;
/// Priority for confession bodies: right after their header.
pub const CONFESSION_PRIORITY: u8 = 2;

/// An approved confession ready for posting.
#[derive(Debug, Clone)]
pub struct ConfessionPost {
    /// Storage id, used as the queue correlation id.
    pub id: String,
    /// Public sequence number shown in the channel.
    pub number: i64,
    /// Confession text.
    pub content: String,
    /// Optional topic tags.
    pub tags: Vec<String>,
    /// Attachment descriptors, passed through to the platform.
    pub attachments: Vec<serde_json::Value>,
}

/// Render the channel body for a confession: numbered title, fenced
/// content, and a tags line when any tags are set.
pub fn format_confession(post: &ConfessionPost) -> String {
    let mut parts = vec![
        format!("### Confession #{}", post.number),
        String::new(),
        "```".to_owned(),
        post.content.clone(),
        "```".to_owned(),
    ];

    if !post.tags.is_empty() {
        let tags = post
            .tags
            .iter()
            .map(|t| format!("#{t}"))
            .collect::<Vec<_>>()
            .join(" ");
        parts.push(String::new());
        parts.push(format!("#### Tags: {tags}"));
    }

    parts.join("\n")
}

/// Render today's dated header line.
pub fn format_header() -> String {
    format_header_for(Local::now().date_naive())
}

/// Dated header for a specific day (d/m/yyyy, no zero padding).
pub fn format_header_for(date: NaiveDate) -> String {
    format!(
        "### Confession - {}/{}/{}",
        date.day(),
        date.month(),
        date.year()
    )
}

/// Build the header + confession reply pair for a channel post.
///
/// The header goes out first (priority 1); the body is a reply gated on
/// the header's queue id (priority 2) and carries the confession id so
/// the delivered message id gets written back to storage.
pub fn header_and_confession(
    post: &ConfessionPost,
    channel_id: &str,
) -> (OutboundMessage, OutboundMessage) {
    let header = OutboundMessage::header(channel_id, MessagePayload::text(format_header()))
        .with_priority(HEADER_PRIORITY)
        .with_correlation(post.id.clone());

    let mut payload = MessagePayload::text(format_confession(post));
    payload.attachments = post.attachments.clone();
    let body = OutboundMessage::reply_to(channel_id, payload, header.id.clone())
        .with_priority(CONFESSION_PRIORITY)
        .with_correlation(post.id.clone());

    (header, body)
}

/// Build a single confession message without a header, for channels
/// that don't use the threaded layout.
pub fn standalone_confession(post: &ConfessionPost, channel_id: &str) -> OutboundMessage {
    let mut payload = MessagePayload::text(format_confession(post));
    payload.attachments = post.attachments.clone();
    OutboundMessage::standalone(channel_id, payload).with_correlation(post.id.clone())
}

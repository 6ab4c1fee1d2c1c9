//! Tests for `src/queue/engine.rs`: selection order, dependency
//! gating, concurrency bounds, and failure handling.

use std::sync::Arc;
use std::time::Duration;

use backchannel::queue::{DeliveryQueue, MessagePayload, OutboundMessage, QueueConfig};

use super::mocks::{MockStore, MockTransport};

fn queue_with(
    transport: &Arc<MockTransport>,
    store: &Arc<MockStore>,
    max_concurrent: usize,
) -> DeliveryQueue {
    let cfg = QueueConfig {
        max_concurrent,
        tick_interval_ms: 1000,
        max_requeues: 50,
    };
    DeliveryQueue::new(transport.clone(), store.clone(), cfg)
}

fn msg(text: &str, priority: u8) -> OutboundMessage {
    OutboundMessage::standalone("chan", MessagePayload::text(text)).with_priority(priority)
}

/// Drive drain passes until nothing is queued or in flight.
async fn drain_until_idle(queue: &DeliveryQueue) {
    for _ in 0..32 {
        if queue.is_idle().await {
            return;
        }
        queue.drain().await;
    }
    panic!("queue did not settle");
}

#[tokio::test]
async fn dispatches_in_priority_order() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let queue = queue_with(&transport, &store, 10);

    queue.enqueue(msg("third", 3)).await;
    queue.enqueue(msg("first", 1)).await;
    queue.enqueue(msg("second", 2)).await;

    queue.drain().await;

    assert_eq!(transport.sent_texts(), ["first", "second", "third"]);
    assert!(queue.is_idle().await);
}

#[tokio::test]
async fn equal_priorities_keep_enqueue_order() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let queue = queue_with(&transport, &store, 10);

    for text in ["a", "b", "c", "d"] {
        queue.enqueue(msg(text, 5)).await;
    }

    queue.drain().await;

    assert_eq!(transport.sent_texts(), ["a", "b", "c", "d"]);
}

#[tokio::test]
async fn reply_waits_for_its_header() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let queue = queue_with(&transport, &store, 10);

    let header = OutboundMessage::header("chan", MessagePayload::text("header")).with_priority(1);
    let body = OutboundMessage::reply_to("chan", MessagePayload::text("body"), header.id.clone())
        .with_priority(2)
        .with_correlation("E1");

    queue.enqueue(header).await;
    queue.enqueue(body).await;

    // First pass: only the header is eligible.
    queue.drain().await;
    assert_eq!(transport.sent_texts(), ["header"]);
    assert_eq!(queue.pending_len().await, 1);

    // Second pass: the reply goes out, targeting the header's platform id.
    queue.drain().await;
    assert_eq!(transport.sent_texts(), ["header", "body"]);

    let header_remote = transport.assigned_id_for("header").expect("header sent");
    let body_record = transport
        .sent()
        .into_iter()
        .find(|r| r.text == "body")
        .expect("body sent");
    assert_eq!(body_record.reply_to.as_deref(), Some(header_remote.as_str()));

    // Write-back happened once, for the body only.
    let body_remote = transport.assigned_id_for("body").expect("body sent");
    assert_eq!(
        store.records(),
        [("E1".to_owned(), body_remote, "chan".to_owned())]
    );
}

#[tokio::test]
async fn reply_enqueued_after_its_header_resolved_is_not_starved() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let queue = queue_with(&transport, &store, 10);

    let header = OutboundMessage::header("chan", MessagePayload::text("header")).with_priority(1);
    let header_id = header.id.clone();
    queue.enqueue(header).await;
    queue.drain().await;
    assert_eq!(transport.sent_texts(), ["header"]);

    let body = OutboundMessage::reply_to("chan", MessagePayload::text("late"), header_id)
        .with_priority(2);
    queue.enqueue(body).await;
    queue.drain().await;

    let record = transport
        .sent()
        .into_iter()
        .find(|r| r.text == "late")
        .expect("late reply delivered");
    assert_eq!(record.reply_to, transport.assigned_id_for("header"));
}

#[tokio::test]
async fn concurrent_pairs_resolve_to_their_own_headers() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let queue = queue_with(&transport, &store, 10);

    let header1 = OutboundMessage::header("chan", MessagePayload::text("h1")).with_priority(1);
    let header2 = OutboundMessage::header("chan", MessagePayload::text("h2")).with_priority(1);
    let body1 = OutboundMessage::reply_to("chan", MessagePayload::text("b1"), header1.id.clone())
        .with_priority(2);
    let body2 = OutboundMessage::reply_to("chan", MessagePayload::text("b2"), header2.id.clone())
        .with_priority(2);

    queue.enqueue(header1).await;
    queue.enqueue(body1).await;
    queue.enqueue(header2).await;
    queue.enqueue(body2).await;

    drain_until_idle(&queue).await;

    let reply_to = |text: &str| {
        transport
            .sent()
            .into_iter()
            .find(|r| r.text == text)
            .and_then(|r| r.reply_to)
    };
    assert_eq!(reply_to("b1"), transport.assigned_id_for("h1"));
    assert_eq!(reply_to("b2"), transport.assigned_id_for("h2"));
}

#[tokio::test]
async fn in_flight_never_exceeds_the_concurrency_cap() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(10)));
    let store = Arc::new(MockStore::new());
    let queue = queue_with(&transport, &store, 2);

    for i in 0..5 {
        queue.enqueue(msg(&format!("m{i}"), 5)).await;
    }

    drain_until_idle(&queue).await;

    assert_eq!(transport.sent().len(), 5);
    assert_eq!(transport.peak_in_flight(), 2);
}

#[tokio::test]
async fn mixed_priorities_with_bounded_slots() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let queue = queue_with(&transport, &store, 2);

    let priorities = [3, 1, 2, 1, 5];
    for (i, p) in priorities.into_iter().enumerate() {
        queue.enqueue(msg(&format!("m{i}"), p)).await;
    }

    drain_until_idle(&queue).await;

    // Both priority-1 messages first (enqueue order), then 2, 3, 5.
    assert_eq!(transport.sent_texts(), ["m1", "m3", "m2", "m0", "m4"]);
    assert!(transport.peak_in_flight() <= 2);
}

#[tokio::test]
async fn rate_limited_message_is_requeued_and_delivered_once() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let queue = queue_with(&transport, &store, 3);

    transport.rate_limit_once("flaky");
    queue.enqueue(msg("flaky", 5)).await;

    queue.drain().await;
    assert!(transport.sent().is_empty());
    assert_eq!(queue.pending_len().await, 1, "message should be requeued");

    queue.drain().await;
    assert_eq!(transport.sent_texts(), ["flaky"]);
    assert_eq!(transport.attempt_count(), 2);
    assert!(queue.is_idle().await);
}

#[tokio::test]
async fn requeue_keeps_the_resolved_reply_target() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let queue = queue_with(&transport, &store, 3);

    let header = OutboundMessage::header("chan", MessagePayload::text("header")).with_priority(1);
    let body = OutboundMessage::reply_to("chan", MessagePayload::text("body"), header.id.clone())
        .with_priority(2);
    transport.rate_limit_once("body");

    queue.enqueue(header).await;
    queue.enqueue(body).await;

    drain_until_idle(&queue).await;

    let body_record = transport
        .sent()
        .into_iter()
        .find(|r| r.text == "body")
        .expect("body delivered eventually");
    assert_eq!(body_record.reply_to, transport.assigned_id_for("header"));
}

#[tokio::test]
async fn permanent_failure_drops_without_blocking_the_rest() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let queue = queue_with(&transport, &store, 2);

    transport.permanent_fail("broken");
    queue.enqueue(msg("broken", 1)).await;
    queue.enqueue(msg("fine", 2)).await;

    queue.drain().await;

    assert_eq!(transport.sent_texts(), ["fine"]);
    assert!(queue.is_idle().await, "failed message must not be requeued");
    assert_eq!(transport.attempt_count(), 2);
}

#[tokio::test]
async fn replies_are_dropped_when_their_header_fails_permanently() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let queue = queue_with(&transport, &store, 3);

    let header = OutboundMessage::header("chan", MessagePayload::text("doomed")).with_priority(1);
    let body = OutboundMessage::reply_to("chan", MessagePayload::text("orphan"), header.id.clone())
        .with_priority(2);
    transport.permanent_fail("doomed");

    queue.enqueue(header).await;
    queue.enqueue(body).await;

    queue.drain().await;

    assert!(transport.sent().is_empty());
    assert!(queue.is_idle().await, "orphaned reply should be dropped");
}

#[tokio::test]
async fn requeue_budget_drops_persistently_rate_limited_messages() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let cfg = QueueConfig {
        max_concurrent: 3,
        tick_interval_ms: 1000,
        max_requeues: 1,
    };
    let queue = DeliveryQueue::new(transport.clone(), store.clone(), cfg);

    transport.rate_limit_always("stuck");
    queue.enqueue(msg("stuck", 5)).await;

    queue.drain().await;
    assert_eq!(queue.pending_len().await, 1, "first failure is requeued");

    queue.drain().await;
    assert!(queue.is_idle().await, "second failure exhausts the budget");
    assert!(transport.sent().is_empty());
    assert_eq!(transport.attempt_count(), 2);
}

#[tokio::test]
async fn store_failure_does_not_undo_the_delivery() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let queue = queue_with(&transport, &store, 3);

    store.fail_all();
    queue
        .enqueue(msg("confession", 5).with_correlation("C9"))
        .await;

    queue.drain().await;

    assert_eq!(transport.sent_texts(), ["confession"]);
    assert!(queue.is_idle().await);
    assert!(store.records().is_empty());
}

#[tokio::test]
async fn headers_do_not_trigger_the_store_write_back() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let queue = queue_with(&transport, &store, 3);

    // Both halves carry the confession id; only the body may write back,
    // otherwise the header's id would clobber the real one.
    let header = OutboundMessage::header("chan", MessagePayload::text("header"))
        .with_priority(1)
        .with_correlation("C1");
    let body = OutboundMessage::reply_to("chan", MessagePayload::text("body"), header.id.clone())
        .with_priority(2)
        .with_correlation("C1");

    queue.enqueue(header).await;
    queue.enqueue(body).await;
    drain_until_idle(&queue).await;

    let by_corr = store.by_correlation();
    let ids = by_corr.get("C1").expect("write-back for the body");
    assert_eq!(ids.len(), 1);
    assert_eq!(ids[0], transport.assigned_id_for("body").expect("body sent"));
}

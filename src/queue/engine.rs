//! The delivery queue engine.
//!
//! Holds pending outbound messages, resolves priority and header/reply
//! ordering, bounds concurrent dispatches, and reconciles platform ids
//! after each send. One [`drain`](DeliveryQueue::drain) pass selects up
//! to the free concurrency slots worth of eligible messages (priority
//! ascending, enqueue order on ties), dispatches them together, and
//! awaits the whole batch.
//!
//! Rate-limited sends are requeued unchanged and picked up by a later
//! pass; the transport already backs off per attempt, so no extra delay
//! is added here. Permanent failures are logged and dropped, and any
//! queued replies that depended on a dropped header are dropped with
//! them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::store::DeliveryStore;
use crate::transport::{SendRequest, Transport, TransportError};

use super::message::{generate_id, MessageRole, OutboundMessage};

/// Tuning knobs for the delivery queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of sends in flight at once.
    pub max_concurrent: usize,
    /// Interval between periodic drain passes, in milliseconds.
    pub tick_interval_ms: u64,
    /// How many times a rate-limited message may be requeued before it
    /// is dropped. `0` means no limit.
    pub max_requeues: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            tick_interval_ms: 1000,
            max_requeues: 50,
        }
    }
}

/// Mutable queue state. All mutations happen under one lock, and the
/// lock is never held across a transport or store await.
#[derive(Default)]
struct QueueState {
    /// Messages waiting for dispatch, in enqueue order.
    pending: Vec<OutboundMessage>,
    /// Ids of messages currently being sent.
    in_flight: HashSet<String>,
    /// Queue-local header id -> platform-assigned message id.
    /// Write-once per key.
    resolved_headers: HashMap<String, String>,
    /// Re-entrancy guard: a second drain trigger while one is running
    /// must not double-select the same messages.
    draining: bool,
    /// Set once the periodic pump has started. Enqueue-triggered drains
    /// only fire after that, which keeps manual `drain()` calls (tests,
    /// tooling) deterministic.
    running: bool,
}

struct QueueInner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn DeliveryStore>,
    cfg: QueueConfig,
    state: Mutex<QueueState>,
}

/// Priority-aware outbound delivery queue. Cheap to clone; all clones
/// share the same state.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<QueueInner>,
}

impl DeliveryQueue {
    /// Build a queue over the given transport and store adapters.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn DeliveryStore>,
        cfg: QueueConfig,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                transport,
                store,
                cfg,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Add a message to the queue. Assigns an id when the producer left
    /// it empty. Never fails; delivery outcome is reported only through
    /// logs and the store write-back.
    pub async fn enqueue(&self, mut msg: OutboundMessage) {
        if msg.id.is_empty() {
            msg.id = generate_id();
        }

        let trigger = {
            let mut st = self.inner.state.lock().await;
            // A reply can arrive after its header already resolved;
            // header resolution only scans messages that are pending at
            // the time, so fill the target in here.
            if msg.role == MessageRole::Reply && msg.reply_target.is_none() {
                if let Some(header_id) = &msg.reply_to_header {
                    msg.reply_target = st.resolved_headers.get(header_id).cloned();
                }
            }
            st.pending.push(msg);
            debug!(pending = st.pending.len(), "message enqueued");
            st.running && !st.draining
        };

        // Don't wait for the next timer tick when the pump is idle.
        if trigger {
            let queue = self.clone();
            tokio::spawn(async move { queue.drain().await });
        }
    }

    /// Start the periodic drain pump. The returned handle owns the
    /// timer loop; aborting it stops the pump (in-flight dispatches
    /// inside a running pass are aborted with it, so callers should
    /// wait for [`is_idle`](Self::is_idle) before aborting on shutdown).
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            {
                queue.inner.state.lock().await.running = true;
            }
            info!(
                interval_ms = queue.inner.cfg.tick_interval_ms,
                max_concurrent = queue.inner.cfg.max_concurrent,
                "delivery queue pump started"
            );
            let mut tick =
                tokio::time::interval(Duration::from_millis(queue.inner.cfg.tick_interval_ms));
            loop {
                tick.tick().await;
                queue.drain().await;
            }
        })
    }

    /// Run one drain pass: select eligible messages up to the free
    /// slots, dispatch them concurrently, and await the batch. If the
    /// pump is running and eligible work remains afterwards, another
    /// pass is scheduled immediately instead of waiting for the timer.
    ///
    /// A pass that finds a drain already in progress is a no-op.
    ///
    /// Returns a boxed future because the pass can schedule another
    /// pass; boxing breaks the recursive `Send` auto-trait cycle.
    pub fn drain(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
        {
            let mut st = self.inner.state.lock().await;
            if st.draining {
                return;
            }
            st.draining = true;
        }

        let batch = self.take_batch().await;
        if !batch.is_empty() {
            debug!(batch = batch.len(), "dispatching batch");
            let mut dispatches = JoinSet::new();
            for msg in batch {
                let queue = self.clone();
                dispatches.spawn(async move { queue.dispatch(msg).await });
            }
            // Await the whole batch; individual failures are handled
            // inside dispatch and never propagate here.
            while dispatches.join_next().await.is_some() {}
        }

        let more = {
            let mut st = self.inner.state.lock().await;
            st.draining = false;
            st.running
                && st.in_flight.len() < self.inner.cfg.max_concurrent
                && has_eligible(&st)
        };
        if more {
            let queue = self.clone();
            tokio::spawn(async move { queue.drain().await });
        }
        })
    }

    /// Select up to the free concurrency slots worth of eligible
    /// messages, priority ascending with stable FIFO tie-break, and
    /// mark them in flight.
    async fn take_batch(&self) -> Vec<OutboundMessage> {
        let mut st = self.inner.state.lock().await;

        let slots = self
            .inner
            .cfg
            .max_concurrent
            .saturating_sub(st.in_flight.len());
        if slots == 0 {
            return Vec::new();
        }

        let mut order: Vec<usize> = st
            .pending
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_eligible() && !st.in_flight.contains(&m.id))
            .map(|(i, _)| i)
            .collect();
        // Stable sort: equal priorities keep their enqueue order.
        order.sort_by_key(|&i| st.pending[i].priority);
        order.truncate(slots);

        let batch: Vec<OutboundMessage> = order.iter().map(|&i| st.pending[i].clone()).collect();
        let picked: HashSet<String> = batch.iter().map(|m| m.id.clone()).collect();
        st.pending.retain(|m| !picked.contains(&m.id));
        for m in &batch {
            st.in_flight.insert(m.id.clone());
        }
        batch
    }

    /// Dispatch a single message and reconcile the outcome. The message
    /// leaves the in-flight set at the end of this function no matter
    /// what happened.
    async fn dispatch(&self, msg: OutboundMessage) {
        let request = SendRequest {
            channel_id: msg.channel_id.clone(),
            payload: msg.payload.clone(),
            reply_to: msg.reply_target.clone(),
        };

        match self.inner.transport.send(&request).await {
            Ok(receipt) => {
                debug!(id = %msg.id, remote_id = %receipt.message_id, "message delivered");
                if msg.role == MessageRole::Header {
                    self.resolve_header(&msg.id, &receipt.message_id).await;
                } else if let Some(correlation_id) = &msg.correlation_id {
                    // Best effort: the message is already on the
                    // platform, so a bookkeeping failure must not undo
                    // the delivery.
                    if let Err(e) = self
                        .inner
                        .store
                        .record_delivered(correlation_id, &receipt.message_id, &msg.channel_id)
                        .await
                    {
                        warn!(
                            correlation_id = %correlation_id,
                            error = %e,
                            "failed to record delivered message id"
                        );
                    }
                }
            }
            Err(e) if e.is_retryable() => {
                self.requeue(msg.clone(), &e).await;
            }
            Err(e) => {
                error!(id = %msg.id, error = %e, "dropping message after permanent send failure");
                if msg.role == MessageRole::Header {
                    self.drop_orphaned_replies(&msg.id).await;
                }
            }
        }

        self.inner.state.lock().await.in_flight.remove(&msg.id);
    }

    /// Record a header's platform id and unblock queued replies that
    /// reference it. The mapping is write-once: a duplicate resolution
    /// keeps the first value.
    async fn resolve_header(&self, header_id: &str, remote_id: &str) {
        let mut st = self.inner.state.lock().await;

        if st.resolved_headers.contains_key(header_id) {
            warn!(header_id, "header resolved twice; keeping the first platform id");
        } else {
            st.resolved_headers
                .insert(header_id.to_owned(), remote_id.to_owned());
        }
        let remote = st.resolved_headers.get(header_id).cloned();

        let mut unblocked: usize = 0;
        for m in &mut st.pending {
            if m.role == MessageRole::Reply
                && m.reply_to_header.as_deref() == Some(header_id)
                && m.reply_target.is_none()
            {
                m.reply_target = remote.clone();
                unblocked = unblocked.saturating_add(1);
            }
        }
        if unblocked > 0 {
            debug!(header_id, unblocked, "queued replies unblocked");
        }
    }

    /// Put a message back in the queue after a retryable failure,
    /// unless it has exhausted the configured requeue budget. The id,
    /// priority, and any resolved reply target are preserved, so a
    /// duplicate delivery stays traceable in logs.
    async fn requeue(&self, mut msg: OutboundMessage, err: &TransportError) {
        msg.requeues = msg.requeues.saturating_add(1);

        let cap = self.inner.cfg.max_requeues;
        if cap != 0 && msg.requeues > cap {
            error!(
                id = %msg.id,
                requeues = msg.requeues,
                "requeue budget exhausted; dropping message"
            );
            if msg.role == MessageRole::Header {
                self.drop_orphaned_replies(&msg.id).await;
            }
            return;
        }

        warn!(
            id = %msg.id,
            requeues = msg.requeues,
            error = %err,
            "send failed transiently; requeued for a later pass"
        );
        self.inner.state.lock().await.pending.push(msg);
    }

    /// Drop queued replies whose header will never resolve.
    async fn drop_orphaned_replies(&self, header_id: &str) {
        let mut st = self.inner.state.lock().await;
        let before = st.pending.len();
        st.pending.retain(|m| {
            !(m.role == MessageRole::Reply && m.reply_to_header.as_deref() == Some(header_id))
        });
        let dropped = before.saturating_sub(st.pending.len());
        if dropped > 0 {
            warn!(header_id, dropped, "dropped replies orphaned by a failed header");
        }
    }

    /// Number of messages waiting for dispatch.
    pub async fn pending_len(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    /// Number of messages currently being sent.
    pub async fn in_flight_len(&self) -> usize {
        self.inner.state.lock().await.in_flight.len()
    }

    /// True when nothing is queued and nothing is in flight.
    pub async fn is_idle(&self) -> bool {
        let st = self.inner.state.lock().await;
        st.pending.is_empty() && st.in_flight.is_empty()
    }
}

fn has_eligible(st: &QueueState) -> bool {
    st.pending
        .iter()
        .any(|m| m.is_eligible() && !st.in_flight.contains(&m.id))
}

//! Topic-addressed publish/subscribe bus for opaque byte payloads.
//!
//! In-process implementation over `tokio::sync::broadcast`, one channel per
//! topic, topics created lazily on first publish or subscribe. This is the
//! "in-memory" backend the routing core's component design allows; a
//! networked backend (for horizontal scale-out across instances) would
//! implement the same `Bus` shape but is out of scope for this core — the
//! outgoing-path multi-instance correctness instead relies on UDP socket
//! ownership being exclusive per instance (see `dmrswitch-gateway`).

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Bounded per-topic history; a slow subscriber that falls this far behind
/// observes a `Lagged` gap rather than blocking publishers.
const TOPIC_CAPACITY: usize = 1024;

pub struct Bus {
    topics: DashMap<String, broadcast::Sender<Bytes>>,
}

impl Bus {
    pub fn new() -> Self {
        Self { topics: DashMap::new() }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<Bytes> {
        if let Some(tx) = self.topics.get(topic) {
            return tx.clone();
        }
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Publish to a topic. A no-op (not an error) when nobody is subscribed.
    pub fn publish(&self, topic: &str, payload: Bytes) {
        let tx = self.sender_for(topic);
        let _ = tx.send(payload);
        trace!(topic, "published");
    }

    /// Subscribe to a topic, returning a cancellable handle. The returned
    /// `Subscription` yields `None` once `cancel()` is called or all senders
    /// for the topic are dropped (which never happens here since the bus
    /// itself holds one).
    pub fn subscribe(self: &Arc<Self>, topic: &str) -> Subscription {
        let rx = self.sender_for(topic).subscribe();
        Subscription { rx, cancel: CancellationToken::new() }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<Bytes>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Receive the next message, or `None` on cancellation. Lag gaps are
    /// transparently skipped (the sequence-loss accounting lives at the DMR
    /// superframe level, not at the bus transport level).
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                msg = self.rx.recv() => {
                    match msg {
                        Ok(payload) => return Some(payload),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        }
    }
}

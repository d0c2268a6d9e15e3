//! Process-wide key-value store: `string -> bytes` with TTL, prefix scan, and
//! a background expiry sweep.
//!
//! Mirrors the session/parrot/instance-registry storage described in the
//! routing core's component design. Trait-based so a networked backend can
//! be swapped in later without touching callers — the only implementation
//! shipped here is in-process (`MemoryKv`), matching the "single process"
//! deployment shape; multi-instance correctness is left to the pub/sub bus
//! and to each instance owning its own UDP sockets.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: String, value: Vec<u8>, ttl: Option<Duration>);
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn delete(&self, key: &str);
    /// All live (non-expired) keys with the given prefix. Eventually consistent:
    /// a key that expires mid-scan may or may not be included.
    async fn scan_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)>;
    /// Refresh a key's TTL without changing its value. No-op if absent.
    async fn touch(&self, key: &str, ttl: Duration);
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// In-memory, `DashMap`-backed KV store. Last-writer-wins on a single key;
/// no cross-key transactions.
pub struct MemoryKv {
    inner: DashMap<String, Entry>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self { inner: DashMap::new() }
    }

    /// Spawn a periodic sweep that evicts expired entries. Returns the task
    /// handle; dropping/aborting it stops the sweep (the store keeps working,
    /// just without proactive eviction — expired reads are still filtered).
    pub fn spawn_sweeper(self: &std::sync::Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.sweep();
            }
        })
    }

    fn sweep(&self) {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, e| !e.is_expired(now));
        let removed = before - self.inner.len();
        if removed > 0 {
            debug!(removed, "kv sweep evicted expired entries");
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set(&self, key: String, value: Vec<u8>, ttl: Option<Duration>) {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.inner.insert(key, Entry { value, expires_at });
    }

    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        match self.inner.get(key) {
            Some(e) if !e.is_expired(now) => Some(e.value.clone()),
            Some(_) => {
                drop(self.inner.get(key));
                self.inner.remove(key);
                None
            }
            None => None,
        }
    }

    async fn delete(&self, key: &str) {
        self.inner.remove(key);
    }

    async fn scan_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        let now = Instant::now();
        self.inner
            .iter()
            .filter(|kv| kv.key().starts_with(prefix) && !kv.value().is_expired(now))
            .map(|kv| (kv.key().clone(), kv.value().value.clone()))
            .collect()
    }

    async fn touch(&self, key: &str, ttl: Duration) {
        if let Some(mut e) = self.inner.get_mut(key) {
            e.expires_at = Some(Instant::now() + ttl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let kv = MemoryKv::new();
        kv.set("repeater:100001".into(), b"online".to_vec(), None).await;
        assert_eq!(kv.get("repeater:100001").await, Some(b"online".to_vec()));
    }

    #[tokio::test]
    async fn expiry_hides_value_even_before_sweep() {
        let kv = MemoryKv::new();
        kv.set("x".into(), b"1".to_vec(), Some(Duration::from_millis(1))).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(kv.get("x").await, None);
    }

    #[tokio::test]
    async fn scan_prefix_filters() {
        let kv = MemoryKv::new();
        kv.set("repeater:1".into(), b"a".to_vec(), None).await;
        kv.set("repeater:2".into(), b"b".to_vec(), None).await;
        kv.set("instance:x".into(), b"c".to_vec(), None).await;
        let mut found = kv.scan_prefix("repeater:").await;
        found.sort();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn sweeper_evicts_expired_entries() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("x".into(), b"1".to_vec(), Some(Duration::from_millis(1))).await;
        let handle = kv.spawn_sweeper(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
        assert_eq!(kv.inner.len(), 0);
    }

    #[tokio::test]
    async fn touch_extends_ttl() {
        let kv = MemoryKv::new();
        kv.set("x".into(), b"1".to_vec(), Some(Duration::from_millis(20))).await;
        kv.touch("x", Duration::from_secs(5)).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(kv.get("x").await, Some(b"1".to_vec()));
    }
}

//! Instance registry (§4.11). A KV-backed heartbeat lets the process
//! distinguish "I'm the last instance standing" (send `MSTCL` to every
//! connected repeater on shutdown) from "peers are still up" (skip it and
//! let sessions migrate). Useful mainly once the KV/bus backends are swapped
//! for networked implementations; against the in-process `MemoryKv` shipped
//! here, an instance only ever sees its own heartbeat key.

use std::sync::Arc;
use std::time::Duration;

use dmrswitch_kv::KvStore;
use dmrswitch_media::topics;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const HEARTBEAT_TTL: Duration = Duration::from_secs(15);

pub struct InstanceRegistry {
    id: Uuid,
    kv: Arc<dyn KvStore>,
}

impl InstanceRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { id: Uuid::new_v4(), kv }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn heartbeat_once(&self) {
        self.kv.set(topics::instance(self.id), Vec::new(), Some(HEARTBEAT_TTL)).await;
    }

    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                this.heartbeat_once().await;
            }
        })
    }

    /// True if any other instance's heartbeat is still live.
    pub async fn peers_alive(&self) -> bool {
        self.kv
            .scan_prefix("instance:")
            .await
            .into_iter()
            .any(|(key, _)| key != topics::instance(self.id))
    }

    pub async fn deregister(&self) {
        self.kv.delete(&topics::instance(self.id)).await;
        debug!(instance = %self.id, "instance deregistered");
    }
}

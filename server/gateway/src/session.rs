//! Per-repeater handshake/session state (§4.2, §3 "volatile per-session
//! state"). Lives entirely in the KV store under `repeater:<id>` — nothing
//! here is durable, and since `dmrswitch-kv` is a process-local map, only the
//! instance holding a repeater's live UDP conversation ever has its record
//! (the basis for §4.7's multi-instance delivery rule).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dmrswitch_kv::KvStore;
use serde::{Deserialize, Serialize};

use dmrswitch_control::RepeaterId;
use dmrswitch_media::topics;

use crate::errors::GatewayError;

/// Refreshed on every valid datagram from a connected repeater; well past
/// the typical ping cadence so a couple of missed pings don't drop the
/// session before the peer reconnects.
pub const SESSION_TTL: Duration = Duration::from_secs(90);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    ChallengeSent,
    WaitingConfig,
    Yes,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub state: SessionState,
    pub addr: SocketAddr,
    pub salt: u32,
    pub connected_at: DateTime<Utc>,
    pub last_ping_at: DateTime<Utc>,
    pub pings_received: u32,
    pub options: String,
}

pub struct SessionStore {
    kv: Arc<dyn KvStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn get(&self, id: RepeaterId) -> Option<SessionRecord> {
        let raw = self.kv.get(&topics::repeater_session(id)).await?;
        serde_json::from_slice(&raw).ok()
    }

    pub async fn put(&self, id: RepeaterId, record: &SessionRecord) {
        if let Ok(raw) = serde_json::to_vec(record) {
            self.kv.set(topics::repeater_session(id), raw, Some(SESSION_TTL)).await;
        }
    }

    pub async fn delete(&self, id: RepeaterId) {
        self.kv.delete(&topics::repeater_session(id)).await;
    }

    pub async fn touch(&self, id: RepeaterId) {
        self.kv.touch(&topics::repeater_session(id), SESSION_TTL).await;
    }

    /// `validRepeater` (§4.2): the session must exist, its stored IP must
    /// match the datagram's source IP, and its state must match the one
    /// expected by the handler that's about to run.
    pub async fn valid(
        &self,
        id: RepeaterId,
        expected: SessionState,
        from: SocketAddr,
    ) -> Result<SessionRecord, GatewayError> {
        let record = self.get(id).await.ok_or(GatewayError::UnknownSession(id.0))?;
        if record.addr.ip() != from.ip() {
            return Err(GatewayError::AddressMismatch(id.0));
        }
        if record.state != expected {
            return Err(GatewayError::StateMismatch(id.0));
        }
        Ok(record)
    }

    pub async fn all_connected(&self) -> Vec<(RepeaterId, SessionRecord)> {
        self.kv
            .scan_prefix("repeater:")
            .await
            .into_iter()
            .filter_map(|(key, raw)| {
                let id: u32 = key.strip_prefix("repeater:")?.parse().ok()?;
                let record: SessionRecord = serde_json::from_slice(&raw).ok()?;
                Some((RepeaterId(id), record))
            })
            .collect()
    }
}

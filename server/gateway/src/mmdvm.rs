//! The MMDVM server (§4.2): a UDP listener plus the per-repeater handshake
//! state machine. Owns the single socket every connected repeater's session
//! is pinned to, which is what makes `dmrswitch-kv`'s process-local session
//! records a correct multi-instance ownership signal (§4.7).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dmrswitch_codec::Packet;
use dmrswitch_control::{ControlRepo, RepeaterId};
use dmrswitch_media::Hub;
use dmrswitch_metrics::gateway::GatewayMetrics;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::errors::GatewayError;
use crate::rptc::parse_rptc;
use crate::session::{SessionRecord, SessionState, SessionStore};

pub struct MmdvmServer {
    socket: Arc<UdpSocket>,
    sessions: Arc<SessionStore>,
    repo: Arc<dyn ControlRepo>,
    hub: Arc<Hub>,
    metrics: Arc<GatewayMetrics>,
}

impl MmdvmServer {
    pub fn new(
        socket: Arc<UdpSocket>,
        sessions: Arc<SessionStore>,
        repo: Arc<dyn ControlRepo>,
        hub: Arc<Hub>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self { socket, sessions, repo, hub, metrics }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = [0u8; 2048];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            self.dispatch(&buf[..len], from).await;
        }
    }

    async fn dispatch(&self, buf: &[u8], from: SocketAddr) {
        if buf.len() < 4 {
            debug!(len = buf.len(), "dropping runt datagram");
            return;
        }

        match &buf[0..4] {
            b"DMRD" => self.handle_dmrd(buf, from).await,
            b"RPTL" if buf.len() == 8 => self.handle_rptl(buf, from).await,
            b"RPTK" if buf.len() == 40 => self.handle_rptk(buf, from).await,
            b"RPTC" if buf.len() == 8 => self.handle_rptcl(buf, from).await,
            b"RPTC" if buf.len() == crate::rptc::RPTC_CONFIG_LEN => self.handle_rptc(buf, from).await,
            b"RPTO" if (8..=300).contains(&buf.len()) => self.handle_rpto(buf, from).await,
            b"RPTP" if buf.len() == 11 => self.handle_rptping(buf, from).await,
            b"DMRA" if buf.len() >= 15 => self.handle_dmra(buf, from).await,
            other => {
                debug!(signature = ?String::from_utf8_lossy(other), len = buf.len(), "unknown command, dropping");
            }
        }
    }

    async fn handle_dmrd(&self, buf: &[u8], from: SocketAddr) {
        let Ok(packet) = Packet::decode(buf) else {
            debug!(len = buf.len(), "dropping malformed DMRD frame");
            return;
        };
        let repeater = RepeaterId(packet.repeater);
        if let Err(e) = self.sessions.valid(repeater, SessionState::Yes, from).await {
            debug!(repeater = repeater.0, error = %e, "DMRD: session check failed");
            self.nak(repeater, from).await;
            return;
        }
        self.sessions.touch(repeater).await;
        self.hub.handle_packet(buf, &packet).await;
    }

    async fn handle_rptl(&self, buf: &[u8], from: SocketAddr) {
        let id = RepeaterId(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]));
        self.metrics.control_msg_rx("RPTL");

        let salt = rand::thread_rng().next_u32();
        let now = Utc::now();
        let record = SessionRecord {
            state: SessionState::ChallengeSent,
            addr: from,
            salt,
            connected_at: now,
            last_ping_at: now,
            pings_received: 0,
            options: String::new(),
        };
        self.sessions.put(id, &record).await;
        info!(repeater = id.0, %from, "RPTL received, challenge issued");

        let mut reply = Vec::with_capacity(10);
        reply.extend_from_slice(b"RPTACK");
        reply.extend_from_slice(&salt.to_be_bytes());
        self.send(&reply, from).await;
        self.metrics.control_msg_tx("RPTACK");
    }

    async fn handle_rptk(&self, buf: &[u8], from: SocketAddr) {
        let id = RepeaterId(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]));
        self.metrics.control_msg_rx("RPTK");

        let record = match self.sessions.valid(id, SessionState::ChallengeSent, from).await {
            Ok(r) => r,
            Err(e) => {
                debug!(repeater = id.0, error = %e, "RPTK: session check failed");
                self.nak(id, from).await;
                return;
            }
        };
        let row = match self.repo.get_repeater(id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.nak(id, from).await;
                return;
            }
            Err(e) => {
                let err = GatewayError::from(e);
                warn!(repeater = id.0, error = %err, "RPTK: repo lookup failed");
                self.nak(id, from).await;
                return;
            }
        };

        let mut hasher = Sha256::new();
        hasher.update(record.salt.to_be_bytes());
        hasher.update(row.password_hash.as_bytes());
        let expected = hasher.finalize();

        if expected.as_slice() != &buf[8..40] {
            let err = GatewayError::AuthFailed(id.0);
            warn!(repeater = id.0, error = %err, "RPTK: challenge response mismatch");
            self.metrics.auth_failed();
            self.nak(id, from).await;
            return;
        }

        self.metrics.auth_success();
        let mut next = record;
        next.state = SessionState::WaitingConfig;
        self.sessions.put(id, &next).await;

        let mut ack = Vec::with_capacity(10);
        ack.extend_from_slice(b"RPTACK");
        ack.extend_from_slice(&id.0.to_be_bytes());
        self.send(&ack, from).await;
        self.metrics.control_msg_tx("RPTACK");

        let socket = Arc::clone(&self.socket);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let mut bkn = Vec::with_capacity(11);
            bkn.extend_from_slice(b"RPTSBKN");
            bkn.extend_from_slice(&id.0.to_be_bytes());
            let _ = socket.send_to(&bkn, from).await;
        });
    }

    async fn handle_rptcl(&self, buf: &[u8], from: SocketAddr) {
        let id = RepeaterId(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]));
        self.metrics.control_msg_rx("RPTCL");

        if self.sessions.get(id).await.is_some() {
            self.sessions.delete(id).await;
            self.hub.deregister_repeater(id);
            info!(repeater = id.0, "RPTCL: session closed");
        }
        self.nak(id, from).await;
    }

    async fn handle_rptc(&self, buf: &[u8], from: SocketAddr) {
        let id = RepeaterId(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]));
        self.metrics.control_msg_rx("RPTC");

        let record = match self.sessions.valid(id, SessionState::WaitingConfig, from).await {
            Ok(r) => r,
            Err(e) => {
                debug!(repeater = id.0, error = %e, "RPTC: session check failed");
                self.nak(id, from).await;
                return;
            }
        };

        let Some(cfg) = parse_rptc(buf) else {
            warn!(repeater = id.0, "RPTC: payload failed validation, keeping WAITING_CONFIG");
            return;
        };

        let existing = match self.repo.get_repeater(id).await {
            Ok(v) => v,
            Err(e) => {
                let err = GatewayError::from(e);
                warn!(repeater = id.0, error = %err, "RPTC: failed to look up existing repeater");
                return;
            }
        };
        let (owner_id, password_hash, ts1_static, ts2_static, ts1_dyn, ts2_dyn, hotspot, created_at) =
            match &existing {
                Some(r) => (
                    r.owner_id,
                    r.password_hash.clone(),
                    r.ts1_static_talkgroups.clone(),
                    r.ts2_static_talkgroups.clone(),
                    r.ts1_dynamic_talkgroup,
                    r.ts2_dynamic_talkgroup,
                    r.hotspot,
                    r.created_at,
                ),
                None => {
                    warn!(repeater = id.0, "RPTC: repeater has no registered owner, dropping config");
                    return;
                }
            };

        let row = dmrswitch_control::Repeater {
            id,
            owner_id,
            callsign: cfg.callsign,
            rx_freq: cfg.rx_freq,
            tx_freq: cfg.tx_freq,
            tx_power: cfg.tx_power,
            color_code: cfg.color_code,
            latitude: cfg.latitude,
            longitude: cfg.longitude,
            height: cfg.height,
            location: cfg.location,
            description: cfg.description,
            slots: cfg.slots,
            url: cfg.url,
            software_id: cfg.software_id,
            package_id: cfg.package_id,
            password_hash,
            ts1_static_talkgroups: ts1_static,
            ts2_static_talkgroups: ts2_static,
            ts1_dynamic_talkgroup: ts1_dyn,
            ts2_dynamic_talkgroup: ts2_dyn,
            hotspot,
            created_at,
            updated_at: Utc::now(),
        };

        if let Err(e) = self.repo.upsert_repeater(&row).await {
            let err = GatewayError::from(e);
            warn!(repeater = id.0, error = %err, "RPTC: failed to persist config");
            return;
        }

        let mut next = record;
        next.state = SessionState::Yes;
        self.sessions.put(id, &next).await;

        let mut ack = Vec::with_capacity(10);
        ack.extend_from_slice(b"RPTACK");
        ack.extend_from_slice(&id.0.to_be_bytes());
        self.send(&ack, from).await;
        self.metrics.control_msg_tx("RPTACK");
        info!(repeater = id.0, callsign = %row.callsign, "repeater connected");

        self.hub.register_repeater(id).await;
    }

    async fn handle_rpto(&self, buf: &[u8], from: SocketAddr) {
        let id = RepeaterId(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]));
        let Ok(mut record) = self.sessions.valid(id, SessionState::Yes, from).await else {
            return;
        };
        record.options = String::from_utf8_lossy(&buf[8..]).trim_matches('\0').to_string();
        self.sessions.put(id, &record).await;
        debug!(repeater = id.0, options = %record.options, "RPTO recorded");
    }

    async fn handle_rptping(&self, buf: &[u8], from: SocketAddr) {
        let id = RepeaterId(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]));
        let mut record = match self.sessions.valid(id, SessionState::Yes, from).await {
            Ok(r) => r,
            Err(e) => {
                debug!(repeater = id.0, error = %e, "RPTPING: session check failed");
                self.nak(id, from).await;
                return;
            }
        };
        record.last_ping_at = Utc::now();
        record.pings_received += 1;
        self.sessions.put(id, &record).await;

        let mut pong = Vec::with_capacity(11);
        pong.extend_from_slice(b"MSTPONG");
        pong.extend_from_slice(&id.0.to_be_bytes());
        self.send(&pong, from).await;
    }

    async fn handle_dmra(&self, buf: &[u8], from: SocketAddr) {
        let id = RepeaterId(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]));
        if self.sessions.valid(id, SessionState::Yes, from).await.is_ok() {
            self.sessions.touch(id).await;
        }
        debug!(repeater = id.0, "DMRA received, talker alias payload ignored");
    }

    async fn nak(&self, id: RepeaterId, from: SocketAddr) {
        let mut nak = Vec::with_capacity(10);
        nak.extend_from_slice(b"MSTNAK");
        nak.extend_from_slice(&id.0.to_be_bytes());
        self.send(&nak, from).await;
        self.metrics.control_msg_tx("MSTNAK");
    }

    async fn send(&self, buf: &[u8], to: SocketAddr) {
        if let Err(e) = self.socket.send_to(buf, to).await {
            warn!(%to, error = %e, "send_to failed");
        }
    }

    /// Shutdown (§4.11 / §5): send `MSTCL` to every connected repeater. The
    /// caller decides, via the instance registry, whether this should run
    /// at all (skip it when peers are still live so sessions migrate).
    pub async fn disconnect_all(&self) {
        for (id, record) in self.sessions.all_connected().await {
            let mut msg = Vec::with_capacity(10);
            msg.extend_from_slice(b"MSTCL");
            msg.extend_from_slice(&id.0.to_be_bytes());
            self.send(&msg, record.addr).await;
            self.hub.deregister_repeater(id);
        }
    }
}

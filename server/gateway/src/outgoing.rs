//! Outgoing path (§4.7): the MMDVM server subscribes to the in-process
//! `outgoing:noaddr` topic, looks up the live session address for
//! `packet.repeater`, and writes the encoded frame to UDP. If this instance
//! has no session record for that repeater (because some other instance
//! owns its socket) the frame is silently dropped — delivery is exclusive
//! by construction, no cross-instance lease required.

use std::sync::Arc;

use dmrswitch_bus::Bus;
use dmrswitch_codec::Packet;
use dmrswitch_control::RepeaterId;
use dmrswitch_media::topics;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::session::SessionStore;

pub fn spawn_outgoing_writer(bus: Arc<Bus>, sessions: Arc<SessionStore>, socket: Arc<UdpSocket>) {
    let mut sub = bus.subscribe(topics::OUTGOING);
    tokio::spawn(async move {
        while let Some(raw) = sub.recv().await {
            let Ok(packet) = Packet::decode(&raw) else { continue };
            let Some(record) = sessions.get(RepeaterId(packet.repeater)).await else {
                debug!(repeater = packet.repeater, "outgoing: no local session, dropping");
                continue;
            };
            if let Err(e) = socket.send_to(&raw, record.addr).await {
                warn!(repeater = packet.repeater, error = %e, "outgoing: send_to failed");
            }
        }
    });
}

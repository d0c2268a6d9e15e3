//! Parrot (echo) service (§4.4). A private call to the well-known id 9990
//! is recorded frame-by-frame and replayed back to the source repeater 3
//! seconds after the stream's terminator, paced at one frame per 60 ms.

use std::sync::Arc;
use std::time::Duration;

use dmrswitch_bus::Bus;
use dmrswitch_codec::Packet;
use dmrswitch_control::RepeaterId;
use dmrswitch_kv::KvStore;
use tracing::debug;

use crate::topics;
use crate::tracker::CallTracker;

/// How long a parrot session marker (and its recorded frames) survive with
/// no activity before the KV store reclaims them.
const SESSION_TTL: Duration = Duration::from_secs(5 * 60);
/// Delay between the terminator and the start of playback.
const PLAYBACK_DELAY: Duration = Duration::from_secs(3);
/// Per-frame playback pacing.
const FRAME_PACING: Duration = Duration::from_millis(60);

pub struct Parrot {
    kv: Arc<dyn KvStore>,
    bus: Arc<Bus>,
    tracker: Arc<CallTracker>,
}

impl Parrot {
    pub fn new(kv: Arc<dyn KvStore>, bus: Arc<Bus>, tracker: Arc<CallTracker>) -> Arc<Self> {
        Arc::new(Self { kv, bus, tracker })
    }

    /// Feed one inbound frame of a private call to 9990. On the first voice
    /// frame of a stream this records the owning repeater; every frame is
    /// appended (with src/dst swapped, as it will be replayed) to the
    /// session's packet log. On the terminator, playback is scheduled.
    pub async fn handle_frame(self: &Arc<Self>, packet: &Packet) {
        let marker_key = topics::parrot_marker(packet.stream_id);

        if self.kv.get(&marker_key).await.is_none() {
            self.kv
                .set(marker_key.clone(), packet.repeater.to_be_bytes().to_vec(), Some(SESSION_TTL))
                .await;
        } else {
            self.kv.touch(&marker_key, SESSION_TTL).await;
        }

        let Some(owner_bytes) = self.kv.get(&marker_key).await else {
            return;
        };
        let owner_repeater = u32::from_be_bytes(owner_bytes.try_into().unwrap_or_default());

        let mut recorded = packet.clone();
        recorded.src = packet.dst;
        recorded.dst = packet.src;
        recorded.group_call = false;
        recorded.ber = -1;
        recorded.rssi = -1;
        recorded.repeater = owner_repeater;

        self.append_frame(packet.stream_id, &recorded).await;

        if packet.is_voice_terminator() {
            self.schedule_playback(packet.stream_id, RepeaterId(owner_repeater));
        }
    }

    async fn append_frame(&self, stream_id: u32, packet: &Packet) {
        let key = topics::parrot_packets(stream_id);
        let mut frames = self
            .kv
            .get(&key)
            .await
            .and_then(|raw| serde_json::from_slice::<Vec<Vec<u8>>>(&raw).ok())
            .unwrap_or_default();
        frames.push(packet.encode());
        if let Ok(raw) = serde_json::to_vec(&frames) {
            self.kv.set(key, raw, Some(SESSION_TTL)).await;
        }
    }

    fn schedule_playback(self: &Arc<Self>, stream_id: u32, owner: RepeaterId) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(PLAYBACK_DELAY).await;
            this.replay(stream_id, owner).await;
        });
    }

    async fn replay(self: &Arc<Self>, stream_id: u32, owner: RepeaterId) {
        let key = topics::parrot_packets(stream_id);
        let Some(raw) = self.kv.get(&key).await else {
            debug!(stream_id, "parrot: nothing recorded to replay");
            return;
        };
        let Ok(frames) = serde_json::from_slice::<Vec<Vec<u8>>>(&raw) else {
            return;
        };

        let started = tokio::time::Instant::now();
        for (i, raw_frame) in frames.iter().enumerate() {
            let Ok(packet) = Packet::decode(raw_frame) else { continue };

            // Feed a synthetic call into the tracker so replay shows up in
            // call history/metrics like any other stream.
            if i == 0 {
                self.tracker.start_call(&packet).await;
            }
            self.tracker.process_call_packet(&packet).await;
            if packet.is_voice_terminator() {
                self.tracker.end_call(&packet).await;
            }

            self.bus.publish(topics::OUTGOING, packet.encode().into());

            // Account for elapsed time so replay never falls more than one
            // frame pacing interval behind.
            let target = started + FRAME_PACING * (i as u32 + 1);
            let now = tokio::time::Instant::now();
            if target > now {
                tokio::time::sleep(target - now).await;
            }
        }

        self.kv.delete(&key).await;
        self.kv.delete(&topics::parrot_marker(stream_id)).await;
        debug!(stream_id, owner = owner.0, frames = frames.len(), "parrot: replay complete");
    }
}

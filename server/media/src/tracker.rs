//! Per-stream call lifecycle: `StartCall`, `IsCallActive`, `ProcessCallPacket`,
//! `EndCall`, and the inactivity timer that synthesizes an `EndCall` when a
//! stream goes quiet. Sequence-loss accounting follows the superframe rules
//! in the routing core's protocol notes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use dmrswitch_bus::Bus;
use dmrswitch_codec::{FrameType, Packet, VOICE_F};
use dmrswitch_control::{
    classify_private_destination, Call, CallEvent, CallId, ControlRepo, PrivateDestination,
    RepeaterSummary, TalkgroupId, TalkgroupSummary, UserId, UserSummary, PARROT_ID,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::topics;

/// Inactivity window after which a quiet stream is force-ended (§5).
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_millis(2_000);
/// Key-up artifact threshold: streams shorter than this are dropped, not persisted.
const KEY_UP_ARTIFACT: Duration = Duration::from_millis(100);
/// Expected inter-frame spacing used as the jitter baseline.
const EXPECTED_FRAME_MS: f32 = 60.0;
/// Bits carried by one voice frame, for BER accounting.
const BITS_PER_VOICE_FRAME: u64 = 141;

/// Identifies a single active stream the way `IsCallActive` does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub stream_id: u32,
    pub src: u32,
    pub dst: u32,
    pub slot: bool,
    pub group_call: bool,
}

impl StreamKey {
    fn from_packet(p: &Packet) -> Self {
        Self {
            stream_id: p.stream_id,
            src: p.src,
            dst: p.dst,
            slot: p.slot,
            group_call: p.group_call,
        }
    }
}

struct CallState {
    call: Call,
    started_at: Instant,
    last_seen: Instant,
    packets_since_snapshot: u32,
}

/// Per-call synchronization: one map of in-flight calls, one map of pending
/// inactivity timers, each under its own guard (§4.10). A per-call `Mutex`
/// (not a global one) keeps updates to a single stream serialized without
/// blocking unrelated streams.
pub struct CallTracker {
    repo: Arc<dyn ControlRepo>,
    bus: Arc<Bus>,
    in_flight: DashMap<StreamKey, Arc<Mutex<CallState>>>,
    end_timers: DashMap<StreamKey, JoinHandle<()>>,
}

impl CallTracker {
    pub fn new(repo: Arc<dyn ControlRepo>, bus: Arc<Bus>) -> Arc<Self> {
        Arc::new(Self {
            repo,
            bus,
            in_flight: DashMap::new(),
            end_timers: DashMap::new(),
        })
    }

    pub fn is_call_active(&self, packet: &Packet) -> bool {
        self.in_flight.contains_key(&StreamKey::from_packet(packet))
    }

    /// Resolves destination as Talkgroup | Repeater | User (group calls try
    /// talkgroup first; private calls resolve directly by id range) and
    /// persists a new `Call` row. Returns `false` if the source user or
    /// repeater doesn't exist — callers should drop the packet in that case.
    pub async fn start_call(self: &Arc<Self>, packet: &Packet) -> bool {
        let key = StreamKey::from_packet(packet);
        if self.in_flight.contains_key(&key) {
            return true;
        }

        let user_id = UserId(packet.src);
        let repeater_id = dmrswitch_control::RepeaterId(packet.repeater);

        let Ok(Some(_user)) = self.repo.get_user(user_id).await else {
            debug!(src = packet.src, "start_call: unknown source user");
            return false;
        };
        let Ok(Some(_repeater)) = self.repo.get_repeater(repeater_id).await else {
            debug!(repeater = packet.repeater, "start_call: unknown source repeater");
            return false;
        };

        let (is_to_repeater, is_to_user, is_to_talkgroup) = if packet.group_call {
            (false, false, true)
        } else {
            match classify_private_destination(packet.dst) {
                PrivateDestination::Repeater(_) => (true, false, false),
                PrivateDestination::User(_) => (false, true, false),
            }
        };

        let now = Utc::now();
        let call = Call {
            id: CallId::new(),
            stream_id: packet.stream_id,
            start_time: now,
            duration_ms: 0,
            active: true,
            user_id,
            repeater_id,
            time_slot: packet.slot,
            group_call: packet.group_call,
            destination_id: packet.dst,
            is_to_repeater,
            is_to_user,
            is_to_talkgroup,
            total_packets: 0,
            lost_sequences: 0,
            last_packet_time: now,
            loss: 0.0,
            jitter: 0.0,
            last_frame_num: VOICE_F,
            rssi: 0.0,
            ber: 0.0,
            total_bits: 0,
            has_header: false,
            has_term: false,
        };
        call.assert_exclusive_destination();

        if let Err(e) = self.repo.create_call(&call).await {
            warn!(error = %e, "start_call: failed to persist call row");
        }

        let state = Arc::new(Mutex::new(CallState {
            call,
            started_at: Instant::now(),
            last_seen: Instant::now(),
            packets_since_snapshot: 0,
        }));
        self.in_flight.insert(key, state);
        self.arm_inactivity_timer(key);
        true
    }

    /// Updates jitter and sequence-loss accounting, resets the inactivity
    /// timer, and publishes a call-event snapshot on every other packet.
    pub async fn process_call_packet(self: &Arc<Self>, packet: &Packet) {
        let key = StreamKey::from_packet(packet);
        let Some(entry) = self.in_flight.get(&key) else {
            return;
        };
        let state = entry.clone();
        drop(entry);

        let snapshot = {
            let mut guard = state.lock().await;
            let now = Instant::now();
            let delta_ms = now.duration_since(guard.last_seen).as_millis() as f32;
            guard.last_seen = now;
            guard.call.last_packet_time = Utc::now();
            guard.call.duration_ms = now.duration_since(guard.started_at).as_millis() as i64;
            guard.call.jitter = (guard.call.jitter + (delta_ms - EXPECTED_FRAME_MS)) / 2.0;

            apply_sequence_loss(&mut guard.call, packet);
            apply_ber(&mut guard.call, packet);

            if guard.call.total_packets > 0 {
                guard.call.loss = guard.call.lost_sequences as f32 / guard.call.total_packets as f32;
            }

            guard.packets_since_snapshot += 1;
            let publish = guard.packets_since_snapshot % 2 == 0;
            if let Err(e) = self.repo.update_call(&guard.call).await {
                warn!(error = %e, "process_call_packet: failed to persist call row");
            }
            publish.then(|| guard.call.clone())
        };

        self.rearm_inactivity_timer(key);

        if let Some(call) = snapshot {
            self.publish_call_event(&call).await;
        }
    }

    /// Cancels the inactivity timer and finalizes the call. Calls shorter
    /// than `KEY_UP_ARTIFACT` are deleted rather than persisted.
    pub async fn end_call(self: &Arc<Self>, packet: &Packet) {
        let key = StreamKey::from_packet(packet);
        self.end_call_by_key(key).await;
    }

    async fn end_call_by_key(self: &Arc<Self>, key: StreamKey) {
        if let Some((_, handle)) = self.end_timers.remove(&key) {
            handle.abort();
        }
        let Some((_, state)) = self.in_flight.remove(&key) else {
            return;
        };

        let mut guard = state.lock().await;
        let elapsed = guard.started_at.elapsed();

        if elapsed < KEY_UP_ARTIFACT {
            if let Err(e) = self.repo.delete_call(guard.call.id).await {
                warn!(error = %e, "end_call: failed to delete key-up artifact row");
            }
            return;
        }

        if !guard.call.has_term {
            guard.call.lost_sequences += 1;
            guard.call.total_packets += 1;
        }
        if guard.call.last_frame_num != VOICE_F {
            let gap = (VOICE_F - guard.call.last_frame_num) as u32;
            guard.call.lost_sequences += gap;
            guard.call.total_packets += gap;
        }
        if guard.call.total_packets > 0 {
            guard.call.loss = guard.call.lost_sequences as f32 / guard.call.total_packets as f32;
        }
        guard.call.active = false;

        if let Err(e) = self.repo.update_call(&guard.call).await {
            warn!(error = %e, "end_call: failed to persist final call row");
        }
        let call = guard.call.clone();
        drop(guard);
        self.publish_call_event(&call).await;
    }

    fn arm_inactivity_timer(self: &Arc<Self>, key: StreamKey) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(INACTIVITY_TIMEOUT).await;
            debug!(?key, "inactivity timer fired");
            this.end_call_by_key(key).await;
        });
        self.end_timers.insert(key, handle);
    }

    fn rearm_inactivity_timer(self: &Arc<Self>, key: StreamKey) {
        if let Some((_, old)) = self.end_timers.remove(&key) {
            old.abort();
        }
        self.arm_inactivity_timer(key);
    }

    async fn publish_call_event(&self, call: &Call) {
        let event = self.project_call_event(call).await;
        let Ok(payload) = serde_json::to_vec(&event) else {
            return;
        };
        self.bus.publish(topics::CALLS, payload.clone().into());
        self.bus.publish(&topics::user_calls(call.user_id), payload.into());
    }

    async fn project_call_event(&self, call: &Call) -> CallEvent {
        let user = self
            .repo
            .get_user(call.user_id)
            .await
            .ok()
            .flatten()
            .map(|u| UserSummary { id: u.id, callsign: u.callsign })
            .unwrap_or(UserSummary { id: call.user_id, callsign: String::new() });

        let to_talkgroup = if call.is_to_talkgroup {
            self.repo
                .get_talkgroup(TalkgroupId(call.destination_id))
                .await
                .ok()
                .flatten()
                .map(|tg| TalkgroupSummary { id: tg.id, name: tg.name, description: tg.description })
        } else {
            None
        };

        let to_user = if call.is_to_user && call.destination_id != PARROT_ID {
            self.repo
                .get_user(UserId(call.destination_id))
                .await
                .ok()
                .flatten()
                .map(|u| UserSummary { id: u.id, callsign: u.callsign })
        } else {
            None
        };

        let to_repeater = if call.is_to_repeater {
            self.repo
                .get_repeater(dmrswitch_control::RepeaterId(call.destination_id))
                .await
                .ok()
                .flatten()
                .map(|r| RepeaterSummary { radio_id: r.id, callsign: r.callsign })
        } else {
            None
        };

        CallEvent {
            id: call.id,
            user,
            start_time: call.start_time,
            duration: call.duration_ms as f64 / 1000.0,
            active: call.active,
            time_slot: call.time_slot,
            group_call: call.group_call,
            is_to_talkgroup: call.is_to_talkgroup,
            to_talkgroup,
            is_to_user: call.is_to_user,
            to_user,
            is_to_repeater: call.is_to_repeater,
            to_repeater,
            loss: call.loss,
            jitter: call.jitter,
            ber: call.ber,
            rssi: call.rssi,
        }
    }
}

/// Superframe sequence-loss accounting (protocol notes §4.3, rules 1-4).
/// Uses explicit modular arithmetic over `0..=5` rather than signed/unsigned
/// casts, resolving the source's ambiguity around wraparound.
fn apply_sequence_loss(call: &mut Call, packet: &Packet) {
    match packet.frame_type {
        FrameType::DataSync if packet.is_voice_header() => {
            call.has_header = true;
            call.total_packets += 1;
            call.last_frame_num = 0;
        }
        FrameType::DataSync if packet.is_voice_terminator() => {
            if call.last_frame_num != VOICE_F {
                let gap = (VOICE_F - call.last_frame_num) as u32;
                call.lost_sequences += gap;
                call.total_packets += gap;
            }
            call.total_packets += 1;
            call.last_frame_num = 0;
            call.has_term = true;
        }
        FrameType::DataSync => {
            // Non-voice data sync frame; not part of superframe accounting.
        }
        FrameType::VoiceSync => {
            let current = 0u8;
            if !call.has_header && call.last_frame_num == 0 {
                call.lost_sequences += 1;
                call.has_header = true;
            }
            if call.last_frame_num != 0 && call.last_frame_num != VOICE_F {
                let gap = wrapped_gap(call.last_frame_num, current);
                call.lost_sequences += gap;
                call.total_packets += gap;
            }
            call.total_packets += 1;
            call.last_frame_num = current;
        }
        FrameType::Voice => {
            let current = packet.d_type_or_vseq;
            if !call.has_header {
                let missed = current as u32 + 1;
                call.lost_sequences += missed;
                call.total_packets += missed;
                call.has_header = true;
            } else {
                let expected = call.last_frame_num + 1;
                if current != expected {
                    let gap = if current < call.last_frame_num {
                        wrapped_gap(call.last_frame_num, current)
                    } else {
                        (current - expected) as u32
                    };
                    call.lost_sequences += gap;
                    call.total_packets += gap;
                }
            }
            call.total_packets += 1;
            call.last_frame_num = current;
        }
    }
}

/// Frames missed going from `last` to `current` when `current` has wrapped
/// past `VOICE_F` back toward 0 (`VoiceF - last + current`).
fn wrapped_gap(last: u8, current: u8) -> u32 {
    (VOICE_F - last) as u32 + current as u32
}

fn apply_ber(call: &mut Call, packet: &Packet) {
    if packet.ber > 0 {
        call.total_bits += BITS_PER_VOICE_FRAME;
        call.ber = (call.ber + packet.ber as f32 / call.total_bits as f32) / 2.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmrswitch_codec::DMR_PAYLOAD_LEN;

    fn base_call() -> Call {
        Call {
            id: CallId::new(),
            stream_id: 1,
            start_time: Utc::now(),
            duration_ms: 0,
            active: true,
            user_id: UserId(1_000_001),
            repeater_id: dmrswitch_control::RepeaterId(100_001),
            time_slot: false,
            group_call: true,
            destination_id: 1,
            is_to_repeater: false,
            is_to_user: false,
            is_to_talkgroup: true,
            total_packets: 0,
            lost_sequences: 0,
            last_packet_time: Utc::now(),
            loss: 0.0,
            jitter: 0.0,
            last_frame_num: VOICE_F,
            rssi: 0.0,
            ber: 0.0,
            total_bits: 0,
            has_header: false,
            has_term: false,
        }
    }

    fn frame(frame_type: FrameType, d_type_or_vseq: u8) -> Packet {
        Packet {
            seq: 0,
            src: 1_000_001,
            dst: 1,
            repeater: 100_001,
            slot: false,
            group_call: true,
            frame_type,
            d_type_or_vseq,
            stream_id: 1,
            dmr_data: [0u8; DMR_PAYLOAD_LEN],
            ber: -1,
            rssi: -1,
        }
    }

    #[test]
    fn complete_superframe_has_no_loss() {
        let mut call = base_call();
        apply_sequence_loss(&mut call, &frame(FrameType::DataSync, 0));
        apply_sequence_loss(&mut call, &frame(FrameType::VoiceSync, 0));
        for v in 1..=4 {
            apply_sequence_loss(&mut call, &frame(FrameType::Voice, v));
        }
        apply_sequence_loss(&mut call, &frame(FrameType::Voice, 5));
        apply_sequence_loss(&mut call, &frame(FrameType::DataSync, 5));
        assert_eq!(call.lost_sequences, 0);
        assert!(call.total_packets > 0);
    }

    #[test]
    fn dropped_middle_frames_are_counted_as_loss() {
        let mut call = base_call();
        apply_sequence_loss(&mut call, &frame(FrameType::DataSync, 0));
        apply_sequence_loss(&mut call, &frame(FrameType::VoiceSync, 0));
        apply_sequence_loss(&mut call, &frame(FrameType::Voice, 1));
        // frames 2 and 3 never arrive
        apply_sequence_loss(&mut call, &frame(FrameType::Voice, 4));
        assert_eq!(call.lost_sequences, 2);
    }

    #[test]
    fn terminator_without_final_voice_frame_counts_remaining_as_loss() {
        let mut call = base_call();
        apply_sequence_loss(&mut call, &frame(FrameType::DataSync, 0));
        apply_sequence_loss(&mut call, &frame(FrameType::VoiceSync, 0));
        apply_sequence_loss(&mut call, &frame(FrameType::Voice, 1));
        apply_sequence_loss(&mut call, &frame(FrameType::DataSync, 5));
        assert_eq!(call.lost_sequences, 4);
    }

    #[test]
    fn voice_without_header_counts_header_and_skipped_frames() {
        let mut call = base_call();
        apply_sequence_loss(&mut call, &frame(FrameType::Voice, 2));
        assert!(call.has_header);
        assert_eq!(call.lost_sequences, 3);
    }

    #[test]
    fn ber_updates_running_average_and_total_bits() {
        let mut call = base_call();
        apply_ber(&mut call, &{
            let mut p = frame(FrameType::Voice, 1);
            p.ber = 10;
            p
        });
        assert_eq!(call.total_bits, BITS_PER_VOICE_FRAME);
        assert!(call.ber > 0.0);
    }
}

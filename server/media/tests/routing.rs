//! End-to-end scenarios from the routing core's testable-properties list.

mod support;

use std::sync::Arc;
use std::time::Duration;

use dmrswitch_codec::{FrameType, Packet, DMR_PAYLOAD_LEN, VOICE_F, VOICE_HEAD};
use dmrswitch_control::{ControlRepo, TalkgroupId};
use dmrswitch_bus::Bus;
use dmrswitch_kv::MemoryKv;
use dmrswitch_media::{CallTracker, Hub, Parrot, SubscriptionManager};

use support::FakeControlRepo;

fn voice_frame(src: u32, dst: u32, repeater: u32, slot: bool, group_call: bool, stream_id: u32) -> Packet {
    Packet {
        seq: 0,
        src,
        dst,
        repeater,
        slot,
        group_call,
        frame_type: FrameType::Voice,
        d_type_or_vseq: 1,
        stream_id,
        dmr_data: [0u8; DMR_PAYLOAD_LEN],
        ber: -1,
        rssi: -1,
    }
}

fn terminator(mut p: Packet) -> Packet {
    p.frame_type = FrameType::DataSync;
    p.d_type_or_vseq = VOICE_F;
    p
}

fn header(mut p: Packet) -> Packet {
    p.frame_type = FrameType::DataSync;
    p.d_type_or_vseq = VOICE_HEAD;
    p
}

struct Harness {
    hub: Arc<Hub>,
    subs: Arc<SubscriptionManager>,
    bus: Arc<Bus>,
    repo: Arc<FakeControlRepo>,
}

fn build_harness(repo: Arc<FakeControlRepo>) -> Harness {
    let bus = Arc::new(Bus::new());
    let kv = Arc::new(MemoryKv::new());
    let tracker = CallTracker::new(repo.clone(), bus.clone());
    let subs = SubscriptionManager::new(repo.clone(), bus.clone());
    let parrot = Parrot::new(kv, bus.clone(), tracker.clone());
    let hub = Hub::new(repo.clone(), bus.clone(), tracker, parrot, subs.clone());
    Harness { hub, subs, bus, repo }
}

async fn deliver(hub: &Arc<Hub>, packet: &Packet) {
    let raw = packet.encode();
    hub.handle_packet(&raw, packet).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn group_call_fans_out_to_same_talkgroup_subscribers_only() {
    let repo = FakeControlRepo::new();
    repo.seed_user(1_000_001, vec![100_001]);
    repo.seed_talkgroup(1, "TG1");
    repo.seed_talkgroup(2, "TG2");
    repo.seed_repeater(100_001, 1_000_001, vec![1], vec![]);
    repo.seed_repeater(100_002, 1_000_001, vec![1], vec![]);
    repo.seed_repeater(100_003, 1_000_001, vec![], vec![2]);

    let h = build_harness(repo);
    h.subs.listen_for_calls(dmrswitch_control::RepeaterId(100_001)).await;
    h.subs.listen_for_calls(dmrswitch_control::RepeaterId(100_002)).await;
    h.subs.listen_for_calls(dmrswitch_control::RepeaterId(100_003)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut out = h.bus.subscribe(dmrswitch_media::topics::OUTGOING);

    let p = voice_frame(1_000_001, 1, 100_001, false, true, 42);
    deliver(&h.hub, &header(p.clone())).await;
    deliver(&h.hub, &p).await;
    deliver(&h.hub, &terminator(p)).await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut saw_100002 = false;
    while let Ok(Some(raw)) = tokio::time::timeout(Duration::from_millis(50), out.recv()).await {
        let pkt = Packet::decode(&raw).unwrap();
        assert_ne!(pkt.repeater, 100_001, "sender must never see its own echo");
        assert_ne!(pkt.repeater, 100_003, "repeater on a different TG must not receive this");
        if pkt.repeater == 100_002 {
            saw_100002 = true;
            assert_eq!(pkt.dst, 1);
            assert_eq!(pkt.src, 1_000_001);
            assert!(pkt.group_call);
        }
    }
    assert!(saw_100002, "100002 should have received the TG1 fan-out");
}

#[tokio::test(flavor = "multi_thread")]
async fn private_call_to_repeater_reaches_only_that_repeater() {
    let repo = FakeControlRepo::new();
    repo.seed_user(1_000_001, vec![100_001]);
    repo.seed_repeater(100_001, 1_000_001, vec![1], vec![]);
    repo.seed_repeater(100_002, 1_000_001, vec![1], vec![]);

    let h = build_harness(repo);
    h.subs.listen_for_calls(dmrswitch_control::RepeaterId(100_001)).await;
    h.subs.listen_for_calls(dmrswitch_control::RepeaterId(100_002)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut out = h.bus.subscribe(dmrswitch_media::topics::OUTGOING);

    let p = voice_frame(1_000_001, 100_002, 100_001, false, false, 303);
    deliver(&h.hub, &header(p.clone())).await;
    deliver(&h.hub, &terminator(p)).await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut delivered = false;
    while let Ok(Some(raw)) = tokio::time::timeout(Duration::from_millis(50), out.recv()).await {
        let pkt = Packet::decode(&raw).unwrap();
        assert_ne!(pkt.repeater, 100_001);
        if pkt.repeater == 100_002 {
            delivered = true;
            assert_eq!(pkt.dst, 100_002);
            assert!(!pkt.group_call);
        }
    }
    assert!(delivered);
}

#[tokio::test(flavor = "multi_thread")]
async fn dynamic_link_then_unlink_stops_further_delivery() {
    let repo = FakeControlRepo::new();
    repo.seed_user(1_000_001, vec![100_001]);
    repo.seed_user(1_000_002, vec![100_002]);
    repo.seed_talkgroup(5, "TG5");
    repo.seed_repeater(100_001, 1_000_001, vec![], vec![]);
    repo.seed_repeater(100_002, 1_000_002, vec![5], vec![]);

    let h = build_harness(repo.clone());
    h.subs.listen_for_calls(dmrswitch_control::RepeaterId(100_001)).await;
    h.subs.listen_for_calls(dmrswitch_control::RepeaterId(100_002)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    // 100001 group-calls TG5, dynamically linking TS1.
    let link = voice_frame(1_000_001, 5, 100_001, false, true, 10);
    deliver(&h.hub, &header(link.clone())).await;
    deliver(&h.hub, &terminator(link)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let row = repo.get_repeater(dmrswitch_control::RepeaterId(100_001)).await.unwrap().unwrap();
    assert_eq!(row.ts1_dynamic_talkgroup, Some(TalkgroupId(5)));

    // 100001 unlinks TS1.
    let unlink = voice_frame(1_000_001, 4000, 100_001, false, false, 11);
    deliver(&h.hub, &header(unlink.clone())).await;
    deliver(&h.hub, &terminator(unlink)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let row = repo.get_repeater(dmrswitch_control::RepeaterId(100_001)).await.unwrap().unwrap();
    assert_eq!(row.ts1_dynamic_talkgroup, None);

    // A later group call to TG5 from 100002 must not reach 100001.
    let mut out = h.bus.subscribe(dmrswitch_media::topics::OUTGOING);
    let later = voice_frame(1_000_002, 5, 100_002, false, true, 12);
    deliver(&h.hub, &header(later.clone())).await;
    deliver(&h.hub, &terminator(later)).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    while let Ok(Some(raw)) = tokio::time::timeout(Duration::from_millis(30), out.recv()).await {
        let pkt = Packet::decode(&raw).unwrap();
        assert_ne!(pkt.repeater, 100_001, "100001 unlinked and must not receive TG5 anymore");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn group_call_to_nonexistent_talkgroup_delivers_to_nobody() {
    let repo = FakeControlRepo::new();
    repo.seed_user(1_000_001, vec![100_001]);
    repo.seed_repeater(100_001, 1_000_001, vec![], vec![]);
    repo.seed_repeater(100_002, 1_000_001, vec![], vec![]);

    let h = build_harness(repo);
    h.subs.listen_for_calls(dmrswitch_control::RepeaterId(100_001)).await;
    h.subs.listen_for_calls(dmrswitch_control::RepeaterId(100_002)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut out = h.bus.subscribe(dmrswitch_media::topics::OUTGOING);

    let p = voice_frame(1_000_001, 9999, 100_001, false, true, 77);
    deliver(&h.hub, &header(p.clone())).await;
    deliver(&h.hub, &terminator(p)).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(tokio::time::timeout(Duration::from_millis(30), out.recv()).await.unwrap_or(None).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn private_call_to_user_reaches_their_last_heard_repeater() {
    let repo = FakeControlRepo::new();
    repo.seed_user(1_000_001, vec![100_001]);
    repo.seed_user(1_000_002, vec![100_002]);
    repo.seed_talkgroup(1, "TG1");
    repo.seed_repeater(100_001, 1_000_001, vec![], vec![]);
    repo.seed_repeater(100_002, 1_000_002, vec![1], vec![]);

    let h = build_harness(repo);

    // 1000002 keys up on TG1 via 100002 for over 200ms, establishing a
    // last-heard record that route_to_user will consult below.
    let group = voice_frame(1_000_002, 1, 100_002, false, true, 301);
    deliver(&h.hub, &header(group.clone())).await;
    tokio::time::sleep(Duration::from_millis(220)).await;
    deliver(&h.hub, &terminator(group)).await;

    let last = h.repo.last_call_for_user(dmrswitch_control::UserId(1_000_002)).await.unwrap().unwrap();
    assert_eq!(last.repeater_id, dmrswitch_control::RepeaterId(100_002));
    assert!(last.duration_ms >= 200);

    let mut out = h.bus.subscribe(dmrswitch_media::topics::OUTGOING);

    // 100001 places a private call to user 1000002.
    let p = voice_frame(1_000_001, 1_000_002, 100_001, false, false, 404);
    deliver(&h.hub, &header(p.clone())).await;
    deliver(&h.hub, &terminator(p)).await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut delivered = false;
    while let Ok(Some(raw)) = tokio::time::timeout(Duration::from_millis(50), out.recv()).await {
        let pkt = Packet::decode(&raw).unwrap();
        if pkt.repeater == 100_002 {
            delivered = true;
            assert_eq!(pkt.dst, 1_000_002);
            assert_eq!(pkt.src, 1_000_001);
        }
    }
    assert!(delivered, "100002 should receive the private call to its last-heard user");
}

#[tokio::test(flavor = "multi_thread")]
async fn parrot_loopback_replays_to_sender_only() {
    let repo = FakeControlRepo::new();
    repo.seed_user(1_000_001, vec![100_001]);
    repo.seed_user(1_000_002, vec![100_002]);
    repo.seed_repeater(100_001, 1_000_001, vec![], vec![]);
    repo.seed_repeater(100_002, 1_000_002, vec![], vec![]);

    let h = build_harness(repo);
    let mut out = h.bus.subscribe(dmrswitch_media::topics::OUTGOING);

    let stream_id = 55;
    let header_frame = header(voice_frame(1_000_001, dmrswitch_control::PARROT_ID, 100_001, false, false, stream_id));
    deliver(&h.hub, &header_frame).await;
    for seq in 1..=4u8 {
        let mut p = voice_frame(1_000_001, dmrswitch_control::PARROT_ID, 100_001, false, false, stream_id);
        p.d_type_or_vseq = seq;
        deliver(&h.hub, &p).await;
    }
    let term = terminator(voice_frame(1_000_001, dmrswitch_control::PARROT_ID, 100_001, false, false, stream_id));
    deliver(&h.hub, &term).await;

    let mut frames = Vec::new();
    let first = tokio::time::timeout(Duration::from_millis(3_500), out.recv()).await;
    if let Ok(Some(raw)) = first {
        frames.push(Packet::decode(&raw).unwrap());
        while let Ok(Some(raw)) = tokio::time::timeout(Duration::from_millis(200), out.recv()).await {
            frames.push(Packet::decode(&raw).unwrap());
        }
    }

    assert!(!frames.is_empty(), "parrot should have replayed the recorded stream");
    for pkt in &frames {
        assert_eq!(pkt.src, dmrswitch_control::PARROT_ID);
        assert_eq!(pkt.dst, 1_000_001);
        assert_eq!(pkt.repeater, 100_001, "100002 must never receive another user's parrot playback");
        assert!(!pkt.group_call);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn solo_repeater_never_receives_its_own_group_call() {
    let repo = FakeControlRepo::new();
    repo.seed_user(1_000_001, vec![100_001]);
    repo.seed_talkgroup(1, "TG1");
    repo.seed_repeater(100_001, 1_000_001, vec![1], vec![]);

    let h = build_harness(repo);
    h.subs.listen_for_calls(dmrswitch_control::RepeaterId(100_001)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut out = h.bus.subscribe(dmrswitch_media::topics::OUTGOING);

    for seq in 0..5u8 {
        let mut p = voice_frame(1_000_001, 1, 100_001, false, true, 88);
        p.d_type_or_vseq = (seq % 5) + 1;
        deliver(&h.hub, &p).await;
    }
    let last = voice_frame(1_000_001, 1, 100_001, false, true, 88);
    deliver(&h.hub, &terminator(last)).await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    while let Ok(Some(raw)) = tokio::time::timeout(Duration::from_millis(30), out.recv()).await {
        let pkt = Packet::decode(&raw).unwrap();
        assert!(!(pkt.repeater == 100_001 && pkt.dst == 1 && pkt.group_call));
    }
}

//! Bus topic names (§6 external interfaces), kept in one place so routing,
//! subscriptions, and tests never hand-format a topic string twice.

use dmrswitch_control::{RepeaterId, TalkgroupId, UserId};

pub const OUTGOING: &str = "outgoing:noaddr";
pub const CALLS: &str = "calls";

pub fn talkgroup(id: TalkgroupId) -> String {
    format!("packets:talkgroup:{}", id.0)
}

pub fn repeater(id: RepeaterId) -> String {
    format!("packets:repeater:{}", id.0)
}

pub fn user_calls(id: UserId) -> String {
    format!("calls:{}", id.0)
}

pub fn parrot_marker(stream_id: u32) -> String {
    format!("parrot:stream:{stream_id}")
}

pub fn parrot_packets(stream_id: u32) -> String {
    format!("parrot:stream:{stream_id}:packets")
}

pub fn repeater_session(id: RepeaterId) -> String {
    format!("repeater:{}", id.0)
}

pub fn instance(id: uuid::Uuid) -> String {
    format!("instance:{id}")
}

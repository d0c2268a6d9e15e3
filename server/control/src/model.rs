use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CallId, RepeaterId, TalkgroupId, UserId};

/// Persistent repeater row. Most fields (callsign, frequencies, location...)
/// are populated by the external admin API in a full deployment; the routing
/// core reads them and owns the session-adjacent and dynamic-talkgroup
/// fields. See SPEC_FULL.md §3.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Repeater {
    pub id: RepeaterId,
    pub owner_id: UserId,
    pub callsign: String,
    pub rx_freq: String,
    pub tx_freq: String,
    pub tx_power: u8,
    pub color_code: u8,
    pub latitude: f64,
    pub longitude: f64,
    pub height: u16,
    pub location: String,
    pub description: String,
    pub slots: u8,
    pub url: String,
    pub software_id: String,
    pub package_id: String,
    pub password_hash: String,
    pub ts1_static_talkgroups: Vec<TalkgroupId>,
    pub ts2_static_talkgroups: Vec<TalkgroupId>,
    pub ts1_dynamic_talkgroup: Option<TalkgroupId>,
    pub ts2_dynamic_talkgroup: Option<TalkgroupId>,
    pub hotspot: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repeater {
    /// Static or dynamic reference to `tg` on either slot, used by
    /// `CancelSubscription`'s "still referenced" guard (§4.6).
    pub fn references_talkgroup(&self, tg: TalkgroupId) -> bool {
        self.ts1_static_talkgroups.contains(&tg)
            || self.ts2_static_talkgroups.contains(&tg)
            || self.ts1_dynamic_talkgroup == Some(tg)
            || self.ts2_dynamic_talkgroup == Some(tg)
    }

    pub fn dynamic_talkgroup(&self, slot: bool) -> Option<TalkgroupId> {
        if slot {
            self.ts2_dynamic_talkgroup
        } else {
            self.ts1_dynamic_talkgroup
        }
    }

    pub fn static_talkgroups(&self, slot: bool) -> &[TalkgroupId] {
        if slot {
            &self.ts2_static_talkgroups
        } else {
            &self.ts1_static_talkgroups
        }
    }

    pub fn set_dynamic_talkgroup(&mut self, slot: bool, tg: Option<TalkgroupId>) {
        if slot {
            self.ts2_dynamic_talkgroup = tg;
        } else {
            self.ts1_dynamic_talkgroup = tg;
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Talkgroup {
    pub id: TalkgroupId,
    pub name: String,
    pub description: String,
    pub admins: Vec<UserId>,
    pub ncos: Vec<UserId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub callsign: String,
    pub approved: bool,
    pub suspended: bool,
    pub admin: bool,
    pub super_admin: bool,
    pub repeaters: Vec<RepeaterId>,
}

/// A single keyed voice stream (§3). Internal bookkeeping fields (`loss`,
/// `jitter`, `ber`, `total_bits`, `last_frame_num`, ...) are maintained by
/// the call tracker in `dmrswitch-media`; this crate only persists the row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub stream_id: u32,
    pub start_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub active: bool,
    pub user_id: UserId,
    pub repeater_id: RepeaterId,
    pub time_slot: bool,
    pub group_call: bool,
    pub destination_id: u32,
    pub is_to_repeater: bool,
    pub is_to_user: bool,
    pub is_to_talkgroup: bool,
    pub total_packets: u32,
    pub lost_sequences: u32,
    pub last_packet_time: DateTime<Utc>,
    pub loss: f32,
    pub jitter: f32,
    pub last_frame_num: u8,
    pub rssi: f32,
    pub ber: f32,
    pub total_bits: u64,
    pub has_header: bool,
    pub has_term: bool,
}

impl Call {
    pub fn assert_exclusive_destination(&self) {
        let flags = [self.is_to_repeater, self.is_to_user, self.is_to_talkgroup];
        debug_assert_eq!(flags.iter().filter(|f| **f).count(), 1, "destination kind must be exclusive");
    }
}

/// Lightweight user/talkgroup/repeater summaries embedded in `CallEvent`,
/// mirroring the separation between a persisted row and its wire projection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub callsign: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TalkgroupSummary {
    pub id: TalkgroupId,
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepeaterSummary {
    pub radio_id: RepeaterId,
    pub callsign: String,
}

/// Wire projection published on `calls` / `calls:<owner>` (§6 JSON schema).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CallEvent {
    pub id: CallId,
    pub user: UserSummary,
    pub start_time: DateTime<Utc>,
    pub duration: f64,
    pub active: bool,
    pub time_slot: bool,
    pub group_call: bool,
    pub is_to_talkgroup: bool,
    pub to_talkgroup: Option<TalkgroupSummary>,
    pub is_to_user: bool,
    pub to_user: Option<UserSummary>,
    pub is_to_repeater: bool,
    pub to_repeater: Option<RepeaterSummary>,
    pub loss: f32,
    pub jitter: f32,
    pub ber: f32,
    pub rssi: f32,
}

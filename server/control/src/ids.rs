use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 6-digit DMR radio ID identifying a repeater/hotspot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepeaterId(pub u32);

/// 7-digit DMR radio ID identifying a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TalkgroupId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

/// Reserved destination: private call to this ID is looped back by the parrot.
pub const PARROT_ID: u32 = 9990;
/// Reserved destination: private call to this ID unlinks the sender's dynamic
/// talkgroup on the slot the call arrived on.
pub const UNLINK_ID: u32 = 4000;

/// Destination of a *private* call (`group_call == false`), classified purely
/// by the numeric range of `dst` (§3 invariant). Group calls are never
/// classified this way — their destination is always a talkgroup id, taken
/// as-is regardless of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateDestination {
    Repeater(RepeaterId),
    User(UserId),
}

pub fn classify_private_destination(dst: u32) -> PrivateDestination {
    if (1_000_000..=9_999_999).contains(&dst) {
        PrivateDestination::User(UserId(dst))
    } else {
        PrivateDestination::Repeater(RepeaterId(dst))
    }
}

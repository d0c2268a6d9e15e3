//! In-memory `ControlRepo` test double. `dmrswitch-control`'s only
//! implementation talks to Postgres, so routing-core integration tests
//! substitute a `DashMap`-backed fake with the same trait surface.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dmrswitch_control::{Call, CallId, ControlRepo, ControlResult, Repeater, RepeaterId, Talkgroup, TalkgroupId, User, UserId};

#[derive(Default)]
pub struct FakeControlRepo {
    repeaters: DashMap<RepeaterId, Repeater>,
    users: DashMap<UserId, User>,
    talkgroups: DashMap<TalkgroupId, Talkgroup>,
    calls: DashMap<CallId, Call>,
}

impl FakeControlRepo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_user(&self, id: u32, repeaters: Vec<u32>) {
        self.users.insert(
            UserId(id),
            User {
                id: UserId(id),
                callsign: format!("W{id}"),
                approved: true,
                suspended: false,
                admin: false,
                super_admin: false,
                repeaters: repeaters.into_iter().map(RepeaterId).collect(),
            },
        );
    }

    pub fn seed_talkgroup(&self, id: u32, name: &str) {
        self.talkgroups.insert(
            TalkgroupId(id),
            Talkgroup { id: TalkgroupId(id), name: name.to_string(), description: String::new(), admins: vec![], ncos: vec![] },
        );
    }

    pub fn seed_repeater(&self, id: u32, owner: u32, ts1_static: Vec<u32>, ts2_static: Vec<u32>) {
        let now = chrono::Utc::now();
        self.repeaters.insert(
            RepeaterId(id),
            Repeater {
                id: RepeaterId(id),
                owner_id: UserId(owner),
                callsign: format!("RPT{id}"),
                rx_freq: String::new(),
                tx_freq: String::new(),
                tx_power: 10,
                color_code: 1,
                latitude: 0.0,
                longitude: 0.0,
                height: 0,
                location: String::new(),
                description: String::new(),
                slots: 2,
                url: String::new(),
                software_id: String::new(),
                package_id: String::new(),
                password_hash: String::new(),
                ts1_static_talkgroups: ts1_static.into_iter().map(TalkgroupId).collect(),
                ts2_static_talkgroups: ts2_static.into_iter().map(TalkgroupId).collect(),
                ts1_dynamic_talkgroup: None,
                ts2_dynamic_talkgroup: None,
                hotspot: true,
                created_at: now,
                updated_at: now,
            },
        );
    }
}

#[async_trait]
impl ControlRepo for FakeControlRepo {
    async fn get_repeater(&self, id: RepeaterId) -> ControlResult<Option<Repeater>> {
        Ok(self.repeaters.get(&id).map(|r| r.clone()))
    }

    async fn upsert_repeater(&self, r: &Repeater) -> ControlResult<()> {
        self.repeaters.insert(r.id, r.clone());
        Ok(())
    }

    async fn set_dynamic_talkgroup(&self, id: RepeaterId, slot: bool, tg: Option<TalkgroupId>) -> ControlResult<()> {
        if let Some(mut r) = self.repeaters.get_mut(&id) {
            r.set_dynamic_talkgroup(slot, tg);
        }
        Ok(())
    }

    async fn delete_session_fields(&self, _id: RepeaterId) -> ControlResult<()> {
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> ControlResult<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn get_talkgroup(&self, id: TalkgroupId) -> ControlResult<Option<Talkgroup>> {
        Ok(self.talkgroups.get(&id).map(|t| t.clone()))
    }

    async fn repeaters_owned_by(&self, user: UserId) -> ControlResult<Vec<RepeaterId>> {
        Ok(self.repeaters.iter().filter(|r| r.owner_id == user).map(|r| r.id).collect())
    }

    async fn create_call(&self, call: &Call) -> ControlResult<()> {
        self.calls.insert(call.id, call.clone());
        Ok(())
    }

    async fn update_call(&self, call: &Call) -> ControlResult<()> {
        self.calls.insert(call.id, call.clone());
        Ok(())
    }

    async fn delete_call(&self, id: CallId) -> ControlResult<()> {
        self.calls.remove(&id);
        Ok(())
    }

    async fn last_call_for_user(&self, user: UserId) -> ControlResult<Option<Call>> {
        Ok(self
            .calls
            .iter()
            .filter(|c| c.user_id == user)
            .max_by_key(|c| c.start_time)
            .map(|c| c.clone()))
    }
}

//! Per-repeater subscription fan-out (§4.6). Maintains, for each connected
//! repeater, one bus subscription per referenced talkgroup plus one for the
//! repeater's own private-call topic, and republishes matching packets onto
//! the local `outgoing:noaddr` channel for the MMDVM server to write to UDP.

use std::sync::Arc;

use dashmap::DashMap;
use dmrswitch_bus::Bus;
use dmrswitch_codec::Packet;
use dmrswitch_control::{ControlRepo, RepeaterId, TalkgroupId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::topics;

/// Flat map keyed by `(repeater, talkgroup)` rather than the nested
/// `{repeater -> {tg -> cancel}}` shape in the source; either upholds the
/// "cancel during create is safe" contract (§9), and a flat map needs only
/// one guard instead of an outer-plus-per-cell pair.
pub struct SubscriptionManager {
    repo: Arc<dyn ControlRepo>,
    bus: Arc<Bus>,
    talkgroup_subs: DashMap<(RepeaterId, TalkgroupId), CancellationToken>,
    repeater_subs: DashMap<RepeaterId, CancellationToken>,
}

impl SubscriptionManager {
    pub fn new(repo: Arc<dyn ControlRepo>, bus: Arc<Bus>) -> Arc<Self> {
        Arc::new(Self {
            repo,
            bus,
            talkgroup_subs: DashMap::new(),
            repeater_subs: DashMap::new(),
        })
    }

    /// Ensures subscriptions exist for a repeater's own topic, its static
    /// TS1/TS2 talkgroups, and whichever dynamic talkgroup is currently
    /// assigned on each slot.
    pub async fn listen_for_calls(self: &Arc<Self>, repeater: RepeaterId) {
        self.ensure_repeater_subscription(repeater);

        let Ok(Some(row)) = self.repo.get_repeater(repeater).await else {
            warn!(repeater = repeater.0, "listen_for_calls: repeater not found");
            return;
        };

        for tg in &row.ts1_static_talkgroups {
            self.ensure_talkgroup_subscription(repeater, *tg);
        }
        for tg in &row.ts2_static_talkgroups {
            self.ensure_talkgroup_subscription(repeater, *tg);
        }
        if let Some(tg) = row.ts1_dynamic_talkgroup {
            self.ensure_talkgroup_subscription(repeater, tg);
        }
        if let Some(tg) = row.ts2_dynamic_talkgroup {
            self.ensure_talkgroup_subscription(repeater, tg);
        }
    }

    pub fn ensure_repeater_subscription(self: &Arc<Self>, repeater: RepeaterId) {
        if self.repeater_subs.contains_key(&repeater) {
            return;
        }
        let mut sub = self.bus.subscribe(&topics::repeater(repeater));
        let token = sub.cancellation_token();
        self.repeater_subs.insert(repeater, token);

        let bus = Arc::clone(&self.bus);
        tokio::spawn(async move {
            while let Some(raw) = sub.recv().await {
                let Ok(mut packet) = Packet::decode(&raw) else { continue };
                packet.repeater = repeater.0;
                bus.publish(topics::OUTGOING, packet.encode().into());
            }
            debug!(repeater = repeater.0, "repeater subscription loop exited");
        });
    }

    pub fn ensure_talkgroup_subscription(self: &Arc<Self>, repeater: RepeaterId, tg: TalkgroupId) {
        let key = (repeater, tg);
        if self.talkgroup_subs.contains_key(&key) {
            return;
        }
        let mut sub = self.bus.subscribe(&topics::talkgroup(tg));
        let token = sub.cancellation_token();
        self.talkgroup_subs.insert(key, token);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(raw) = sub.recv().await {
                let Ok(packet) = Packet::decode(&raw) else { continue };

                // A repeater must never receive its own transmission back.
                if packet.repeater == repeater.0 {
                    continue;
                }

                match this.want_rx(repeater, tg, &packet).await {
                    Some(slot) => {
                        let mut out = packet.clone();
                        out.repeater = repeater.0;
                        out.slot = slot;
                        this.bus.publish(topics::OUTGOING, out.encode().into());
                    }
                    None => {
                        this.cancel_subscription(repeater, tg).await;
                        return;
                    }
                }
            }
        });
    }

    /// `(want, slot)` as described in §4.6: a direct hit on `repeater`'s own
    /// id always wants the packet's own slot; otherwise wants it on whichever
    /// slot currently has `tg` assigned (dynamic takes precedence over
    /// static only in the sense both are checked, TS2 before TS1).
    async fn want_rx(&self, repeater: RepeaterId, tg: TalkgroupId, packet: &Packet) -> Option<bool> {
        if packet.dst == repeater.0 {
            return Some(packet.slot);
        }
        let row = self.repo.get_repeater(repeater).await.ok().flatten()?;

        if row.ts2_dynamic_talkgroup == Some(tg) {
            return Some(true);
        }
        if row.ts1_dynamic_talkgroup == Some(tg) {
            return Some(false);
        }
        if row.ts2_static_talkgroups.contains(&tg) {
            return Some(true);
        }
        if row.ts1_static_talkgroups.contains(&tg) {
            return Some(false);
        }
        None
    }

    /// Idempotent; refuses to cancel a talkgroup still referenced by a
    /// static assignment or the other slot's dynamic assignment.
    pub async fn cancel_subscription(&self, repeater: RepeaterId, tg: TalkgroupId) {
        let Some(row) = self.repo.get_repeater(repeater).await.ok().flatten() else {
            if let Some((_, token)) = self.talkgroup_subs.remove(&(repeater, tg)) {
                token.cancel();
            }
            return;
        };
        if row.references_talkgroup(tg) {
            return;
        }
        if let Some((_, token)) = self.talkgroup_subs.remove(&(repeater, tg)) {
            token.cancel();
        }
    }

    pub fn cancel_all_subscriptions(&self, repeater: RepeaterId) {
        if let Some((_, token)) = self.repeater_subs.remove(&repeater) {
            token.cancel();
        }
        let keys: Vec<_> = self
            .talkgroup_subs
            .iter()
            .filter(|e| e.key().0 == repeater)
            .map(|e| *e.key())
            .collect();
        for key in keys {
            if let Some((_, token)) = self.talkgroup_subs.remove(&key) {
                token.cancel();
            }
        }
    }
}

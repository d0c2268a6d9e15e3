//! Hub / router (§4.5): classifies each inbound `DMRD` frame and publishes
//! it to the right topic, or hands it to the parrot engine, or updates a
//! repeater's dynamic talkgroup assignment.

use std::sync::Arc;

use dmrswitch_bus::Bus;
use dmrswitch_codec::Packet;
use dmrswitch_control::{
    classify_private_destination, ControlRepo, PrivateDestination, RepeaterId, TalkgroupId, UserId,
    PARROT_ID, UNLINK_ID,
};
use tracing::debug;

use crate::errors::RoutingError;
use crate::parrot::Parrot;
use crate::subscriptions::SubscriptionManager;
use crate::topics;
use crate::tracker::CallTracker;

pub struct Hub {
    repo: Arc<dyn ControlRepo>,
    bus: Arc<Bus>,
    tracker: Arc<CallTracker>,
    parrot: Arc<Parrot>,
    subscriptions: Arc<SubscriptionManager>,
}

impl Hub {
    pub fn new(
        repo: Arc<dyn ControlRepo>,
        bus: Arc<Bus>,
        tracker: Arc<CallTracker>,
        parrot: Arc<Parrot>,
        subscriptions: Arc<SubscriptionManager>,
    ) -> Arc<Self> {
        Arc::new(Self { repo, bus, tracker, parrot, subscriptions })
    }

    /// `ListenForCalls` (§4.6): establishes a repeater's own-topic and
    /// static/dynamic talkgroup subscriptions. Callers run this once a
    /// repeater's session reaches `YES` — before this, the repeater is
    /// connected but receives nothing.
    pub async fn register_repeater(self: &Arc<Self>, repeater: RepeaterId) {
        self.subscriptions.listen_for_calls(repeater).await;
    }

    /// `CancelAllSubscriptions` (§4.6): tears down every subscription for a
    /// repeater. Callers run this on `RPTCL` and on shutdown.
    pub fn deregister_repeater(&self, repeater: RepeaterId) {
        self.subscriptions.cancel_all_subscriptions(repeater);
    }

    /// Entry point for every validated `DMRD` frame. Ignores `dst == 0`.
    pub async fn handle_packet(self: &Arc<Self>, raw: &[u8], packet: &Packet) {
        if packet.dst == 0 {
            return;
        }

        let is_voice = matches!(
            packet.frame_type,
            dmrswitch_codec::FrameType::Voice | dmrswitch_codec::FrameType::VoiceSync
        ) || packet.is_voice_header()
            || packet.is_voice_terminator();

        if packet.group_call && is_voice {
            self.update_dynamic_link(packet).await;
        }

        if !packet.group_call && packet.dst == UNLINK_ID && is_voice {
            self.unlink(packet).await;
            return;
        }

        if !packet.group_call && packet.dst == PARROT_ID && is_voice {
            // Parrot bypasses the normal call tracker for the live inbound
            // leg (§4.4); only the synthesized replay gets a tracked Call.
            self.parrot.handle_frame(packet).await;
            return;
        }

        self.track_call_frame(packet).await;
        self.route(raw, packet).await;
    }

    async fn track_call_frame(self: &Arc<Self>, packet: &Packet) {
        if !self.tracker.is_call_active(packet) {
            if !self.tracker.start_call(packet).await {
                debug!(src = packet.src, dst = packet.dst, "dropping frame: unknown user or repeater");
                return;
            }
        }
        self.tracker.process_call_packet(packet).await;
        if packet.is_voice_terminator() {
            self.tracker.end_call(packet).await;
        }
    }

    async fn update_dynamic_link(self: &Arc<Self>, packet: &Packet) {
        let repeater = RepeaterId(packet.repeater);
        let row = match self.repo.get_repeater(repeater).await {
            Ok(Some(row)) => row,
            Ok(None) => return,
            Err(e) => {
                let err = RoutingError::from(e);
                debug!(repeater = repeater.0, error = %err, "update_dynamic_link: repo lookup failed");
                return;
            }
        };

        let tg = TalkgroupId(packet.dst);
        if row.dynamic_talkgroup(packet.slot) == Some(tg) {
            return;
        }

        if let Err(e) = self.repo.set_dynamic_talkgroup(repeater, packet.slot, Some(tg)).await {
            debug!(error = %e, "update_dynamic_link: failed to persist");
            return;
        }
        self.subscriptions.ensure_talkgroup_subscription(repeater, tg);
    }

    async fn unlink(self: &Arc<Self>, packet: &Packet) {
        let repeater = RepeaterId(packet.repeater);
        let row = match self.repo.get_repeater(repeater).await {
            Ok(Some(row)) => row,
            Ok(None) => return,
            Err(e) => {
                let err = RoutingError::from(e);
                debug!(repeater = repeater.0, error = %err, "unlink: repo lookup failed");
                return;
            }
        };

        let Some(tg) = row.dynamic_talkgroup(packet.slot) else { return };
        if let Err(e) = self.repo.set_dynamic_talkgroup(repeater, packet.slot, None).await {
            debug!(error = %e, "unlink: failed to persist");
            return;
        }
        self.subscriptions.cancel_subscription(repeater, tg).await;
    }

    async fn route(&self, raw: &[u8], packet: &Packet) {
        if packet.group_call {
            self.bus.publish(&topics::talkgroup(TalkgroupId(packet.dst)), raw.to_vec().into());
            return;
        }

        match classify_private_destination(packet.dst) {
            PrivateDestination::Repeater(id) => {
                self.bus.publish(&topics::repeater(id), raw.to_vec().into());
            }
            PrivateDestination::User(user_id) => {
                self.route_to_user(raw, user_id).await;
            }
        }
    }

    /// Private call to a user id: deliver to the repeater they were last
    /// heard on (if still online) and to every other online repeater they
    /// own, so a user reachable from multiple hotspots gets paged on all.
    async fn route_to_user(&self, raw: &[u8], user: UserId) {
        let last_call = match self.repo.last_call_for_user(user).await {
            Ok(Some(call)) => call,
            Ok(None) => {
                let err = RoutingError::UnknownDestination(false, user.0);
                debug!(user = user.0, error = %err, "route_to_user: dropping");
                return;
            }
            Err(e) => {
                let err = RoutingError::from(e);
                debug!(user = user.0, error = %err, "route_to_user: repo lookup failed");
                return;
            }
        };

        self.bus.publish(&topics::repeater(last_call.repeater_id), raw.to_vec().into());

        let Ok(Some(user_row)) = self.repo.get_user(user).await else { return };
        for repeater in user_row.repeaters {
            if repeater == last_call.repeater_id {
                continue;
            }
            if self.repo.get_repeater(repeater).await.ok().flatten().is_some() {
                self.bus.publish(&topics::repeater(repeater), raw.to_vec().into());
            }
        }
    }
}

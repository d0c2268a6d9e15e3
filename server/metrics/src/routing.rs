use metrics::{counter, gauge};

/// Metric names under: {ns}_routing_* — the hub/router, parrot, and
/// subscription manager in `dmrswitch-media`.
pub struct RoutingMetrics {
    ns: &'static str,
}

impl RoutingMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    #[inline]
    pub fn routed(&self, kind: &'static str) {
        counter!(format!("{}_routing_packets_routed_total", self.ns), "kind" => kind).increment(1);
    }

    #[inline]
    pub fn dynamic_link_updated(&self) {
        counter!(format!("{}_routing_dynamic_link_updates_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn parrot_recorded(&self) {
        counter!(format!("{}_routing_parrot_sessions_recorded_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn parrot_replayed(&self) {
        counter!(format!("{}_routing_parrot_sessions_replayed_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn subscriptions_active(&self, n: u64) {
        gauge!(format!("{}_routing_subscriptions_active", self.ns)).set(n as f64);
    }
}

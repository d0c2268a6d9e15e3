use metrics::{counter, gauge, histogram};

use crate::labels::LabelPolicy;

/// Metric names under: {ns}_tracker_*
pub struct TrackerMetrics {
    ns: &'static str,
    policy: LabelPolicy,
}

impl TrackerMetrics {
    pub fn new(namespace: &'static str, policy: LabelPolicy) -> Self {
        Self { ns: namespace, policy }
    }

    #[inline]
    pub fn rx_packet(&self) {
        counter!(format!("{}_tracker_rx_packets_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn call_started(&self) {
        counter!(format!("{}_tracker_calls_started_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn call_ended(&self) {
        counter!(format!("{}_tracker_calls_ended_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn active_calls(&self, n: u64) {
        gauge!(format!("{}_tracker_active_calls", self.ns)).set(n as f64);
    }

    #[inline]
    pub fn loss_ratio(&self, ratio: f64) {
        histogram!(format!("{}_tracker_loss_ratio", self.ns)).record(ratio);
    }

    #[inline]
    pub fn jitter_ms(&self, ms: f64) {
        histogram!(format!("{}_tracker_jitter_ms", self.ns)).record(ms);
    }

    #[inline]
    pub fn ber_percent(&self, pct: f64) {
        histogram!(format!("{}_tracker_ber_percent", self.ns)).record(pct);
    }

    #[inline]
    pub fn drop_reason(&self, reason: &'static str) {
        counter!(
            format!("{}_tracker_drops_total", self.ns),
            "reason" => LabelPolicy::reason(reason).as_str().to_string()
        )
        .increment(1);
    }

    #[inline]
    pub fn per_talkgroup_rx(&self, talkgroup_id: u32) {
        counter!(
            format!("{}_tracker_rx_packets_by_talkgroup_total", self.ns),
            "tg" => self.policy.talkgroup_bucket(talkgroup_id).as_str().to_string()
        )
        .increment(1);
    }
}

use metrics::{counter, histogram};

pub struct ControlMetrics {
    ns: &'static str,
}

impl ControlMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    pub fn op_total(&self, op: &'static str) {
        counter!(format!("{}_control_ops_total", self.ns), "op" => op).increment(1);
    }

    pub fn db_seconds(&self, query: &'static str, seconds: f64) {
        histogram!(format!("{}_control_db_seconds", self.ns), "query" => query).record(seconds);
    }
}

use std::borrow::Cow;

/// A label value that is safe to export (bounded cardinality).
#[derive(Clone, Debug)]
pub struct BoundedLabel(Cow<'static, str>);

impl BoundedLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug)]
pub struct LabelPolicy {
    /// Maximum distinct talkgroup buckets exported (e.g., top N by traffic).
    pub max_talkgroup_buckets: usize,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self { max_talkgroup_buckets: 50 }
    }
}

impl LabelPolicy {
    /// Bucket a talkgroup id into a bounded label so one noisy TG doesn't
    /// blow up label cardinality on the scrape endpoint.
    /// In production, you would drive this with a top-N structure updated
    /// periodically. For now we do a simple hash bucket.
    pub fn talkgroup_bucket(&self, talkgroup_id: u32) -> BoundedLabel {
        let bucket = (talkgroup_id as usize) % self.max_talkgroup_buckets.max(1);
        BoundedLabel(Cow::Owned(format!("tg{:02}", bucket)))
    }

    pub fn reason(reason: &'static str) -> BoundedLabel {
        BoundedLabel(Cow::Borrowed(reason))
    }
}

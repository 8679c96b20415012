use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Last-seen index of instances, fed by heartbeats
#[derive(Debug, Default)]
pub(crate) struct LivenessTracker {
    last_seen: DashMap<String, Instant>,
}

impl LivenessTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn touch(
        &self,
        instance_id: &str,
        now: Instant,
    ) {
        self.last_seen.insert(instance_id.to_string(), now);
    }

    pub(crate) fn last_seen(
        &self,
        instance_id: &str,
    ) -> Option<Instant> {
        self.last_seen.get(instance_id).map(|r| *r.value())
    }

    pub(crate) fn forget(
        &self,
        instance_id: &str,
    ) -> bool {
        self.last_seen.remove(instance_id).is_some()
    }

    /// Removes and returns every instance silent for longer than `timeout`.
    ///
    /// An instance touched between the scan and its removal is kept.
    pub(crate) fn take_expired(
        &self,
        now: Instant,
        timeout: Duration,
    ) -> Vec<String> {
        let candidates: Vec<String> = self
            .last_seen
            .iter()
            .filter(|r| now.saturating_duration_since(*r.value()) > timeout)
            .map(|r| r.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter(|id| {
                self.last_seen
                    .remove_if(id, |_, seen| now.saturating_duration_since(*seen) > timeout)
                    .is_some()
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.last_seen.len()
    }
}

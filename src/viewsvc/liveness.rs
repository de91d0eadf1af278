//! Liveness tracking of pinging servers.

use std::collections::HashMap;

use crate::viewsvc::ServerId;

use tokio::time::{Duration, Instant};

/// Map from server ID -> last time a ping was heard from it. Records are
/// never removed; dead servers are recognized by staleness.
#[derive(Debug, Default)]
pub(crate) struct LivenessTracker {
    last_seen: HashMap<ServerId, Instant>,
}

impl LivenessTracker {
    pub(crate) fn new() -> Self {
        LivenessTracker {
            last_seen: HashMap::new(),
        }
    }

    /// Records that `id` has pinged at `now`.
    pub(crate) fn heard(&mut self, id: &ServerId, now: Instant) {
        if let Some(t) = self.last_seen.get_mut(id) {
            *t = now;
        } else {
            self.last_seen.insert(id.clone(), now);
        }
    }

    /// Returns the last time `id` was heard, if ever.
    #[cfg(test)]
    pub(crate) fn last_seen(&self, id: &ServerId) -> Option<Instant> {
        self.last_seen.get(id).copied()
    }

    /// A server is dead if it is the empty ID, has never pinged, or has been
    /// silent for strictly longer than `threshold`.
    pub(crate) fn is_dead(
        &self,
        id: &ServerId,
        now: Instant,
        threshold: Duration,
    ) -> bool {
        if id.is_none() {
            return true;
        }
        match self.last_seen.get(id) {
            None => true,
            Some(&t) => now.saturating_duration_since(t) > threshold,
        }
    }
}

// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! The message quarantine: a short-lived "seen this message from/to that
//! peer" index, used both for ingress de-duplication and per-peer egress
//! suppression.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::id::Id;

/// Time a `(messageId, peerId)` observation stays valid.
pub const TIME_TO_LIVE: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Entry {
    receivers: HashMap<Id, Instant>,
}

/// TTL-evicted `(messageId, peerId)` quarantine.
///
/// Eviction is lazy: every `observed*` call walks the table, drops expired
/// per-peer deadlines, and drops any message whose peer set became empty.
#[derive(Default)]
pub struct MessageCache {
    entries: HashMap<Id, Entry>,
}

impl MessageCache {
    /// A fresh, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff `peer_id` has a live (non-expired) observation for `message_id`.
    pub fn observed_for_peer(&mut self, message_id: Id, peer_id: Id) -> bool {
        self.evict_expired();
        self.entries
            .get(&message_id)
            .and_then(|e| e.receivers.get(&peer_id))
            .map(|deadline| *deadline > Instant::now())
            .unwrap_or(false)
    }

    /// True iff any peer has a live observation for `message_id`.
    pub fn observed(&mut self, message_id: Id) -> bool {
        self.evict_expired();
        self.entries.contains_key(&message_id)
    }

    /// Record that `message_id` has been observed with respect to `peer_id`.
    ///
    /// If an entry already exists for this peer, its deadline is **not**
    /// refreshed — first observation wins.
    pub fn record(&mut self, message_id: Id, peer_id: Id) {
        let deadline = Instant::now() + TIME_TO_LIVE;
        self.entries
            .entry(message_id)
            .or_default()
            .receivers
            .entry(peer_id)
            .or_insert(deadline);
    }

    /// Drop everything.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Count of live messages currently tracked, after evicting expired entries.
    pub fn len(&mut self) -> usize {
        self.evict_expired();
        self.entries.len()
    }

    /// True iff no live messages are currently tracked.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    fn evict_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| {
            entry.receivers.retain(|_, deadline| *deadline > now);
            !entry.receivers.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_message_is_not_observed() {
        let mut cache = MessageCache::new();
        assert!(!cache.observed(Id::random()));
    }

    #[test]
    fn record_marks_observed_for_that_peer_only() {
        let mut cache = MessageCache::new();
        let msg = Id::random();
        let peer_a = Id::random();
        let peer_b = Id::random();

        cache.record(msg, peer_a);

        assert!(cache.observed(msg));
        assert!(cache.observed_for_peer(msg, peer_a));
        assert!(!cache.observed_for_peer(msg, peer_b));
    }

    #[test]
    fn first_observation_wins_deadline() {
        let mut cache = MessageCache::new();
        let msg = Id::random();
        let peer = Id::random();

        cache.record(msg, peer);
        let first_deadline = cache.entries.get(&msg).unwrap().receivers[&peer];

        // Recording again for the same peer must not push the deadline out.
        cache.record(msg, peer);
        let second_deadline = cache.entries.get(&msg).unwrap().receivers[&peer];

        assert_eq!(first_deadline, second_deadline);
    }

    #[test]
    fn reset_drops_everything() {
        let mut cache = MessageCache::new();
        cache.record(Id::random(), Id::random());
        cache.reset();
        assert!(cache.entries.is_empty());
    }

    #[test]
    fn len_counts_live_messages_only() {
        let mut cache = MessageCache::new();
        assert!(cache.is_empty());

        cache.record(Id::random(), Id::random());
        cache.record(Id::random(), Id::random());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn expired_entries_are_evicted_lazily() {
        let mut cache = MessageCache::new();
        let msg = Id::random();
        let peer = Id::random();

        // Simulate an already-expired entry directly (avoids sleeping 10s in tests).
        cache
            .entries
            .entry(msg)
            .or_default()
            .receivers
            .insert(peer, Instant::now() - Duration::from_secs(1));

        assert!(!cache.observed(msg));
        assert!(cache.entries.is_empty());
    }
}

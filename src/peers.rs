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

//! Directory of known peers, keyed by id.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use thiserror::Error;

use crate::id::Id;

/// Fan-out used when the caller requests `n <= 0` peers.
pub const RECOMMENDED_PEER_COUNT: usize = 5;

/// Peer lookup errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerDirectoryError {
    /// No peer registered under the requested id.
    #[error("no such peer")]
    NotFound,
}

/// A known peer: its id and its textual `host:port` address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    /// The peer's id.
    pub id: Id,
    /// The peer's `host:port` address.
    pub address: String,
}

/// Mapping from peer id to address, with random-subset selection for
/// propagation.
#[derive(Default)]
pub struct PeerDirectory {
    peers: HashMap<Id, Peer>,
}

impl PeerDirectory {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the peer with this id.
    pub fn add(&mut self, id: Id, address: String) {
        self.peers.insert(id, Peer { id, address });
    }

    /// Look up a peer by id.
    pub fn get(&self, id: Id) -> Result<&Peer, PeerDirectoryError> {
        self.peers.get(&id).ok_or(PeerDirectoryError::NotFound)
    }

    /// Remove a peer by id. A no-op if it isn't present.
    pub fn remove(&mut self, id: Id) {
        self.peers.remove(&id);
    }

    /// All known peers, in unspecified order.
    pub fn all(&self) -> Vec<Peer> {
        self.peers.values().cloned().collect()
    }

    /// Select up to `n` peers at random (explicit shuffle, never insertion
    /// order). `n <= 0` is treated as [`RECOMMENDED_PEER_COUNT`]. If the
    /// directory holds fewer peers than requested, all of them are returned.
    pub fn random_subset(&self, n: i64) -> Vec<Peer> {
        let requested = if n <= 0 {
            RECOMMENDED_PEER_COUNT
        } else {
            n as usize
        };

        let mut all = self.all();
        all.shuffle(&mut rand::thread_rng());
        let take = requested.min(all.len());
        all.truncate(take);
        all
    }

    /// Drop all peers.
    pub fn reset(&mut self) {
        self.peers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory_with(n: usize) -> PeerDirectory {
        let mut dir = PeerDirectory::new();
        for i in 0..n {
            dir.add(Id::random(), format!("10.0.0.{i}:8881"));
        }
        dir
    }

    #[test]
    fn add_then_get_round_trips() {
        let mut dir = PeerDirectory::new();
        let id = Id::random();
        dir.add(id, "10.0.0.1:8881".to_string());
        assert_eq!(dir.get(id).unwrap().address, "10.0.0.1:8881");
    }

    #[test]
    fn get_missing_peer_fails() {
        let dir = PeerDirectory::new();
        assert_eq!(dir.get(Id::random()), Err(PeerDirectoryError::NotFound));
    }

    #[test]
    fn remove_drops_peer() {
        let mut dir = PeerDirectory::new();
        let id = Id::random();
        dir.add(id, "10.0.0.1:8881".to_string());
        dir.remove(id);
        assert!(dir.get(id).is_err());
    }

    #[test]
    fn random_subset_zero_or_negative_uses_recommended_count() {
        let dir = directory_with(10);
        assert_eq!(dir.random_subset(0).len(), RECOMMENDED_PEER_COUNT);
        assert_eq!(dir.random_subset(-3).len(), RECOMMENDED_PEER_COUNT);
    }

    #[test]
    fn random_subset_larger_than_directory_returns_all() {
        let dir = directory_with(3);
        assert_eq!(dir.random_subset(10).len(), 3);
    }

    #[test]
    fn random_subset_respects_smaller_request() {
        let dir = directory_with(10);
        assert_eq!(dir.random_subset(2).len(), 2);
    }

    #[test]
    fn reset_drops_all_peers() {
        let mut dir = directory_with(5);
        dir.reset();
        assert!(dir.all().is_empty());
    }
}

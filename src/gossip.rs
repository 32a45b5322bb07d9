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

//! The gossip engine: ingress dispatch, ownership/version policy, and
//! propagation fan-out. Everything else in this crate exists to support it.

use std::net::SocketAddr;
use std::sync::Arc;

use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::cache::MessageCache;
use crate::host::HostIdentity;
use crate::id::Id;
use crate::metrics::Metrics;
use crate::peers::{Peer, PeerDirectory, RECOMMENDED_PEER_COUNT};
use crate::store::{Device, DeviceStore, StoreError};
use crate::transport::{TransportError, UdpTransport};
use crate::wire::{Message, MessageKind, PatchPayload, PeerPayload, SyncPayload};

/// Gossip engine errors surfaced to callers (the control plane).
#[derive(Debug, Error)]
pub enum GossipEngineError {
    /// A persistence call failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A transport call failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// `attach` was called while already attached.
    #[error("already attached")]
    AlreadyAttached,
    /// A mutation was attempted by a host that doesn't own the device.
    #[error("not the device owner")]
    NotOwner,
}

/// Per-host network membership state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipState {
    /// Not participating in gossip: no listener, no hails sent.
    Detached,
    /// Listening for gossip traffic.
    Attached,
}

struct Inner {
    host: HostIdentity,
    cache: Mutex<MessageCache>,
    peers: Mutex<PeerDirectory>,
    store: DeviceStore,
    transport: UdpTransport,
    metrics: Arc<Metrics>,
    state: Mutex<MembershipState>,
    receiver: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

/// Cheap to clone: all state lives behind an `Arc`.
#[derive(Clone)]
pub struct GossipEngine {
    inner: Arc<Inner>,
}

impl GossipEngine {
    /// Build a new, detached engine.
    pub fn new(host: HostIdentity, transport: UdpTransport, store: DeviceStore, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                cache: Mutex::new(MessageCache::new()),
                peers: Mutex::new(PeerDirectory::new()),
                store,
                transport,
                metrics,
                state: Mutex::new(MembershipState::Detached),
                receiver: Mutex::new(None),
            }),
        }
    }

    /// This host's identity.
    pub fn host(&self) -> &HostIdentity {
        &self.inner.host
    }

    /// The shared metrics registry.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Current membership state.
    pub async fn state(&self) -> MembershipState {
        *self.inner.state.lock().await
    }

    // ---- Control-plane entry points -----------------------------------

    /// Start the UDP receiver and announce this host with a Hail.
    pub async fn attach(&self) -> Result<(), GossipEngineError> {
        let (mut rx, cancel) = self
            .inner
            .transport
            .listen()
            .await
            .map_err(|e| match e {
                TransportError::AlreadyListening => GossipEngineError::AlreadyAttached,
                other => GossipEngineError::Transport(other),
            })?;

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            while let Some((addr, bytes)) = rx.recv().await {
                engine.handle_datagram(addr, &bytes).await;
            }
        });

        *self.inner.receiver.lock().await = Some((handle, cancel));
        *self.inner.state.lock().await = MembershipState::Attached;
        info!(host = %self.inner.host.id, "attached to network");
        self.send_hail().await;
        Ok(())
    }

    /// Announce departure and stop the UDP receiver.
    pub async fn detach(&self) {
        self.send_farewell().await;
        if let Some((handle, cancel)) = self.inner.receiver.lock().await.take() {
            cancel.cancel();
            self.inner.transport.stop().await;
            handle.abort();
        }
        *self.inner.state.lock().await = MembershipState::Detached;
        info!(host = %self.inner.host.id, "detached from network");
    }

    /// Clear transient gossip state ahead of process termination.
    pub async fn reset(&self) {
        self.inner.peers.lock().await.reset();
        self.inner.cache.lock().await.reset();
        self.refresh_gauges().await;
    }

    /// Create a new locally-owned device.
    pub fn create_device(&self, device_type: u8, state: u8) -> Result<Id, GossipEngineError> {
        let device = Device {
            id: Id::random(),
            owner: self.inner.host.id,
            device_type,
            state,
            version: 0,
        };
        self.inner.store.put_device(&device)?;
        Ok(device.id)
    }

    /// Load a device record.
    pub fn get_device(&self, id: Id) -> Result<Device, StoreError> {
        self.inner.store.get_device(id)
    }

    /// All known device ids.
    pub fn list_device_ids(&self) -> Result<Vec<Id>, StoreError> {
        self.inner.store.list_device_ids()
    }

    /// Delete a device. Fails with `NotOwner` if this host doesn't own it.
    pub fn delete_device(&self, id: Id) -> Result<(), GossipEngineError> {
        match self.inner.store.is_owner(id, self.inner.host.id) {
            Ok(true) => Ok(self.inner.store.delete_device(id)?),
            Ok(false) => Err(GossipEngineError::NotOwner),
            Err(e) => Err(GossipEngineError::Store(e)),
        }
    }

    /// Snapshot of all known peers.
    pub async fn list_peers(&self) -> Vec<Peer> {
        self.inner.peers.lock().await.all()
    }

    /// Manually add a peer.
    pub async fn add_peer(&self, id: Id, address: String) {
        self.inner.peers.lock().await.add(id, address);
        self.refresh_gauges().await;
    }

    /// Request (or forward a request for) a state change on `device_id`.
    ///
    /// If this host owns the device, the change is applied immediately and
    /// an authoritative EventSync is gossiped. Otherwise a CommandPatch is
    /// gossiped toward the owner.
    pub async fn command_patch(&self, device_id: Id, new_state: u8) -> Result<(), GossipEngineError> {
        let is_owner = match self.inner.store.is_owner(device_id, self.inner.host.id) {
            Ok(v) => v,
            Err(StoreError::NotFound) => false,
            Err(e) => return Err(GossipEngineError::Store(e)),
        };

        let message = if is_owner {
            let updated = self.inner.store.patch_state(device_id, new_state)?;
            self.sync_message(&updated)
        } else {
            Message::new(
                self.inner.host.id,
                MessageKind::CommandPatch,
                PatchPayload { device_id, new_state }.encode(),
            )
        };

        // Locally-originated patches always use ZeroId as the dedup key:
        // the cache has no entry for this brand-new message yet, so every
        // peer qualifies regardless of which branch produced it.
        self.propagate(&message, Id::zero(), Some(RECOMMENDED_PEER_COUNT)).await;
        Ok(())
    }

    /// Announce this host and, to each selected peer, replay every
    /// locally-owned device as an EventSync.
    pub async fn send_hail(&self) {
        let message = Message::new(self.inner.host.id, MessageKind::CommandHail, Vec::new());
        let peers = self.select_peers(message.id, Some(RECOMMENDED_PEER_COUNT)).await;

        let owned_syncs: Vec<Message> = self
            .inner
            .store
            .list_device_ids()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| self.inner.store.get_device(id).ok())
            .filter(|device| device.owner == self.inner.host.id)
            .map(|device| self.sync_message(&device))
            .collect();

        let encoded = message.encode();
        for peer in &peers {
            if self.inner.transport.send(&peer.address, &encoded).await.is_ok() {
                self.inner.cache.lock().await.record(message.id, peer.id);
                self.inner.metrics.messages_sent_total.inc();
            }
            for sync in &owned_syncs {
                if self.inner.transport.send(&peer.address, &sync.encode()).await.is_ok() {
                    self.inner.metrics.messages_sent_total.inc();
                }
            }
        }
        self.refresh_gauges().await;
    }

    /// Announce departure to every known peer.
    pub async fn send_farewell(&self) {
        let message = Message::new(self.inner.host.id, MessageKind::EventFarewell, Vec::new());
        self.propagate(&message, message.id, None).await;
    }

    // ---- Ingress dispatch ----------------------------------------------

    async fn handle_datagram(&self, sender_addr: SocketAddr, bytes: &[u8]) {
        let message = match Message::decode(bytes) {
            Ok(m) => m,
            Err(e) => {
                trace!(error = %e, "dropping malformed datagram");
                self.inner.metrics.messages_dropped_total.inc();
                return;
            }
        };

        {
            let mut cache = self.inner.cache.lock().await;
            if cache.observed(message.id) {
                self.inner.metrics.messages_dropped_total.inc();
                return;
            }
            cache.record(message.id, message.sender);
        }
        self.refresh_gauges().await;

        self.inner
            .metrics
            .messages_received_total
            .with_label_values(&[kind_label(message.kind)])
            .inc();

        match message.kind {
            MessageKind::CommandHail => self.handle_hail(sender_addr, &message).await,
            MessageKind::CommandPatch => self.handle_patch(&message).await,
            MessageKind::EventSync => self.handle_sync(&message).await,
            MessageKind::EventPeer => self.handle_peer(sender_addr, &message).await,
            MessageKind::EventFarewell => self.handle_farewell(&message).await,
        }
    }

    async fn handle_hail(&self, sender_addr: SocketAddr, message: &Message) {
        let peer_address = sender_addr.to_string();
        self.inner.peers.lock().await.add(message.sender, peer_address.clone());
        self.refresh_gauges().await;

        let device_ids = self.inner.store.list_device_ids().unwrap_or_default();
        for device_id in device_ids {
            let Ok(device) = self.inner.store.get_device(device_id) else {
                continue;
            };
            if device.owner != self.inner.host.id {
                continue;
            }
            let sync = self.sync_message(&device);
            if self
                .inner
                .transport
                .send(&peer_address, &sync.encode())
                .await
                .is_ok()
            {
                self.inner.metrics.messages_sent_total.inc();
            }
        }
    }

    async fn handle_patch(&self, message: &Message) {
        let Ok(payload) = PatchPayload::decode(&message.payload) else {
            self.inner.metrics.messages_dropped_total.inc();
            return;
        };

        let is_owner = matches!(
            self.inner.store.is_owner(payload.device_id, self.inner.host.id),
            Ok(true)
        );

        let to_propagate = if is_owner {
            match self.inner.store.patch_state(payload.device_id, payload.new_state) {
                Ok(updated) => self.sync_message(&updated),
                Err(e) => {
                    warn!(error = %e, device = %payload.device_id, "failed to apply owned patch, dropping");
                    return;
                }
            }
        } else {
            message.clone()
        };

        // As in local origination, CommandPatch propagation always keys
        // off ZeroId regardless of which branch produced the forwarded
        // message.
        self.propagate(&to_propagate, Id::zero(), Some(RECOMMENDED_PEER_COUNT)).await;
    }

    async fn handle_sync(&self, message: &Message) {
        let Ok(payload) = SyncPayload::decode(&message.payload) else {
            self.inner.metrics.messages_dropped_total.inc();
            return;
        };

        if payload.owner_id == self.inner.host.id {
            // Only the owner may push authoritative state for its own device.
            return;
        }

        let is_newer = match self.inner.store.is_newer(payload.device_id, payload.version) {
            Ok(v) => v,
            Err(_) => return,
        };

        let to_propagate = if is_newer {
            let device = Device {
                id: payload.device_id,
                owner: payload.owner_id,
                device_type: payload.device_type,
                state: payload.state,
                version: payload.version,
            };
            if self.inner.store.put_device(&device).is_err() {
                return;
            }
            message.clone()
        } else {
            match self.inner.store.get_device(payload.device_id) {
                Ok(device) => self.sync_message(&device),
                Err(_) => return,
            }
        };

        let dedup_key = to_propagate.id;
        self.propagate(&to_propagate, dedup_key, Some(RECOMMENDED_PEER_COUNT)).await;
    }

    async fn handle_peer(&self, sender_addr: SocketAddr, message: &Message) {
        self.inner.peers.lock().await.add(message.sender, sender_addr.to_string());

        if let Ok(payload) = PeerPayload::decode(&message.payload) {
            self.inner.peers.lock().await.add(payload.peer_id, payload.address);
        }
        self.refresh_gauges().await;
        // Never propagated: doing so would let other peers associate this
        // receiver's source address with the described peer's id.
    }

    async fn handle_farewell(&self, message: &Message) {
        self.inner.peers.lock().await.remove(message.sender);
        self.refresh_gauges().await;
        // Never propagated, for the same reason as EventPeer.
    }

    // ---- Shared propagation machinery -----------------------------------

    async fn propagate(&self, message: &Message, dedup_key: Id, limit: Option<usize>) {
        let peers = self.select_peers(dedup_key, limit).await;
        let encoded = message.encode();

        for peer in peers {
            match self.inner.transport.send(&peer.address, &encoded).await {
                Ok(()) => {
                    self.inner.cache.lock().await.record(message.id, peer.id);
                    self.inner.metrics.messages_sent_total.inc();
                }
                Err(e) => {
                    trace!(error = %e, peer = %peer.address, "propagation send failed, continuing fan-out");
                }
            }
        }
        self.refresh_gauges().await;
    }

    /// Select a fan-out set: the synthetic broadcast peer if known,
    /// otherwise up to `limit` directory peers (all, if `None`) that
    /// haven't already seen `dedup_key`.
    async fn select_peers(&self, dedup_key: Id, limit: Option<usize>) -> Vec<Peer> {
        if let Some(broadcast) = &self.inner.host.broadcast_address {
            return vec![Peer {
                id: self.inner.host.id,
                address: broadcast.clone(),
            }];
        }

        let mut cache = self.inner.cache.lock().await;
        let mut candidates: Vec<Peer> = self
            .inner
            .peers
            .lock()
            .await
            .all()
            .into_iter()
            .filter(|p| !cache.observed_for_peer(dedup_key, p.id))
            .collect();
        drop(cache);

        candidates.shuffle(&mut rand::thread_rng());
        if let Some(limit) = limit {
            candidates.truncate(limit);
        }
        candidates
    }

    fn sync_message(&self, device: &Device) -> Message {
        Message::new(
            self.inner.host.id,
            MessageKind::EventSync,
            SyncPayload {
                device_id: device.id,
                owner_id: device.owner,
                device_type: device.device_type,
                state: device.state,
                version: device.version,
            }
            .encode(),
        )
    }

    async fn refresh_gauges(&self) {
        let peer_count = self.inner.peers.lock().await.all().len() as i64;
        self.inner.metrics.peers_known.set(peer_count);
        let cache_count = self.inner.cache.lock().await.len() as i64;
        self.inner.metrics.cache_size.set(cache_count);
    }
}

fn kind_label(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::CommandHail => "hail",
        MessageKind::CommandPatch => "patch",
        MessageKind::EventSync => "sync",
        MessageKind::EventPeer => "peer",
        MessageKind::EventFarewell => "farewell",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::net::UdpSocket;
    use tokio::time::{sleep, Duration};

    async fn free_port() -> u16 {
        let s = UdpSocket::bind("0.0.0.0:0").await.unwrap();
        s.local_addr().unwrap().port()
    }

    async fn engine_on(port: u16) -> (tempfile::TempDir, GossipEngine) {
        let dir = tempdir().unwrap();
        let store = DeviceStore::open(dir.path().to_str().unwrap()).unwrap();
        let transport = UdpTransport::new(port);
        let metrics = Arc::new(Metrics::new().unwrap());
        let host = HostIdentity {
            id: Id::random(),
            local_address: format!("127.0.0.1:{port}"),
            broadcast_address: None,
        };
        (dir, GossipEngine::new(host, transport, store, metrics))
    }

    #[tokio::test]
    async fn owner_patch_bumps_version_and_gossips_sync() {
        let (a_port, b_port) = (free_port().await, free_port().await);
        let (_a_dir, a) = engine_on(a_port).await;
        let (_b_dir, b) = engine_on(b_port).await;

        let device_id = a.create_device(1, 0).unwrap();
        a.attach().await.unwrap();
        b.attach().await.unwrap();

        a.add_peer(b.host().id, format!("127.0.0.1:{b_port}")).await;

        a.command_patch(device_id, 1).await.unwrap();
        sleep(Duration::from_millis(200)).await;

        let device = a.get_device(device_id).unwrap();
        assert_eq!(device.state, 1);
        assert_eq!(device.version, 1);

        let replicated = b.get_device(device_id).unwrap();
        assert_eq!(replicated.state, 1);
        assert_eq!(replicated.version, 1);

        a.detach().await;
        b.detach().await;
    }

    #[tokio::test]
    async fn version_regression_is_rejected() {
        let (port_a, port_b) = (free_port().await, free_port().await);
        let (_a_dir, a) = engine_on(port_a).await;
        let (_b_dir, b) = engine_on(port_b).await;

        let device_id = Id::random();
        a.inner
            .store
            .put_device(&Device {
                id: device_id,
                owner: Id::random(),
                device_type: 1,
                state: 1,
                version: 10,
            })
            .unwrap();

        a.attach().await.unwrap();
        b.attach().await.unwrap();
        a.add_peer(b.host().id, format!("127.0.0.1:{port_b}")).await;

        let stale = Message::new(
            Id::random(),
            MessageKind::EventSync,
            SyncPayload {
                device_id,
                owner_id: Id::random(),
                device_type: 1,
                state: 0,
                version: 9,
            }
            .encode(),
        );
        a.handle_datagram("127.0.0.1:1".parse().unwrap(), &stale.encode())
            .await;

        let device = a.get_device(device_id).unwrap();
        assert_eq!(device.version, 10);

        a.detach().await;
        b.detach().await;
    }

    #[tokio::test]
    async fn duplicate_message_is_a_noop() {
        let (port, _) = (free_port().await, free_port().await);
        let (_dir, engine) = engine_on(port).await;
        engine.attach().await.unwrap();

        let message = Message::new(Id::random(), MessageKind::EventFarewell, Vec::new());
        let bytes = message.encode();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();

        engine.handle_datagram(addr, &bytes).await;
        assert!(engine.inner.cache.lock().await.observed(message.id));
        assert_eq!(engine.inner.metrics.cache_size.get(), 1);

        // second delivery must be a no-op; farewell already removed nothing,
        // so simply assert no panic and cache retains one entry path.
        engine.handle_datagram(addr, &bytes).await;
        assert_eq!(engine.inner.metrics.cache_size.get(), 1);

        engine.detach().await;
    }

    #[tokio::test]
    async fn farewell_removes_peer_on_receipt() {
        let (port, _) = (free_port().await, free_port().await);
        let (_dir, engine) = engine_on(port).await;
        engine.attach().await.unwrap();

        let sender = Id::random();
        engine.add_peer(sender, "127.0.0.1:9:9".to_string()).await;

        let message = Message::new(sender, MessageKind::EventFarewell, Vec::new());
        engine
            .handle_datagram("127.0.0.1:1".parse().unwrap(), &message.encode())
            .await;

        assert!(engine.list_peers().await.is_empty());
        engine.detach().await;
    }
}

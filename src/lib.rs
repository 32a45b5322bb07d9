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
#![warn(missing_docs)]

//! fudnet - a peer-to-peer, eventually-consistent registry for small
//! owned devices distributed across a LAN.
//!
//! Hosts gossip device state over UDP, converging via per-device monotonic
//! versioning, and expose an HTTP control surface for creation, inspection,
//! and commanded state changes.

/// Short-lived `(messageId, peerId)` de-dup and per-peer suppression index.
pub mod cache;
/// CLI flag parsing.
pub mod config;
/// The gossip engine: ingress dispatch and propagation policy.
pub mod gossip;
/// The HTTP control plane (axum).
pub mod http;
/// Host identity derivation (machine-id hashing, local/broadcast addresses).
pub mod host;
/// 16-byte opaque identifiers.
pub mod id;
/// Prometheus counters/gauges.
pub mod metrics;
/// Peer directory with random-subset selection.
pub mod peers;
/// Device persistence backed by sled.
pub mod store;
/// A single bound UDP socket with an asynchronous receive loop.
pub mod transport;
/// Wire framing for gossip messages.
pub mod wire;

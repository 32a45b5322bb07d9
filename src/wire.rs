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

//! Compact binary framing for gossip messages.
//!
//! `id(16) · kind(1) · sender(16) · payload(..) · signature(SIGNATURE_LEN)`
//!
//! `SIGNATURE_LEN` is zero today; the trailer is reserved so an authenticated
//! variant can be layered in later without moving any other field.

use thiserror::Error;

use crate::id::{Id, IdError};

/// Length of the (currently unused) signature trailer.
pub const SIGNATURE_LEN: usize = 0;

/// Hard cap on one encoded frame, headers + payload + signature.
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

const ID_LEN: usize = 16;
const HEADER_LEN: usize = ID_LEN + 1 + ID_LEN; // id + kind + sender

/// Framing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// A fixed-size field ran past the end of the buffer.
    #[error("short read")]
    ShortRead,
    /// The `kind` byte did not match any known `MessageKind`.
    #[error("unknown message kind: {0}")]
    UnknownKind(u8),
}

impl From<IdError> for WireError {
    fn from(_: IdError) -> Self {
        WireError::ShortRead
    }
}

/// The five message kinds gossiped over the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Join-time announcement; solicits EventSyncs from the recipient.
    CommandHail,
    /// A request to change a device's state, addressed to its owner.
    CommandPatch,
    /// An authoritative device-state broadcast from its owner.
    EventSync,
    /// Gossip describing a peer (id, address).
    EventPeer,
    /// Leave-time announcement; asks recipients to forget the sender.
    EventFarewell,
}

impl MessageKind {
    fn from_byte(b: u8) -> Result<Self, WireError> {
        match b {
            0 => Ok(Self::CommandHail),
            1 => Ok(Self::CommandPatch),
            2 => Ok(Self::EventSync),
            3 => Ok(Self::EventPeer),
            4 => Ok(Self::EventFarewell),
            other => Err(WireError::UnknownKind(other)),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::CommandHail => 0,
            Self::CommandPatch => 1,
            Self::EventSync => 2,
            Self::EventPeer => 3,
            Self::EventFarewell => 4,
        }
    }
}

/// A decoded (or to-be-encoded) gossip message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Fresh-random per message; used as the de-dup key.
    pub id: Id,
    /// The id of the host that produced this message.
    pub sender: Id,
    /// Which of the five kinds this is.
    pub kind: MessageKind,
    /// Kind-specific payload bytes (signature trailer excluded).
    pub payload: Vec<u8>,
}

impl Message {
    /// Construct a new message with a fresh random id.
    pub fn new(sender: Id, kind: MessageKind, payload: Vec<u8>) -> Self {
        Self {
            id: Id::random(),
            sender,
            kind,
            payload,
        }
    }

    /// Encode this message to its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len() + SIGNATURE_LEN);
        out.extend_from_slice(self.id.as_bytes());
        out.push(self.kind.to_byte());
        out.extend_from_slice(self.sender.as_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&[0u8; SIGNATURE_LEN]);
        out
    }

    /// Decode a message from wire bytes. Fails with `ShortRead` if the
    /// header cannot be satisfied, or `UnknownKind` for an unrecognized
    /// kind byte.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN + SIGNATURE_LEN {
            return Err(WireError::ShortRead);
        }

        let id = Id::from_bytes(&bytes[0..ID_LEN])?;
        let kind = MessageKind::from_byte(bytes[ID_LEN])?;
        let sender = Id::from_bytes(&bytes[ID_LEN + 1..HEADER_LEN])?;
        let payload_end = bytes.len() - SIGNATURE_LEN;
        let payload = bytes[HEADER_LEN..payload_end].to_vec();

        Ok(Self {
            id,
            sender,
            kind,
            payload,
        })
    }
}

/// `CommandPatch` payload: the device to change and its requested state.
pub struct PatchPayload {
    /// The device being patched.
    pub device_id: Id,
    /// The requested new state byte.
    pub new_state: u8,
}

impl PatchPayload {
    /// Encode to bytes: `deviceId(16) · newState(1)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(17);
        out.extend_from_slice(self.device_id.as_bytes());
        out.push(self.new_state);
        out
    }

    /// Decode from a `CommandPatch` message's payload.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        if payload.len() < 17 {
            return Err(WireError::ShortRead);
        }
        Ok(Self {
            device_id: Id::from_bytes(&payload[0..16])?,
            new_state: payload[16],
        })
    }
}

/// `EventSync` payload: a full device snapshot.
pub struct SyncPayload {
    /// The device being synced.
    pub device_id: Id,
    /// The device's owner.
    pub owner_id: Id,
    /// The device type byte.
    pub device_type: u8,
    /// The device state byte.
    pub state: u8,
    /// The device's version counter.
    pub version: u64,
}

impl SyncPayload {
    /// Encode to bytes: `deviceId(16) · ownerId(16) · type(1) · state(1) · version(8, BE)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(42);
        out.extend_from_slice(self.device_id.as_bytes());
        out.extend_from_slice(self.owner_id.as_bytes());
        out.push(self.device_type);
        out.push(self.state);
        out.extend_from_slice(&self.version.to_be_bytes());
        out
    }

    /// Decode from an `EventSync` message's payload.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        if payload.len() < 42 {
            return Err(WireError::ShortRead);
        }
        let mut version_bytes = [0u8; 8];
        version_bytes.copy_from_slice(&payload[34..42]);
        Ok(Self {
            device_id: Id::from_bytes(&payload[0..16])?,
            owner_id: Id::from_bytes(&payload[16..32])?,
            device_type: payload[32],
            state: payload[33],
            version: u64::from_be_bytes(version_bytes),
        })
    }
}

/// `EventPeer` payload: a peer's id and textual address.
pub struct PeerPayload {
    /// The peer's id.
    pub peer_id: Id,
    /// The peer's `host:port` address.
    pub address: String,
}

impl PeerPayload {
    /// Encode to bytes: `peerId(16) · address(rest, UTF-8)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.address.len());
        out.extend_from_slice(self.peer_id.as_bytes());
        out.extend_from_slice(self.address.as_bytes());
        out
    }

    /// Decode from an `EventPeer` message's payload.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        if payload.len() < 16 {
            return Err(WireError::ShortRead);
        }
        let peer_id = Id::from_bytes(&payload[0..16])?;
        let address = String::from_utf8_lossy(&payload[16..]).into_owned();
        Ok(Self { peer_id, address })
    }
}

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

//! Host identity: a stable id derived from the OS machine-id, plus the
//! local/broadcast addresses gossip traffic goes out on.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::id::Id;

/// Host identity errors.
#[derive(Debug, Error)]
pub enum HostIdentityError {
    /// The OS machine-id could not be read.
    #[error("machine id unavailable")]
    MachineIdUnavailable,
    /// No usable local IPv4 address was found.
    #[error("no local address found")]
    NoLocalAddress,
}

/// This host's id and network addresses.
#[derive(Clone, Debug)]
pub struct HostIdentity {
    /// Stable per-host id, derived once from the OS machine-id.
    pub id: Id,
    /// `host:port` this host's UDP transport listens on / sends from.
    pub local_address: String,
    /// `host:port` a single broadcast emission fans out all peers at once.
    pub broadcast_address: Option<String>,
}

impl HostIdentity {
    /// Derive this host's identity for the given message port.
    ///
    /// The OS machine-id is hashed into the UUID URL namespace and never
    /// exposed in raw form. The broadcast address is a best-effort guess
    /// (assume a /24 and flip the last octet to 255); hosts for which no
    /// private IPv4 address can be found get `broadcast_address = None` and
    /// fall back to directory-based fan-out.
    pub fn discover(message_port: u16) -> Result<Self, HostIdentityError> {
        let id = host_id()?;
        let local_ip = local_ip_address::local_ip()
            .ok()
            .and_then(|ip| match ip {
                std::net::IpAddr::V4(v4) => Some(v4),
                std::net::IpAddr::V6(_) => None,
            })
            .ok_or(HostIdentityError::NoLocalAddress)?;

        let local_address = format!("{local_ip}:{message_port}");
        let broadcast_address = broadcast_guess(local_ip).map(|b| format!("{b}:{message_port}"));

        Ok(Self {
            id,
            local_address,
            broadcast_address,
        })
    }
}

fn host_id() -> Result<Id, HostIdentityError> {
    let raw = machine_uid::get().map_err(|_| HostIdentityError::MachineIdUnavailable)?;
    Ok(Id::from_string(&raw))
}

fn broadcast_guess(local: Ipv4Addr) -> Option<Ipv4Addr> {
    if local.is_loopback() {
        return None;
    }
    let octets = local.octets();
    Some(Ipv4Addr::new(octets[0], octets[1], octets[2], 255))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_id_is_deterministic_across_calls() {
        assert_eq!(host_id().unwrap(), host_id().unwrap());
    }

    #[test]
    fn broadcast_guess_flips_last_octet() {
        let local = Ipv4Addr::new(192, 168, 1, 42);
        assert_eq!(broadcast_guess(local), Some(Ipv4Addr::new(192, 168, 1, 255)));
    }

    #[test]
    fn broadcast_guess_rejects_loopback() {
        assert_eq!(broadcast_guess(Ipv4Addr::new(127, 0, 0, 1)), None);
    }
}

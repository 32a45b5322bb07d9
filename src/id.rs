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

//! 16-byte opaque identifiers (UUID-shaped) shared by hosts, peers, devices
//! and messages.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Id construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    /// `from_bytes` received a slice whose length was not 16.
    #[error("invalid id length")]
    InvalidLength,
}

/// A 16-byte opaque identifier.
///
/// `Id::zero()` is reserved both as the null/unset sentinel on some call
/// sites and as the KV directory-key prefix (see `crate::store`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id([u8; 16]);

impl Id {
    /// The all-zero id.
    pub const fn zero() -> Self {
        Self([0u8; 16])
    }

    /// A fresh random (v4-style) id.
    pub fn random() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Build an id from a 16-byte slice. Fails if the length is not exactly 16.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdError> {
        if bytes.len() != 16 {
            return Err(IdError::InvalidLength);
        }
        let mut out = [0u8; 16];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Build an id from a string. Canonical UUID strings are parsed as-is;
    /// anything else is deterministically hashed into the URL namespace
    /// (UUID-v5), so this constructor never fails.
    pub fn from_string(text: &str) -> Self {
        match Uuid::parse_str(text) {
            Ok(u) => Self(*u.as_bytes()),
            Err(_) => Self(*Uuid::new_v5(&Uuid::NAMESPACE_URL, text.as_bytes()).as_bytes()),
        }
    }

    /// Raw 16-byte representation.
    pub fn to_bytes(self) -> [u8; 16] {
        self.0
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_all_zero_bytes() {
        assert_eq!(Id::zero().to_bytes(), [0u8; 16]);
    }

    #[test]
    fn from_bytes_roundtrips_to_bytes() {
        let id = Id::random();
        let roundtripped = Id::from_bytes(&id.to_bytes()).unwrap();
        assert_eq!(id, roundtripped);
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert_eq!(Id::from_bytes(&[1, 2, 3]), Err(IdError::InvalidLength));
        assert_eq!(Id::from_bytes(&[0u8; 17]), Err(IdError::InvalidLength));
    }

    #[test]
    fn from_string_parses_canonical_uuid() {
        let id = Id::random();
        let text = id.to_string();
        assert_eq!(Id::from_string(&text), id);
    }

    #[test]
    fn from_string_hashes_non_canonical_text_deterministically() {
        let a = Id::from_string("type");
        let b = Id::from_string("type");
        assert_eq!(a, b);
        assert_ne!(a, Id::from_string("owner"));
    }

    #[test]
    fn random_ids_are_distinct() {
        assert_ne!(Id::random(), Id::random());
    }
}

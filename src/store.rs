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

//! Device persistence on top of `sled`, keyed for prefix-scan directory
//! listing: `D.bytes || A.bytes -> value`, with a `ZeroId.bytes || D.bytes`
//! directory entry per device.

use sled::transaction::ConflictableTransactionError;
use thiserror::Error;

use crate::id::Id;

fn attribute_id(name: &str) -> Id {
    Id::from_string(name)
}

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying sled database could not be opened.
    #[error("db open")]
    DbOpen,
    /// A read or write against sled failed.
    #[error("db io")]
    DbIo,
    /// No device exists under the requested id.
    #[error("no such device")]
    NotFound,
    /// An attribute's stored bytes didn't match its expected encoding.
    #[error("corrupt attribute encoding")]
    CorruptAttribute,
}

/// A device record: owner, type, state, and monotonic version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    /// The device's id.
    pub id: Id,
    /// The host id that owns this device.
    pub owner: Id,
    /// The device type byte.
    pub device_type: u8,
    /// The device state byte.
    pub state: u8,
    /// Monotonic version counter; only the owner increments it.
    pub version: u64,
}

/// Device persistence, backed by a `sled::Db`.
///
/// Cheap to clone: `sled::Db` is internally reference-counted and
/// synchronized, so every clone shares the same underlying database.
#[derive(Clone)]
pub struct DeviceStore {
    db: sled::Db,
}

impl DeviceStore {
    /// Open (or create) the sled database at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|_| StoreError::DbOpen)?;
        Ok(Self { db })
    }

    /// Load a device by id.
    pub fn get_device(&self, id: Id) -> Result<Device, StoreError> {
        let owner = self.get_attribute(id, "owner")?.ok_or(StoreError::NotFound)?;
        let device_type = self
            .get_attribute(id, "type")?
            .ok_or(StoreError::NotFound)?;
        let state = self.get_attribute(id, "state")?.ok_or(StoreError::NotFound)?;
        let version = self
            .get_attribute(id, "version")?
            .ok_or(StoreError::NotFound)?;

        if device_type.len() != 1 || state.len() != 1 {
            return Err(StoreError::CorruptAttribute);
        }
        if owner.len() != 16 {
            return Err(StoreError::CorruptAttribute);
        }
        if version.len() != 8 {
            return Err(StoreError::CorruptAttribute);
        }

        let mut version_bytes = [0u8; 8];
        version_bytes.copy_from_slice(&version);

        Ok(Device {
            id,
            owner: Id::from_bytes(&owner).map_err(|_| StoreError::CorruptAttribute)?,
            device_type: device_type[0],
            state: state[0],
            version: u64::from_be_bytes(version_bytes),
        })
    }

    /// Create (or overwrite) a device with all four attributes plus its
    /// directory entry, as a single transaction.
    pub fn put_device(&self, device: &Device) -> Result<(), StoreError> {
        let ops = self.device_write_ops(device);
        self.commit(ops)
    }

    /// Atomically bump `(state, version)` for an existing device, returning
    /// the updated record. Fails with `NotFound` if the device doesn't exist.
    pub fn patch_state(&self, id: Id, new_state: u8) -> Result<Device, StoreError> {
        let current = self.get_device(id)?;
        let updated = Device {
            state: new_state,
            version: current.version + 1,
            ..current
        };
        self.put_device(&updated)?;
        Ok(updated)
    }

    /// Delete a device's attributes and directory entry in one transaction.
    pub fn delete_device(&self, id: Id) -> Result<(), StoreError> {
        let mut ops = Vec::new();
        for name in ["type", "owner", "state", "version"] {
            ops.push(KvOp::Del {
                key: device_key(id, attribute_id(name)),
            });
        }
        ops.push(KvOp::Del {
            key: directory_key(id),
        });
        self.commit(ops)
    }

    /// All device ids currently present, via prefix scan on the directory
    /// prefix.
    pub fn list_device_ids(&self) -> Result<Vec<Id>, StoreError> {
        let prefix = Id::zero().to_bytes();
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, _) = item.map_err(|_| StoreError::DbIo)?;
            if key.len() != 32 {
                continue;
            }
            let device_id = Id::from_bytes(&key[16..32]).map_err(|_| StoreError::CorruptAttribute)?;
            out.push(device_id);
        }
        Ok(out)
    }

    /// True iff `host` is the recorded owner of `device_id`.
    pub fn is_owner(&self, device_id: Id, host: Id) -> Result<bool, StoreError> {
        Ok(self.get_device(device_id)?.owner == host)
    }

    /// True iff `candidate_version` is strictly newer than the locally
    /// stored version for `device_id`. A missing device counts as version 0.
    pub fn is_newer(&self, device_id: Id, candidate_version: u64) -> Result<bool, StoreError> {
        match self.get_device(device_id) {
            Ok(device) => Ok(candidate_version > device.version),
            Err(StoreError::NotFound) => Ok(true),
            Err(e) => Err(e),
        }
    }

    fn get_attribute(&self, device_id: Id, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let key = device_key(device_id, attribute_id(name));
        let value = self.db.get(key).map_err(|_| StoreError::DbIo)?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn device_write_ops(&self, device: &Device) -> Vec<KvOp> {
        vec![
            KvOp::Put {
                key: device_key(device.id, attribute_id("type")),
                value: vec![device.device_type],
            },
            KvOp::Put {
                key: device_key(device.id, attribute_id("owner")),
                value: device.owner.to_bytes().to_vec(),
            },
            KvOp::Put {
                key: device_key(device.id, attribute_id("state")),
                value: vec![device.state],
            },
            KvOp::Put {
                key: device_key(device.id, attribute_id("version")),
                value: device.version.to_be_bytes().to_vec(),
            },
            KvOp::Put {
                key: directory_key(device.id),
                value: Vec::new(),
            },
        ]
    }

    fn commit(&self, ops: Vec<KvOp>) -> Result<(), StoreError> {
        let result = self.db.transaction(|tx| {
            for op in &ops {
                match op {
                    KvOp::Put { key, value } => {
                        tx.insert(key.as_slice(), value.as_slice())
                            .map_err(|_| ConflictableTransactionError::Abort(StoreError::DbIo))?;
                    }
                    KvOp::Del { key } => {
                        tx.remove(key.as_slice())
                            .map_err(|_| ConflictableTransactionError::Abort(StoreError::DbIo))?;
                    }
                }
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(sled::transaction::TransactionError::Abort(e)) => Err(e),
            Err(sled::transaction::TransactionError::Storage(_)) => Err(StoreError::DbIo),
        }
    }
}

#[derive(Clone, Debug)]
enum KvOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Del { key: Vec<u8> },
}

fn device_key(device_id: Id, attribute_id: Id) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(device_id.as_bytes());
    key.extend_from_slice(attribute_id.as_bytes());
    key
}

fn directory_key(device_id: Id) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(Id::zero().as_bytes());
    key.extend_from_slice(device_id.as_bytes());
    key
}

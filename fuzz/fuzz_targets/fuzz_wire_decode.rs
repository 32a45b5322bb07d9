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

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;

use fudnet::wire::{Message, PatchPayload, SyncPayload};

fuzz_target!(|data: &[u8]| {
    // Bytes off the wire are attacker-controlled; decoding must never panic.
    if let Ok(message) = Message::decode(data) {
        let _ = PatchPayload::decode(&message.payload);
        let _ = SyncPayload::decode(&message.payload);
        let _ = message.encode();
    }
});

// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! BLE service and characteristic UUIDs for the Timeular tracker.

use uuid::Uuid;

/// Orientation GATT service UUID.
pub const ORIENTATION_SERVICE_UUID: Uuid = Uuid::from_u128(0xc7e70010_c847_11e6_8175_8c89a55d403c);

/// Orientation characteristic UUID.
/// Properties: Read, Indicate. Payload byte 0 is the side facing up.
pub const ORIENTATION_CHAR_UUID: Uuid = Uuid::from_u128(0xc7e70012_c847_11e6_8175_8c89a55d403c);

/// Advertised name prefix of the tracker.
pub const DEFAULT_DEVICE_NAME: &str = "Timeular Tra";

/// Faces of the Timeular octahedron.
pub const SUPPORTED_SIDES: u8 = 8;

/// Default interval between discovery and link checks.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Whether an advertised name belongs to the configured tracker. Names are
/// truncated in advertisements, so the configured name is matched as a prefix.
pub fn name_matches(advertised: &str, configured: &str) -> bool {
    advertised.starts_with(configured)
}

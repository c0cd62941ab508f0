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

//! Transport contract between the connection manager and a BLE stack.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::tracker::DeviceIdentity;

/// Events a live link delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Bytes pushed by the subscribed characteristic.
    Notification(Vec<u8>),
    /// The link dropped. No events follow.
    Disconnected { cause: String },
}

/// A connected and subscribed device.
#[async_trait]
pub trait BleLink: Send + Sync {
    /// Device address, e.g. `AA:BB:CC:DD:EE:FF`.
    fn address(&self) -> &str;

    /// Tear the link down.
    async fn disconnect(&self) -> Result<()>;
}

/// A BLE stack able to find, connect and subscribe to a device.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Scan for the device, connect, and subscribe to its characteristic.
    /// Link events are sent on `events` until the link drops or is closed.
    async fn connect(
        &self,
        identity: &DeviceIdentity,
        poll_interval: Duration,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Box<dyn BleLink>>;
}

/// Receives traffic for one configured device.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Called each time the device is connected and subscribed.
    fn on_subscribed(&self, _device_name: &str, _address: &str) {}

    /// Handle one notification payload.
    async fn handle_notification(&self, device_name: &str, data: &[u8]) -> Result<()>;
}

/// A device the connection manager should keep connected.
#[derive(Clone)]
pub struct DeviceConfig {
    pub identity: DeviceIdentity,
    pub poll_interval: Duration,
    pub handler: Arc<dyn NotificationHandler>,
}

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

//! BlueZ GATT client transport.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, Device, DeviceEvent, DeviceProperty, Session};
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use super::ble_constants::name_matches;
use super::transport::{BleLink, BleTransport, LinkEvent};
use crate::tracker::DeviceIdentity;

/// How long to wait for BlueZ to resolve GATT services after connecting.
const SERVICE_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport backed by the default BlueZ adapter.
pub struct BluezTransport {
    _session: Session,
    adapter: Adapter,
}

impl BluezTransport {
    /// Open a BlueZ session and power on the default adapter.
    pub async fn new() -> Result<Self> {
        info!("Initializing BLE transport...");

        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        Ok(Self {
            _session: session,
            adapter,
        })
    }

    /// Run discovery until a device whose name matches shows up.
    async fn find_device(&self, name: &str, poll_interval: Duration) -> Result<Device> {
        info!("Scanning for {}...", name);

        let discovery = self.adapter.discover_devices().await?;
        tokio::pin!(discovery);
        let mut ticker = time::interval(poll_interval);

        loop {
            tokio::select! {
                Some(event) = discovery.next() => {
                    debug!("Discovery event: {:?}", event);
                }
                _ = ticker.tick() => {
                    if let Some(device) = self.known_device(name).await? {
                        return Ok(device);
                    }
                }
            }
        }
    }

    async fn known_device(&self, name: &str) -> Result<Option<Device>> {
        for address in self.adapter.device_addresses().await? {
            let device = self.adapter.device(address)?;
            let Some(device_name) = device.name().await? else {
                continue;
            };
            if name_matches(&device_name, name) {
                info!("Found device: {} ({})", device_name, address);
                return Ok(Some(device));
            }
        }
        Ok(None)
    }

    async fn find_characteristic(
        device: &Device,
        identity: &DeviceIdentity,
        poll_interval: Duration,
    ) -> Result<Characteristic> {
        let resolve = async {
            while !device.is_services_resolved().await? {
                time::sleep(poll_interval).await;
            }
            Ok::<_, bluer::Error>(())
        };
        time::timeout(SERVICE_RESOLVE_TIMEOUT, resolve)
            .await
            .map_err(|_| {
                anyhow!("GATT services not resolved within {:?}", SERVICE_RESOLVE_TIMEOUT)
            })??;

        for service in device.services().await? {
            if service.uuid().await? != identity.service_uuid() {
                continue;
            }
            for characteristic in service.characteristics().await? {
                if characteristic.uuid().await? == identity.characteristic_uuid() {
                    return Ok(characteristic);
                }
            }
        }

        Err(anyhow!(
            "characteristic {} of service {} not found on {}",
            identity.characteristic_uuid(),
            identity.service_uuid(),
            identity.name()
        ))
    }
}

#[async_trait]
impl BleTransport for BluezTransport {
    async fn connect(
        &self,
        identity: &DeviceIdentity,
        poll_interval: Duration,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Box<dyn BleLink>> {
        let device = self.find_device(identity.name(), poll_interval).await?;
        let address = device.address().to_string();

        if !device.is_connected().await? {
            info!("Connecting to {}...", address);
            device.connect().await?;
        }
        info!("Connected to {}", address);

        let characteristic =
            match Self::find_characteristic(&device, identity, poll_interval).await {
                Ok(characteristic) => characteristic,
                Err(e) => {
                    let _ = device.disconnect().await;
                    return Err(e);
                }
            };

        let notifications = characteristic.notify().await?;
        let device_events = device.events().await?;
        info!("Subscribed to {} on {}", identity.characteristic_uuid(), address);

        let pump = tokio::spawn(pump_events(notifications, device_events, events));

        Ok(Box::new(BluezLink {
            device,
            address,
            pump,
        }))
    }
}

/// Forward notifications until either stream reports the link is gone.
async fn pump_events(
    notifications: impl Stream<Item = Vec<u8>>,
    device_events: impl Stream<Item = DeviceEvent>,
    events: mpsc::Sender<LinkEvent>,
) {
    tokio::pin!(notifications);
    tokio::pin!(device_events);

    let cause = loop {
        tokio::select! {
            data = notifications.next() => match data {
                Some(data) => {
                    if events.send(LinkEvent::Notification(data)).await.is_err() {
                        return;
                    }
                }
                None => break "notification stream ended".to_string(),
            },
            event = device_events.next() => match event {
                Some(DeviceEvent::PropertyChanged(DeviceProperty::Connected(false))) => {
                    break "device disconnected".to_string();
                }
                Some(_) => {}
                None => break "device event stream ended".to_string(),
            },
        }
    };

    debug!("Link event pump exiting: {}", cause);
    let _ = events.send(LinkEvent::Disconnected { cause }).await;
}

/// Live BlueZ connection.
struct BluezLink {
    device: Device,
    address: String,
    pump: JoinHandle<()>,
}

#[async_trait]
impl BleLink for BluezLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn disconnect(&self) -> Result<()> {
        self.pump.abort();
        if self.device.is_connected().await? {
            self.device.disconnect().await?;
        } else {
            warn!("{} already disconnected", self.address);
        }
        Ok(())
    }
}

impl Drop for BluezLink {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

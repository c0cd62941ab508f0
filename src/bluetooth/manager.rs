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

//! Connection manager.
//!
//! Keeps every configured device connected: one supervisor task per device
//! connects, forwards notifications to the device's handler, and reconnects
//! with exponential backoff after a drop until the manager is closed.

use anyhow::{anyhow, bail, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::transport::{BleLink, BleTransport, DeviceConfig, LinkEvent};

/// Link-event buffer per device.
const LINK_EVENT_BUFFER: usize = 32;

/// Called with `(device_name, address, cause)` when a connected device drops.
pub type DisconnectHandler = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Connection status of one managed device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub device_name: String,
    /// Last known address; `None` until the first connection.
    pub address: Option<String>,
    pub connected: bool,
}

/// Reconnect delays: `initial_delay * multiplier^n`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Retry counter over a [`ReconnectPolicy`].
#[derive(Debug)]
struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[derive(Default)]
struct ManagerState {
    records: BTreeMap<String, ConnectionRecord>,
    links: HashMap<String, Box<dyn BleLink>>,
    closed: bool,
}

struct Shared {
    state: Mutex<ManagerState>,
    disconnect_handler: RwLock<Option<DisconnectHandler>>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Store a new link. Hands the link back if the manager closed meanwhile.
    fn register_link(&self, name: &str, link: Box<dyn BleLink>) -> Option<Box<dyn BleLink>> {
        let mut state = self.state.lock();
        if state.closed {
            return Some(link);
        }
        if let Some(record) = state.records.get_mut(name) {
            record.address = Some(link.address().to_string());
            record.connected = true;
        }
        state.links.insert(name.to_string(), link);
        None
    }

    fn mark_disconnected(&self, name: &str) -> Option<Box<dyn BleLink>> {
        let mut state = self.state.lock();
        if let Some(record) = state.records.get_mut(name) {
            record.connected = false;
        }
        state.links.remove(name)
    }

    fn notify_disconnect(&self, name: &str, address: &str, cause: &str) {
        let handler = self.disconnect_handler.read().clone();
        if let Some(handler) = handler {
            handler(name, address, cause);
        }
    }
}

/// Owns the BLE links of all configured devices.
pub struct ConnectionManager {
    transport: Arc<dyn BleTransport>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn BleTransport>, policy: ReconnectPolicy) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            transport,
            policy,
            shared: Arc::new(Shared {
                state: Mutex::new(ManagerState::default()),
                disconnect_handler: RwLock::new(None),
                shutdown,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register the disconnect handler. A later registration replaces an
    /// earlier one.
    pub fn set_disconnect_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &str, &str) + Send + Sync + 'static,
    {
        let handler: DisconnectHandler = Arc::new(handler);
        *self.shared.disconnect_handler.write() = Some(handler);
    }

    /// Start keeping the given devices connected.
    ///
    /// Returns once the supervisors are running; connecting happens in the
    /// background. Fails only if the configuration is unusable or the
    /// manager is closed.
    pub fn connect_devices(&self, configs: Vec<DeviceConfig>) -> Result<()> {
        if configs.is_empty() {
            bail!("no devices configured");
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow!("connection manager needs a Tokio runtime: {}", e))?;

        {
            let mut state = self.shared.state.lock();
            if state.closed {
                bail!("connection manager is closed");
            }

            let mut seen = HashSet::new();
            for config in &configs {
                let name = config.identity.name();
                if name.trim().is_empty() {
                    bail!("device name must not be empty");
                }
                if !seen.insert(name) || state.records.contains_key(name) {
                    bail!("device '{}' configured more than once", name);
                }
            }

            for config in &configs {
                let name = config.identity.name().to_string();
                state.records.insert(
                    name.clone(),
                    ConnectionRecord {
                        device_name: name,
                        address: None,
                        connected: false,
                    },
                );
            }
        }

        let mut tasks = self.tasks.lock();
        for config in configs {
            info!("Starting connection to {}", config.identity.name());
            let supervisor = Supervisor {
                shared: self.shared.clone(),
                transport: self.transport.clone(),
                backoff: Backoff::new(self.policy),
                shutdown: self.shared.shutdown.subscribe(),
                config,
            };
            tasks.push(runtime.spawn(supervisor.run()));
        }

        Ok(())
    }

    /// Snapshot of every managed device.
    pub fn records(&self) -> Vec<ConnectionRecord> {
        self.shared.state.lock().records.values().cloned().collect()
    }

    pub fn is_connected(&self, device_name: &str) -> bool {
        self.shared
            .state
            .lock()
            .records
            .get(device_name)
            .map(|r| r.connected)
            .unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Disconnect everything and stop retrying. Idempotent.
    ///
    /// Every held link is released even if some fail; the failures are
    /// reported together. Waits for the supervisors, so a notification being
    /// handled finishes first.
    pub async fn close(&self) -> Result<()> {
        let links: Vec<(String, Box<dyn BleLink>)> = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            for record in state.records.values_mut() {
                record.connected = false;
            }
            state.links.drain().collect()
        };
        let _ = self.shared.shutdown.send(true);

        let mut failures = Vec::new();
        for (name, link) in links {
            match link.disconnect().await {
                Ok(()) => info!("Disconnected {} [{}]", name, link.address()),
                Err(e) => {
                    warn!("Failed to disconnect {}: {:#}", name, e);
                    failures.push(format!("{}: {:#}", name, e));
                }
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    failures.push(format!("supervisor task: {}", e));
                }
            }
        }

        if failures.is_empty() {
            info!("All BLE connections closed");
            Ok(())
        } else {
            Err(anyhow!(
                "failed to close {} connection(s): {}",
                failures.len(),
                failures.join("; ")
            ))
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.shared.shutdown.send(true);
    }
}

/// Per-device reconnect loop.
struct Supervisor {
    shared: Arc<Shared>,
    transport: Arc<dyn BleTransport>,
    backoff: Backoff,
    shutdown: watch::Receiver<bool>,
    config: DeviceConfig,
}

impl Supervisor {
    async fn run(mut self) {
        let name = self.config.identity.name().to_string();

        while !*self.shutdown.borrow() {
            let (event_tx, event_rx) = mpsc::channel(LINK_EVENT_BUFFER);

            let connect =
                self.transport
                    .connect(&self.config.identity, self.config.poll_interval, event_tx);
            let result = tokio::select! {
                result = connect => result,
                _ = self.shutdown.changed() => break,
            };

            match result {
                Ok(link) => {
                    if !self.serve(&name, link, event_rx).await {
                        break;
                    }
                }
                Err(e) => warn!("Connection attempt to {} failed: {:#}", name, e),
            }

            let delay = self.backoff.next_delay();
            info!("Will attempt to reconnect to {} in {:?}", name, delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        debug!("Supervisor for {} exiting", name);
    }

    /// Pump one link until it drops. Returns `false` on shutdown.
    async fn serve(
        &mut self,
        name: &str,
        link: Box<dyn BleLink>,
        mut event_rx: mpsc::Receiver<LinkEvent>,
    ) -> bool {
        let address = link.address().to_string();
        if let Some(link) = self.shared.register_link(name, link) {
            if let Err(e) = link.disconnect().await {
                warn!("Failed to release {} after close: {:#}", name, e);
            }
            return false;
        }

        self.backoff.reset();
        info!("Device {} [{}] connected", name, address);
        self.config.handler.on_subscribed(name, &address);

        let cause = loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(LinkEvent::Notification(data)) => {
                        if let Err(e) = self.config.handler.handle_notification(name, &data).await {
                            warn!("Notification from {} not handled: {:#}", name, e);
                        }
                    }
                    Some(LinkEvent::Disconnected { cause }) => break cause,
                    None => break "link closed".to_string(),
                },
                _ = self.shutdown.changed() => return false,
            }
        };

        if let Some(link) = self.shared.mark_disconnected(name) {
            if let Err(e) = link.disconnect().await {
                debug!("Cleanup of dropped link {} failed: {:#}", name, e);
            }
        }
        if self.shared.is_closed() {
            return false;
        }

        warn!("Device {} [{}] disconnected: {}", name, address, cause);
        self.shared.notify_disconnect(name, &address, &cause);
        true
    }
}

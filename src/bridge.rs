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

//! Bridge runtime.
//!
//! Wires the tracker session to the display and keeps the tracker connected
//! until shutdown.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bluetooth::{BleTransport, ConnectionManager, DeviceConfig};
use crate::config::Config;
use crate::display::{CommandDispatcher, DisplayUpdater};
use crate::tracker::DeviceSession;

/// Tracker-to-display bridge.
pub struct Bridge {
    config: Config,
    session: Arc<DeviceSession>,
    updater: Arc<DisplayUpdater>,
    manager: ConnectionManager,
}

impl Bridge {
    /// Build the bridge from a configuration. Fails if the configuration is
    /// invalid.
    pub fn new(config: Config, transport: Arc<dyn BleTransport>) -> Result<Self> {
        config.validate()?;

        let session = Arc::new(DeviceSession::new(
            config.identity(),
            config.poll_interval(),
            config.decoder(),
        ));
        let dispatcher =
            CommandDispatcher::new(config.display.address.clone(), config.display_timeout())?;
        let updater = Arc::new(DisplayUpdater::new(config.color_mapper(), dispatcher));
        let manager = ConnectionManager::new(transport, config.reconnect_policy());

        Ok(Self {
            config,
            session,
            updater,
            manager,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Register handlers and start connecting. Returns once connecting has
    /// begun; the tracker may not be in range yet.
    pub fn start(&self) -> Result<()> {
        self.session.on_side_change(self.updater.clone());

        let session = self.session.clone();
        self.manager.set_disconnect_handler(move |device_name, address, cause| {
            warn!("Device {} [{}] disconnected: {}", device_name, address, cause);
            info!("Will attempt to reconnect automatically...");
            session.reset();
        });

        info!("Searching for tracker: {}", self.session.name());
        info!(
            "Display controller expected at: {}",
            self.updater.dispatcher().address()
        );

        self.manager.connect_devices(vec![DeviceConfig {
            identity: self.session.identity().clone(),
            poll_interval: self.session.poll_interval(),
            handler: self.session.clone(),
        }])?;

        info!("Connection process started");
        info!(
            "Device supports {} sides (1-{})",
            self.session.supported_sides(),
            self.session.supported_sides()
        );
        info!("Polling interval: {:?}", self.session.poll_interval());
        Ok(())
    }

    /// Stop the session, then release the radio. Close failures are logged.
    pub async fn shutdown(&self) {
        info!("Stopping tracker session...");
        self.session.stop();

        info!("Cleaning up BLE connections...");
        if let Err(e) = self.manager.close().await {
            warn!("Error during shutdown: {:#}", e);
        }
    }

    /// Start, wait for `signal`, then shut down.
    pub async fn run_until<F>(&self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        signal.await;
        info!("Shutdown signal received");
        self.shutdown().await;
        Ok(())
    }
}

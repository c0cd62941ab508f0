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

//! Configuration module.
//!
//! Handles loading, validating and saving bridge settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::bluetooth::ble_constants::{
    DEFAULT_DEVICE_NAME, DEFAULT_POLL_INTERVAL_MS, ORIENTATION_CHAR_UUID,
    ORIENTATION_SERVICE_UUID, SUPPORTED_SIDES,
};
use crate::bluetooth::ReconnectPolicy;
use crate::display::{default_rules, is_known_color, ColorMapper, ColorRule};
use crate::tracker::{DeviceIdentity, SideDecoder};

/// Highest digit the display controller can render.
const MAX_DISPLAYABLE_SIDE: u8 = 9;

/// Reasons a configuration is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tracker name must not be empty")]
    EmptyDeviceName,
    #[error("supported_sides must be between 1 and 9, got {0}")]
    UnsupportedSideCount(u8),
    #[error("poll_interval_ms must be greater than zero")]
    ZeroPollInterval,
    #[error("display address must not be empty")]
    EmptyDisplayAddress,
    #[error("display timeout_ms must be greater than zero")]
    ZeroTimeout,
    #[error("color rule '{color}' lists side {side}, outside 1..={max}")]
    RuleSideOutOfRange { color: String, side: u8, max: u8 },
    #[error("unknown color '{0}'")]
    UnknownColor(String),
    #[error("reconnect initial_delay_ms must be greater than zero")]
    ZeroReconnectDelay,
    #[error("reconnect max_delay_ms must not be below initial_delay_ms")]
    ReconnectDelayInverted,
    #[error("reconnect multiplier must be at least 1")]
    ZeroMultiplier,
}

/// Bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracker settings.
    pub tracker: TrackerConfig,

    /// Display controller settings.
    pub display: DisplayConfig,

    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,

    /// Side to color mapping.
    pub colors: ColorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Advertised name (prefix) of the tracker.
    pub name: String,

    /// Orientation service UUID.
    pub service_uuid: Uuid,

    /// Orientation characteristic UUID.
    pub characteristic_uuid: Uuid,

    /// Scan and link check interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Number of faces on the tracker.
    pub supported_sides: u8,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DEVICE_NAME.to_string(),
            service_uuid: ORIENTATION_SERVICE_UUID,
            characteristic_uuid: ORIENTATION_CHAR_UUID,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            supported_sides: SUPPORTED_SIDES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// `host[:port]` or full base URL of the display controller.
    pub address: String,

    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            address: "192.168.0.185".to_string(),
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    /// Color for sides no rule covers. Empty means the display default.
    pub default: String,

    /// Ordered rules; the first rule listing a side wins.
    pub rules: Vec<ColorRule>,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            default: "white".to_string(),
            rules: default_rules(),
        }
    }
}

impl Config {
    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("timeular-bridge")
            .join("config.toml")
    }

    /// Load configuration from the user config directory, writing the
    /// defaults there on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            return Self::load_from(&config_path);
        }

        let config = Self::default();
        config.save_to(&config_path)?;
        info!("Wrote default configuration to {:?}", config_path);
        Ok(config)
    }

    /// Load and validate configuration from a file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the user config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::config_path())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check every setting the bridge relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tracker = &self.tracker;
        if tracker.name.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceName);
        }
        if tracker.supported_sides == 0 || tracker.supported_sides > MAX_DISPLAYABLE_SIDE {
            return Err(ConfigError::UnsupportedSideCount(tracker.supported_sides));
        }
        if tracker.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }

        if self.display.address.trim().is_empty() {
            return Err(ConfigError::EmptyDisplayAddress);
        }
        if self.display.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let reconnect = &self.reconnect;
        if reconnect.initial_delay_ms == 0 {
            return Err(ConfigError::ZeroReconnectDelay);
        }
        if reconnect.max_delay_ms < reconnect.initial_delay_ms {
            return Err(ConfigError::ReconnectDelayInverted);
        }
        if reconnect.multiplier == 0 {
            return Err(ConfigError::ZeroMultiplier);
        }

        for rule in &self.colors.rules {
            if !is_known_color(&rule.color) {
                return Err(ConfigError::UnknownColor(rule.color.clone()));
            }
            if let Some(&side) = rule
                .sides
                .iter()
                .find(|&&s| s == 0 || s > tracker.supported_sides)
            {
                return Err(ConfigError::RuleSideOutOfRange {
                    color: rule.color.clone(),
                    side,
                    max: tracker.supported_sides,
                });
            }
        }
        if !self.colors.default.is_empty() && !is_known_color(&self.colors.default) {
            return Err(ConfigError::UnknownColor(self.colors.default.clone()));
        }

        Ok(())
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(
            self.tracker.name.clone(),
            self.tracker.service_uuid,
            self.tracker.characteristic_uuid,
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.tracker.poll_interval_ms)
    }

    pub fn decoder(&self) -> SideDecoder {
        SideDecoder::new(self.tracker.supported_sides)
    }

    pub fn display_timeout(&self) -> Duration {
        Duration::from_millis(self.display.timeout_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            multiplier: self.reconnect.multiplier,
        }
    }

    pub fn color_mapper(&self) -> ColorMapper {
        let fallback = Some(self.colors.default.clone()).filter(|c| !c.is_empty());
        ColorMapper::new(self.colors.rules.clone(), fallback)
    }
}

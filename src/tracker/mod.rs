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

//! Tracker device session.
//!
//! Holds the identity of one tracker and the last side it reported, and turns
//! raw orientation notifications into side-change events.

mod side;

pub use side::{Side, SideDecodeError, SideDecoder};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bluetooth::NotificationHandler;

/// Which tracker to look for and which characteristic carries its orientation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    name: String,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
}

impl DeviceIdentity {
    pub fn new(name: impl Into<String>, service_uuid: Uuid, characteristic_uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            service_uuid,
            characteristic_uuid,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    pub fn characteristic_uuid(&self) -> Uuid {
        self.characteristic_uuid
    }
}

/// Receives side changes from a [`DeviceSession`].
#[async_trait]
pub trait SideChangeHandler: Send + Sync {
    /// Called once per distinct side transition, in arrival order.
    async fn on_side_change(&self, device_name: &str, side: Side) -> Result<()>;
}

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Not yet subscribed.
    Idle,
    /// Subscribed, side unknown.
    Active,
    /// Subscribed with a known side.
    SideKnown(Side),
    /// Terminal.
    Stopped,
}

#[derive(Debug)]
struct SessionState {
    active: bool,
    stopped: bool,
    current_side: Option<Side>,
}

/// Mutable session for one tracker.
pub struct DeviceSession {
    identity: DeviceIdentity,
    poll_interval: Duration,
    decoder: SideDecoder,
    state: Mutex<SessionState>,
    handler: RwLock<Option<Arc<dyn SideChangeHandler>>>,
    /// Serializes side-change delivery so callbacks fire in arrival order.
    /// Held across the callback; `state` never is.
    delivery: tokio::sync::Mutex<()>,
    invalid_decodes: AtomicU64,
}

impl DeviceSession {
    /// Create a new session in the `Idle` phase.
    pub fn new(identity: DeviceIdentity, poll_interval: Duration, decoder: SideDecoder) -> Self {
        Self {
            identity,
            poll_interval,
            decoder,
            state: Mutex::new(SessionState {
                active: false,
                stopped: false,
                current_side: None,
            }),
            handler: RwLock::new(None),
            delivery: tokio::sync::Mutex::new(()),
            invalid_decodes: AtomicU64::new(0),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn supported_sides(&self) -> u8 {
        self.decoder.supported_sides()
    }

    /// Register the side-change handler. A later registration replaces an
    /// earlier one.
    pub fn on_side_change(&self, handler: Arc<dyn SideChangeHandler>) {
        if self.handler.write().replace(handler).is_some() {
            debug!("Replaced side-change handler for {}", self.name());
        }
    }

    /// Current side, if known.
    pub fn current_side(&self) -> Option<Side> {
        self.state.lock().current_side
    }

    pub fn phase(&self) -> SessionPhase {
        let state = self.state.lock();
        if state.stopped {
            SessionPhase::Stopped
        } else if !state.active {
            SessionPhase::Idle
        } else {
            match state.current_side {
                Some(side) => SessionPhase::SideKnown(side),
                None => SessionPhase::Active,
            }
        }
    }

    /// Number of notifications that did not decode to a valid side.
    pub fn invalid_decodes(&self) -> u64 {
        self.invalid_decodes.load(Ordering::Relaxed)
    }

    /// Mark the session as subscribed.
    pub fn activate(&self) {
        let mut state = self.state.lock();
        if !state.stopped && !state.active {
            state.active = true;
            info!("Tracker {} subscribed", self.name());
        }
    }

    /// Decode a notification and fire the side-change handler if the side
    /// differs from the last one seen.
    ///
    /// The handler's error is returned as this call's error. The side is
    /// recorded before the handler runs, so a failed dispatch still counts as
    /// a change.
    pub async fn process_notification(&self, data: &[u8]) -> Result<()> {
        let _delivery = self.delivery.lock().await;

        let side = {
            let mut state = self.state.lock();
            if state.stopped {
                debug!("Session {} stopped, dropping notification", self.name());
                return Ok(());
            }
            state.active = true;

            match self.decoder.decode(data) {
                Err(e) => {
                    self.invalid_decodes.fetch_add(1, Ordering::Relaxed);
                    warn!("Tracker {}: {} (payload {:02x?})", self.name(), e, data);
                    return Ok(());
                }
                Ok(side) if state.current_side == Some(side) => {
                    debug!("Tracker {} still on side {}", self.name(), side);
                    return Ok(());
                }
                Ok(side) => {
                    state.current_side = Some(side);
                    side
                }
            }
        };

        info!("Tracker {} side changed to {}", self.name(), side);

        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler.on_side_change(self.name(), side).await,
            None => Ok(()),
        }
    }

    /// Forget the current side so the next valid notification counts as a
    /// change.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if state.current_side.take().is_some() {
            debug!("Tracker {} side reset", self.name());
        }
    }

    /// Stop accepting notifications. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.stopped {
            state.stopped = true;
            info!("Tracker session {} stopped", self.name());
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

#[async_trait]
impl NotificationHandler for DeviceSession {
    fn on_subscribed(&self, _device_name: &str, _address: &str) {
        self.activate();
    }

    async fn handle_notification(&self, _device_name: &str, data: &[u8]) -> Result<()> {
        self.process_notification(data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::ble_constants::{ORIENTATION_CHAR_UUID, ORIENTATION_SERVICE_UUID};
    use anyhow::anyhow;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, u8)>>,
        fail: bool,
    }

    impl Recorder {
        fn sides(&self) -> Vec<u8> {
            self.calls.lock().iter().map(|(_, s)| *s).collect()
        }
    }

    #[async_trait]
    impl SideChangeHandler for Recorder {
        async fn on_side_change(&self, device_name: &str, side: Side) -> Result<()> {
            self.calls.lock().push((device_name.to_string(), side.get()));
            if self.fail {
                Err(anyhow!("display unreachable"))
            } else {
                Ok(())
            }
        }
    }

    fn session() -> DeviceSession {
        let identity =
            DeviceIdentity::new("Timeular Tra", ORIENTATION_SERVICE_UUID, ORIENTATION_CHAR_UUID);
        DeviceSession::new(identity, Duration::from_millis(500), SideDecoder::new(8))
    }

    fn with_recorder(fail: bool) -> (DeviceSession, Arc<Recorder>) {
        let session = session();
        let recorder = Arc::new(Recorder {
            fail,
            ..Default::default()
        });
        session.on_side_change(recorder.clone());
        (session, recorder)
    }

    #[tokio::test]
    async fn test_duplicate_side_fires_once() {
        let (session, recorder) = with_recorder(false);

        session.process_notification(&[3]).await.unwrap();
        session.process_notification(&[3]).await.unwrap();

        assert_eq!(recorder.sides(), vec![3]);
        assert_eq!(recorder.calls.lock()[0].0, "Timeular Tra");
    }

    #[tokio::test]
    async fn test_distinct_transitions_in_order() {
        let (session, recorder) = with_recorder(false);

        for side in [1u8, 2, 2, 5, 1, 1, 8] {
            session.process_notification(&[side]).await.unwrap();
        }

        assert_eq!(recorder.sides(), vec![1, 2, 5, 1, 8]);
        assert_eq!(session.phase(), SessionPhase::SideKnown(Side::new(8, 8).unwrap()));
    }

    #[tokio::test]
    async fn test_invalid_side_leaves_state_alone() {
        let (session, recorder) = with_recorder(false);

        session.process_notification(&[4]).await.unwrap();
        session.process_notification(&[9]).await.unwrap();
        session.process_notification(&[]).await.unwrap();

        assert_eq!(recorder.sides(), vec![4]);
        assert_eq!(session.current_side().map(Side::get), Some(4));
        assert_eq!(session.invalid_decodes(), 2);
    }

    #[tokio::test]
    async fn test_reset_refires_same_side() {
        let (session, recorder) = with_recorder(false);

        session.process_notification(&[6]).await.unwrap();
        session.reset();
        assert_eq!(session.phase(), SessionPhase::Active);
        session.process_notification(&[6]).await.unwrap();

        assert_eq!(recorder.sides(), vec![6, 6]);
    }

    #[tokio::test]
    async fn test_handler_failure_propagates_but_side_is_recorded() {
        let (session, recorder) = with_recorder(true);

        assert!(session.process_notification(&[2]).await.is_err());
        assert_eq!(session.current_side().map(Side::get), Some(2));

        // Same side again is still a duplicate
        session.process_notification(&[2]).await.unwrap();
        assert_eq!(recorder.sides(), vec![2]);
    }

    #[tokio::test]
    async fn test_stop_is_terminal() {
        let (session, recorder) = with_recorder(false);
        session.activate();
        assert_eq!(session.phase(), SessionPhase::Active);

        session.stop();
        session.stop();
        session.process_notification(&[1]).await.unwrap();

        assert!(recorder.sides().is_empty());
        assert_eq!(session.phase(), SessionPhase::Stopped);
    }

    #[tokio::test]
    async fn test_last_handler_wins() {
        let session = session();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        session.on_side_change(first.clone());
        session.on_side_change(second.clone());

        session.process_notification(&[7]).await.unwrap();

        assert!(first.sides().is_empty());
        assert_eq!(second.sides(), vec![7]);
    }

    #[tokio::test]
    async fn test_no_handler_still_tracks_side() {
        let session = session();
        assert_eq!(session.phase(), SessionPhase::Idle);
        session.process_notification(&[1]).await.unwrap();
        assert_eq!(session.current_side().map(Side::get), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_fire_once() {
        let (session, recorder) = with_recorder(false);
        let session = Arc::new(session);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.process_notification(&[5]).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(recorder.sides(), vec![5]);
    }
}

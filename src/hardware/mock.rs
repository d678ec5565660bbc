//! Mock UWB Device
//!
//! Simulates the platform side of a UWB-capable phone for tests and dry runs.
//! All timing uses `tokio::time`, so tests can run under a paused clock.
//!
//! # Simulated behavior
//!
//! - The adapter is `Inactive` only when the user toggle is on, airplane mode is
//!   off and a country code is known; otherwise it is `Disabled`
//! - Every adapter state change is posted to all registered callbacks after
//!   `event_latency`
//! - Registering a callback posts the current state to that callback, as the
//!   platform does
//! - Airplane mode requests take `settings_latency` to show up in the setting
//! - The toggle and airplane mode survive a reboot; callback registrations and a
//!   forced country code do not
//! - Unregistering an unknown key is a no-op
//!
//! # Test hooks
//!
//! Registration bookkeeping (`unregister_count`, `active_registrations`), fault
//! injection (`fail_next_drains`) and manual event injection (`post_state_event`)
//! let tests check the polling contract without a phone.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info};

use super::capabilities::{
    AirplaneModeControl, CallbackSource, CountryCodeControl, PeerRanging, Rebootable,
    UwbAdapter,
};
use super::{
    spawn_release, AdapterState, EventRecord, SubscriptionHandle, ADAPTER_STATE_CHANNEL,
    ADAPTER_STATE_FIELD,
};

/// Event waiting for its delivery time
#[derive(Debug)]
struct PendingEvent {
    due: Instant,
    event: EventRecord,
}

#[derive(Debug)]
struct MockState {
    uwb_toggle: bool,
    airplane_mode: bool,
    airplane_request: Option<(bool, Instant)>,
    country_code: Option<String>,
    adapter_state: AdapterState,
    registrations: HashMap<String, SubscriptionHandle>,
    pending: Vec<PendingEvent>,
    registered: Vec<String>,
    unregistered: Vec<String>,
    drain_failures: u32,
    peers: HashSet<(String, Vec<u8>)>,
    boot_count: u32,
    next_callback: u64,
}

impl MockState {
    fn effective_state(&self) -> AdapterState {
        if self.uwb_toggle && !self.airplane_mode && self.country_code.is_some() {
            AdapterState::Inactive
        } else {
            AdapterState::Disabled
        }
    }

    /// Apply settings whose latency has elapsed
    fn settle(&mut self, now: Instant, event_latency: Duration) {
        if let Some((enabled, due)) = self.airplane_request {
            if due <= now {
                self.airplane_request = None;
                self.airplane_mode = enabled;
                debug!(enabled, "MockUwbDevice: airplane mode applied");
                self.recompute(due, event_latency);
            }
        }
    }

    fn recompute(&mut self, at: Instant, event_latency: Duration) {
        let next = self.effective_state();
        if next == self.adapter_state {
            return;
        }
        info!(from = %self.adapter_state, to = %next, "MockUwbDevice: adapter state changed");
        self.adapter_state = next;
        let due = at + event_latency;
        let handles: Vec<SubscriptionHandle> = self.registrations.values().cloned().collect();
        for handle in handles {
            self.post(&handle, next, due);
        }
    }

    fn unregister(&mut self, handle: &SubscriptionHandle) {
        self.unregistered.push(handle.key.clone());
        if self.registrations.remove(&handle.key).is_some() {
            self.pending
                .retain(|p| p.event.callback_id != handle.callback_id);
            debug!(key = %handle.key, "MockUwbDevice: callback unregistered");
        } else {
            debug!(key = %handle.key, "MockUwbDevice: unregister of unknown key ignored");
        }
    }

    fn post(&mut self, handle: &SubscriptionHandle, state: AdapterState, due: Instant) {
        self.pending.push(PendingEvent {
            due,
            event: EventRecord::with_field(
                handle.callback_id.clone(),
                handle.channel.clone(),
                ADAPTER_STATE_FIELD,
                state.as_str(),
            ),
        });
    }
}

/// Simulated UWB-capable Android device
///
/// # Example
///
/// ```rust,ignore
/// let device = MockUwbDevice::new().without_country_code();
/// assert!(!device.is_uwb_enabled().await?);
/// device.force_country_code("US").await?;
/// assert!(device.is_uwb_enabled().await?);
/// ```
pub struct MockUwbDevice {
    state: Arc<Mutex<MockState>>,
    event_latency: Duration,
    settings_latency: Duration,
    boot_time: Duration,
    build_id: String,
    native_country_code: Option<String>,
}

impl MockUwbDevice {
    /// Create a device with UWB on, airplane mode off and a country code
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                uwb_toggle: true,
                airplane_mode: false,
                airplane_request: None,
                country_code: Some("US".to_string()),
                adapter_state: AdapterState::Inactive,
                registrations: HashMap::new(),
                pending: Vec::new(),
                registered: Vec::new(),
                unregistered: Vec::new(),
                drain_failures: 0,
                peers: HashSet::new(),
                boot_count: 0,
                next_callback: 0,
            })),
            event_latency: Duration::from_millis(50),
            settings_latency: Duration::from_millis(200),
            boot_time: Duration::from_secs(20),
            build_id: "AP2A.240805.005".to_string(),
            native_country_code: Some("US".to_string()),
        }
    }

    /// Set the initial user toggle
    pub fn with_uwb_enabled(self, enabled: bool) -> Self {
        self.configure(|state| state.uwb_toggle = enabled)
    }

    /// Start with airplane mode already on
    pub fn with_airplane_mode(self, enabled: bool) -> Self {
        self.configure(|state| state.airplane_mode = enabled)
    }

    /// Device that never learns a country code on its own (no SIM, no location)
    pub fn without_country_code(mut self) -> Self {
        self.native_country_code = None;
        self.configure(|state| state.country_code = None)
    }

    /// Delay between a state change and its callback events
    pub fn with_event_latency(mut self, latency: Duration) -> Self {
        self.event_latency = latency;
        self
    }

    /// Delay before an airplane mode request shows up in the setting
    pub fn with_settings_latency(mut self, latency: Duration) -> Self {
        self.settings_latency = latency;
        self
    }

    /// Time a reboot takes
    pub fn with_boot_time(mut self, boot_time: Duration) -> Self {
        self.boot_time = boot_time;
        self
    }

    /// Platform build id reported by the device
    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = build_id.into();
        self
    }

    /// Make the next `count` drains fail as if the RPC broke
    pub async fn fail_next_drains(&self, count: u32) {
        self.state.lock().await.drain_failures = count;
    }

    /// Let ranging session `session_key` report a measurement for `peer_addr`
    pub async fn add_peer(&self, session_key: &str, peer_addr: &[u8]) {
        self.state
            .lock()
            .await
            .peers
            .insert((session_key.to_string(), peer_addr.to_vec()));
    }

    /// Queue an adapter state event for one registration, deliverable immediately
    pub async fn post_state_event(&self, key: &str, state: AdapterState) -> Result<()> {
        let mut guard = self.state.lock().await;
        let handle = guard
            .registrations
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("No callback registered under '{key}'"))?;
        guard.post(&handle, state, Instant::now());
        Ok(())
    }

    /// Number of times `key` has been unregistered
    pub async fn unregister_count(&self, key: &str) -> usize {
        self.state
            .lock()
            .await
            .unregistered
            .iter()
            .filter(|k| k.as_str() == key)
            .count()
    }

    /// Keys registered so far, in order
    pub async fn registered_keys(&self) -> Vec<String> {
        self.state.lock().await.registered.clone()
    }

    /// Number of live callback registrations
    pub async fn active_registrations(&self) -> usize {
        self.state.lock().await.registrations.len()
    }

    /// Number of completed reboots
    pub async fn boot_count(&self) -> u32 {
        self.state.lock().await.boot_count
    }

    /// Country code currently in effect
    pub async fn country_code(&self) -> Option<String> {
        self.state.lock().await.country_code.clone()
    }

    /// Edit the initial state; builders run before the state is shared
    fn configure(mut self, edit: impl FnOnce(&mut MockState)) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            let state = state.get_mut();
            edit(state);
            state.adapter_state = state.effective_state();
        }
        self
    }

    async fn settled(&self) -> tokio::sync::MutexGuard<'_, MockState> {
        let mut guard = self.state.lock().await;
        guard.settle(Instant::now(), self.event_latency);
        guard
    }
}

impl Default for MockUwbDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallbackSource for MockUwbDevice {
    async fn register_callback(&self, channel: &str, key: &str) -> Result<SubscriptionHandle> {
        if channel != ADAPTER_STATE_CHANNEL {
            anyhow::bail!("MockUwbDevice: unsupported callback channel '{channel}'");
        }

        let mut state = self.settled().await;
        state.next_callback += 1;
        let handle = SubscriptionHandle {
            channel: channel.to_string(),
            key: key.to_string(),
            callback_id: format!("{}-{}", state.boot_count + 1, state.next_callback),
        };
        state.registrations.insert(key.to_string(), handle.clone());
        state.registered.push(key.to_string());

        let current = state.adapter_state;
        state.post(&handle, current, Instant::now() + self.event_latency);
        debug!(key, callback_id = %handle.callback_id, "MockUwbDevice: callback registered");
        Ok(handle)
    }

    async fn drain_events(
        &self,
        handle: &SubscriptionHandle,
        event_name: &str,
    ) -> Result<Vec<EventRecord>> {
        let mut state = self.settled().await;
        if state.drain_failures > 0 {
            state.drain_failures -= 1;
            anyhow::bail!("MockUwbDevice: eventGetAll failed (injected)");
        }

        let now = Instant::now();
        let (ready, waiting): (Vec<PendingEvent>, Vec<PendingEvent>) =
            std::mem::take(&mut state.pending).into_iter().partition(|p| {
                p.due <= now
                    && p.event.callback_id == handle.callback_id
                    && p.event.name == event_name
            });
        state.pending = waiting;
        Ok(ready.into_iter().map(|p| p.event).collect())
    }

    async fn unregister_callback(&self, handle: &SubscriptionHandle) -> Result<()> {
        self.settled().await.unregister(handle);
        Ok(())
    }

    fn release_detached(&self, handle: SubscriptionHandle) {
        let state = Arc::clone(&self.state);
        let event_latency = self.event_latency;
        spawn_release(handle.key.clone(), async move {
            let mut state = state.lock().await;
            state.settle(Instant::now(), event_latency);
            state.unregister(&handle);
            Ok(())
        });
    }
}

#[async_trait]
impl UwbAdapter for MockUwbDevice {
    async fn is_uwb_enabled(&self) -> Result<bool> {
        Ok(self.settled().await.adapter_state.is_enabled())
    }

    async fn adapter_state(&self) -> Result<AdapterState> {
        Ok(self.settled().await.adapter_state)
    }

    async fn set_uwb_enabled(&self, enabled: bool) -> Result<()> {
        let mut state = self.settled().await;
        state.uwb_toggle = enabled;
        state.recompute(Instant::now(), self.event_latency);
        Ok(())
    }

    async fn build_id(&self) -> Result<String> {
        Ok(self.build_id.clone())
    }
}

#[async_trait]
impl AirplaneModeControl for MockUwbDevice {
    async fn set_airplane_mode(&self, enabled: bool) -> Result<()> {
        let mut state = self.settled().await;
        state.airplane_request = Some((enabled, Instant::now() + self.settings_latency));
        Ok(())
    }

    async fn airplane_mode(&self) -> Result<bool> {
        Ok(self.settled().await.airplane_mode)
    }
}

#[async_trait]
impl Rebootable for MockUwbDevice {
    async fn reboot(&self) -> Result<()> {
        info!(boot_time = ?self.boot_time, "MockUwbDevice: rebooting");
        {
            let mut state = self.settled().await;
            state.registrations.clear();
            state.pending.clear();
        }

        sleep(self.boot_time).await;

        let mut state = self.settled().await;
        state.boot_count += 1;
        state.country_code = self.native_country_code.clone();
        state.adapter_state = state.effective_state();
        info!(state = %state.adapter_state, "MockUwbDevice: boot completed");
        Ok(())
    }
}

#[async_trait]
impl CountryCodeControl for MockUwbDevice {
    async fn force_country_code(&self, country_code: &str) -> Result<()> {
        let mut state = self.settled().await;
        state.country_code = Some(country_code.to_string());
        state.recompute(Instant::now(), self.event_latency);
        Ok(())
    }
}

#[async_trait]
impl PeerRanging for MockUwbDevice {
    async fn is_uwb_peer_found(&self, session_key: &str, peer_addr: &[u8]) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .await
            .peers
            .contains(&(session_key.to_string(), peer_addr.to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain_states(device: &MockUwbDevice, handle: &SubscriptionHandle) -> Vec<String> {
        device
            .drain_events(handle, ADAPTER_STATE_CHANNEL)
            .await
            .unwrap()
            .iter()
            .filter_map(|e| e.field(ADAPTER_STATE_FIELD).map(str::to_string))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_posts_current_state() {
        let device = MockUwbDevice::new();
        let handle = device
            .register_callback(ADAPTER_STATE_CHANNEL, "k1")
            .await
            .unwrap();

        // Not deliverable before the latency elapses
        assert!(drain_states(&device, &handle).await.is_empty());

        sleep(Duration::from_millis(60)).await;
        assert_eq!(drain_states(&device, &handle).await, vec!["Inactive"]);
        // Drained events are gone
        assert!(drain_states(&device, &handle).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_posts_to_all_registrations() {
        let device = MockUwbDevice::new().with_event_latency(Duration::ZERO);
        let a = device.register_callback(ADAPTER_STATE_CHANNEL, "a").await.unwrap();
        let b = device.register_callback(ADAPTER_STATE_CHANNEL, "b").await.unwrap();

        device.set_uwb_enabled(false).await.unwrap();
        device.set_uwb_enabled(true).await.unwrap();

        assert_eq!(drain_states(&device, &a).await, vec!["Inactive", "Disabled", "Inactive"]);
        assert_eq!(drain_states(&device, &b).await, vec!["Inactive", "Disabled", "Inactive"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_airplane_mode_forces_disabled() {
        let device = MockUwbDevice::new();
        device.set_airplane_mode(true).await.unwrap();
        assert!(!device.airplane_mode().await.unwrap());

        sleep(Duration::from_millis(250)).await;
        assert!(device.airplane_mode().await.unwrap());
        assert_eq!(device.adapter_state().await.unwrap(), AdapterState::Disabled);

        // Toggle is remembered but the radio stays off
        device.set_uwb_enabled(true).await.unwrap();
        assert!(!device.is_uwb_enabled().await.unwrap());

        device.set_airplane_mode(false).await.unwrap();
        sleep(Duration::from_millis(250)).await;
        assert!(device.is_uwb_enabled().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_country_code_required() {
        let device = MockUwbDevice::new().without_country_code();
        assert!(!device.is_uwb_enabled().await.unwrap());

        device.force_country_code("US").await.unwrap();
        assert!(device.is_uwb_enabled().await.unwrap());
        assert_eq!(device.country_code().await.as_deref(), Some("US"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_keeps_toggle_and_drops_registrations() {
        let device = MockUwbDevice::new()
            .with_uwb_enabled(false)
            .with_boot_time(Duration::from_secs(5));
        device.register_callback(ADAPTER_STATE_CHANNEL, "k").await.unwrap();

        let start = Instant::now();
        device.reboot().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));

        assert_eq!(device.boot_count().await, 1);
        assert_eq!(device.active_registrations().await, 0);
        assert!(!device.is_uwb_enabled().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_country_code_lost_on_reboot() {
        let device = MockUwbDevice::new()
            .without_country_code()
            .with_boot_time(Duration::from_secs(1));
        device.force_country_code("US").await.unwrap();
        device.reboot().await.unwrap();
        assert_eq!(device.country_code().await, None);
        assert!(!device.is_uwb_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_unregister_unknown_key_is_noop() {
        let device = MockUwbDevice::new();
        let handle = SubscriptionHandle {
            channel: ADAPTER_STATE_CHANNEL.to_string(),
            key: "ghost".to_string(),
            callback_id: "0-0".to_string(),
        };
        device.unregister_callback(&handle).await.unwrap();
        assert_eq!(device.unregister_count("ghost").await, 1);
    }

    #[tokio::test]
    async fn test_injected_drain_failure() {
        let device = MockUwbDevice::new();
        let handle = device.register_callback(ADAPTER_STATE_CHANNEL, "k").await.unwrap();
        device.fail_next_drains(1).await;
        assert!(device.drain_events(&handle, ADAPTER_STATE_CHANNEL).await.is_err());
        assert!(device.drain_events(&handle, ADAPTER_STATE_CHANNEL).await.is_ok());
    }

    #[test]
    fn test_unsupported_channel() {
        let device = MockUwbDevice::new();
        tokio_test::assert_err!(tokio_test::block_on(
            device.register_callback("RangingSessionCallback", "k")
        ));
    }

    #[test]
    fn test_peer_lookup() {
        let device = MockUwbDevice::new();
        tokio_test::block_on(async {
            device.add_peer("session-0", &[0x12, 0x34]).await;
            assert!(device.is_uwb_peer_found("session-0", &[0x12, 0x34]).await.unwrap());
            assert!(!device.is_uwb_peer_found("session-0", &[0x56, 0x78]).await.unwrap());
        });
    }
}

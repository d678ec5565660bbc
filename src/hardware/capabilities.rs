//! Device Capabilities
//!
//! Fine-grained capability traits for the device under test. Helpers ask only
//! for what they use: the callback wait needs a `CallbackSource`, the airplane
//! mode helper needs `AirplaneModeControl`, and so on. The suite needs all of
//! them and takes a `UwbDevice`.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! Remote-call failures are returned as errors and never retried here.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn radio_off_in_flight<D>(device: &D) -> Result<bool>
//! where
//!     D: UwbAdapter + AirplaneModeControl,
//! {
//!     device.set_airplane_mode(true).await?;
//!     Ok(!device.is_uwb_enabled().await?)
//! }
//! ```

use super::{AdapterState, EventRecord, SubscriptionHandle};
use anyhow::Result;
use async_trait::async_trait;

/// Capability: Named Callback Subscriptions
///
/// Devices that buffer asynchronous events per registration.
///
/// # Contract
/// - `register_callback` creates a remote listener; the caller owns it
/// - `drain_events` is non-blocking and returns the events buffered since the
///   previous drain, in arrival order
/// - `unregister_callback` destroys the remote listener; unknown keys are a no-op
/// - `release_detached` must not block: it is called from `Drop`
#[async_trait]
pub trait CallbackSource: Send + Sync {
    /// Register a listener on `channel` under the caller-chosen `key`
    async fn register_callback(&self, channel: &str, key: &str) -> Result<SubscriptionHandle>;

    /// Take every event buffered for `handle` with the given event name
    async fn drain_events(
        &self,
        handle: &SubscriptionHandle,
        event_name: &str,
    ) -> Result<Vec<EventRecord>>;

    /// Remove the listener behind `handle`
    async fn unregister_callback(&self, handle: &SubscriptionHandle) -> Result<()>;

    /// Schedule removal of the listener behind `handle` and return immediately
    ///
    /// Used when a wait is cancelled before it could unregister.
    fn release_detached(&self, handle: SubscriptionHandle);
}

/// Capability: UWB Adapter Control
#[async_trait]
pub trait UwbAdapter: Send + Sync {
    /// Whether the platform reports UWB as enabled
    async fn is_uwb_enabled(&self) -> Result<bool>;

    /// Raw adapter state
    async fn adapter_state(&self) -> Result<AdapterState>;

    /// Flip the user-facing UWB toggle
    ///
    /// Returns once the request is accepted; the adapter state follows
    /// asynchronously and is observed through callbacks.
    async fn set_uwb_enabled(&self, enabled: bool) -> Result<()>;

    /// Platform build id (e.g. "AP2A.240805.005")
    async fn build_id(&self) -> Result<String>;
}

/// Capability: Airplane Mode
#[async_trait]
pub trait AirplaneModeControl: Send + Sync {
    /// Request airplane mode on or off
    async fn set_airplane_mode(&self, enabled: bool) -> Result<()>;

    /// Current airplane mode setting
    async fn airplane_mode(&self) -> Result<bool>;
}

/// Capability: Reboot
#[async_trait]
pub trait Rebootable: Send + Sync {
    /// Reboot and return once the device is usable again
    ///
    /// Every callback registration is lost across a reboot.
    async fn reboot(&self) -> Result<()>;
}

/// Capability: Regulatory Country Code
#[async_trait]
pub trait CountryCodeControl: Send + Sync {
    /// Force the UWB country code (test-only shell interface)
    async fn force_country_code(&self, country_code: &str) -> Result<()>;
}

/// Capability: Ranging Peer Lookup
#[async_trait]
pub trait PeerRanging: Send + Sync {
    /// Whether the ranging session `session_key` has a measurement for `peer_addr`
    async fn is_uwb_peer_found(&self, session_key: &str, peer_addr: &[u8]) -> Result<bool>;
}

/// Everything the UwbManager suite drives.
pub trait UwbDevice:
    CallbackSource
    + UwbAdapter
    + AirplaneModeControl
    + Rebootable
    + CountryCodeControl
    + PeerRanging
{
}

impl<T> UwbDevice for T where
    T: CallbackSource
        + UwbAdapter
        + AirplaneModeControl
        + Rebootable
        + CountryCodeControl
        + PeerRanging
{
}

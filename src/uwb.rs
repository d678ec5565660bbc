//! UWB verification helpers
//!
//! The building blocks the suite is written in: flip the radio and check the
//! adapter state callback, drive airplane mode until the setting converges,
//! bring the adapter up after a reboot, find a ranging peer.
//!
//! Every helper that waits for an adapter state callback accepts an optional
//! subscription. With `None` a throwaway subscription is registered and released
//! inside the call; with `Some(handle)` the caller's subscription is drained and
//! left registered.

use crate::asserts::assert_true;
use crate::hardware::{
    AdapterState, AirplaneModeControl, CallbackSource, CountryCodeControl, PeerRanging,
    SubscriptionHandle, UwbAdapter, ADAPTER_STATE_CHANNEL, ADAPTER_STATE_FIELD,
};
use crate::polling::{wait_for_event, wait_for_state, with_subscription, PollSettings};
use anyhow::Result;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Wait for an adapter state callback reporting `expected`.
///
/// Returns `Ok(false)` if it does not arrive within `settings.timeout`.
pub async fn verify_uwb_state_callback<D>(
    device: &D,
    expected: AdapterState,
    handle: Option<&SubscriptionHandle>,
    settings: PollSettings,
) -> Result<bool>
where
    D: CallbackSource + ?Sized,
{
    let start = Instant::now();
    let received = match handle {
        Some(handle) => {
            wait_for_event(device, handle, ADAPTER_STATE_FIELD, expected.as_str(), settings)
                .await?
        }
        None => {
            with_subscription(device, ADAPTER_STATE_CHANNEL, move |handle| async move {
                wait_for_event(
                    device,
                    &handle,
                    ADAPTER_STATE_FIELD,
                    expected.as_str(),
                    settings,
                )
                .await
            })
            .await?
        }
    };

    if received {
        debug!(
            "Received the '{}' callback in {:.2}s",
            expected,
            start.elapsed().as_secs_f64()
        );
    }
    Ok(received)
}

/// Current UWB state, `true` if enabled.
///
/// Android S builds predate `isUwbEnabled`, so the adapter state is used there.
pub async fn get_uwb_state<D>(device: &D) -> Result<bool>
where
    D: UwbAdapter + ?Sized,
{
    let build_id = device.build_id().await?;
    if build_id.starts_with('S') {
        Ok(device.adapter_state().await?.is_enabled())
    } else {
        device.is_uwb_enabled().await
    }
}

/// Turn UWB on or off and require the matching callback.
///
/// Enabling expects `Inactive`, disabling expects `Disabled`.
pub async fn set_uwb_state_and_verify<D>(
    device: &D,
    enabled: bool,
    handle: Option<&SubscriptionHandle>,
    settings: PollSettings,
) -> Result<()>
where
    D: UwbAdapter + CallbackSource + ?Sized,
{
    device.set_uwb_enabled(enabled).await?;
    let expected = if enabled {
        AdapterState::Inactive
    } else {
        AdapterState::Disabled
    };
    let received = verify_uwb_state_callback(device, expected, handle, settings).await?;
    let verb = if enabled { "enabled" } else { "disabled" };
    assert_true(received, format!("Uwb is not {verb}"))?;
    Ok(())
}

/// Current airplane mode setting
pub async fn get_airplane_mode<D>(device: &D) -> Result<bool>
where
    D: AirplaneModeControl + ?Sized,
{
    device.airplane_mode().await
}

/// Set airplane mode and wait until the setting reads back.
///
/// # Errors
/// `HilError::Timeout` if the setting does not converge within `settings.timeout`.
pub async fn set_airplane_mode<D>(device: &D, enabled: bool, settings: PollSettings) -> Result<()>
where
    D: AirplaneModeControl + ?Sized,
{
    device.set_airplane_mode(enabled).await?;
    wait_for_state(
        &format!("airplane mode set to {enabled}"),
        || get_airplane_mode(device),
        enabled,
        settings,
    )
    .await
}

/// Make sure the adapter can come up, forcing a country code if it cannot.
///
/// Without a regulatory country code the platform keeps UWB disabled. The adapter
/// is given `settings.timeout` to report `Inactive` on its own; if it does not,
/// `country_code` is forced through the test-only shell interface (a failure to
/// do so is only logged) and the adapter must then report `Inactive`.
pub async fn initialize_uwb_country_code_if_not_set<D>(
    device: &D,
    country_code: &str,
    handle: Option<&SubscriptionHandle>,
    settings: PollSettings,
) -> Result<()>
where
    D: CallbackSource + CountryCodeControl + ?Sized,
{
    if verify_uwb_state_callback(device, AdapterState::Inactive, handle, settings).await? {
        return Ok(());
    }

    info!(country_code, "UWB not enabled, forcing country code");
    if let Err(err) = device.force_country_code(country_code).await {
        warn!(error = %err, "Unable to force country code");
    }

    let enabled =
        verify_uwb_state_callback(device, AdapterState::Inactive, handle, settings).await?;
    assert_true(enabled, "Uwb is not enabled")?;
    Ok(())
}

/// Wait until ranging session `session_key` reports `peer_addr`.
pub async fn verify_peer_found<D>(
    device: &D,
    session_key: &str,
    peer_addr: &[u8],
    settings: PollSettings,
) -> Result<()>
where
    D: PeerRanging + ?Sized,
{
    info!(?peer_addr, session_key, "Looking for UWB peer");
    let start = Instant::now();
    wait_for_state(
        &format!("UWB peer {peer_addr:02x?} in session {session_key}"),
        || device.is_uwb_peer_found(session_key, peer_addr),
        true,
        settings,
    )
    .await?;
    info!(
        "Peer {:02x?} found in {:.2} seconds",
        peer_addr,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HilError;
    use crate::hardware::MockUwbDevice;
    use tokio::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_get_uwb_state_uses_adapter_state_on_s_builds() {
        let device = MockUwbDevice::new().with_build_id("SP1A.210812.016");
        assert!(get_uwb_state(&device).await.unwrap());

        let device = MockUwbDevice::new()
            .with_build_id("SP1A.210812.016")
            .with_uwb_enabled(false);
        assert!(!get_uwb_state(&device).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_uwb_state_and_verify_round_trip() {
        let device = MockUwbDevice::new();
        set_uwb_state_and_verify(&device, false, None, PollSettings::events())
            .await
            .unwrap();
        assert!(!get_uwb_state(&device).await.unwrap());

        set_uwb_state_and_verify(&device, true, None, PollSettings::events())
            .await
            .unwrap();
        assert!(get_uwb_state(&device).await.unwrap());

        // Both throwaway subscriptions were released
        assert_eq!(device.active_registrations().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_under_airplane_mode_fails_assertion() {
        let device = MockUwbDevice::new()
            .with_uwb_enabled(false)
            .with_airplane_mode(true);
        let err = set_uwb_state_and_verify(&device, true, None, PollSettings::events())
            .await
            .unwrap_err();
        let hil = err.downcast_ref::<HilError>().unwrap();
        assert!(matches!(hil, HilError::AssertionFailed(msg) if msg == "Uwb is not enabled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_airplane_mode_converges() {
        let device = MockUwbDevice::new();
        let start = Instant::now();
        set_airplane_mode(&device, true, PollSettings::states())
            .await
            .unwrap();
        // 200 ms settings latency, first read after 500 ms
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500) && elapsed < Duration::from_millis(600));
        assert!(get_airplane_mode(&device).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_airplane_mode_times_out() {
        let device = MockUwbDevice::new().with_settings_latency(Duration::from_secs(10));
        let err = set_airplane_mode(&device, true, PollSettings::states())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<HilError>().unwrap().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_country_code_already_set_returns_quickly() {
        let device = MockUwbDevice::new();
        let start = Instant::now();
        initialize_uwb_country_code_if_not_set(
            &device,
            "US",
            None,
            PollSettings::events().with_timeout(Duration::from_secs(120)),
        )
        .await
        .unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_country_code_forced_when_missing() {
        let device = MockUwbDevice::new().without_country_code();
        initialize_uwb_country_code_if_not_set(
            &device,
            "JP",
            None,
            PollSettings::events().with_timeout(Duration::from_secs(120)),
        )
        .await
        .unwrap();
        assert_eq!(device.country_code().await.as_deref(), Some("JP"));
        assert!(device.is_uwb_enabled().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_country_code_cannot_help_when_toggle_off() {
        let device = MockUwbDevice::new()
            .without_country_code()
            .with_uwb_enabled(false);
        let err = initialize_uwb_country_code_if_not_set(
            &device,
            "US",
            None,
            PollSettings::events().with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();
        assert!(err.downcast_ref::<HilError>().unwrap().is_assertion());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_peer_found() {
        let device = MockUwbDevice::new();
        device.add_peer("session-0", &[0x0a, 0x0b]).await;
        verify_peer_found(&device, "session-0", &[0x0a, 0x0b], PollSettings::states())
            .await
            .unwrap();

        let err = verify_peer_found(&device, "session-0", &[0x0c], PollSettings::states())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<HilError>().unwrap().is_timeout());
    }
}

//! Test bodies of the UWB manager suite

use super::{TestContext, UwbTestCase};
use crate::asserts::{assert_equal, assert_true};
use crate::hardware::{AdapterState, UwbDevice};
use crate::uwb::{
    get_uwb_state, initialize_uwb_country_code_if_not_set, set_airplane_mode,
    set_uwb_state_and_verify, verify_uwb_state_callback,
};
use anyhow::Result;
use tracing::info;

impl UwbTestCase {
    /// Run the test body. The fixture has already enabled UWB.
    pub(crate) async fn run<D>(self, ctx: &TestContext<'_, D>) -> Result<()>
    where
        D: UwbDevice + ?Sized,
    {
        match self {
            UwbTestCase::ToggleUwbState => toggle_uwb_state(ctx).await,
            UwbTestCase::EnableUwbState => enable_uwb_state(ctx).await,
            UwbTestCase::UwbStateAfterRebootWithUwbOff => uwb_state_after_reboot(ctx, false).await,
            UwbTestCase::UwbStateAfterRebootWithUwbOn => uwb_state_after_reboot(ctx, true).await,
            UwbTestCase::UwbStateWithAirplaneModeToggle => {
                uwb_state_with_airplane_mode_toggle(ctx).await
            }
            UwbTestCase::UwbStateOffWithAirplaneModeToggle => {
                uwb_state_off_with_airplane_mode_toggle(ctx).await
            }
        }
    }
}

async fn toggle_uwb_state<D: UwbDevice + ?Sized>(ctx: &TestContext<'_, D>) -> Result<()> {
    set_uwb_state_and_verify(ctx.device, false, Some(ctx.handle), ctx.timing.callback()).await?;
    set_uwb_state_and_verify(ctx.device, true, Some(ctx.handle), ctx.timing.callback()).await
}

async fn enable_uwb_state<D: UwbDevice + ?Sized>(ctx: &TestContext<'_, D>) -> Result<()> {
    set_uwb_state_and_verify(ctx.device, true, Some(ctx.handle), ctx.timing.callback()).await
}

/// Set UWB to `state`, reboot and check the state survived.
///
/// The fixture subscription does not survive the reboot, so every wait here
/// uses its own subscription. A country code is only needed to bring the
/// adapter back up, so it is not forced when UWB was left off.
async fn uwb_state_after_reboot<D: UwbDevice + ?Sized>(
    ctx: &TestContext<'_, D>,
    state: bool,
) -> Result<()> {
    set_uwb_state_and_verify(ctx.device, state, None, ctx.timing.callback()).await?;

    info!("Rebooting device");
    ctx.device.reboot().await?;

    if state {
        initialize_uwb_country_code_if_not_set(
            ctx.device,
            ctx.country_code,
            None,
            ctx.timing.country_code(),
        )
        .await?;
    }

    let state_after_reboot = get_uwb_state(ctx.device).await?;
    assert_equal(
        state,
        state_after_reboot,
        format!("Uwb state before reboot: {state};  after reboot: {state_after_reboot}"),
    )?;
    Ok(())
}

/// Decide whether the adapter ended up in `expected`.
///
/// A callback is only required when the state was supposed to change. When it
/// was not, the callback wait still runs (so late events are consumed) but the
/// current state decides.
async fn verify_uwb_state_with_airplane_mode<D: UwbDevice + ?Sized>(
    ctx: &TestContext<'_, D>,
    prev_uwb_state: bool,
    expected_uwb_state: bool,
    event: AdapterState,
) -> Result<bool> {
    let callback_received =
        verify_uwb_state_callback(ctx.device, event, Some(ctx.handle), ctx.timing.callback())
            .await?;
    if prev_uwb_state == expected_uwb_state {
        return Ok(get_uwb_state(ctx.device).await? == expected_uwb_state);
    }
    Ok(callback_received)
}

async fn uwb_state_with_airplane_mode_toggle<D: UwbDevice + ?Sized>(
    ctx: &TestContext<'_, D>,
) -> Result<()> {
    // Airplane mode on, UWB goes off
    let uwb_state = get_uwb_state(ctx.device).await?;
    set_airplane_mode(ctx.device, true, ctx.timing.state()).await?;
    assert_true(
        verify_uwb_state_with_airplane_mode(ctx, uwb_state, false, AdapterState::Disabled).await?,
        "UWB is not disabled with airplane mode On.",
    )?;

    // Enabling under airplane mode has no effect
    let uwb_state = get_uwb_state(ctx.device).await?;
    ctx.device.set_uwb_enabled(true).await?;
    assert_true(
        verify_uwb_state_with_airplane_mode(ctx, uwb_state, false, AdapterState::Disabled).await?,
        "Enabling UWB with airplane mode On should not work.",
    )?;

    // Airplane mode off, UWB comes back
    let uwb_state = get_uwb_state(ctx.device).await?;
    set_airplane_mode(ctx.device, false, ctx.timing.state()).await?;
    assert_true(
        verify_uwb_state_with_airplane_mode(ctx, uwb_state, true, AdapterState::Inactive).await?,
        "UWB is not enabled with airplane mode Off.",
    )?;
    Ok(())
}

async fn uwb_state_off_with_airplane_mode_toggle<D: UwbDevice + ?Sized>(
    ctx: &TestContext<'_, D>,
) -> Result<()> {
    set_uwb_state_and_verify(ctx.device, false, Some(ctx.handle), ctx.timing.callback()).await?;

    let uwb_state = get_uwb_state(ctx.device).await?;
    set_airplane_mode(ctx.device, true, ctx.timing.state()).await?;
    assert_true(
        verify_uwb_state_with_airplane_mode(ctx, uwb_state, false, AdapterState::Disabled).await?,
        "UWB is not disabled with airplane mode On.",
    )?;

    let uwb_state = get_uwb_state(ctx.device).await?;
    set_airplane_mode(ctx.device, false, ctx.timing.state()).await?;
    assert_true(
        verify_uwb_state_with_airplane_mode(ctx, uwb_state, false, AdapterState::Disabled).await?,
        "UWB state: On, Expected state: Off",
    )?;

    // Leave UWB on for whatever runs next
    set_uwb_state_and_verify(ctx.device, true, None, ctx.timing.callback()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HilConfig;
    use crate::hardware::{AirplaneModeControl, CountryCodeControl, MockUwbDevice};
    use crate::suite::{TestOutcome, UwbManagerSuite};
    use tokio::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_every_case_passes_on_mock() {
        let device = MockUwbDevice::new().with_boot_time(Duration::from_secs(2));
        let suite = UwbManagerSuite::new(device, &HilConfig::default());

        for case in UwbTestCase::ALL {
            let result = suite.run_test(case).await;
            assert_eq!(result.outcome, TestOutcome::Passed, "{case}: {:?}", result.message);
        }
        assert_eq!(suite.device().boot_count().await, 2);
        assert!(!suite.device().airplane_mode().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_on_forces_missing_country_code() {
        let device = MockUwbDevice::new()
            .without_country_code()
            .with_boot_time(Duration::from_secs(2));
        device.force_country_code("US").await.unwrap();
        let suite = UwbManagerSuite::new(device, &HilConfig::default());

        let result = suite.run_test(UwbTestCase::UwbStateAfterRebootWithUwbOn).await;
        assert_eq!(result.outcome, TestOutcome::Passed, "{:?}", result.message);
        assert_eq!(suite.device().country_code().await.as_deref(), Some("US"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_off_does_not_need_country_code() {
        let device = MockUwbDevice::new()
            .without_country_code()
            .with_boot_time(Duration::from_secs(2));
        device.force_country_code("US").await.unwrap();
        let suite = UwbManagerSuite::new(device, &HilConfig::default());

        let result = suite.run_test(UwbTestCase::UwbStateAfterRebootWithUwbOff).await;
        assert_eq!(result.outcome, TestOutcome::Passed, "{:?}", result.message);
        assert_eq!(suite.device().country_code().await, None);
    }
}

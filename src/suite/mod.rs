//! UWB Manager Test Suite
//!
//! Platform-level checks of the UWB adapter state machine, run against any
//! [`UwbDevice`]:
//!
//! | Test | Checks |
//! |------|--------|
//! | `test_toggle_uwb_state` | disable then enable, both confirmed by callback |
//! | `test_enable_uwb_state` | enable confirmed by callback |
//! | `test_uwb_state_after_reboot_with_uwb_off` | off survives a reboot |
//! | `test_uwb_state_after_reboot_with_uwb_on` | on survives a reboot |
//! | `test_uwb_state_with_airplane_mode_toggle` | airplane mode forces UWB off and restores it |
//! | `test_uwb_state_off_with_airplane_mode_toggle` | UWB left off stays off across airplane mode |
//!
//! # Lifecycle
//!
//! Every test runs inside its own adapter state subscription:
//!
//! ```text
//! register callback ─► setup (enable UWB if off) ─► body ─► teardown (airplane mode off) ─► unregister
//! ```
//!
//! The subscription is released even when the body fails or panics.

mod cases;
pub mod result;

pub use result::{SuiteResult, TestOutcome, TestResult};

use crate::config::{HilConfig, TimingConfig};
use crate::error::{HilError, HilResult};
use crate::hardware::{SubscriptionHandle, UwbDevice, ADAPTER_STATE_CHANNEL};
use crate::polling::with_subscription;
use crate::uwb::{get_uwb_state, set_airplane_mode, set_uwb_state_and_verify};
use anyhow::Result;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Name reported in suite results
pub const SUITE_NAME: &str = "UwbManagerTest";

// =============================================================================
// Test cases
// =============================================================================

/// One test of the suite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UwbTestCase {
    /// Disable then enable UWB
    ToggleUwbState,
    /// Enable UWB
    EnableUwbState,
    /// UWB off persists across reboot
    UwbStateAfterRebootWithUwbOff,
    /// UWB on persists across reboot
    UwbStateAfterRebootWithUwbOn,
    /// Airplane mode disables UWB and restores it
    UwbStateWithAirplaneModeToggle,
    /// UWB left off stays off through an airplane mode cycle
    UwbStateOffWithAirplaneModeToggle,
}

impl UwbTestCase {
    /// Every test, in declaration order
    pub const ALL: [UwbTestCase; 6] = [
        UwbTestCase::ToggleUwbState,
        UwbTestCase::EnableUwbState,
        UwbTestCase::UwbStateAfterRebootWithUwbOff,
        UwbTestCase::UwbStateAfterRebootWithUwbOn,
        UwbTestCase::UwbStateWithAirplaneModeToggle,
        UwbTestCase::UwbStateOffWithAirplaneModeToggle,
    ];

    /// Tests run when no selection is configured. The reboot tests are opt-in.
    pub const DEFAULT_SELECTION: [UwbTestCase; 3] = [
        UwbTestCase::ToggleUwbState,
        UwbTestCase::UwbStateWithAirplaneModeToggle,
        UwbTestCase::UwbStateOffWithAirplaneModeToggle,
    ];

    /// Test name as used in configuration and reports
    pub fn name(&self) -> &'static str {
        match self {
            UwbTestCase::ToggleUwbState => "test_toggle_uwb_state",
            UwbTestCase::EnableUwbState => "test_enable_uwb_state",
            UwbTestCase::UwbStateAfterRebootWithUwbOff => {
                "test_uwb_state_after_reboot_with_uwb_off"
            }
            UwbTestCase::UwbStateAfterRebootWithUwbOn => "test_uwb_state_after_reboot_with_uwb_on",
            UwbTestCase::UwbStateWithAirplaneModeToggle => {
                "test_uwb_state_with_airplane_mode_toggle"
            }
            UwbTestCase::UwbStateOffWithAirplaneModeToggle => {
                "test_uwb_state_off_with_airplane_mode_toggle"
            }
        }
    }

    /// One-line description for `uwb-hil list`
    pub fn description(&self) -> &'static str {
        match self {
            UwbTestCase::ToggleUwbState => "Disables and verifies UWB state",
            UwbTestCase::EnableUwbState => "Enables and verifies UWB state",
            UwbTestCase::UwbStateAfterRebootWithUwbOff => {
                "Sets UWB state to off and verifies it is persistent after reboot"
            }
            UwbTestCase::UwbStateAfterRebootWithUwbOn => {
                "Sets UWB state to on and verifies it is persistent after reboot"
            }
            UwbTestCase::UwbStateWithAirplaneModeToggle => {
                "Verifies UWB is disabled with airplane mode on"
            }
            UwbTestCase::UwbStateOffWithAirplaneModeToggle => {
                "Verifies UWB disabled state is persistent with airplane mode toggle"
            }
        }
    }

    /// Look up a test by name
    pub fn from_name(name: &str) -> HilResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|case| case.name() == name)
            .ok_or_else(|| HilError::UnknownTestCase(name.to_string()))
    }

    /// Whether the test reboots the device
    pub fn reboots(&self) -> bool {
        matches!(
            self,
            UwbTestCase::UwbStateAfterRebootWithUwbOff | UwbTestCase::UwbStateAfterRebootWithUwbOn
        )
    }
}

impl fmt::Display for UwbTestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Test context
// =============================================================================

/// What a running test has access to
pub struct TestContext<'a, D: UwbDevice + ?Sized> {
    /// Device under test
    pub device: &'a D,
    /// Adapter state subscription owned by the test fixture
    pub handle: &'a SubscriptionHandle,
    /// Polling budgets
    pub timing: &'a TimingConfig,
    /// Country code to force if the adapter cannot come up
    pub country_code: &'a str,
}

// =============================================================================
// Suite runner
// =============================================================================

/// Runs [`UwbTestCase`]s against one device
pub struct UwbManagerSuite<D: UwbDevice> {
    device: D,
    timing: TimingConfig,
    country_code: String,
}

impl<D: UwbDevice> UwbManagerSuite<D> {
    /// Create a suite for `device` with timing and country code from `config`
    pub fn new(device: D, config: &HilConfig) -> Self {
        Self {
            device,
            timing: config.timing.clone(),
            country_code: config.suite.country_code.clone(),
        }
    }

    /// Device under test
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Give the device back
    pub fn into_device(self) -> D {
        self.device
    }

    /// Run `cases` in order and collect their results.
    ///
    /// A failing test does not stop the run.
    pub async fn run(&self, cases: &[UwbTestCase]) -> SuiteResult {
        let mut suite = SuiteResult::new(SUITE_NAME, Uuid::new_v4().to_string());
        info!(run_id = %suite.run_id, tests = cases.len(), "Starting {}", SUITE_NAME);

        suite.build_id = match self.device.build_id().await {
            Ok(build_id) => {
                info!(%build_id, "Device under test");
                Some(build_id)
            }
            Err(err) => {
                warn!(error = %err, "Unable to read build id");
                None
            }
        };

        for &case in cases {
            suite.push(self.run_test(case).await);
        }

        suite.finish();
        info!("{}", suite.summary());
        suite
    }

    /// Run one test, including its fixture.
    ///
    /// Assertion failures and convergence timeouts are reported as
    /// [`TestOutcome::Failed`]; device errors and panics as [`TestOutcome::Error`].
    pub async fn run_test(&self, case: UwbTestCase) -> TestResult {
        info!(test = %case, "Running");
        let start = Instant::now();
        let outcome = AssertUnwindSafe(self.execute(case)).catch_unwind().await;
        let duration = start.elapsed();

        let result = match outcome {
            Ok(Ok(())) => TestResult::passed(case.name(), duration),
            Ok(Err(err)) => TestResult::from_error(case.name(), duration, &err),
            Err(panic) => TestResult {
                name: case.name().to_string(),
                outcome: TestOutcome::Error,
                duration,
                message: Some(format!("panicked: {}", panic_message(panic.as_ref()))),
            },
        };

        match result.outcome {
            TestOutcome::Passed => info!(test = %case, duration_s = duration.as_secs_f64(), "PASS"),
            outcome => error!(
                test = %case,
                %outcome,
                message = result.message.as_deref().unwrap_or_default(),
                "Test did not pass"
            ),
        }
        result
    }

    async fn execute(&self, case: UwbTestCase) -> Result<()> {
        with_subscription(&self.device, ADAPTER_STATE_CHANNEL, |handle| async move {
            let ctx = TestContext {
                device: &self.device,
                handle: &handle,
                timing: &self.timing,
                country_code: &self.country_code,
            };

            let body = AssertUnwindSafe(async {
                setup(&ctx).await?;
                case.run(&ctx).await
            })
            .catch_unwind()
            .await;
            let teardown = set_airplane_mode(&self.device, false, self.timing.state()).await;

            match body {
                Err(panic) => std::panic::resume_unwind(panic),
                Ok(Err(err)) => {
                    if let Err(teardown_err) = teardown {
                        warn!(test = %case, error = %teardown_err, "Teardown failed");
                    }
                    Err(err)
                }
                Ok(Ok(())) => teardown,
            }
        })
        .await
    }
}

/// Make sure UWB is on before a test body runs
async fn setup<D: UwbDevice + ?Sized>(ctx: &TestContext<'_, D>) -> Result<()> {
    if !get_uwb_state(ctx.device).await? {
        set_uwb_state_and_verify(ctx.device, true, Some(ctx.handle), ctx.timing.callback())
            .await?;
    }
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockUwbDevice;

    #[test]
    fn test_names_round_trip() {
        for case in UwbTestCase::ALL {
            assert_eq!(UwbTestCase::from_name(case.name()).unwrap(), case);
            assert!(case.name().starts_with("test_"));
        }
        assert!(matches!(
            UwbTestCase::from_name("test_ranging"),
            Err(HilError::UnknownTestCase(name)) if name == "test_ranging"
        ));
    }

    #[test]
    fn test_default_selection_skips_reboots() {
        assert!(UwbTestCase::DEFAULT_SELECTION.iter().all(|case| !case.reboots()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixture_enables_uwb_and_releases_subscription() {
        let device = MockUwbDevice::new().with_uwb_enabled(false);
        let suite = UwbManagerSuite::new(device, &HilConfig::default());

        let result = suite.run_test(UwbTestCase::EnableUwbState).await;
        assert_eq!(result.outcome, TestOutcome::Passed, "{:?}", result.message);

        let keys = suite.device().registered_keys().await;
        assert_eq!(keys.len(), 1);
        assert_eq!(suite.device().unregister_count(&keys[0]).await, 1);
        assert_eq!(suite.device().active_registrations().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failure_is_reported() {
        // Airplane mode stays on, so setup cannot bring UWB up
        let device = MockUwbDevice::new()
            .with_uwb_enabled(false)
            .with_airplane_mode(true)
            .with_settings_latency(tokio::time::Duration::from_secs(60));
        let suite = UwbManagerSuite::new(device, &HilConfig::default());

        let result = suite.run_test(UwbTestCase::ToggleUwbState).await;
        assert_eq!(result.outcome, TestOutcome::Failed);
        assert!(result.message.unwrap().contains("Uwb is not enabled"));
        assert_eq!(suite.device().active_registrations().await, 0);
    }
}

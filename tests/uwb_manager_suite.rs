//! End-to-end runs of the UWB manager suite against the mock device

use tokio::time::Duration;
use uwb_hil::config::HilConfig;
use uwb_hil::hardware::MockUwbDevice;
use uwb_hil::suite::{SuiteResult, TestOutcome, UwbManagerSuite, UwbTestCase, SUITE_NAME};

#[test]
fn test_shipped_configuration_loads() {
    let config = HilConfig::load_from("config/uwb_hil.toml").unwrap();
    let tests = config.selected_tests().unwrap();
    assert_eq!(tests, UwbTestCase::DEFAULT_SELECTION.to_vec());
    assert_eq!(config.timing.boot_timeout, Duration::from_secs(300));
}

#[tokio::test(start_paused = true)]
async fn test_default_selection_passes() {
    let config = HilConfig::default();
    let suite = UwbManagerSuite::new(MockUwbDevice::new(), &config);

    let result = suite.run(&config.selected_tests().unwrap()).await;

    assert_eq!(result.suite, SUITE_NAME);
    assert_eq!(result.results.len(), 3);
    assert!(result.all_passed(), "{}", result.to_json().unwrap());
    assert_eq!(result.build_id.as_deref(), Some("AP2A.240805.005"));

    // Each test released its fixture subscription and nothing else is left behind
    assert_eq!(suite.device().active_registrations().await, 0);
    for key in suite.device().registered_keys().await {
        assert_eq!(suite.device().unregister_count(&key).await, 1, "{key}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_suite_with_reboots() {
    let config = HilConfig::default();
    let device = MockUwbDevice::new().with_boot_time(Duration::from_secs(30));
    let suite = UwbManagerSuite::new(device, &config);

    let result = suite.run(&UwbTestCase::ALL).await;

    assert!(result.all_passed(), "{}", result.to_json().unwrap());
    assert_eq!(suite.device().boot_count().await, 2);
    let names: Vec<&str> = result.results.iter().map(|r| r.name.as_str()).collect();
    let expected: Vec<&str> = UwbTestCase::ALL.iter().map(|c| c.name()).collect();
    assert_eq!(names, expected);
}

#[tokio::test(start_paused = true)]
async fn test_airplane_mode_that_never_settles_fails_and_run_continues() {
    let config = HilConfig::default();
    let device = MockUwbDevice::new().with_settings_latency(Duration::from_secs(60));
    let suite = UwbManagerSuite::new(device, &config);

    let result = suite
        .run(&[
            UwbTestCase::UwbStateWithAirplaneModeToggle,
            UwbTestCase::ToggleUwbState,
        ])
        .await;

    assert_eq!(result.results[0].outcome, TestOutcome::Failed);
    assert!(result.results[0]
        .message
        .as_deref()
        .unwrap()
        .contains("airplane mode"));
    assert_eq!(result.results[1].outcome, TestOutcome::Passed);
    assert_eq!(suite.device().active_registrations().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_result_json_round_trips() {
    let config = HilConfig::default();
    let suite = UwbManagerSuite::new(MockUwbDevice::new(), &config);
    let result = suite.run(&[UwbTestCase::EnableUwbState]).await;

    let json = result.to_json().unwrap();
    let parsed: SuiteResult = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.run_id, result.run_id);
    assert_eq!(parsed.results[0].name, "test_enable_uwb_state");
    assert_eq!(parsed.results[0].outcome, TestOutcome::Passed);
}

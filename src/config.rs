//! Harness configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/uwb_hil.toml` (base configuration)
//! 2. Environment variables prefixed with `UWB_HIL_`, nested keys separated by `__`
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! configuration that drives the mock device with the suite's standard timing.
//!
//! # Example
//! ```no_run
//! use uwb_hil::config::HilConfig;
//!
//! let config = HilConfig::load()?;
//! println!("Device: {:?}", config.device.serial);
//! # Ok::<(), uwb_hil::error::HilError>(())
//! ```
//!
//! Override a single value from the shell:
//! ```bash
//! UWB_HIL_TIMING__CALLBACK_TIMEOUT=5s uwb-hil run
//! ```

use crate::error::{HilError, HilResult};
use crate::polling::PollSettings;
use crate::suite::UwbTestCase;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/uwb_hil.toml";

/// Top-level harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HilConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Device connection settings
    pub device: DeviceConfig,
    /// Polling budgets
    pub timing: TimingConfig,
    /// Test selection
    pub suite: SuiteConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "UWB HIL".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Android device connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// adb serial of the device under test (None = the only attached device)
    pub serial: Option<String>,
    /// Path to the adb executable
    pub adb_path: String,
    /// Package of the UWB snippet APK
    pub snippet_package: String,
    /// Host the forwarded snippet port is reachable on
    pub snippet_host: String,
    /// Timeout for establishing the snippet session
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: None,
            adb_path: "adb".to_string(),
            snippet_package: "com.google.snippet.uwb".to_string(),
            snippet_host: "127.0.0.1".to_string(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Time budgets for the polling helpers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long to wait for an adapter state callback
    #[serde(with = "humantime_serde")]
    pub callback_timeout: Duration,
    /// Sleep between callback drains
    #[serde(with = "humantime_serde")]
    pub callback_poll_interval: Duration,
    /// How long a polled state may take to converge
    #[serde(with = "humantime_serde")]
    pub state_timeout: Duration,
    /// Sleep between state reads
    #[serde(with = "humantime_serde")]
    pub state_poll_interval: Duration,
    /// How long to wait for the adapter to come up after boot
    #[serde(with = "humantime_serde")]
    pub country_code_timeout: Duration,
    /// How long a reboot may take before the device reports boot completed
    #[serde(with = "humantime_serde")]
    pub boot_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            callback_timeout: Duration::from_secs(3),
            callback_poll_interval: Duration::from_millis(100),
            state_timeout: Duration::from_secs(3),
            state_poll_interval: Duration::from_millis(500),
            country_code_timeout: Duration::from_secs(120),
            boot_timeout: Duration::from_secs(300),
        }
    }
}

impl TimingConfig {
    /// Budget for adapter state callbacks
    pub fn callback(&self) -> PollSettings {
        PollSettings::new(self.callback_timeout, self.callback_poll_interval)
    }

    /// Budget for adapter state callbacks after a reboot
    pub fn country_code(&self) -> PollSettings {
        PollSettings::new(self.country_code_timeout, self.callback_poll_interval)
    }

    /// Budget for polled settings such as airplane mode
    pub fn state(&self) -> PollSettings {
        PollSettings::new(self.state_timeout, self.state_poll_interval)
    }
}

/// Test selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Test names to run, in order
    pub tests: Vec<String>,
    /// Country code forced when the adapter cannot come up on its own
    pub country_code: String,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            tests: UwbTestCase::DEFAULT_SELECTION
                .iter()
                .map(|case| case.name().to_string())
                .collect(),
            country_code: "US".to_string(),
        }
    }
}

impl HilConfig {
    /// Load configuration from `config/uwb_hil.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix `UWB_HIL_`
    /// Example: `UWB_HIL_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> HilResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> HilResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(HilConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("UWB_HIL_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> HilResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(HilError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(HilError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let budgets = [
            ("callback", self.timing.callback()),
            ("country_code", self.timing.country_code()),
            ("state", self.timing.state()),
        ];
        for (name, settings) in budgets {
            settings.validate().map_err(|msg| {
                HilError::Configuration(format!("timing.{name}: {msg}"))
            })?;
        }

        if self.timing.boot_timeout.is_zero() {
            return Err(HilError::Configuration(
                "timing.boot_timeout must be positive".to_string(),
            ));
        }

        for name in &self.suite.tests {
            UwbTestCase::from_name(name)?;
        }

        let code = &self.suite.country_code;
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(HilError::Configuration(format!(
                "Invalid country_code '{code}'. Must be two uppercase letters"
            )));
        }

        Ok(())
    }

    /// Resolve the configured test names into test cases
    pub fn selected_tests(&self) -> HilResult<Vec<UwbTestCase>> {
        self.suite
            .tests
            .iter()
            .map(|name| UwbTestCase::from_name(name))
            .collect()
    }
}

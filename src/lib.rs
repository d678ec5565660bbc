//! # UWB HIL Core Library
//!
//! Hardware-in-the-loop tests for the UWB adapter state machine of Android
//! devices. The same suite runs against a phone (over adb and the UWB snippet)
//! or against an in-process mock.
//!
//! ## Crate Structure
//!
//! - **`polling`**: The poll-with-timeout loop every verification goes through:
//!   event matching on callback subscriptions, state convergence on getters and
//!   scoped subscriptions that are always released.
//! - **`hardware`**: Capability traits for the device under test plus the mock and
//!   Android backends.
//! - **`uwb`**: UWB verification helpers (toggle and verify, airplane mode, country
//!   code initialization, peer discovery).
//! - **`asserts`**: Test assertions that fail with a typed error.
//! - **`suite`**: The UWB manager test suite, its fixture and structured results.
//! - **`config`**: Figment-based configuration (`config/uwb_hil.toml` + `UWB_HIL_*`).
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: The `HilError` enum.

pub mod asserts;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod polling;
pub mod suite;
pub mod uwb;

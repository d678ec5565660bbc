//! Custom error types for the harness.
//!
//! This module defines the primary error type, `HilError`, shared by the device
//! backends, the polling utilities and the test suite. Using the `thiserror`
//! crate, it gives every failure a distinct variant so callers (and the suite
//! runner in particular) can tell an assertion failure apart from a broken
//! device connection.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically a malformed TOML file or an
//!   environment override of the wrong type.
//! - **`Configuration`**: Semantic errors that pass parsing but make no sense, such as a
//!   poll interval longer than its timeout.
//! - **`Io`**: Wraps `std::io::Error` (sockets, spawning `adb`).
//! - **`Rpc`**: The snippet server answered a call with an error.
//! - **`Protocol`**: The snippet server answered with something that is not valid
//!   protocol (bad JSON, mismatched ids, closed connection).
//! - **`Adb`**: An `adb` invocation exited unsuccessfully.
//! - **`Timeout`**: A state never converged within its time budget.
//! - **`AssertionFailed`**: A test expectation did not hold. The suite reports these as
//!   failures rather than errors.
//!
//! Device capability traits return `anyhow::Result`; a `HilError` raised underneath
//! survives the conversion and can be recovered with `downcast_ref::<HilError>()`.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the harness error type.
pub type HilResult<T> = std::result::Result<T, HilError>;

/// Every failure the harness can report.
#[derive(Error, Debug)]
pub enum HilError {
    /// Configuration could not be parsed or merged.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but is not usable.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure talking to adb or the snippet socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote method raised an error.
    #[error("RPC '{method}' failed: {message}")]
    Rpc {
        /// Remote method name
        method: String,
        /// Error text reported by the device
        message: String,
    },

    /// The remote end violated the snippet protocol.
    #[error("Snippet protocol error: {0}")]
    Protocol(String),

    /// An adb command exited with a failure status.
    #[error("adb {command} failed: {stderr}")]
    Adb {
        /// The adb arguments that were run
        command: String,
        /// Captured standard error
        stderr: String,
    },

    /// A polled state did not converge in time.
    #[error("Timed out after {elapsed:?} waiting for {what}")]
    Timeout {
        /// Description of the awaited condition
        what: String,
        /// Time spent polling
        elapsed: Duration,
    },

    /// A test expectation did not hold.
    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    /// A test name that the suite does not define.
    #[error("Unknown test case '{0}'")]
    UnknownTestCase(String),
}

impl HilError {
    /// Whether this error is a failed expectation rather than a harness fault.
    pub fn is_assertion(&self) -> bool {
        matches!(self, HilError::AssertionFailed(_))
    }

    /// Whether this error is a convergence timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, HilError::Timeout { .. })
    }
}

impl From<serde_json::Error> for HilError {
    fn from(value: serde_json::Error) -> Self {
        HilError::Protocol(value.to_string())
    }
}

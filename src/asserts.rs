//! Test assertions
//!
//! Small helpers that turn a failed expectation into `HilError::AssertionFailed`,
//! so a test body can use `?` and the runner can tell a failed test from a
//! broken harness.

use crate::error::{HilError, HilResult};
use std::fmt::Debug;

/// Fail with `message` unless `condition` holds
pub fn assert_true(condition: bool, message: impl Into<String>) -> HilResult<()> {
    if condition {
        Ok(())
    } else {
        Err(fail(message))
    }
}

/// Fail unless `expected == actual`; the values are appended to `message`
pub fn assert_equal<T>(expected: T, actual: T, message: impl Into<String>) -> HilResult<()>
where
    T: PartialEq + Debug,
{
    if expected == actual {
        Ok(())
    } else {
        Err(fail(format!(
            "{} (expected {:?}, got {:?})",
            message.into(),
            expected,
            actual
        )))
    }
}

/// Build an assertion failure
pub fn fail(message: impl Into<String>) -> HilError {
    HilError::AssertionFailed(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_true() {
        assert!(assert_true(true, "unused").is_ok());
        let err = assert_true(false, "Uwb is not enabled").unwrap_err();
        assert_eq!(err.to_string(), "Assertion failed: Uwb is not enabled");
    }

    #[test]
    fn test_assert_equal_reports_values() {
        assert!(assert_equal(1, 1, "unused").is_ok());
        let err = assert_equal(true, false, "Uwb state after reboot").unwrap_err();
        assert!(err.is_assertion());
        assert!(err.to_string().contains("expected true, got false"));
    }
}

//! Suite Results
//!
//! Structured output of a suite run: one `TestResult` per test case and a
//! `SuiteResult` with totals and timing, serializable to JSON for CI.

use crate::error::HilError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// =============================================================================
// TestOutcome
// =============================================================================

/// How a single test ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    /// Every expectation held
    Passed,
    /// An expectation did not hold (assertion or convergence timeout)
    Failed,
    /// The harness or the device broke before the test could decide
    Error,
}

impl TestOutcome {
    /// Classify an error raised by a test body
    pub fn classify(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<HilError>() {
            Some(hil) if hil.is_assertion() || hil.is_timeout() => TestOutcome::Failed,
            _ => TestOutcome::Error,
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TestOutcome::Passed => "PASS",
            TestOutcome::Failed => "FAIL",
            TestOutcome::Error => "ERROR",
        };
        f.write_str(label)
    }
}

// =============================================================================
// TestResult
// =============================================================================

/// Result of one test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Test name
    pub name: String,

    /// How the test ended
    pub outcome: TestOutcome,

    /// Wall-clock duration including setup and teardown
    #[serde(with = "duration_serde")]
    pub duration: Duration,

    /// Failure or error message
    #[serde(default)]
    pub message: Option<String>,
}

impl TestResult {
    /// Create a passed result
    pub fn passed(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            outcome: TestOutcome::Passed,
            duration,
            message: None,
        }
    }

    /// Create a result from the error a test raised
    pub fn from_error(name: impl Into<String>, duration: Duration, err: &anyhow::Error) -> Self {
        Self {
            name: name.into(),
            outcome: TestOutcome::classify(err),
            duration,
            message: Some(format!("{err:#}")),
        }
    }

    /// Whether the test passed
    pub fn is_passed(&self) -> bool {
        self.outcome == TestOutcome::Passed
    }
}

// =============================================================================
// SuiteResult
// =============================================================================

/// Result of a suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    /// Suite name
    pub suite: String,

    /// Unique run ID
    pub run_id: String,

    /// Build id of the device under test, if it could be read
    #[serde(default)]
    pub build_id: Option<String>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished
    pub finished_at: DateTime<Utc>,

    /// Per-test results in execution order
    #[serde(default)]
    pub results: Vec<TestResult>,
}

impl SuiteResult {
    /// Create an empty result stamped with the current time
    pub fn new(suite: impl Into<String>, run_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            suite: suite.into(),
            run_id: run_id.into(),
            build_id: None,
            started_at: now,
            finished_at: now,
            results: Vec::new(),
        }
    }

    /// Append a test result
    pub fn push(&mut self, result: TestResult) {
        self.results.push(result);
    }

    /// Mark the run finished
    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    /// Number of results with `outcome`
    pub fn count(&self, outcome: TestOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    /// Whether every test passed (an empty run counts as passed)
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(TestResult::is_passed)
    }

    /// Total time spent in test cases
    pub fn total_duration(&self) -> Duration {
        self.results.iter().map(|r| r.duration).sum()
    }

    /// Generate a human-readable summary
    pub fn summary(&self) -> String {
        let status = if self.all_passed() { "SUCCESS" } else { "FAILED" };
        format!(
            "{} - {} - Requested {}, Passed {}, Failed {}, Error {} - Duration: {:.1}s",
            self.suite,
            status,
            self.results.len(),
            self.count(TestOutcome::Passed),
            self.count(TestOutcome::Failed),
            self.count(TestOutcome::Error),
            self.total_duration().as_secs_f64()
        )
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

// =============================================================================
// Tests
// =============================================================================

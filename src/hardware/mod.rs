//! Device Layer
//!
//! Everything the harness knows about the device under test:
//!
//! - [`capabilities`]: small async traits the helpers and the suite are written against
//! - [`mock`]: an in-process simulation of the UWB adapter for tests and dry runs
//! - [`android`]: a real Android device driven over adb and the UWB snippet
//!
//! The shared data types (subscription handles, event records, adapter state) live
//! here so both backends speak the same vocabulary.

pub mod adb;
pub mod android;
pub mod capabilities;
pub mod mock;
pub mod snippet;

pub use android::AndroidUwbDevice;
pub use capabilities::{
    AirplaneModeControl, CallbackSource, CountryCodeControl, PeerRanging, Rebootable,
    UwbAdapter, UwbDevice,
};
pub use mock::MockUwbDevice;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};

/// Callback channel carrying adapter state changes
pub const ADAPTER_STATE_CHANNEL: &str = "UwbAdapterStateCallback";

/// Event payload key holding the adapter state name
pub const ADAPTER_STATE_FIELD: &str = "uwbAdapterStateEvent";

/// Registration token for a remote callback.
///
/// `key` is the harness-chosen name used to unregister; `callback_id` is the id the
/// device stamps on every event it posts for this registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionHandle {
    /// Callback channel (also the event name)
    pub channel: String,
    /// Harness-side registration key
    pub key: String,
    /// Device-side callback id
    pub callback_id: String,
}

/// One event drained from a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Callback id the event was posted for
    #[serde(rename = "callbackId")]
    pub callback_id: String,
    /// Event name (the channel)
    pub name: String,
    /// Device timestamp in milliseconds
    #[serde(default)]
    pub time: i64,
    /// Event payload
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl EventRecord {
    /// Build an event with a single string field
    pub fn with_field(
        callback_id: impl Into<String>,
        name: impl Into<String>,
        field: &str,
        value: impl Into<String>,
    ) -> Self {
        let mut data = Map::new();
        data.insert(field.to_string(), Value::String(value.into()));
        Self {
            callback_id: callback_id.into(),
            name: name.into(),
            time: chrono::Utc::now().timestamp_millis(),
            data,
        }
    }

    /// String value of a payload field, if present and a string
    pub fn field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// UWB adapter state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterState {
    /// Radio off (user toggle, airplane mode or no country code)
    Disabled,
    /// Radio on, no active session
    Inactive,
    /// Radio on with at least one ranging session
    Active,
    /// Hardware idle power-down
    HwIdle,
}

impl AdapterState {
    /// Decode the platform integer. Unknown codes read as `Disabled`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Inactive,
            2 => Self::Active,
            3 => Self::HwIdle,
            _ => Self::Disabled,
        }
    }

    /// Platform integer for this state
    pub fn code(self) -> i64 {
        match self {
            Self::Disabled => 0,
            Self::Inactive => 1,
            Self::Active => 2,
            Self::HwIdle => 3,
        }
    }

    /// Name used in adapter state callback events
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "Disabled",
            Self::Inactive => "Inactive",
            Self::Active => "Active",
            Self::HwIdle => "HwIdle",
        }
    }

    /// Whether the radio counts as enabled
    pub fn is_enabled(self) -> bool {
        self != Self::Disabled
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run `release` for the registration `key` on the current Tokio runtime
/// without waiting for it.
///
/// Outside a runtime the listener cannot be removed and is only logged.
pub(crate) fn spawn_release<F>(key: String, release: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                match release.await {
                    Ok(()) => debug!(%key, "Background release finished"),
                    Err(err) => warn!(%key, error = %err, "Background release failed"),
                }
            });
        }
        Err(_) => warn!(%key, "No runtime available, callback left registered"),
    }
}

//! Android UWB Device
//!
//! Drives a real phone through adb and the UWB snippet APK. The snippet session
//! is opened on connect and reopened after every reboot.
//!
//! # Mapping
//!
//! | Capability | Device side |
//! |------------|-------------|
//! | `register_callback(channel, key)` | async RPC `register{channel}(key)` |
//! | `drain_events` | `eventGetAll(callbackId, channel)` |
//! | `unregister_callback` | RPC `unregister{channel}(key)` |
//! | `is_uwb_enabled` / `adapter_state` / `set_uwb_enabled` | `isUwbEnabled` / `getAdapterState` / `setUwbEnabled` |
//! | `set_airplane_mode` | RPC `setAirplaneMode` |
//! | `airplane_mode` | `settings get global airplane_mode_on` |
//! | `build_id` | `getprop ro.build.id` |
//! | `force_country_code` | `cmd uwb force-country-code enabled <cc>` |
//! | `is_uwb_peer_found` | RPC `isUwbPeerFound(key, [addr bytes])` |

use super::adb::{Adb, SnippetProcess};
use super::capabilities::{
    AirplaneModeControl, CallbackSource, CountryCodeControl, PeerRanging, Rebootable,
    UwbAdapter,
};
use super::snippet::SnippetClient;
use super::{spawn_release, AdapterState, EventRecord, SubscriptionHandle};
use crate::config::{DeviceConfig, HilConfig};
use crate::error::HilError;
use crate::polling::{wait_for_state, PollSettings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Interval between `sys.boot_completed` reads while a device boots
const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct SnippetSession {
    client: SnippetClient,
    process: SnippetProcess,
    host_port: u16,
}

/// Android device reached over adb
pub struct AndroidUwbDevice {
    adb: Adb,
    device: DeviceConfig,
    boot_timeout: Duration,
    session: Arc<Mutex<Option<SnippetSession>>>,
}

impl AndroidUwbDevice {
    /// Start the snippet on the configured device and open a session
    pub async fn connect(config: &HilConfig) -> Result<Self> {
        let device = Self {
            adb: Adb::from_config(&config.device),
            device: config.device.clone(),
            boot_timeout: config.timing.boot_timeout,
            session: Arc::new(Mutex::new(None)),
        };
        let session = device.open_session().await?;
        *device.session.lock().await = Some(session);
        Ok(device)
    }

    /// adb handle for the device
    pub fn adb(&self) -> &Adb {
        &self.adb
    }

    async fn open_session(&self) -> Result<SnippetSession> {
        let process = self
            .adb
            .start_snippet(&self.device.snippet_package, self.device.connect_timeout)
            .await
            .context("Failed to start UWB snippet")?;
        let host_port = self.adb.forward(process.device_port()).await?;
        let client = SnippetClient::connect(
            &self.device.snippet_host,
            host_port,
            self.device.connect_timeout,
        )
        .await
        .with_context(|| format!("Failed to connect to snippet on port {host_port}"))?;

        info!(
            serial = ?self.adb.serial(),
            host_port,
            uid = client.uid(),
            "Connected to UWB snippet"
        );
        Ok(SnippetSession {
            client,
            process,
            host_port,
        })
    }

    async fn close_session(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        drop(session.client);
        if let Err(err) = self.adb.remove_forward(session.host_port).await {
            warn!(error = %err, "Failed to remove port forward");
        }
        if let Err(err) = session.process.kill().await {
            warn!(error = %err, "Failed to stop snippet instrumentation");
        }
    }

    /// Stop the snippet and release the port forward
    pub async fn disconnect(&self) {
        self.close_session().await;
        if let Err(err) = self.adb.stop_snippet(&self.device.snippet_package).await {
            warn!(error = %err, "Failed to stop snippet server");
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let guard = self.session.lock().await;
        Ok(client(&guard)?.call(method, params).await?)
    }

    async fn call_bool(&self, method: &str) -> Result<bool> {
        let value = self.call(method, vec![]).await?;
        value.as_bool().ok_or_else(|| {
            HilError::Protocol(format!("{method} returned {value}, expected bool")).into()
        })
    }
}

/// Read the `airplane_mode_on` global setting as an integer flag
fn parse_airplane_mode(raw: &str) -> Result<bool, HilError> {
    raw.trim()
        .parse::<i64>()
        .map(|flag| flag != 0)
        .map_err(|_| {
            HilError::Protocol(format!(
                "airplane_mode_on is '{}', expected an integer",
                raw.trim()
            ))
        })
}

fn client(session: &Option<SnippetSession>) -> Result<&SnippetClient> {
    session
        .as_ref()
        .map(|s| &s.client)
        .ok_or_else(|| HilError::Protocol("no snippet session".to_string()).into())
}

#[async_trait]
impl CallbackSource for AndroidUwbDevice {
    async fn register_callback(&self, channel: &str, key: &str) -> Result<SubscriptionHandle> {
        let guard = self.session.lock().await;
        let callback_id = client(&guard)?
            .call_async(&format!("register{channel}"), vec![json!(key)])
            .await?;
        Ok(SubscriptionHandle {
            channel: channel.to_string(),
            key: key.to_string(),
            callback_id,
        })
    }

    async fn drain_events(
        &self,
        handle: &SubscriptionHandle,
        event_name: &str,
    ) -> Result<Vec<EventRecord>> {
        let guard = self.session.lock().await;
        Ok(client(&guard)?
            .event_get_all(&handle.callback_id, event_name)
            .await?)
    }

    async fn unregister_callback(&self, handle: &SubscriptionHandle) -> Result<()> {
        self.call(&format!("unregister{}", handle.channel), vec![json!(handle.key)])
            .await?;
        Ok(())
    }

    fn release_detached(&self, handle: SubscriptionHandle) {
        let session = Arc::clone(&self.session);
        let method = format!("unregister{}", handle.channel);
        let key = handle.key;
        spawn_release(key.clone(), async move {
            let guard = session.lock().await;
            client(&guard)?.call(&method, vec![json!(key)]).await?;
            Ok(())
        });
    }
}

#[async_trait]
impl UwbAdapter for AndroidUwbDevice {
    async fn is_uwb_enabled(&self) -> Result<bool> {
        self.call_bool("isUwbEnabled").await
    }

    async fn adapter_state(&self) -> Result<AdapterState> {
        let value = self.call("getAdapterState", vec![]).await?;
        let code = value.as_i64().ok_or_else(|| {
            HilError::Protocol(format!("getAdapterState returned {value}, expected int"))
        })?;
        Ok(AdapterState::from_code(code))
    }

    async fn set_uwb_enabled(&self, enabled: bool) -> Result<()> {
        self.call("setUwbEnabled", vec![json!(enabled)]).await?;
        Ok(())
    }

    async fn build_id(&self) -> Result<String> {
        Ok(self.adb.getprop("ro.build.id").await?)
    }
}

#[async_trait]
impl AirplaneModeControl for AndroidUwbDevice {
    async fn set_airplane_mode(&self, enabled: bool) -> Result<()> {
        self.call("setAirplaneMode", vec![json!(enabled)]).await?;
        Ok(())
    }

    async fn airplane_mode(&self) -> Result<bool> {
        let value = self
            .adb
            .shell("settings get global airplane_mode_on")
            .await?;
        Ok(parse_airplane_mode(&value)?)
    }
}

#[async_trait]
impl Rebootable for AndroidUwbDevice {
    async fn reboot(&self) -> Result<()> {
        self.close_session().await;
        self.adb.reboot().await?;
        self.adb.wait_for_device().await?;

        let adb = &self.adb;
        wait_for_state(
            "sys.boot_completed",
            move || async move { Ok::<_, anyhow::Error>(adb.getprop("sys.boot_completed").await?) },
            "1".to_string(),
            PollSettings::new(self.boot_timeout, BOOT_POLL_INTERVAL),
        )
        .await?;
        info!(serial = ?self.adb.serial(), "Boot completed");

        let session = self.open_session().await?;
        *self.session.lock().await = Some(session);
        Ok(())
    }
}

#[async_trait]
impl CountryCodeControl for AndroidUwbDevice {
    async fn force_country_code(&self, country_code: &str) -> Result<()> {
        self.adb
            .shell(&format!("cmd uwb force-country-code enabled {country_code}"))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PeerRanging for AndroidUwbDevice {
    async fn is_uwb_peer_found(&self, session_key: &str, peer_addr: &[u8]) -> Result<bool> {
        let value = self
            .call("isUwbPeerFound", vec![json!(session_key), json!(peer_addr)])
            .await?;
        value.as_bool().ok_or_else(|| {
            HilError::Protocol(format!("isUwbPeerFound returned {value}, expected bool")).into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_airplane_mode_setting_values() {
        assert!(parse_airplane_mode("1\n").unwrap());
        assert!(!parse_airplane_mode("0").unwrap());
    }

    #[test]
    fn test_airplane_mode_rejects_non_integer_output() {
        for raw in ["null", "", "cmd: Failure calling service settings"] {
            let err = parse_airplane_mode(raw).unwrap_err();
            assert!(matches!(err, HilError::Protocol(_)), "{raw}: {err}");
        }
    }
}

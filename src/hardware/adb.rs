//! adb Command Wrapper
//!
//! Thin async wrapper around the `adb` executable. Every call runs a fresh adb
//! process scoped to one device serial; a non-zero exit status becomes
//! `HilError::Adb` carrying the command line and its stderr.
//!
//! The UWB snippet is started with `am instrument` and announces its port on
//! stdout:
//!
//! ```text
//! SNIPPET START, PROTOCOL 1 0
//! SNIPPET SERVING, PORT 6790
//! ```
//!
//! The instrumentation process has to stay alive for the snippet server to keep
//! running, so [`Adb::start_snippet`] hands back the child in a [`SnippetProcess`].

use crate::error::{HilError, HilResult};
use crate::config::DeviceConfig;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Instrumentation runner of Mobly snippet APKs
pub const SNIPPET_RUNNER: &str = "com.google.android.mobly.snippet.SnippetRunner";

const SERVING_PREFIX: &str = "SNIPPET SERVING, PORT ";

/// adb bound to one device
#[derive(Debug, Clone)]
pub struct Adb {
    adb_path: String,
    serial: Option<String>,
}

impl Adb {
    /// Use `adb_path` to talk to the device with `serial` (or the only device)
    pub fn new(adb_path: impl Into<String>, serial: Option<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial,
        }
    }

    /// Build from the `[device]` configuration section
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.adb_path.clone(), config.serial.clone())
    }

    /// Device serial, if one was configured
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run `adb <args>` and return stdout
    pub async fn run(&self, args: &[&str]) -> HilResult<String> {
        let command = args.join(" ");
        debug!(serial = ?self.serial, %command, "adb");
        let output = self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(HilError::Adb {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run `adb shell <command>` and return stdout
    pub async fn shell(&self, command: &str) -> HilResult<String> {
        self.run(&["shell", command]).await
    }

    /// Read a system property
    pub async fn getprop(&self, name: &str) -> HilResult<String> {
        let value = self.shell(&format!("getprop {name}")).await?;
        Ok(value.trim().to_string())
    }

    /// Request a reboot. Returns once adb has handed the request to the device.
    pub async fn reboot(&self) -> HilResult<()> {
        info!(serial = ?self.serial, "Rebooting device");
        self.run(&["reboot"]).await.map(|_| ())
    }

    /// Block until adb sees the device again
    pub async fn wait_for_device(&self) -> HilResult<()> {
        self.run(&["wait-for-device"]).await.map(|_| ())
    }

    /// Forward a free host port to `device_port`; returns the host port
    pub async fn forward(&self, device_port: u16) -> HilResult<u16> {
        let output = self
            .run(&["forward", "tcp:0", &format!("tcp:{device_port}")])
            .await?;
        parse_forward_port(&output)
    }

    /// Remove a forward created by [`Adb::forward`]
    pub async fn remove_forward(&self, host_port: u16) -> HilResult<()> {
        self.run(&["forward", "--remove", &format!("tcp:{host_port}")])
            .await
            .map(|_| ())
    }

    /// Launch the snippet server in `package` and wait for it to report its port.
    ///
    /// # Errors
    /// - `HilError::Timeout` if no port is announced within `timeout`
    /// - `HilError::Adb` if the instrumentation exits first
    pub async fn start_snippet(
        &self,
        package: &str,
        timeout: Duration,
    ) -> HilResult<SnippetProcess> {
        let instrument = format!("am instrument -w -e action start {package}/{SNIPPET_RUNNER}");
        info!(package, "Starting snippet");
        let mut child = self
            .command()
            .args(["shell", &instrument])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HilError::Protocol("snippet stdout not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut transcript = Vec::new();

        let announced = tokio::time::timeout(timeout, async {
            while let Some(line) = lines.next_line().await? {
                debug!(%line, "snippet");
                if let Some(port) = parse_serving_port(&line) {
                    return Ok::<_, HilError>(Some(port));
                }
                transcript.push(line);
            }
            Ok(None)
        })
        .await;

        match announced {
            Ok(Ok(Some(device_port))) => {
                info!(package, device_port, "Snippet serving");
                Ok(SnippetProcess {
                    child,
                    package: package.to_string(),
                    device_port,
                })
            }
            Ok(Ok(None)) => Err(HilError::Adb {
                command: instrument,
                stderr: format!("snippet exited before serving: {}", transcript.join(" | ")),
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(HilError::Timeout {
                what: format!("snippet {package} to start serving"),
                elapsed: timeout,
            }),
        }
    }

    /// Ask the snippet runner in `package` to shut its server down
    pub async fn stop_snippet(&self, package: &str) -> HilResult<()> {
        self.shell(&format!(
            "am instrument -w -e action stop {package}/{SNIPPET_RUNNER}"
        ))
        .await
        .map(|_| ())
    }
}

/// Running snippet instrumentation
#[derive(Debug)]
pub struct SnippetProcess {
    child: Child,
    package: String,
    device_port: u16,
}

impl SnippetProcess {
    /// Port the snippet server listens on, on the device
    pub fn device_port(&self) -> u16 {
        self.device_port
    }

    /// Package the snippet runs in
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Kill the local adb process holding the instrumentation open
    pub async fn kill(mut self) -> HilResult<()> {
        self.child.kill().await?;
        Ok(())
    }
}

/// Port from a `SNIPPET SERVING, PORT <n>` line
pub fn parse_serving_port(line: &str) -> Option<u16> {
    line.trim().strip_prefix(SERVING_PREFIX)?.trim().parse().ok()
}

/// Host port printed by `adb forward tcp:0 ...`
pub fn parse_forward_port(output: &str) -> HilResult<u16> {
    output
        .trim()
        .parse()
        .map_err(|_| HilError::Protocol(format!("unexpected adb forward output: {output:?}")))
}

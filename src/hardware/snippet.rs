//! Snippet RPC Client
//!
//! Line-delimited JSON-RPC over TCP, as spoken by Mobly snippet servers.
//!
//! Session setup:
//! ```text
//! -> {"cmd": "initiate", "uid": -1}
//! <- {"status": true, "uid": 1}
//! ```
//!
//! Calls:
//! ```text
//! -> {"id": 3, "method": "setUwbEnabled", "params": [true]}
//! <- {"id": 3, "result": null, "callback": null, "error": null}
//! ```
//!
//! Asynchronous methods answer with a `callback` id. Events posted for that id
//! are fetched with `eventGetAll(callbackId, eventName)`.

use crate::error::{HilError, HilResult};
use crate::hardware::EventRecord;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    callback: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Handshake {
    status: bool,
    #[serde(default)]
    uid: i64,
}

/// Connected snippet session
pub struct SnippetClient {
    stream: Mutex<BufReader<TcpStream>>,
    next_id: AtomicU64,
    uid: i64,
    rpc_timeout: Duration,
}

impl SnippetClient {
    /// Connect to a snippet server and open a new session
    pub async fn connect(host: &str, port: u16, rpc_timeout: Duration) -> HilResult<Self> {
        let stream = tokio::time::timeout(rpc_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| HilError::Timeout {
                what: format!("connection to snippet at {host}:{port}"),
                elapsed: rpc_timeout,
            })??;
        let mut stream = BufReader::new(stream);

        let initiate = json!({"cmd": "initiate", "uid": -1});
        let line = exchange(&mut stream, &initiate, rpc_timeout, "initiate").await?;
        let handshake: Handshake = serde_json::from_str(&line)?;
        if !handshake.status {
            return Err(HilError::Protocol(format!(
                "snippet refused session: {}",
                line.trim()
            )));
        }
        info!(host, port, uid = handshake.uid, "Snippet session opened");

        Ok(Self {
            stream: Mutex::new(stream),
            next_id: AtomicU64::new(0),
            uid: handshake.uid,
            rpc_timeout,
        })
    }

    /// Session id assigned by the server
    pub fn uid(&self) -> i64 {
        self.uid
    }

    async fn rpc(&self, method: &str, params: Vec<Value>) -> HilResult<Response> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request { id, method, params };

        let line = {
            let mut stream = self.stream.lock().await;
            exchange(&mut stream, &request, self.rpc_timeout, method).await?
        };
        let response: Response = serde_json::from_str(&line)?;

        if response.id != id {
            return Err(HilError::Protocol(format!(
                "response id {} does not match request id {id} ({method})",
                response.id
            )));
        }
        if let Some(error) = response.error.as_ref().filter(|e| !e.is_null()) {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(HilError::Rpc {
                method: method.to_string(),
                message,
            });
        }
        Ok(response)
    }

    /// Call a synchronous method and return its result
    pub async fn call(&self, method: &str, params: Vec<Value>) -> HilResult<Value> {
        Ok(self.rpc(method, params).await?.result)
    }

    /// Call an asynchronous method and return the callback id events will carry
    pub async fn call_async(&self, method: &str, params: Vec<Value>) -> HilResult<String> {
        self.rpc(method, params).await?.callback.ok_or_else(|| {
            HilError::Protocol(format!("{method} returned no callback id"))
        })
    }

    /// Fetch and clear every buffered `event_name` event for `callback_id`
    pub async fn event_get_all(
        &self,
        callback_id: &str,
        event_name: &str,
    ) -> HilResult<Vec<EventRecord>> {
        let result = self
            .call("eventGetAll", vec![json!(callback_id), json!(event_name)])
            .await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(result)?)
    }
}

/// Write one JSON line and read one line back
async fn exchange<T: Serialize>(
    stream: &mut BufReader<TcpStream>,
    message: &T,
    timeout: Duration,
    what: &str,
) -> HilResult<String> {
    let mut payload = serde_json::to_string(message)?;
    debug!(%payload, "snippet ->");
    payload.push('\n');

    let io = async {
        stream.get_mut().write_all(payload.as_bytes()).await?;
        stream.get_mut().flush().await?;
        let mut line = String::new();
        let read = stream.read_line(&mut line).await?;
        Ok::<_, HilError>((read, line))
    };

    let (read, line) = tokio::time::timeout(timeout, io)
        .await
        .map_err(|_| HilError::Timeout {
            what: format!("snippet response to {what}"),
            elapsed: timeout,
        })??;

    if read == 0 {
        return Err(HilError::Protocol(format!(
            "connection closed by snippet server during {what}"
        )));
    }
    debug!(line = %line.trim_end(), "snippet <-");
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal snippet server answering a fixed set of methods
    async fn fake_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut line = String::new();

            socket.read_line(&mut line).await.unwrap();
            let hello: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(hello["cmd"], "initiate");
            socket
                .get_mut()
                .write_all(b"{\"status\": true, \"uid\": 7}\n")
                .await
                .unwrap();

            loop {
                line.clear();
                if socket.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let request: Value = serde_json::from_str(&line).unwrap();
                let id = request["id"].as_u64().unwrap();
                let response = match request["method"].as_str().unwrap() {
                    "isUwbEnabled" => {
                        json!({"id": id, "result": true, "callback": null, "error": null})
                    }
                    "registerUwbAdapterStateCallback" => {
                        json!({"id": id, "result": null, "callback": "1-1", "error": null})
                    }
                    "eventGetAll" => json!({
                        "id": id,
                        "result": [{
                            "callbackId": request["params"][0],
                            "name": request["params"][1],
                            "time": 1700000000000_i64,
                            "data": {"uwbAdapterStateEvent": "Disabled"}
                        }],
                        "callback": null,
                        "error": null
                    }),
                    "wrongId" => {
                        json!({"id": id + 100, "result": null, "callback": null, "error": null})
                    }
                    method => json!({
                        "id": id,
                        "result": null,
                        "callback": null,
                        "error": format!("Unknown RPC: {method}")
                    }),
                };
                let mut out = response.to_string();
                out.push('\n');
                socket.get_mut().write_all(out.as_bytes()).await.unwrap();
            }
        });
        port
    }

    #[tokio::test]
    async fn test_handshake_and_call() {
        let port = fake_server().await;
        let client = SnippetClient::connect("127.0.0.1", port, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(client.uid(), 7);
        assert_eq!(client.call("isUwbEnabled", vec![]).await.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_async_call_and_events() {
        let port = fake_server().await;
        let client = SnippetClient::connect("127.0.0.1", port, Duration::from_secs(5))
            .await
            .unwrap();

        let callback_id = client
            .call_async("registerUwbAdapterStateCallback", vec![json!("key-1")])
            .await
            .unwrap();
        assert_eq!(callback_id, "1-1");

        let events = client
            .event_get_all(&callback_id, "UwbAdapterStateCallback")
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].callback_id, "1-1");
        assert_eq!(events[0].field("uwbAdapterStateEvent"), Some("Disabled"));
    }

    #[tokio::test]
    async fn test_remote_error_and_id_mismatch() {
        let port = fake_server().await;
        let client = SnippetClient::connect("127.0.0.1", port, Duration::from_secs(5))
            .await
            .unwrap();

        match client.call("doesNotExist", vec![]).await.unwrap_err() {
            HilError::Rpc { method, message } => {
                assert_eq!(method, "doesNotExist");
                assert!(message.contains("Unknown RPC"));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(matches!(
            client.call("wrongId", vec![]).await,
            Err(HilError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let result = SnippetClient::connect("127.0.0.1", port, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(HilError::Protocol(_)) | Err(HilError::Io(_))));
    }
}

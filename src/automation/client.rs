//! Marionette client
//!
//! Talks Marionette protocol level 3 over a TCP port forwarded to the device.
//! Commands are `[0, id, name, params]`, responses `[1, id, error, result]`.
//! Settings are written by running a script in the chrome context against the
//! device's settings service.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::codec;
use super::Automation;
use crate::common::config::AutomationConfig;
use crate::common::{Error, Result};

/// Lowest protocol level this client speaks
const MIN_PROTOCOL: u64 = 3;

/// Delay between connection attempts while the port comes up
const CONNECT_RETRY: Duration = Duration::from_millis(500);

/// Script that writes one setting and reports success
const SET_SETTING_SCRIPT: &str = r#"
let [name, value, resolve] = arguments;
let setting = {};
setting[name] = value;
let req = window.navigator.mozSettings.createLock().set(setting);
req.onsuccess = () => resolve(true);
req.onerror = () => resolve(false);
"#;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

/// Marionette session client
pub struct MarionetteClient {
    addr: String,
    connect_timeout: Duration,
    conn: Option<Connection>,
    session_id: Option<String>,
    next_id: u64,
}

impl MarionetteClient {
    pub fn new(config: &AutomationConfig) -> Self {
        Self {
            addr: format!("{}:{}", config.host, config.port),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            conn: None,
            session_id: None,
            next_id: 1,
        }
    }

    /// Connect and read the handshake, retrying until the timeout
    ///
    /// A forwarded port accepts connections before anything listens on the
    /// device side and then closes them, so an accepted connection only
    /// counts once the handshake has been read.
    async fn connect(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.connect_timeout;

        let (conn, hello) = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = tokio::time::timeout(remaining.max(CONNECT_RETRY), self.open()).await;
            let error = match attempt {
                Ok(Ok(opened)) => break opened,
                Ok(Err(e)) => e,
                Err(_) => Error::Timeout(self.connect_timeout.as_secs()),
            };
            if Instant::now() >= deadline {
                return Err(Error::AutomationConnect {
                    addr: self.addr.clone(),
                    reason: error.to_string(),
                });
            }
            tracing::debug!("Marionette not ready on {}: {}", self.addr, error);
            tokio::time::sleep(CONNECT_RETRY).await;
        };

        let level = hello
            .get("marionetteProtocol")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if level < MIN_PROTOCOL {
            return Err(Error::AutomationProtocol(format!(
                "Unsupported protocol level {} (need {})",
                level, MIN_PROTOCOL
            )));
        }
        let app = hello
            .get("applicationType")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::debug!("Connected to {} ({})", self.addr, app);

        self.conn = Some(conn);
        Ok(())
    }

    /// One connection attempt: TCP connect plus the handshake packet
    async fn open(&self) -> Result<(Connection, Value)> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (read, write) = stream.into_split();
        let mut conn = Connection {
            reader: BufReader::new(read),
            writer: BufWriter::new(write),
        };

        let hello = codec::read_packet(&mut conn.reader).await?;
        let hello: Value = serde_json::from_str(&hello)?;
        Ok((conn, hello))
    }

    /// Send a command and wait for its response
    async fn request(&mut self, command: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Error::automation_command(command, "not connected"))?;

        let json = serde_json::to_string(&json!([0, id, command, params]))?;
        tracing::trace!("Marionette >>> {}", json);
        codec::write_packet(&mut conn.writer, &json).await?;

        loop {
            let packet = codec::read_packet(&mut conn.reader).await?;
            tracing::trace!("Marionette <<< {}", packet);

            let msg: Value = serde_json::from_str(&packet)?;
            let parts = msg
                .as_array()
                .filter(|a| a.len() == 4 && a[0] == json!(1))
                .ok_or_else(|| {
                    Error::AutomationProtocol(format!("Unexpected packet: {}", packet))
                })?;

            if parts[1].as_u64() != Some(id) {
                tracing::warn!("Ignoring response to unknown command id {}", parts[1]);
                continue;
            }

            if !parts[2].is_null() {
                let message = parts[2]
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| parts[2].to_string());
                return Err(Error::automation_command(command, message));
            }

            return Ok(parts[3].clone());
        }
    }
}

#[async_trait]
impl Automation for MarionetteClient {
    async fn start_session(&mut self) -> Result<()> {
        if self.conn.is_none() {
            self.connect().await?;
        }

        let result = self
            .request("WebDriver:NewSession", json!({ "capabilities": {} }))
            .await?;
        self.session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string);

        self.request("Marionette:SetContext", json!({ "value": "chrome" }))
            .await?;
        Ok(())
    }

    async fn set_setting(&mut self, name: &str, value: &Value) -> Result<()> {
        let result = self
            .request(
                "WebDriver:ExecuteAsyncScript",
                json!({
                    "script": SET_SETTING_SCRIPT,
                    "args": [name, value],
                    "sandbox": "system",
                    "newSandbox": false,
                }),
            )
            .await?;

        if result.get("value") == Some(&Value::Bool(true)) {
            Ok(())
        } else {
            Err(Error::automation_command(
                "WebDriver:ExecuteAsyncScript",
                format!("setting '{}' was not written", name),
            ))
        }
    }

    async fn end_session(&mut self) -> Result<()> {
        if self.session_id.is_some() && self.conn.is_some() {
            let result = self.request("WebDriver:DeleteSession", json!({})).await;
            self.session_id = None;
            self.conn = None;
            result.map(|_| ())
        } else {
            self.session_id = None;
            self.conn = None;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal Marionette server: answers every command, records names
    async fn fake_server(listener: TcpListener) -> Vec<String> {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut writer = BufWriter::new(write);

        codec::write_packet(
            &mut writer,
            r#"{"applicationType":"gecko","marionetteProtocol":3}"#,
        )
        .await
        .unwrap();

        let mut seen = Vec::new();
        while let Ok(packet) = codec::read_packet(&mut reader).await {
            let msg: Value = serde_json::from_str(&packet).unwrap();
            let id = msg[1].clone();
            let name = msg[2].as_str().unwrap().to_string();
            let result = match name.as_str() {
                "WebDriver:NewSession" => json!({ "sessionId": "abc", "capabilities": {} }),
                "WebDriver:ExecuteAsyncScript" => json!({ "value": true }),
                _ => json!({}),
            };
            seen.push(name.clone());
            let reply = serde_json::to_string(&json!([1, id, null, result])).unwrap();
            codec::write_packet(&mut writer, &reply).await.unwrap();
            if name == "WebDriver:DeleteSession" {
                break;
            }
        }
        seen
    }

    fn client_for(port: u16) -> MarionetteClient {
        MarionetteClient::new(&AutomationConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout_secs: 5,
        })
    }

    #[tokio::test]
    async fn test_session_and_setting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(fake_server(listener));

        let mut client = client_for(port);
        client.start_session().await.unwrap();
        assert_eq!(client.session_id.as_deref(), Some("abc"));
        client
            .set_setting("screen.timeout", &json!(0.0))
            .await
            .unwrap();
        client.end_session().await.unwrap();
        assert_eq!(client.session_id, None);

        let seen = server.await.unwrap();
        assert_eq!(
            seen,
            vec![
                "WebDriver:NewSession",
                "Marionette:SetContext",
                "WebDriver:ExecuteAsyncScript",
                "WebDriver:DeleteSession",
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_retries_after_dropped_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            // Accepted then closed before any handshake, like an idle forward
            let (first, _) = listener.accept().await.unwrap();
            drop(first);
            fake_server(listener).await
        });

        let mut client = client_for(port);
        client.start_session().await.unwrap();
        client.end_session().await.unwrap();

        let seen = server.await.unwrap();
        assert_eq!(seen.first().map(String::as_str), Some("WebDriver:NewSession"));
    }

    #[tokio::test]
    async fn test_old_protocol_rejected_without_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (_read, write) = stream.into_split();
            let mut writer = BufWriter::new(write);
            codec::write_packet(&mut writer, r#"{"marionetteProtocol":2}"#)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut client = client_for(port);
        assert!(matches!(
            client.start_session().await,
            Err(Error::AutomationProtocol(_))
        ));
    }

    #[tokio::test]
    async fn test_end_session_without_start_is_noop() {
        let mut client = client_for(1);
        client.end_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_times_out() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = MarionetteClient::new(&AutomationConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout_secs: 0,
        });
        assert!(matches!(
            client.start_session().await,
            Err(Error::AutomationConnect { .. })
        ));
    }
}

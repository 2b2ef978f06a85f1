//! A single relay connection.
//!
//! Thin duplex channel speaking the standard relay frames: `EVENT` to
//! publish, `REQ`/`CLOSE` for subscriptions, and `OK`/`EVENT`/`EOSE`/
//! `NOTICE`/`CLOSED` inbound. Reads are pull-based; the pool serializes
//! operations per connection and drives `recv` under its own deadlines,
//! so this type carries no reconnect or keepalive machinery.

use crate::error::{ClientError, Result};
use futures_util::{SinkExt, StreamExt};
use locator_core::Event;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Inbound relay frame.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    /// `["EVENT", subscription_id, event]`
    Event(String, Event),
    /// `["OK", event_id, accepted, message]`
    Ok(String, bool, String),
    /// `["EOSE", subscription_id]`
    Eose(String),
    /// `["NOTICE", message]`
    Notice(String),
    /// `["CLOSED", subscription_id, message]`
    Closed(String, String),
    /// `["AUTH", challenge]`
    Auth(String),
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One relay connection. Cheap to share behind an `Arc`; the pool owns
/// the map of these.
pub struct RelayConnection {
    url: Url,
    state: Arc<RwLock<ConnectionState>>,
    ws: Arc<Mutex<Option<WsStream>>>,
}

impl RelayConnection {
    /// Create a connection handle (does not connect yet). The URL must
    /// use the `ws` or `wss` scheme.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ClientError::Argument(format!(
                "relay URL must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            ws: Arc::new(Mutex::new(None)),
        })
    }

    /// Open the WebSocket, bounded by `connect_timeout`.
    pub async fn connect(&self, connect_timeout: Duration) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == ConnectionState::Connected {
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }

        debug!(url = %self.url, "connecting to relay");
        match timeout(connect_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((stream, _))) => {
                *self.ws.lock().await = Some(stream);
                *self.state.write().await = ConnectionState::Connected;
                info!(url = %self.url, "connected to relay");
                Ok(())
            }
            Ok(Err(e)) => {
                *self.state.write().await = ConnectionState::Disconnected;
                Err(ClientError::Relay(format!("{}: {e}", self.url)))
            }
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                Err(ClientError::Timeout(format!(
                    "connecting to {} took longer than {connect_timeout:?}",
                    self.url
                )))
            }
        }
    }

    /// Close the WebSocket.
    pub async fn disconnect(&self) {
        let mut ws = self.ws.lock().await;
        if let Some(mut stream) = ws.take() {
            let _ = stream.close(None).await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
        debug!(url = %self.url, "disconnected from relay");
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Submit an event: `["EVENT", event]`.
    pub async fn send_event(&self, event: &Event) -> Result<()> {
        self.send(&json!(["EVENT", event])).await
    }

    /// Open a subscription: `["REQ", id, filter...]`.
    pub async fn subscribe(&self, subscription_id: &str, filters: &[Value]) -> Result<()> {
        let mut frame = vec![json!("REQ"), json!(subscription_id)];
        frame.extend(filters.iter().cloned());
        self.send(&Value::Array(frame)).await
    }

    /// Close a subscription: `["CLOSE", id]`.
    pub async fn close_subscription(&self, subscription_id: &str) -> Result<()> {
        self.send(&json!(["CLOSE", subscription_id])).await
    }

    async fn send(&self, frame: &Value) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        debug!(url = %self.url, frame = %text, "sending");

        let mut ws = self.ws.lock().await;
        let stream = ws
            .as_mut()
            .ok_or_else(|| ClientError::Relay(format!("{}: not connected", self.url)))?;
        stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientError::Relay(format!("{}: {e}", self.url)))
    }

    /// Pull the next protocol frame. Pings are answered and non-protocol
    /// frames skipped internally; `Ok(None)` means the peer closed the
    /// stream.
    pub async fn recv(&self) -> Result<Option<RelayMessage>> {
        let mut ws = self.ws.lock().await;
        let stream = ws
            .as_mut()
            .ok_or_else(|| ClientError::Relay(format!("{}: not connected", self.url)))?;

        let outcome = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    debug!(url = %self.url, frame = %text, "received");
                    if let Some(message) = parse_relay_message(&text) {
                        break Ok(Some(message));
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    stream
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| ClientError::Relay(format!("{}: {e}", self.url)))?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(url = %self.url, "relay closed the connection");
                    break Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(ClientError::Relay(format!("{}: {e}", self.url))),
            }
        };

        // A closed or failed stream is gone; let the owner reconnect.
        if !matches!(outcome, Ok(Some(_))) {
            *ws = None;
            *self.state.write().await = ConnectionState::Disconnected;
        }
        outcome
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Parse one inbound frame; unknown or short frames yield `None`.
fn parse_relay_message(text: &str) -> Option<RelayMessage> {
    let value: Value = serde_json::from_str(text).ok()?;
    let frame = value.as_array()?;
    let kind = frame.first()?.as_str()?;

    let str_at = |i: usize| frame.get(i).and_then(Value::as_str).unwrap_or("").to_string();

    match kind {
        "EVENT" if frame.len() >= 3 => {
            let event: Event = serde_json::from_value(frame[2].clone()).ok()?;
            Some(RelayMessage::Event(str_at(1), event))
        }
        "OK" if frame.len() >= 4 => Some(RelayMessage::Ok(
            str_at(1),
            frame[2].as_bool().unwrap_or(false),
            str_at(3),
        )),
        "EOSE" if frame.len() >= 2 => Some(RelayMessage::Eose(str_at(1))),
        "NOTICE" if frame.len() >= 2 => Some(RelayMessage::Notice(str_at(1))),
        "CLOSED" if frame.len() >= 2 => Some(RelayMessage::Closed(str_at(1), str_at(2))),
        "AUTH" if frame.len() >= 2 => Some(RelayMessage::Auth(str_at(1))),
        other => {
            warn!(kind = other, "unknown relay frame");
            None
        }
    }
}

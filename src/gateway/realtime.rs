//! Realtime insert subscriptions over a websocket.
//!
//! The backend speaks Phoenix channel frames: the client joins a topic with a
//! `postgres_changes` filter, sends a heartbeat on the `phoenix` topic at a
//! fixed interval, and receives one `postgres_changes` frame per inserted row.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Collection, GatewayError, InsertFeed};

/// Topic joined for the global chat feed.
pub const CHANNEL_TOPIC: &str = "realtime:global-chat";

/// Protocol version sent in the connection URL.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Default heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type RowSender = mpsc::UnboundedSender<Result<Value, GatewayError>>;

/// A Phoenix channel frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

/// What a received frame means for the subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// A row was inserted into the watched table.
    Insert(Value),
    /// The server rejected the join.
    Rejected(String),
    /// The server closed the channel.
    Closed(String),
    /// Replies, presence and other frames the subscription does not act on.
    Ignored,
}

/// Websocket endpoint derived from the REST base URL.
pub fn realtime_endpoint(base_url: &str, api_key: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        trimmed.to_string()
    };

    format!(
        "{}/realtime/v1/websocket?apikey={}&vsn={}",
        ws_base, api_key, PROTOCOL_VERSION
    )
}

/// Join frame subscribing to inserts on `collection`.
pub fn join_message(
    collection: Collection,
    access_token: Option<&str>,
    reference: u64,
) -> PhoenixMessage {
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": "INSERT", "schema": "public", "table": collection.as_str() }
            ]
        }
    });
    if let (Some(token), Value::Object(fields)) = (access_token, &mut payload) {
        fields.insert("access_token".to_string(), Value::from(token));
    }

    PhoenixMessage {
        topic: CHANNEL_TOPIC.to_string(),
        event: "phx_join".to_string(),
        payload,
        reference: Some(reference.to_string()),
    }
}

pub fn heartbeat_message(reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

pub fn leave_message(reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: CHANNEL_TOPIC.to_string(),
        event: "phx_leave".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// Interpret a frame received on the channel.
pub fn classify(message: &PhoenixMessage, collection: Collection) -> RealtimeEvent {
    match message.event.as_str() {
        "postgres_changes" => {
            let data = &message.payload["data"];
            let is_insert = data["type"].as_str() == Some("INSERT");
            let same_table = data["table"].as_str() == Some(collection.as_str());
            match data.get("record") {
                Some(record) if is_insert && same_table => RealtimeEvent::Insert(record.clone()),
                _ => RealtimeEvent::Ignored,
            }
        }
        "phx_reply" if message.topic == CHANNEL_TOPIC => {
            if message.payload["status"].as_str() == Some("error") {
                let reason = message.payload["response"]["reason"]
                    .as_str()
                    .unwrap_or("join rejected")
                    .to_string();
                RealtimeEvent::Rejected(reason)
            } else {
                RealtimeEvent::Ignored
            }
        }
        "phx_error" | "phx_close" if message.topic == CHANNEL_TOPIC => {
            RealtimeEvent::Closed(message.event.clone())
        }
        _ => RealtimeEvent::Ignored,
    }
}

fn encode(message: &PhoenixMessage) -> Result<Message, GatewayError> {
    Ok(Message::Text(serde_json::to_string(message)?))
}

/// Open a websocket, join the insert channel and pump rows into an [`InsertFeed`].
pub async fn connect(
    endpoint: &str,
    collection: Collection,
    access_token: Option<String>,
    heartbeat: Duration,
) -> Result<InsertFeed, GatewayError> {
    let (mut socket, _) = tokio_tungstenite::connect_async(endpoint)
        .await
        .map_err(|e| GatewayError::Realtime(format!("connect failed: {}", e)))?;

    socket
        .send(encode(&join_message(collection, access_token.as_deref(), 1))?)
        .await
        .map_err(|e| GatewayError::Realtime(e.to_string()))?;

    tracing::info!("Joined realtime channel {} for {}", CHANNEL_TOPIC, collection);

    let (feed, row_tx, close_rx) = InsertFeed::channel();
    tokio::spawn(run_channel(socket, collection, row_tx, close_rx, heartbeat));
    Ok(feed)
}

async fn run_channel(
    socket: Socket,
    collection: Collection,
    row_tx: RowSender,
    mut close_rx: oneshot::Receiver<()>,
    heartbeat: Duration,
) {
    let (mut sink, mut stream) = socket.split();
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                if let Ok(frame) = encode(&leave_message(next_ref)) {
                    let _ = sink.send(frame).await;
                }
                let _ = sink.close().await;
                tracing::debug!("Realtime channel for {} closed by client", collection);
                break;
            }
            _ = ticker.tick() => {
                let sent = match encode(&heartbeat_message(next_ref)) {
                    Ok(frame) => sink
                        .send(frame)
                        .await
                        .map_err(|e| GatewayError::Realtime(e.to_string())),
                    Err(e) => Err(e),
                };
                next_ref += 1;
                if let Err(e) = sent {
                    let _ = row_tx.send(Err(e));
                    break;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let message: PhoenixMessage = match serde_json::from_str(&text) {
                            Ok(message) => message,
                            Err(e) => {
                                tracing::warn!("Unparseable realtime frame: {}", e);
                                continue;
                            }
                        };
                        match classify(&message, collection) {
                            RealtimeEvent::Insert(row) => {
                                if row_tx.send(Ok(row)).is_err() {
                                    break;
                                }
                            }
                            RealtimeEvent::Rejected(reason) | RealtimeEvent::Closed(reason) => {
                                let _ = row_tx.send(Err(GatewayError::Realtime(reason)));
                                break;
                            }
                            RealtimeEvent::Ignored => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        let closed = GatewayError::Realtime("connection closed".to_string());
                        let _ = row_tx.send(Err(closed));
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = row_tx.send(Err(GatewayError::Realtime(e.to_string())));
                        break;
                    }
                }
            }
        }
    }
}

//! Change-feed listener speaking the backend's Phoenix-channel WebSocket
//! protocol.
//!
//! One listener serves one subscription: it joins a channel configured for
//! `INSERT` events on a table with an equality filter, forwards each new
//! record, and sends heartbeats. A dropped connection is re-established with
//! backoff; events missed while disconnected are not replayed.

use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use super::{Filter, Row};

const HEARTBEAT_SECS: u64 = 30;
const MAX_BACKOFF_SECS: u64 = 60;

pub struct ChannelConfig {
    pub socket_url: String,
    pub topic: String,
    pub table: String,
    pub filter: Filter,
    pub access_token: String,
}

/// `https://x.example` -> `wss://x.example/realtime/v1/websocket?apikey=..&vsn=1.0.0`
pub fn socket_url(base_url: &str, api_key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}/realtime/v1/websocket?apikey={api_key}&vsn=1.0.0")
}

/// The `phx_join` frame for a channel.
pub fn join_message(config: &ChannelConfig, msg_ref: u64) -> Value {
    json!({
        "topic": config.topic,
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "INSERT",
                    "schema": "public",
                    "table": config.table,
                    "filter": format!("{}=eq.{}", config.filter.column, config.filter.value_text()),
                }],
            },
            "access_token": config.access_token,
        },
        "ref": msg_ref.to_string(),
    })
}

fn heartbeat_message(msg_ref: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
}

/// Extract the inserted record from a server frame, if the frame is an
/// insert on `topic`.
pub fn inserted_record(frame: &Value, topic: &str) -> Option<Row> {
    if frame.get("topic").and_then(Value::as_str) != Some(topic) {
        return None;
    }
    let payload = frame.get("payload")?;
    match frame.get("event").and_then(Value::as_str)? {
        "postgres_changes" => {
            let data = payload.get("data")?;
            if data.get("type").and_then(Value::as_str) != Some("INSERT") {
                return None;
            }
            data.get("record")?.as_object().cloned()
        }
        // Older servers emit the change type as the event name.
        "INSERT" => payload.get("record")?.as_object().cloned(),
        _ => None,
    }
}

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

enum Disconnect {
    Dropped,
    ReceiverGone,
}

/// Run the listener until the receiving side goes away or the task is
/// aborted.
pub async fn listen(config: ChannelConfig, tx: mpsc::UnboundedSender<Row>) {
    let mut backoff_secs = 2u64;

    while !tx.is_closed() {
        match tokio_tungstenite::connect_async(config.socket_url.as_str()).await {
            Ok((stream, _response)) => {
                backoff_secs = 2;
                crate::wlog!("realtime: connected, joining {}", config.topic);
                if let Disconnect::ReceiverGone = pump(stream, &config, &tx).await {
                    return;
                }
                crate::wlog!("realtime: disconnected, retrying in {}s", backoff_secs);
            }
            Err(e) => {
                crate::wlog!(
                    "realtime: connection failed (retry in {}s): {}",
                    backoff_secs,
                    e
                );
            }
        }
        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
    }
}

async fn pump(stream: Socket, config: &ChannelConfig, tx: &mpsc::UnboundedSender<Row>) -> Disconnect {
    let (mut write, mut read) = stream.split();
    let mut msg_ref = 1u64;

    let join = join_message(config, msg_ref).to_string();
    if write.send(WsMessage::Text(join)).await.is_err() {
        return Disconnect::Dropped;
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_SECS));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                msg_ref += 1;
                let frame = heartbeat_message(msg_ref).to_string();
                if write.send(WsMessage::Text(frame)).await.is_err() {
                    return Disconnect::Dropped;
                }
            }
            _ = tx.closed() => return Disconnect::ReceiverGone,
            msg = read.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    if let Some(record) = inserted_record(&frame, &config.topic) {
                        if tx.send(record).is_err() {
                            return Disconnect::ReceiverGone;
                        }
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = write.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => return Disconnect::Dropped,
                Some(Err(e)) => {
                    crate::wlog!("realtime: socket error: {}", e);
                    return Disconnect::Dropped;
                }
                Some(Ok(_)) => {}
            }
        }
    }
}

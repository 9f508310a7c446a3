//! Supabase Realtime change feed over WebSocket.
//!
//! One socket per subscribed table. After connecting, the client joins the
//! `realtime:public:{table}` topic with a `postgres_changes` filter, then
//! forwards every change frame to the subscriber and keeps the socket
//! alive with Phoenix heartbeats. Dropping the receiver closes the socket.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::RemoteConfig;
use crate::error::GatewayError;
use crate::live::{ChangeEvent, ChangeFeed, ChangeKind};

/// Interval between Phoenix heartbeats; the server drops silent sockets
/// after 60 s.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Buffer between the socket task and the subscriber.
const FEED_CAPACITY: usize = 256;

/// [`ChangeFeed`] backed by the Supabase Realtime service.
pub struct RealtimeFeed {
    endpoint: String,
}

impl RealtimeFeed {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            endpoint: websocket_url(&config.url, &config.api_key),
        }
    }
}

/// `https://x.supabase.co` → `wss://x.supabase.co/realtime/v1/websocket?...`
fn websocket_url(base: &str, api_key: &str) -> String {
    let base = base.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    let endpoint = format!("{ws_base}/realtime/v1/websocket");
    match reqwest::Url::parse(&endpoint) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("apikey", api_key)
                .append_pair("vsn", "1.0.0");
            url.into()
        }
        Err(e) => {
            tracing::warn!(endpoint = %endpoint, "Realtime endpoint is not a valid URL: {e}");
            endpoint
        }
    }
}

fn topic(table: &str) -> String {
    format!("realtime:public:{table}")
}

/// Phoenix `phx_join` frame subscribing to every change on one table.
fn join_frame(table: &str) -> Value {
    json!({
        "topic": topic(table),
        "event": "phx_join",
        "payload": {
            "config": {
                "postgres_changes": [
                    {"event": "*", "schema": "public", "table": table}
                ]
            }
        },
        "ref": "1"
    })
}

fn heartbeat_frame(seq: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": seq.to_string()
    })
}

/// Decode a server frame into a change event.
///
/// Anything that is not a `postgres_changes` frame (join replies,
/// heartbeats, presence) yields `None`. Join failures are logged.
pub fn parse_frame(text: &str) -> Option<ChangeEvent> {
    let frame: Value = serde_json::from_str(text).ok()?;
    match frame.get("event").and_then(Value::as_str)? {
        "postgres_changes" => {
            let data = frame.get("payload")?.get("data")?;
            let kind = match data.get("type").and_then(Value::as_str)? {
                "INSERT" => ChangeKind::Insert,
                "UPDATE" => ChangeKind::Update,
                "DELETE" => ChangeKind::Delete,
                _ => return None,
            };
            let present = |key: &str| data.get(key).filter(|v| v.is_object()).cloned();
            Some(ChangeEvent {
                table: data.get("table").and_then(Value::as_str)?.to_string(),
                kind,
                record: present("record"),
                old_record: present("old_record"),
            })
        }
        "phx_reply" => {
            let status = frame
                .get("payload")
                .and_then(|p| p.get("status"))
                .and_then(Value::as_str);
            if status == Some("error") {
                tracing::warn!(frame = %text, "Realtime join rejected");
            }
            None
        }
        _ => None,
    }
}

#[async_trait]
impl ChangeFeed for RealtimeFeed {
    async fn subscribe(&self, table: &str) -> Result<mpsc::Receiver<ChangeEvent>, GatewayError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| GatewayError::transport(table, format!("realtime connect failed: {e}")))?;
        let (mut sender, mut receiver) = ws_stream.split();

        sender
            .send(WsMessage::Text(join_frame(table).to_string().into()))
            .await
            .map_err(|e| GatewayError::transport(table, format!("realtime join failed: {e}")))?;

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let table = table.to_string();
        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            heartbeat.tick().await;
            let mut seq: u64 = 1;

            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = heartbeat.tick() => {
                        seq += 1;
                        let frame = heartbeat_frame(seq).to_string();
                        if sender.send(WsMessage::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    msg = receiver.next() => match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Some(event) = parse_frame(&text) {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            tracing::debug!(table = %table, ?frame, "Realtime socket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(table = %table, "Realtime socket error: {e}");
                            break;
                        }
                        None => break,
                    },
                }
            }
            let _ = sender.send(WsMessage::Close(None)).await;
        });

        Ok(rx)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_swaps_scheme() {
        assert_eq!(
            websocket_url("https://abc.supabase.co/", "key"),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=key&vsn=1.0.0"
        );
        assert_eq!(
            websocket_url("http://localhost:54321", "k"),
            "ws://localhost:54321/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
    }

    #[test]
    fn websocket_url_encodes_the_key() {
        assert_eq!(
            websocket_url("https://abc.supabase.co", "a+b/c="),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=a%2Bb%2Fc%3D&vsn=1.0.0"
        );
    }

    #[test]
    fn join_frame_filters_one_table() {
        let frame = join_frame("messages");
        assert_eq!(frame["topic"], json!("realtime:public:messages"));
        assert_eq!(
            frame["payload"]["config"]["postgres_changes"][0]["table"],
            json!("messages")
        );
    }

    #[test]
    fn parses_change_frames() {
        let text = json!({
            "topic": "realtime:public:messages",
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": "UPDATE",
                    "table": "messages",
                    "schema": "public",
                    "record": {"id": "m1", "text": "edited"},
                    "old_record": {"id": "m1"}
                }
            },
            "ref": null
        })
        .to_string();

        let event = parse_frame(&text).unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.table, "messages");
        assert_eq!(event.record.unwrap()["text"], json!("edited"));
        assert_eq!(event.old_record.unwrap()["id"], json!("m1"));
    }

    #[test]
    fn delete_frames_carry_only_old_record() {
        let text = json!({
            "event": "postgres_changes",
            "payload": {"data": {"type": "DELETE", "table": "conversations",
                                 "record": null, "old_record": {"id": "c1"}}}
        })
        .to_string();
        let event = parse_frame(&text).unwrap();
        assert_eq!(event.kind, ChangeKind::Delete);
        assert!(event.record.is_none());
    }

    #[test]
    fn control_frames_are_not_events() {
        let reply = json!({"event": "phx_reply", "payload": {"status": "ok"}}).to_string();
        assert!(parse_frame(&reply).is_none());
        assert!(parse_frame("not json").is_none());
        let heartbeat = heartbeat_frame(7);
        assert_eq!(heartbeat["ref"], json!("7"));
    }
}

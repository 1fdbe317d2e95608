//! WebSocket push sessions
//!
//! One session per connected subscriber: `connected` on open, `pong` replies,
//! `subscribed` acks with per-id filtering, keep-alive pings every 30 seconds
//! with disconnect after two silent intervals, and disconnect-on-saturation
//! backpressure (a subscriber that lags the broadcast buffer is dropped, not
//! waited on).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::AppState;
use crate::model::new_object_id;
use crate::monitor_events::{EventBusError, MonitorEvent};

/// Keep-alive ping cadence.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Silent keep-alive intervals tolerated before disconnect.
const MAX_MISSED_KEEPALIVES: u32 = 2;

/// Client → server messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum ClientMessage {
    Ping,
    Subscribe {
        #[serde(default)]
        url_ids: Vec<String>,
    },
}

/// Server → client messages not already covered by [`MonitorEvent`].
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum ServerMessage {
    Connected {
        session_id: String,
        timestamp: chrono::DateTime<Utc>,
    },
    Pong,
    Subscribed {
        url_ids: Vec<String>,
    },
}

/// `GET /ws`: authenticate (token query parameter when configured) and
/// upgrade.
pub async fn ws_upgrade(
    upgrade: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(expected) = state.config.api_token()
        && params.get("token").map(String::as_str) != Some(expected)
    {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    upgrade.on_upgrade(move |socket| handle_session(socket, state))
}

async fn handle_session(socket: WebSocket, state: AppState) {
    let session_id = new_object_id();
    info!(session_id, "push subscriber connected");

    let (mut sender, mut receiver) = socket.split();

    // Per-connection subscription filter, shared with the bus receiver's
    // predicate. `None` = no filter = deliver everything.
    let filter: Arc<RwLock<Option<HashSet<String>>>> = Arc::new(RwLock::new(None));
    let filter_for_bus = Arc::clone(&filter);
    let mut events = state.bus.subscribe_filtered(move |event: &MonitorEvent| {
        match (&*filter_for_bus.read(), event.url_id()) {
            (Some(wanted), Some(url_id)) => wanted.contains(url_id),
            // Unfiltered subscriber, or an event addressed to everyone.
            _ => true,
        }
    });

    let hello = ServerMessage::Connected {
        session_id: session_id.clone(),
        timestamp: Utc::now(),
    };
    if send_json(&mut sender, &hello).await.is_err() {
        return;
    }

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    keepalive.tick().await; // the first tick fires immediately
    let mut missed_keepalives: u32 = 0;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_json(&mut sender, &event).await.is_err() {
                        debug!(session_id, "subscriber send failed, closing");
                        break;
                    }
                }
                Err(EventBusError::ReceiverLagged(skipped)) => {
                    // Saturated subscriber: drop it instead of blocking the bus.
                    warn!(session_id, skipped, "subscriber saturated, disconnecting");
                    break;
                }
                Err(_) => break,
            },

            inbound = receiver.next() => match inbound {
                Some(Ok(message)) => {
                    // Any inbound frame proves the peer is alive.
                    missed_keepalives = 0;
                    if handle_client_message(&mut sender, &filter, &session_id, message)
                        .await
                        .is_break()
                    {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(session_id, error = %e, "subscriber socket error");
                    break;
                }
                None => break,
            },

            _ = keepalive.tick() => {
                if missed_keepalives >= MAX_MISSED_KEEPALIVES {
                    info!(session_id, "subscriber missed keep-alives, disconnecting");
                    break;
                }
                missed_keepalives += 1;
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            () = state.bus.wait_for_shutdown() => {
                debug!(session_id, "bus shutdown, closing subscriber");
                break;
            }
        }
    }

    let _ = sender.close().await;
    info!(session_id, "push subscriber disconnected");
}

async fn handle_client_message(
    sender: &mut (impl Sink<Message, Error = axum::Error> + Unpin),
    filter: &Arc<RwLock<Option<HashSet<String>>>>,
    session_id: &str,
    message: Message,
) -> std::ops::ControlFlow<()> {
    match message {
        Message::Text(text) => {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping) => {
                    if send_json(sender, &ServerMessage::Pong).await.is_err() {
                        return std::ops::ControlFlow::Break(());
                    }
                }
                Ok(ClientMessage::Subscribe { url_ids }) => {
                    debug!(session_id, count = url_ids.len(), "subscription filter updated");
                    *filter.write() = Some(url_ids.iter().cloned().collect());
                    let ack = ServerMessage::Subscribed { url_ids };
                    if send_json(sender, &ack).await.is_err() {
                        return std::ops::ControlFlow::Break(());
                    }
                }
                Err(e) => {
                    debug!(session_id, error = %e, "ignoring malformed client message");
                }
            }
            std::ops::ControlFlow::Continue(())
        }
        Message::Close(_) => std::ops::ControlFlow::Break(()),
        // Pong and other control frames only matter for liveness, which the
        // caller already reset.
        _ => std::ops::ControlFlow::Continue(()),
    }
}

async fn send_json(
    sender: &mut (impl Sink<Message, Error = axum::Error> + Unpin),
    payload: &impl Serialize,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(payload).map_err(axum::Error::new)?;
    sender.send(Message::Text(text)).await
}

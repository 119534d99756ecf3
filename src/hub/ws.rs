//! WebSocket endpoint for real-time notifications.
//!
//! A client authenticates once at connect time with an opaque token, is
//! auto-subscribed to its own `user:<id>` topic, and can join or leave
//! per-number topics afterwards. Ping/pong is a thin liveness probe.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::events::{ClientFrame, Event, Topic};
use super::registry::{ConnectionId, NotificationHub};
use crate::auth::{Identity, TokenVerifier, require_admin};

#[derive(Clone)]
pub struct WsState {
    pub hub: Arc<NotificationHub>,
    pub verifier: Arc<dyn TokenVerifier>,
}

/// Build the WebSocket + health router.
pub fn ws_routes(hub: Arc<NotificationHub>, verifier: Arc<dyn TokenVerifier>) -> Router {
    let state = WsState { hub, verifier };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/system/broadcast", post(system_broadcast))
        .with_state(state)
}

fn default_level() -> String {
    "info".into()
}

#[derive(Deserialize)]
struct BroadcastRequest {
    message: String,
    #[serde(default = "default_level")]
    level: String,
}

/// Admin-only: push a system notice to every connected client.
async fn system_broadcast(
    State(state): State<WsState>,
    headers: HeaderMap,
    Json(body): Json<BroadcastRequest>,
) -> impl IntoResponse {
    if let Err(e) = require_admin(&headers, state.verifier.as_ref()) {
        return e.into_response();
    }

    let delivered = state
        .hub
        .broadcast(Event::SystemBroadcast {
            message: body.message,
            level: body.level,
        })
        .await;
    Json(serde_json::json!({ "delivered": delivered })).into_response()
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "burner-sms"
    }))
}

#[derive(Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<WsState>,
) -> impl IntoResponse {
    // Authenticate before upgrading; a bad token never gets a socket.
    let identity = query
        .token
        .as_deref()
        .and_then(|token| state.verifier.verify(token));

    match identity {
        Some(identity) => {
            info!(user = %identity.user_id, "WebSocket client connecting");
            ws.on_upgrade(move |socket| handle_socket(socket, state.hub, identity))
                .into_response()
        }
        None => {
            warn!("WebSocket connect rejected: invalid or missing token");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<NotificationHub>, identity: Identity) {
    let (connection_id, mut rx) = hub.register(identity.user_id.clone()).await;

    let ack = Event::ConnectionAck {
        user_id: identity.user_id.clone(),
        timestamp: Utc::now(),
    };
    if send_event(&mut socket, &ack).await.is_err() {
        hub.disconnect(connection_id).await;
        return;
    }

    loop {
        tokio::select! {
            // Forward hub events to this client.
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            debug!(connection = %connection_id, "Client disconnected during send");
                            break;
                        }
                    }
                    None => {
                        debug!(connection = %connection_id, "Hub dropped connection channel");
                        break;
                    }
                }
            }

            // Handle frames from the client.
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&text, &hub, connection_id, &identity, &mut socket)
                            .await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(connection = %connection_id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    hub.disconnect(connection_id).await;
}

async fn send_event(socket: &mut WebSocket, event: &Event) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

async fn handle_client_frame(
    text: &str,
    hub: &NotificationHub,
    connection_id: ConnectionId,
    identity: &Identity,
    socket: &mut WebSocket,
) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(connection = %connection_id, error = %e, "Unrecognized WS frame");
            let _ = send_event(
                socket,
                &Event::Error {
                    message: "unrecognized frame".into(),
                },
            )
            .await;
            return;
        }
    };

    match frame {
        ClientFrame::JoinTopic { topic } => match parse_joinable_topic(&topic, identity) {
            Ok(parsed) => {
                hub.subscribe(connection_id, parsed).await;
                let _ = send_event(socket, &Event::JoinedTopic { topic }).await;
            }
            Err(message) => {
                let _ = send_event(socket, &Event::Error { message }).await;
            }
        },
        ClientFrame::LeaveTopic { topic } => match topic.parse::<Topic>() {
            Ok(parsed) => {
                hub.unsubscribe(connection_id, &parsed).await;
                let _ = send_event(socket, &Event::LeftTopic { topic }).await;
            }
            Err(message) => {
                let _ = send_event(socket, &Event::Error { message }).await;
            }
        },
        ClientFrame::Ping => {
            let _ = send_event(
                socket,
                &Event::Pong {
                    timestamp: Utc::now(),
                },
            )
            .await;
        }
    }
}

/// Clients may join any number topic, but only their own user topic.
fn parse_joinable_topic(raw: &str, identity: &Identity) -> Result<Topic, String> {
    let topic: Topic = raw.parse()?;
    match &topic {
        Topic::User(user_id) if user_id != &identity.user_id => {
            Err("cannot join another user's topic".into())
        }
        _ => Ok(topic),
    }
}

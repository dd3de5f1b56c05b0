use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use atrium_types::events::GatewayEvent;

use crate::dispatcher::Dispatcher;
use crate::handshake::{HandshakeParams, verify_token};
use crate::registry::SessionRegistry;

/// Server sends a Ping every 15 seconds. Two missed Pongs in a row
/// (~30s) drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Dispatcher,
    pub jwt_secret: Arc<str>,
}

impl GatewayState {
    pub fn new(dispatcher: Dispatcher, jwt_secret: impl Into<Arc<str>>) -> Self {
        Self {
            dispatcher,
            jwt_secret: jwt_secret.into(),
        }
    }
}

/// `GET /gateway?token=...`
///
/// The credential is checked before the upgrade is accepted, so an
/// unauthenticated client never gets a socket or a registry entry.
pub async fn gateway_upgrade(
    State(state): State<GatewayState>,
    Query(params): Query<HandshakeParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user_id = match verify_token(params.token.as_deref(), &state.jwt_secret) {
        Ok(user_id) => user_id,
        Err(e) => {
            debug!("Gateway handshake rejected: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let registry = state.dispatcher.registry().clone();
    ws.on_upgrade(move |socket| handle_connection(socket, registry, user_id))
}

/// Drive one authenticated connection until either side goes away.
///
/// Clients never send anything meaningful; inbound text is ignored and
/// only Pongs and Close frames are acted on.
pub async fn handle_connection(socket: WebSocket, registry: SessionRegistry, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    // Held for the life of this function; dropping it (including on
    // cancellation) removes the connection from the registry.
    let (guard, mut events) = registry.register_guarded(user_id);
    info!("{} connected to gateway ({:?})", user_id, guard.connection_id());

    if !send_event(&mut sender, &GatewayEvent::Ready { user_id }).await {
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut pongs = PongTracker::default();

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if !pongs.on_tick(pong_flag_send.swap(false, Ordering::Acquire)) {
                        warn!("{} missed {} pongs, dropping connection", user_id, pongs.missed);
                        break;
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                Message::Text(text) => {
                    trace!("{} sent {} bytes of text, ignoring", user_id, text.len());
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    drop(guard);
    info!("{} disconnected from gateway", user_id);
}

/// Counts consecutive heartbeat rounds that ended without a Pong.
#[derive(Debug, Default)]
struct PongTracker {
    missed: u8,
}

impl PongTracker {
    /// Record one heartbeat round. Returns false once the peer has missed
    /// `MAX_MISSED_PONGS` in a row.
    fn on_tick(&mut self, pong_seen: bool) -> bool {
        if pong_seen {
            self.missed = 0;
        } else {
            self.missed += 1;
        }
        self.missed < MAX_MISSED_PONGS
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode {}: {}", event.name(), e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_silent_rounds_in_a_row_drop_the_peer() {
        let mut pongs = PongTracker::default();
        assert!(pongs.on_tick(true));
        assert!(pongs.on_tick(false));
        assert!(!pongs.on_tick(false));
    }

    #[test]
    fn a_pong_resets_the_count() {
        let mut pongs = PongTracker::default();
        assert!(pongs.on_tick(false));
        assert!(pongs.on_tick(true));
        assert!(pongs.on_tick(false));
        assert_eq!(pongs.missed, 1);
    }
}

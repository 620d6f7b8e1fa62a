//! Dashboard websocket bridge: on connect, send the full cache snapshot
//! once, then forward every subsequent poll/write payload as a
//! single-entry `{node_id: payload}` object. Inbound client frames are read
//! and discarded — the socket only exists to push; a client frame is only
//! read to detect disconnect.
//!
//! Each connection owns its own `broadcast::Receiver`, so one slow browser
//! tab lags and drops old payloads without blocking any other connected
//! client or the poller itself.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::context::GatewayContext;

pub fn router() -> Router<Arc<GatewayContext>> {
    Router::new().route("/ws", get(upgrade))
}

async fn upgrade(State(ctx): State<Arc<GatewayContext>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(mut socket: WebSocket, ctx: Arc<GatewayContext>) {
    let snapshot = ctx.cache.snapshot();
    let snapshot_json = match serde_json::to_string(&snapshot) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to serialize cache snapshot for new websocket client");
            return;
        }
    };
    if socket.send(Message::Text(snapshot_json)).await.is_err() {
        return;
    }

    let mut rx = ctx.tx.subscribe();
    loop {
        tokio::select! {
            update = rx.recv() => {
                match update {
                    Ok((node_id, payload)) => {
                        let frame = json!({ node_id: payload }).to_string();
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "websocket client lagged, oldest payloads dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(_)) => continue,
                    _ => break,
                }
            }
        }
    }
}

//! WebSocket entrypoint for distributed worker nodes.
//!
//! A node connects to `/ws/distributed/{server_id}`; the upgraded socket is
//! the session's framed control channel. The session ends on clean close,
//! transport error, or a missed keep-alive budget, and eviction runs in
//! every case.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::protocol::Frame;
use crate::registry::DistributedRegistry;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEPALIVE_MISS_BUDGET: u32 = 2;

#[derive(Clone)]
pub struct BridgeState {
    pub registry: Arc<DistributedRegistry>,
}

pub async fn ws_handler(
    Path(server_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<BridgeState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, server_id, addr, state.registry))
}

async fn handle_session(
    socket: WebSocket,
    server_id: String,
    addr: SocketAddr,
    registry: Arc<DistributedRegistry>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    let origin = addr.ip().to_string();
    if let Err(e) = registry.open_session(&server_id, origin, tx).await {
        warn!(server_id, error = %e, "refusing distributed session");
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    let mut ping = tokio::time::interval(KEEPALIVE_INTERVAL);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            Some(frame) = rx.recv() => {
                let text = match serde_json::to_string(&frame) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(server_id, error = %e, "unserializable outbound frame");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if missed >= KEEPALIVE_MISS_BUDGET {
                    warn!(server_id, "keep-alive budget exhausted, dropping session");
                    break;
                }
                missed += 1;
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        missed = 0;
                        registry.touch(&server_id).await;
                        match serde_json::from_str::<Frame>(&text) {
                            Ok(frame) => handle_frame(&registry, &server_id, frame).await,
                            Err(e) => warn!(server_id, error = %e, "invalid frame"),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed = 0;
                        registry.touch(&server_id).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(server_id, error = %e, "websocket error");
                        break;
                    }
                }
            }
        }
    }

    registry.close_session(&server_id).await;
    info!(server_id, "distributed channel closed");
}

async fn handle_frame(registry: &Arc<DistributedRegistry>, server_id: &str, frame: Frame) {
    match frame {
        Frame::RegisterTools { tools } => {
            let count = registry.register_tools(server_id, tools).await;
            info!(server_id, count, "distributed tools registered");
        }
        Frame::UpdatePlaceholders { placeholders } => {
            registry.update_placeholders(server_id, placeholders).await;
        }
        Frame::ToolResponse { id, status, payload }
        | Frame::FileResponse { id, status, payload } => {
            registry.handle_response(server_id, id, status, payload).await;
        }
        Frame::ToolRequest { .. } | Frame::FileRequest { .. } => {
            // Nodes do not invoke the hub over this channel.
            warn!(server_id, "unexpected request frame from node");
        }
    }
}

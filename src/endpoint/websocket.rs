//! WebSocket adapter for a broker sync endpoint
//!
//! Accepts connections from edge nodes and answers every `sync` frame with a
//! `sync_ack` (or an `error` frame when the endpoint refuses the batch or the
//! frame cannot be decoded). Each connection gets its own task; the endpoint
//! itself is shared behind an `Arc` and must do its own locking.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async_with_config;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::endpoint::contract::SyncEndpoint;
use crate::sync::message::{BrokerMessage, EdgeMessage, SyncResponse};
use crate::sync::transport::websocket_config;

/// Serve `endpoint` on an already bound listener until accepting fails.
pub async fn start_sync_endpoint<E>(listener: TcpListener, endpoint: Arc<E>)
where
    E: SyncEndpoint + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("sync endpoint listening on ws://{addr}");
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("sync endpoint stopped accepting: {e}");
                return;
            }
        };
        let endpoint = endpoint.clone();

        tokio::spawn(async move {
            let mut ws = match accept_async_with_config(stream, Some(websocket_config())).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(%peer, "WebSocket handshake error: {e}");
                    return;
                }
            };

            while let Some(Ok(msg)) = ws.next().await {
                let text = match msg {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(_) => break,
                    _ => continue,
                };

                let reply = handle_frame(endpoint.as_ref(), &text);
                let encoded = match serde_json::to_string(&reply) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(%peer, "failed to encode reply: {e}");
                        break;
                    }
                };
                if let Err(e) = ws.send(WsMessage::Text(encoded.into())).await {
                    warn!(%peer, "failed to send reply: {e}");
                    break;
                }
            }

            debug!(%peer, "edge connection closed");
        });
    }
}

/// Decode one edge frame and run it against the endpoint.
pub fn handle_frame<E: SyncEndpoint + ?Sized>(endpoint: &E, text: &str) -> BrokerMessage {
    match serde_json::from_str::<EdgeMessage>(text) {
        Ok(EdgeMessage::Sync(request)) => match endpoint.apply(&request) {
            Ok(processed_ids) => {
                debug!(
                    node_id = %request.node_id,
                    offered = request.messages.len(),
                    accepted = processed_ids.len(),
                    "applied edge batch"
                );
                BrokerMessage::SyncAck(SyncResponse { processed_ids })
            }
            Err(e) => BrokerMessage::Error {
                message: e.to_string(),
            },
        },
        Err(e) => {
            warn!(
                "invalid edge frame: {e} | {}",
                text.chars().take(100).collect::<String>()
            );
            BrokerMessage::Error {
                message: format!("invalid sync frame: {e}"),
            }
        }
    }
}

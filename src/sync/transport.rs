//! Transport abstraction for the broker round-trip.
//!
//! The sync client only needs "send this batch, give me the ack". Production
//! uses a WebSocket per round; tests plug in scripted transports.

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async_with_config;
use tungstenite::protocol::{Message as WsMessage, WebSocketConfig};

use crate::sync::message::{BrokerMessage, EdgeMessage, SyncRequest, SyncResponse};
use crate::utils::error::{ProtocolFault, SyncFailure, TransportFault};

pub type TransportResult<T> = Result<T, SyncFailure>;

/// Largest WebSocket message either side of the sync protocol accepts.
///
/// Large enough for the biggest payload the store admits once it is base64
/// encoded, plus the frame's JSON envelope.
pub const MAX_FRAME_BYTES: usize = 64 << 20;

/// Socket limits shared by `WebSocketTransport` and the endpoint server.
pub fn websocket_config() -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(MAX_FRAME_BYTES))
        .max_frame_size(Some(MAX_FRAME_BYTES))
}

/// One request/acknowledgment exchange with the broker's sync endpoint.
pub trait SyncTransport: Send + Sync {
    /// Offer a batch and wait for the broker's answer.
    ///
    /// Implementations report a broker that answered "no" as
    /// `TransportFault::Rejected`, never as an empty `processed_ids`.
    fn send_batch(
        &self,
        request: SyncRequest,
    ) -> Pin<Box<dyn Future<Output = TransportResult<SyncResponse>> + Send + '_>>;
}

/// Opens a fresh WebSocket connection to the broker for every round.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn round_trip(&self, request: SyncRequest) -> TransportResult<SyncResponse> {
        let text = serde_json::to_string(&EdgeMessage::Sync(request))
            .map_err(|e| ProtocolFault::Encode(e.to_string()))?;

        let (mut ws, _) =
            connect_async_with_config(self.url.as_str(), Some(websocket_config()), false)
                .await
                .map_err(|e| TransportFault::Connect(e.to_string()))?;

        ws.send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| TransportFault::Send(e.to_string()))?;

        let reply = loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => break text,
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(TransportFault::ConnectionClosed.into());
                }
                // Ping/pong and binary frames are not part of the protocol
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportFault::Receive(e.to_string()).into()),
            }
        };

        // The ack is already in hand; a failed close changes nothing.
        let _ = ws.close(None).await;

        match serde_json::from_str::<BrokerMessage>(&reply) {
            Ok(BrokerMessage::SyncAck(response)) => Ok(response),
            Ok(BrokerMessage::Error { message }) => Err(TransportFault::Rejected(message).into()),
            Err(e) => Err(ProtocolFault::Malformed(e.to_string()).into()),
        }
    }
}

impl SyncTransport for WebSocketTransport {
    fn send_batch(
        &self,
        request: SyncRequest,
    ) -> Pin<Box<dyn Future<Output = TransportResult<SyncResponse>> + Send + '_>> {
        Box::pin(self.round_trip(request))
    }
}

//! Transports used by tests across the crate.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::endpoint::SyncEndpoint;
use crate::sync::message::{SyncRequest, SyncResponse};
use crate::sync::transport::{SyncTransport, TransportResult};
use crate::utils::error::TransportFault;

#[derive(Default)]
struct MockState {
    replies: VecDeque<TransportResult<SyncResponse>>,
    requests: Vec<SyncRequest>,
    delay: Option<Duration>,
}

/// Scripted transport. Replies are consumed in order; once the script runs
/// out, every call fails with `ConnectionClosed`. Clones share state, so a
/// test can keep a handle after moving one into a client.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: TransportResult<SyncResponse>) -> &Self {
        self.state.lock().unwrap().replies.push_back(reply);
        self
    }

    pub fn push_ack(&self, processed_ids: &[u64]) -> &Self {
        self.push_reply(Ok(SyncResponse {
            processed_ids: processed_ids.to_vec(),
        }))
    }

    /// Sleep this long before answering each call.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.state.lock().unwrap().requests.clone()
    }
}

impl SyncTransport for MockTransport {
    fn send_batch(
        &self,
        request: SyncRequest,
    ) -> Pin<Box<dyn Future<Output = TransportResult<SyncResponse>> + Send + '_>> {
        let (reply, delay) = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request);
            let reply = state
                .replies
                .pop_front()
                .unwrap_or_else(|| Err(TransportFault::ConnectionClosed.into()));
            (reply, state.delay)
        };
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            reply
        })
    }
}

/// Calls a `SyncEndpoint` directly, skipping the network.
pub struct EndpointTransport<E> {
    endpoint: Arc<E>,
}

impl<E: SyncEndpoint> EndpointTransport<E> {
    pub fn new(endpoint: Arc<E>) -> Self {
        Self { endpoint }
    }
}

impl<E: SyncEndpoint + 'static> SyncTransport for EndpointTransport<E> {
    fn send_batch(
        &self,
        request: SyncRequest,
    ) -> Pin<Box<dyn Future<Output = TransportResult<SyncResponse>> + Send + '_>> {
        let reply: TransportResult<SyncResponse> = self
            .endpoint
            .apply(&request)
            .map(|processed_ids| SyncResponse { processed_ids })
            .map_err(|e| TransportFault::Rejected(e.to_string()).into());
        Box::pin(async move { reply })
    }
}

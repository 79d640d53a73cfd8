use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::sync::message::{SyncMessage, SyncRequest};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// What the broker must provide to receive edge batches.
///
/// Implementations must:
/// - accept resent ids harmlessly, deduplicating by `(node_id, id)`;
/// - return exactly the ids they durably applied, which may be a subset of
///   the batch;
/// - return `Err` when they cannot process the batch instead of an ack that
///   names nothing.
pub trait SyncEndpoint: Send + Sync {
    fn apply(&self, request: &SyncRequest) -> Result<Vec<u64>, EndpointError>;
}

/// In-memory endpoint honoring the contract above. Handy for tests and local
/// demos; nothing is persisted.
#[derive(Debug)]
pub struct MemoryEndpoint {
    state: Mutex<MemoryState>,
}

#[derive(Debug)]
struct MemoryState {
    accepted: HashMap<String, BTreeMap<u64, SyncMessage>>,
    available: bool,
    max_new_per_batch: Option<usize>,
    batches: usize,
    duplicates: usize,
}

impl MemoryEndpoint {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                accepted: HashMap::new(),
                available: true,
                max_new_per_batch: None,
                batches: 0,
                duplicates: 0,
            }),
        }
    }

    /// While unavailable every batch is rejected.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Accept at most `limit` previously unseen ids per batch.
    pub fn set_max_new_per_batch(&self, limit: Option<usize>) {
        self.lock().max_new_per_batch = limit;
    }

    /// Messages accepted from `node_id`, in id order.
    pub fn accepted(&self, node_id: &str) -> Vec<SyncMessage> {
        self.lock()
            .accepted
            .get(node_id)
            .map(|msgs| msgs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Batches seen, including rejected ones.
    pub fn batch_count(&self) -> usize {
        self.lock().batches
    }

    /// Resent messages that were acknowledged again without being re-applied.
    pub fn duplicate_count(&self) -> usize {
        self.lock().duplicates
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEndpoint for MemoryEndpoint {
    fn apply(&self, request: &SyncRequest) -> Result<Vec<u64>, EndpointError> {
        let mut state = self.lock();
        state.batches += 1;
        if !state.available {
            return Err(EndpointError::Unavailable("endpoint is offline".to_string()));
        }

        let limit = state.max_new_per_batch.unwrap_or(usize::MAX);
        let MemoryState {
            accepted,
            duplicates,
            ..
        } = &mut *state;
        let node = accepted.entry(request.node_id.clone()).or_default();

        let mut processed = Vec::with_capacity(request.messages.len());
        let mut fresh = 0;
        for msg in &request.messages {
            if node.contains_key(&msg.id) {
                *duplicates += 1;
                processed.push(msg.id);
            } else if fresh < limit {
                node.insert(msg.id, msg.clone());
                fresh += 1;
                processed.push(msg.id);
            }
        }
        Ok(processed)
    }
}

//! Edge node facade
//!
//! Pairs one node's `QueueStore` with a `SyncClient` behind the two calls a
//! producer needs: `enqueue` and `flush`. The facade owns no timer; whoever
//! wants periodic syncing calls `flush` on a schedule.
//!
//! Overlapping `flush` calls are serialized through a per-node async lock so
//! the same batch is never in flight twice. `enqueue` never waits on that lock,
//! only on the store's own short critical section.
//!
//! `run` is the scheduling loop the runner binary uses: one `flush` per tick
//! until a shutdown future resolves.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::persistence::QueueStore;
use crate::sync::{SyncClient, SyncConfig, SyncOutcome, SyncTransport, WebSocketTransport};
use crate::utils::error::StorageFault;

/// Whether a `flush` is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Idle,
    Syncing,
}

/// One edge node: its durable queue plus the client that drains it.
pub struct EdgeNode<T: SyncTransport = WebSocketTransport> {
    node_id: String,
    store: QueueStore,
    client: SyncClient<T>,
    flush_lock: Mutex<()>,
}

impl EdgeNode<WebSocketTransport> {
    /// Open the node described by `settings`, talking to the broker over WebSocket.
    pub fn open(settings: &Settings) -> Result<Self, StorageFault> {
        let store = QueueStore::for_node(&settings.node.data_dir, &settings.node.id)?
            .with_max_payload_bytes(settings.node.max_payload_bytes);
        let transport = WebSocketTransport::new(settings.sync.broker_url.clone());
        Ok(Self::with_transport(
            settings.node.id.clone(),
            store,
            transport,
            settings.sync.sync_config(),
        ))
    }
}

impl<T: SyncTransport> EdgeNode<T> {
    pub fn with_transport(
        node_id: impl Into<String>,
        store: QueueStore,
        transport: T,
        config: SyncConfig,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            client: SyncClient::new(transport, config),
            flush_lock: Mutex::new(()),
        }
    }

    /// Durably queue a message. Returns its id once it is on disk.
    ///
    /// An `Err` means the message is not queued, so retrying cannot create a
    /// duplicate. Payloads over the store's limit fail with
    /// `StorageFault::PayloadTooLarge`.
    pub fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<u64, StorageFault> {
        self.store.append(topic, payload)
    }

    /// Run exactly one sync round, waiting for any round already in progress.
    pub async fn flush(&self) -> Result<SyncOutcome, StorageFault> {
        let _syncing = self.flush_lock.lock().await;
        self.client.sync_once(&self.node_id, &self.store).await
    }

    /// Flush once per `every` until `shutdown` resolves.
    ///
    /// Ticks missed while a flush runs are not replayed back to back. A flush
    /// still waiting on the broker when `shutdown` resolves is dropped, and
    /// its batch stays pending.
    pub async fn run<S>(&self, every: Duration, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => break,
            }
            tokio::select! {
                outcome = self.flush() => self.report(outcome),
                _ = &mut shutdown => break,
            }
        }
        info!(node_id = %self.node_id, pending = self.pending_count(), "sync loop stopped");
    }

    fn report(&self, outcome: Result<SyncOutcome, StorageFault>) {
        match outcome {
            Ok(SyncOutcome::NoWork) => debug!("nothing to sync"),
            Ok(SyncOutcome::Synced { offered, confirmed }) => debug!(
                offered,
                confirmed = confirmed.len(),
                pending = self.pending_count(),
                "flushed"
            ),
            Ok(SyncOutcome::Failed(reason)) => warn!(
                pending = self.pending_count(),
                "sync failed, will retry next tick: {reason}"
            ),
            Err(e) => error!("storage fault during sync: {e}"),
        }
    }

    pub fn state(&self) -> NodeState {
        match self.flush_lock.try_lock() {
            Ok(_) => NodeState::Idle,
            Err(_) => NodeState::Syncing,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn pending_count(&self) -> usize {
        self.store.pending_count()
    }

    pub fn sync_config(&self) -> &SyncConfig {
        self.client.config()
    }
}

impl<T: SyncTransport> std::fmt::Debug for EdgeNode<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeNode")
            .field("node_id", &self.node_id)
            .field("store", &self.store)
            .field("state", &self.state())
            .finish()
    }
}

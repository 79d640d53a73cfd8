//! Sync protocol client
//!
//! Drives one synchronization round: read the oldest pending batch, offer it
//! to the broker, and mark as sent exactly the ids the broker confirmed.
//!
//! Concurrency and failure notes:
//! - The store guard is held only inside `peek_pending` and `mark_sent`. The
//!   network call runs without it, so producers keep enqueueing while a slow
//!   broker is being waited on.
//! - A transport or protocol failure returns `SyncOutcome::Failed` and leaves
//!   the store untouched. Retrying and backing off are the caller's business.
//! - A batch is cut short once its encoded size would pass
//!   `SyncConfig::max_batch_bytes`. The oldest record is always offered, so one
//!   large message delays the ones behind it by a round at most.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::persistence::{MessageRecord, QueueStore};
use crate::sync::message::{SyncMessage, SyncRequest};
use crate::sync::transport::{MAX_FRAME_BYTES, SyncTransport};
use crate::utils::error::{StorageFault, SyncFailure, TransportFault};

/// Tuning for one sync round.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum records offered per round.
    pub batch_size: usize,
    /// Upper bound on one broker round-trip.
    pub timeout: Duration,
    /// Soft cap on the encoded size of one batch.
    pub max_batch_bytes: usize,
}

impl SyncConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 100;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_MAX_BATCH_BYTES: usize = 8 << 20;

    // Room for the request envelope on top of the messages.
    const FRAME_HEADROOM: usize = 1 << 20;

    fn batch_budget(&self) -> usize {
        self.max_batch_bytes.min(MAX_FRAME_BYTES - Self::FRAME_HEADROOM)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: Self::DEFAULT_BATCH_SIZE,
            timeout: Self::DEFAULT_TIMEOUT,
            max_batch_bytes: Self::DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

/// Result of one `sync_once` round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing was pending; the broker was not contacted.
    NoWork,
    /// The broker answered. `confirmed` ids are now marked sent; the rest of
    /// the batch stays pending.
    Synced { offered: usize, confirmed: Vec<u64> },
    /// The round failed and no local state changed.
    Failed(SyncFailure),
}

impl SyncOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SyncOutcome::Failed(_))
    }

    pub fn confirmed_ids(&self) -> &[u64] {
        match self {
            SyncOutcome::Synced { confirmed, .. } => confirmed,
            _ => &[],
        }
    }
}

/// Runs sync rounds for a store over one transport.
pub struct SyncClient<T: SyncTransport> {
    transport: T,
    config: SyncConfig,
}

impl<T: SyncTransport> SyncClient<T> {
    pub fn new(transport: T, config: SyncConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one round for `node_id` against `store`.
    ///
    /// Only storage faults are returned as `Err`; everything that can go wrong
    /// on the wire is folded into `SyncOutcome::Failed`.
    pub async fn sync_once(
        &self,
        node_id: &str,
        store: &QueueStore,
    ) -> Result<SyncOutcome, StorageFault> {
        let mut batch = store.peek_pending(self.config.batch_size.max(1))?;
        if batch.is_empty() {
            debug!(node_id, "no pending messages, skipping sync");
            return Ok(SyncOutcome::NoWork);
        }

        let fits = fitting_prefix(&batch, self.config.batch_budget());
        if fits < batch.len() {
            debug!(node_id, peeked = batch.len(), offered = fits, "batch cut to byte budget");
            batch.truncate(fits);
        }

        let offered: BTreeSet<u64> = batch.iter().map(|r| r.id).collect();
        let request = SyncRequest::from_records(node_id, &batch);

        let response = match timeout(self.config.timeout, self.transport.send_batch(request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(failure)) => {
                warn!(node_id, batch = batch.len(), error = %failure, "sync round failed");
                return Ok(SyncOutcome::Failed(failure));
            }
            Err(_) => {
                let failure = SyncFailure::from(TransportFault::Timeout(self.config.timeout));
                warn!(node_id, batch = batch.len(), error = %failure, "sync round timed out");
                return Ok(SyncOutcome::Failed(failure));
            }
        };

        let (confirmed, foreign): (BTreeSet<u64>, BTreeSet<u64>) = response
            .processed_ids
            .into_iter()
            .partition(|id| offered.contains(id));
        if !foreign.is_empty() {
            warn!(node_id, ?foreign, "broker confirmed ids that were not offered; ignoring them");
        }

        let confirmed: Vec<u64> = confirmed.into_iter().collect();
        let marked = store.mark_sent(&confirmed)?;

        info!(
            node_id,
            offered = batch.len(),
            confirmed = confirmed.len(),
            marked,
            "sync round complete"
        );
        Ok(SyncOutcome::Synced {
            offered: batch.len(),
            confirmed,
        })
    }
}

/// How many leading records fit in `budget` encoded bytes. Never less than one.
fn fitting_prefix(records: &[MessageRecord], budget: usize) -> usize {
    let mut used = 0usize;
    for (i, record) in records.iter().enumerate() {
        used = used.saturating_add(SyncMessage::encoded_len_hint(record));
        if used > budget && i > 0 {
            return i;
        }
    }
    records.len()
}

impl<T: SyncTransport> std::fmt::Debug for SyncClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

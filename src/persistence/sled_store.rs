//! Durable queue store backed by `sled`.
//!
//! Records live in the `records` tree keyed by their big-endian id. Pending
//! records are additionally indexed in the `pending` tree by
//! `(created_at, id)`, so a forward scan of that tree yields the oldest
//! pending messages first. The id counter lives in `meta` and is bumped in the
//! same transaction that writes the record, which keeps ids monotonic across
//! restarts even if records are later compacted away by an external tool.
//!
//! Every multi-tree write goes through a sled transaction and is flushed
//! before returning. Background flushing is turned off. An append whose flush
//! fails is withdrawn again before the error is returned, so a caller that
//! retries never leaves a duplicate behind.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Db, Transactional, Tree};
use tracing::{debug, error};

use crate::utils::error::StorageFault;

const RECORDS_TREE: &str = "records";
const PENDING_TREE: &str = "pending";
const META_TREE: &str = "meta";
const NEXT_ID_KEY: &[u8] = b"next_id";

/// Default cap on a single payload.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4 << 20;
/// Hard ceiling for `with_max_payload_bytes`. A payload this size still fits
/// in one sync frame once encoded.
pub const MAX_PAYLOAD_BYTES_CEILING: usize = 32 << 20;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Sent,
}

/// A message accepted by the edge node, as persisted on disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: u64,
    pub topic: String,
    pub payload: Vec<u8>,
    /// Seconds since the Unix epoch.
    pub created_at: i64,
    pub status: Status,
}

/// Durable, ordered outbox of one edge node.
///
/// Clones share the same trees and write guard.
#[derive(Clone)]
pub struct QueueStore {
    db: Db,
    records: Tree,
    pending: Tree,
    meta: Tree,
    guard: Arc<Mutex<()>>,
    max_payload_bytes: usize,
}

impl QueueStore {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageFault> {
        let path = path.as_ref();
        let db = sled::Config::new()
            .path(path)
            .flush_every_ms(None)
            .open()?;

        let store = Self {
            records: db.open_tree(RECORDS_TREE)?,
            pending: db.open_tree(PENDING_TREE)?,
            meta: db.open_tree(META_TREE)?,
            db,
            guard: Arc::new(Mutex::new(())),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        };

        debug!(
            path = %path.display(),
            pending = store.pending.len(),
            "opened queue store"
        );
        Ok(store)
    }

    /// Open the store owned by `node_id` under `data_dir`.
    pub fn for_node(data_dir: impl AsRef<Path>, node_id: &str) -> Result<Self, StorageFault> {
        Self::open(node_store_path(data_dir.as_ref(), node_id)?)
    }

    /// Reject payloads larger than `limit` bytes on `append`.
    ///
    /// The limit is capped at `MAX_PAYLOAD_BYTES_CEILING`.
    pub fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit.min(MAX_PAYLOAD_BYTES_CEILING);
        self
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Persist a new pending record and return its id.
    ///
    /// Returns only after the record is flushed to disk. On `Err` the record
    /// is not pending: either nothing was written or the write was withdrawn
    /// after a failed flush. The id it took is never handed out again.
    pub fn append(&self, topic: &str, payload: &[u8]) -> Result<u64, StorageFault> {
        let _guard = self.lock();
        self.append_locked(topic, payload, Utc::now().timestamp(), |db| db.flush())
    }

    pub(crate) fn append_at(
        &self,
        topic: &str,
        payload: &[u8],
        created_at: i64,
    ) -> Result<u64, StorageFault> {
        let _guard = self.lock();
        self.append_locked(topic, payload, created_at, |db| db.flush())
    }

    /// Body of `append`. The caller holds the write guard; `flush` makes the
    /// committed transaction durable.
    pub(crate) fn append_locked<F>(
        &self,
        topic: &str,
        payload: &[u8],
        created_at: i64,
        flush: F,
    ) -> Result<u64, StorageFault>
    where
        F: FnOnce(&Db) -> sled::Result<usize>,
    {
        if payload.len() > self.max_payload_bytes {
            return Err(StorageFault::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload_bytes,
            });
        }

        let id = (&self.records, &self.pending, &self.meta).transaction(
            |(records, pending, meta)| -> ConflictableTransactionResult<u64, StorageFault> {
                let id = match meta.get(NEXT_ID_KEY)? {
                    Some(raw) => decode_u64(&raw).map_err(ConflictableTransactionError::Abort)?,
                    None => 1,
                };

                let record = MessageRecord {
                    id,
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                    created_at,
                    status: Status::Pending,
                };
                let encoded = serde_json::to_vec(&record)
                    .map_err(|e| ConflictableTransactionError::Abort(StorageFault::Codec(e)))?;

                let empty: &[u8] = &[];
                records.insert(&id.to_be_bytes()[..], encoded)?;
                pending.insert(&pending_key(created_at, id)[..], empty)?;
                meta.insert(NEXT_ID_KEY, &(id + 1).to_be_bytes()[..])?;
                Ok(id)
            },
        )?;

        if let Err(e) = flush(&self.db) {
            self.withdraw(id, created_at);
            return Err(e.into());
        }
        Ok(id)
    }

    /// Undo the record half of an append. `next_id` stays bumped.
    fn withdraw(&self, id: u64, created_at: i64) {
        let result = (&self.records, &self.pending).transaction(
            |(records, pending)| -> ConflictableTransactionResult<(), StorageFault> {
                records.remove(&id.to_be_bytes()[..])?;
                pending.remove(&pending_key(created_at, id)[..])?;
                Ok(())
            },
        );
        if let Err(e) = result.map_err(StorageFault::from) {
            error!(id, "failed to withdraw unflushed record: {e}");
        }
    }

    /// Up to `limit` pending records, oldest first. Never changes state.
    pub fn peek_pending(&self, limit: usize) -> Result<Vec<MessageRecord>, StorageFault> {
        let _guard = self.lock();

        let mut batch = Vec::with_capacity(limit.min(self.pending.len()));
        for entry in self.pending.iter().take(limit) {
            let (key, _) = entry?;
            let id = id_from_pending_key(&key)?;
            let raw = self.records.get(id.to_be_bytes())?.ok_or_else(|| {
                StorageFault::Corrupted(format!("pending index names missing record {id}"))
            })?;
            batch.push(serde_json::from_slice(&raw)?);
        }
        Ok(batch)
    }

    /// Mark the named ids as sent. Unknown and already-sent ids are ignored.
    ///
    /// Returns how many records changed state.
    pub fn mark_sent(&self, ids: &[u64]) -> Result<usize, StorageFault> {
        if ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock();

        let marked = (&self.records, &self.pending).transaction(
            |(records, pending)| -> ConflictableTransactionResult<usize, StorageFault> {
                let mut marked = 0;
                for &id in ids {
                    let key = id.to_be_bytes();
                    let Some(raw) = records.get(&key)? else {
                        continue;
                    };
                    let mut record: MessageRecord = serde_json::from_slice(&raw)
                        .map_err(|e| ConflictableTransactionError::Abort(StorageFault::Codec(e)))?;
                    if record.status == Status::Sent {
                        continue;
                    }

                    record.status = Status::Sent;
                    let encoded = serde_json::to_vec(&record)
                        .map_err(|e| ConflictableTransactionError::Abort(StorageFault::Codec(e)))?;
                    records.insert(&key[..], encoded)?;
                    pending.remove(&pending_key(record.created_at, id)[..])?;
                    marked += 1;
                }
                Ok(marked)
            },
        )?;

        if marked > 0 {
            self.db.flush()?;
        }
        Ok(marked)
    }

    pub fn get(&self, id: u64) -> Result<Option<MessageRecord>, StorageFault> {
        let _guard = self.lock();
        match self.records.get(id.to_be_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Total records, pending and sent.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // sled transactions never leave partial writes behind a panic, so a
    // poisoned guard is still safe to reuse.
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Location of the store owned by `node_id`.
pub fn node_store_path(data_dir: &Path, node_id: &str) -> Result<PathBuf, StorageFault> {
    let invalid = node_id.trim().is_empty()
        || node_id.contains(['/', '\\'])
        || node_id.contains("..");
    if invalid {
        return Err(StorageFault::InvalidNodeId(node_id.to_string()));
    }
    Ok(data_dir.join(format!("edge_node_{node_id}")))
}

/// `(created_at, id)` encoded so byte order matches numeric order.
fn pending_key(created_at: i64, id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&((created_at as u64) ^ (1 << 63)).to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

fn id_from_pending_key(key: &[u8]) -> Result<u64, StorageFault> {
    if key.len() != 16 {
        return Err(StorageFault::Corrupted(format!(
            "pending index key has {} bytes",
            key.len()
        )));
    }
    decode_u64(&key[8..])
}

fn decode_u64(raw: &[u8]) -> Result<u64, StorageFault> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| StorageFault::Corrupted(format!("expected 8-byte integer, got {}", raw.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

impl std::fmt::Debug for QueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore")
            .field("db", &"sled::Db")
            .field("records", &self.records.len())
            .field("pending", &self.pending.len())
            .field("max_payload_bytes", &self.max_payload_bytes)
            .finish()
    }
}

//! The `error` module defines the fault types shared by the store, the sync
//! client and the edge node facade.
//!
//! Storage faults are returned as `Err` because the caller must decide what to
//! do with a producer call that could not be persisted. Transport and protocol
//! faults are routine on an edge link, so they travel inside
//! `SyncOutcome::Failed` instead.

use std::time::Duration;

use sled::transaction::TransactionError;

/// Local persistence failed.
#[derive(Debug, thiserror::Error)]
pub enum StorageFault {
    /// The underlying sled database reported an error (I/O, disk full, corruption).
    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    /// A record could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The on-disk layout is inconsistent.
    #[error("corrupted store: {0}")]
    Corrupted(String),

    /// A payload exceeds the store's configured size limit. Nothing was written.
    #[error("payload of {size} bytes exceeds the {limit}-byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The node id cannot be used to derive a store location.
    #[error("invalid node id: '{0}'\n  hint: node ids must be non-empty and must not contain path separators")]
    InvalidNodeId(String),
}

impl From<TransactionError<StorageFault>> for StorageFault {
    fn from(err: TransactionError<StorageFault>) -> Self {
        match err {
            TransactionError::Abort(fault) => fault,
            TransactionError::Storage(e) => StorageFault::Db(e),
        }
    }
}

/// The network round-trip to the broker did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportFault {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("connection closed before the broker replied")]
    ConnectionClosed,

    #[error("no reply from broker within {0:?}")]
    Timeout(Duration),

    /// The broker answered with a non-success reply.
    #[error("broker rejected batch: {0}")]
    Rejected(String),
}

/// The broker replied, but not with something we understand.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolFault {
    #[error("failed to encode sync request: {0}")]
    Encode(String),

    #[error("malformed broker reply: {0}")]
    Malformed(String),
}

/// Why a sync round failed. Both kinds are safe to retry unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncFailure {
    #[error(transparent)]
    Transport(#[from] TransportFault),

    #[error(transparent)]
    Protocol(#[from] ProtocolFault),
}

//! # edgeq
//!
//! `edgeq` is an edge-resident store-and-forward message queue. Producers at
//! the network edge hand messages to a local, durable queue; the queue is
//! drained to a central broker whenever a sync round succeeds.
//!
//! A message accepted by `enqueue` stays `pending` on disk until the broker
//! names its id in an acknowledgment. Resending is always safe because the
//! broker deduplicates by id, so delivery is at-least-once from the broker's
//! point of view and exactly-once from the edge's.
//!
//! ## Core Modules
//!
//! - `persistence`: The sled-backed durable queue (`QueueStore`).
//! - `sync`: One sync round (`SyncClient::sync_once`), the wire messages, and the transport seam.
//! - `edge`: The `EdgeNode` facade exposing `enqueue` and `flush`.
//! - `endpoint`: The broker-side contract plus a WebSocket adapter and an in-memory implementation.
//! - `config`: Loading node settings from files and environment.
//! - `utils`: Fault types and logging setup.

pub mod config;
pub mod edge;
pub mod endpoint;
pub mod persistence;
pub mod sync;
pub mod utils;

pub use edge::{EdgeNode, NodeState};
pub use persistence::{MessageRecord, QueueStore, Status};
pub use sync::{SyncClient, SyncConfig, SyncOutcome};
pub use utils::error::{ProtocolFault, StorageFault, SyncFailure, TransportFault};

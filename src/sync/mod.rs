//! The `sync` module moves pending messages from the local store to the
//! broker.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ SyncClient  │────►│  Transport  │────►│   Broker    │
//! │ (sync_once) │◄────│   (trait)   │◄────│  endpoint   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │ QueueStore  │  (pending → sent)
//! └─────────────┘
//! ```

pub mod client;
pub mod message;
pub mod transport;

pub use client::{SyncClient, SyncConfig, SyncOutcome};
pub use message::{SyncMessage, SyncRequest, SyncResponse};
pub use transport::{SyncTransport, WebSocketTransport};

#[cfg(test)]
pub(crate) mod test_helpers;

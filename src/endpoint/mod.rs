//! The `endpoint` module describes the broker side of the sync protocol.
//!
//! The broker is an external collaborator. What lives here is its contract
//! (`SyncEndpoint`), an in-memory implementation of that contract, and a
//! WebSocket adapter that serves any implementation. There is no topic
//! fan-out or durable storage on this side.

pub mod contract;
pub mod websocket;

pub use contract::{EndpointError, MemoryEndpoint, SyncEndpoint};
pub use websocket::start_sync_endpoint;

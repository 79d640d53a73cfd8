//! The `persistence` module holds the edge node's durable queue.
//!
//! Messages accepted from producers are written here as `pending` records and
//! stay until the broker explicitly confirms them, at which point they flip to
//! `sent`. It uses `sled` as an embedded key-value store so a crash at any
//! point leaves the queue readable on restart.

pub mod sled_store;

pub use sled_store::{
    DEFAULT_MAX_PAYLOAD_BYTES, MAX_PAYLOAD_BYTES_CEILING, MessageRecord, QueueStore, Status,
};

#[cfg(test)]
mod tests;

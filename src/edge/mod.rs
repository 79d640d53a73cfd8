//! The `edge` module is what a producer on the node talks to: `EdgeNode`
//! wraps the durable queue and the sync client behind `enqueue` and `flush`.

pub mod node;

pub use node::{EdgeNode, NodeState};

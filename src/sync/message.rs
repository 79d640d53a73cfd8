use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;

use crate::persistence::MessageRecord;

/// One queued message as offered to the broker.
///
/// `timestamp` is the record's `created_at`, in seconds since the epoch.
/// `payload` travels as standard base64.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub id: u64,
    pub topic: String,
    #[serde_as(as = "Base64")]
    pub payload: Vec<u8>,
    pub timestamp: i64,
}

impl SyncMessage {
    /// Upper bound on the bytes this message adds to an encoded `sync` frame.
    pub fn encoded_len_hint(record: &MessageRecord) -> usize {
        const FIELD_OVERHEAD: usize = 96;
        record.payload.len().div_ceil(3) * 4 + record.topic.len() * 6 + FIELD_OVERHEAD
    }
}

impl From<&MessageRecord> for SyncMessage {
    fn from(record: &MessageRecord) -> Self {
        Self {
            id: record.id,
            topic: record.topic.clone(),
            payload: record.payload.clone(),
            timestamp: record.created_at,
        }
    }
}

/// A batch of pending messages from one edge node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub node_id: String,
    pub messages: Vec<SyncMessage>,
}

impl SyncRequest {
    pub fn from_records(node_id: &str, records: &[MessageRecord]) -> Self {
        Self {
            node_id: node_id.to_string(),
            messages: records.iter().map(SyncMessage::from).collect(),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.messages.iter().map(|m| m.id)
    }
}

/// The ids the broker has durably accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub processed_ids: Vec<u64>,
}

/// Frames sent by the edge node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EdgeMessage {
    #[serde(rename = "sync")]
    Sync(SyncRequest),
}

/// Frames sent back by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrokerMessage {
    #[serde(rename = "sync_ack")]
    SyncAck(SyncResponse),
    #[serde(rename = "error")]
    Error { message: String },
}

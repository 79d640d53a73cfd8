use std::time::Duration;

use serde::Deserialize;

use crate::persistence::DEFAULT_MAX_PAYLOAD_BYTES;
use crate::sync::SyncConfig;

/// Top-level configuration settings for an edge node process.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub node: NodeSettings,
    pub sync: SyncSettings,
    pub logging: LoggingSettings,
}

/// Identity of this node and where its queue lives.
#[derive(Debug, Deserialize, Clone)]
pub struct NodeSettings {
    pub id: String,
    pub data_dir: String,
    /// Largest payload `enqueue` accepts.
    pub max_payload_bytes: usize,
}

/// How and how often the node talks to the broker.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncSettings {
    pub broker_url: String,
    pub batch_size: usize,
    pub timeout_ms: u64,
    pub max_batch_bytes: usize,
    /// Delay between scheduled flushes in the runner binary.
    pub interval_secs: u64,
}

impl SyncSettings {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            batch_size: self.batch_size,
            timeout: Duration::from_millis(self.timeout_ms),
            max_batch_bytes: self.max_batch_bytes,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Log verbosity for the runner binary.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub node: Option<PartialNodeSettings>,
    pub sync: Option<PartialSyncSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialNodeSettings {
    pub id: Option<String>,
    pub data_dir: Option<String>,
    pub max_payload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialSyncSettings {
    pub broker_url: Option<String>,
    pub batch_size: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub max_batch_bytes: Option<usize>,
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node: NodeSettings {
                id: "edge-1".to_string(),
                data_dir: "data".to_string(),
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            },
            sync: SyncSettings {
                broker_url: "ws://127.0.0.1:8080".to_string(),
                batch_size: SyncConfig::DEFAULT_BATCH_SIZE,
                timeout_ms: SyncConfig::DEFAULT_TIMEOUT.as_millis() as u64,
                max_batch_bytes: SyncConfig::DEFAULT_MAX_BATCH_BYTES,
                interval_secs: 5,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Overlay what was provided on top of the defaults.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();
        let node = self.node;
        let sync = self.sync;
        let logging = self.logging;

        Settings {
            node: NodeSettings {
                id: node
                    .as_ref()
                    .and_then(|n| n.id.clone())
                    .unwrap_or(default.node.id),
                data_dir: node
                    .as_ref()
                    .and_then(|n| n.data_dir.clone())
                    .unwrap_or(default.node.data_dir),
                max_payload_bytes: node
                    .as_ref()
                    .and_then(|n| n.max_payload_bytes)
                    .unwrap_or(default.node.max_payload_bytes),
            },
            sync: SyncSettings {
                broker_url: sync
                    .as_ref()
                    .and_then(|s| s.broker_url.clone())
                    .unwrap_or(default.sync.broker_url),
                batch_size: sync
                    .as_ref()
                    .and_then(|s| s.batch_size)
                    .unwrap_or(default.sync.batch_size),
                timeout_ms: sync
                    .as_ref()
                    .and_then(|s| s.timeout_ms)
                    .unwrap_or(default.sync.timeout_ms),
                max_batch_bytes: sync
                    .as_ref()
                    .and_then(|s| s.max_batch_bytes)
                    .unwrap_or(default.sync.max_batch_bytes),
                interval_secs: sync
                    .as_ref()
                    .and_then(|s| s.interval_secs)
                    .unwrap_or(default.sync.interval_secs),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
        }
    }
}

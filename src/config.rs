//! Configuration for the anonymization engine.
//!
//! Configuration can be constructed programmatically or deserialized from JSON.
//! Every field has a default, so an empty object (`{}`) is a valid config that
//! talks to a local Redis.
//!
//! # Configuration Structure
//!
//! ```text
//! AnonymizerConfig
//! ├── source: SourceConfig          # Redis holding the customers + change stream
//! ├── target: TargetConfig          # Redis receiving anonymized customers
//! ├── live: LiveConfig              # Drain triggers for live sync
//! ├── reindex: ReindexConfig        # Batch size for the full backfill
//! ├── queue: QueueConfig            # Mailbox bound and overflow policy
//! ├── checkpoint: CheckpointConfig  # Where the resume position is persisted
//! └── anonymize: AnonymizeConfig    # Token length
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "source": { "redis_url": "redis://source:6379", "stream_key": "customers:changes" },
//!   "target": { "redis_url": "redis://target:6379" },
//!   "live": { "batch_size": 1000, "flush_interval": "1s" },
//!   "queue": { "mailbox_capacity": 10000, "overflow": "block" },
//!   "checkpoint": { "backend": "sqlite", "path": "/var/lib/anonymizer/checkpoint.db" }
//! }
//! ```

use crate::error::{AnonymizerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to [`AnonymizerEngine::connect()`](crate::AnonymizerEngine::connect).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnonymizerConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub reindex: ReindexConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub anonymize: AnonymizeConfig,
}

impl AnonymizerConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AnonymizerError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            AnonymizerError::Config(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Point both source and target at the same Redis (the usual deployment).
    pub fn with_redis_url(mut self, url: &str) -> Self {
        self.source.redis_url = url.to_string();
        self.target.redis_url = url.to_string();
        self
    }

    /// Reject settings that would make the pipeline stall or misbehave.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("live.batch_size", self.live.batch_size),
            ("live.read_count", self.live.read_count),
            ("reindex.batch_size", self.reindex.batch_size),
            ("reindex.scan_count", self.reindex.scan_count),
            ("queue.mailbox_capacity", self.queue.mailbox_capacity),
            ("anonymize.length", self.anonymize.length),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AnonymizerError::Config(format!("{} must be at least 1", name)));
            }
        }

        self.live.flush_interval_duration()?;
        self.live.block_timeout_duration()?;

        // A scan of either prefix must never see the other collection's keys
        let source = &self.source.document_prefix;
        let target = &self.target.document_prefix;
        if self.source.redis_url == self.target.redis_url
            && (source.starts_with(target.as_str()) || target.starts_with(source.as_str()))
        {
            return Err(AnonymizerError::Config(format!(
                "source document_prefix {:?} and target document_prefix {:?} overlap on the same Redis",
                source, target
            )));
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Source / target
// ═══════════════════════════════════════════════════════════════════════════════

/// Source collection: documents plus their change stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Redis URL, e.g. `"redis://localhost:6379"`.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Stream key the source application appends change entries to.
    #[serde(default = "default_stream_key")]
    pub stream_key: String,

    /// Documents live at `{document_prefix}{id}`.
    #[serde(default = "default_source_prefix")]
    pub document_prefix: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            stream_key: default_stream_key(),
            document_prefix: default_source_prefix(),
        }
    }
}

impl SourceConfig {
    /// Redis key of a source document.
    pub fn document_key(&self, id: &str) -> String {
        format!("{}{}", self.document_prefix, id)
    }
}

/// Target collection for anonymized documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Anonymized documents are written to `{document_prefix}{id}`.
    #[serde(default = "default_target_prefix")]
    pub document_prefix: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            document_prefix: default_target_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_stream_key() -> String {
    "customers:changes".to_string()
}

fn default_source_prefix() -> String {
    "customers:".to_string()
}

fn default_target_prefix() -> String {
    "customers_anonymised:".to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// LiveConfig: drain triggers while tailing the change stream
// ═══════════════════════════════════════════════════════════════════════════════

/// Live sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Queue length that triggers an immediate drain, and the maximum
    /// number of records per drain.
    #[serde(default = "default_live_batch_size")]
    pub batch_size: usize,

    /// Period of the drain timer as a duration string (e.g., "1s").
    #[serde(default = "default_flush_interval")]
    pub flush_interval: String,

    /// XREAD block timeout as a duration string (e.g., "5s").
    #[serde(default = "default_block_timeout")]
    pub block_timeout: String,

    /// Maximum entries per XREAD call.
    #[serde(default = "default_read_count")]
    pub read_count: usize,
}

fn default_live_batch_size() -> usize {
    1000
}

fn default_flush_interval() -> String {
    "1s".to_string()
}

fn default_block_timeout() -> String {
    "5s".to_string()
}

fn default_read_count() -> usize {
    500
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            flush_interval: "1s".to_string(),
            block_timeout: "5s".to_string(),
            read_count: 500,
        }
    }
}

impl LiveConfig {
    /// Parse the flush_interval string to a Duration.
    pub fn flush_interval_duration(&self) -> Result<Duration> {
        parse_nonzero_duration("live.flush_interval", &self.flush_interval)
    }

    /// Parse the block_timeout string to a Duration.
    pub fn block_timeout_duration(&self) -> Result<Duration> {
        parse_nonzero_duration("live.block_timeout", &self.block_timeout)
    }

    /// Fast timers for tests.
    pub fn testing() -> Self {
        Self {
            batch_size: 10,
            flush_interval: "20ms".to_string(),
            block_timeout: "50ms".to_string(),
            read_count: 10,
        }
    }
}

fn parse_nonzero_duration(name: &str, value: &str) -> Result<Duration> {
    let duration = humantime::parse_duration(value)
        .map_err(|e| AnonymizerError::Config(format!("{} {:?}: {}", name, value, e)))?;
    if duration.is_zero() {
        return Err(AnonymizerError::Config(format!("{} must be positive", name)));
    }
    Ok(duration)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReindexConfig: full backfill
// ═══════════════════════════════════════════════════════════════════════════════

/// Full reindex settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexConfig {
    /// Records per bulk write. Large to amortize round trips.
    #[serde(default = "default_reindex_batch_size")]
    pub batch_size: usize,

    /// SCAN COUNT hint when walking the source keyspace.
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
}

fn default_reindex_batch_size() -> usize {
    100_000
}

fn default_scan_count() -> usize {
    1000
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            batch_size: 100_000,
            scan_count: 1000,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// QueueConfig: bound between the feed and the pipeline
// ═══════════════════════════════════════════════════════════════════════════════

/// What the feed does when the pipeline mailbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for space. The change stream retains unread events meanwhile.
    #[default]
    Block,
    /// Abort the process with [`AnonymizerError::QueueOverflow`].
    Fail,
}

/// Buffering between the change feed and the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum change events waiting in the mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    #[serde(default)]
    pub overflow: OverflowPolicy,
}

fn default_mailbox_capacity() -> usize {
    10_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 10_000,
            overflow: OverflowPolicy::Block,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CheckpointConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Checkpoint storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    /// SQLite database (WAL mode).
    #[default]
    Sqlite,
    /// Single JSON file, replaced atomically on each write.
    File,
}

/// Checkpoint persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,

    /// Database or file path.
    #[serde(default = "default_checkpoint_path")]
    pub path: String,

    /// Name of the checkpoint slot (row key in SQLite).
    #[serde(default = "default_checkpoint_name")]
    pub name: String,
}

fn default_checkpoint_path() -> String {
    "anonymizer_checkpoint.db".to_string()
}

fn default_checkpoint_name() -> String {
    "customers".to_string()
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::Sqlite,
            path: default_checkpoint_path(),
            name: default_checkpoint_name(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AnonymizeConfig
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizeConfig {
    /// Length of every generated token.
    #[serde(default = "default_token_length")]
    pub length: usize,
}

fn default_token_length() -> usize {
    crate::anonymize::DEFAULT_TOKEN_LENGTH
}

impl Default for AnonymizeConfig {
    fn default() -> Self {
        Self {
            length: default_token_length(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the anonymization engine.
//!
//! Every error the pipeline can raise is fatal for the process: there is no
//! skip-and-continue for individual records. Errors are categorized so that the
//! binary can log them and exit with a stable, category-specific code.
//!
//! # Error Categories
//!
//! | Error Type | Exit code | Description |
//! |------------|-----------|-------------|
//! | `FeedSubscription` | 2 | Resume position evicted from the change stream (run a reindex) |
//! | `CheckpointStore` | 3 | SQLite checkpoint store failure |
//! | `CheckpointIo` | 3 | File checkpoint store failure |
//! | `BulkWrite` | 4 | Target bulk upsert failed (partially or totally) |
//! | `Transform` | 5 | Source document does not match the record schema |
//! | `StreamParse` | 5 | Malformed change stream entry |
//! | `Redis` | 1 | Network errors, timeouts, connection failures |
//! | `QueueOverflow` | 1 | Mailbox full under the `fail` overflow policy |
//! | `Config` | 1 | Configuration invalid |
//! | `InvalidState` | 1 | Pipeline invariant violated |
//! | `Internal` | 1 | Unexpected internal error |
//!
//! Checkpoint *reads* never surface as errors: the [`Checkpointer`](crate::checkpoint::Checkpointer)
//! degrades to "resume from tail" and reports the gap risk loudly instead.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AnonymizerError>;

/// Errors that can occur while syncing or reindexing.
#[derive(Error, Debug)]
pub enum AnonymizerError {
    /// The requested resume position is older than the oldest entry retained
    /// by the change stream. Events may have been lost; only a full reindex
    /// can restore the target.
    #[error("Resume position {position} was evicted from the change stream (oldest retained: {oldest}); run a full reindex")]
    FeedSubscription { position: String, oldest: String },

    /// Redis connection or command error.
    #[error("Redis error ({operation}): {message}")]
    Redis {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// A change stream entry did not have the expected shape.
    #[error("Stream parse error: {0}")]
    StreamParse(String),

    /// SQLite error during checkpoint persistence.
    #[error("Checkpoint store error: {0}")]
    CheckpointStore(#[from] sqlx::Error),

    /// Filesystem error during checkpoint persistence.
    #[error("Checkpoint I/O error: {0}")]
    CheckpointIo(#[from] std::io::Error),

    /// The target rejected a bulk upsert. The whole batch is the unit of failure.
    #[error("Bulk write of {attempted} records failed: {message}")]
    BulkWrite { attempted: usize, message: String },

    /// A source document could not be decoded into a customer record.
    #[error("Transform error for document '{id}': {message}")]
    Transform { id: String, message: String },

    /// The append mailbox was full and the overflow policy is `fail`.
    #[error("Pending queue overflow: mailbox capacity {capacity} exhausted")]
    QueueOverflow { capacity: usize },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A pipeline invariant was violated (e.g. a checkpoint moving backwards).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnonymizerError {
    /// Create a Redis error from a redis::RedisError
    pub fn redis(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a Redis error without source
    pub fn redis_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a transform error for a document.
    pub fn transform(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transform {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::FeedSubscription { .. } => 2,
            Self::CheckpointStore(_) | Self::CheckpointIo(_) => 3,
            Self::BulkWrite { .. } => 4,
            Self::Transform { .. } | Self::StreamParse(_) => 5,
            Self::Redis { .. }
            | Self::QueueOverflow { .. }
            | Self::Config(_)
            | Self::InvalidState { .. }
            | Self::Internal(_) => 1,
        }
    }

    /// Short label used for the `error_type` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FeedSubscription { .. } => "feed_subscription",
            Self::Redis { .. } => "redis",
            Self::StreamParse(_) => "stream_parse",
            Self::CheckpointStore(_) | Self::CheckpointIo(_) => "checkpoint_io",
            Self::BulkWrite { .. } => "bulk_write",
            Self::Transform { .. } => "transform",
            Self::QueueOverflow { .. } => "queue_overflow",
            Self::Config(_) => "config",
            Self::InvalidState { .. } => "invalid_state",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<redis::RedisError> for AnonymizerError {
    fn from(e: redis::RedisError) -> Self {
        Self::redis("unknown", e)
    }
}

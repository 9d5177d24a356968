//! # Anonymization Engine
//!
//! A CDC sync agent that copies customer records from a source collection
//! into a target collection, anonymizing personal fields on the way.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                          anonymization-engine                             │
//! │                                                                           │
//! │  ┌──────────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐  │
//! │  │ ChangeFeedReader │──►│ BatchQueue │──►│ Anonymizer │──►│TargetWriter│  │
//! │  │ (XREAD + MGET)   │   │ (FIFO)     │   │ (SHA-256)  │   │(MULTI/EXEC)│  │
//! │  └──────────────────┘   └────────────┘   └────────────┘   └────────────┘  │
//! │           ▲                   ▲ timer / size trigger             │        │
//! │           │ resume                                               ▼        │
//! │  ┌──────────────────────────────────────────────────────────────────────┐ │
//! │  │ Checkpointer (SQLite or file): position of the last written event    │ │
//! │  └──────────────────────────────────────────────────────────────────────┘ │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Modes
//!
//! 1. **Live**: tail the change stream from the checkpoint, drain every
//!    `flush_interval` or every `batch_size` records, checkpoint after each write
//! 2. **Full reindex**: scan the whole source collection once, write it in
//!    large batches, exit
//!
//! Delivery is at-least-once: a crash between a target write and its
//! checkpoint replays that batch, and the upserting writer makes the replay
//! harmless.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use anonymization_engine::{AnonymizerConfig, AnonymizerEngine, RetryConfig};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> anonymization_engine::Result<()> {
//!     let config = AnonymizerConfig::default().with_redis_url("redis://localhost:6379");
//!     let engine = AnonymizerEngine::connect(config, &RetryConfig::startup()).await?;
//!
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let summary = engine.run_live(shutdown_rx).await?;
//!     println!("wrote {} records", summary.written);
//!     Ok(())
//! }
//! ```

pub mod anonymize;
pub mod checkpoint;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod pipeline;
pub mod position;
pub mod queue;
pub mod record;
pub mod snapshot;
pub mod store;
pub mod target;

// Re-exports for convenience
pub use anonymize::{anonymize_email, anonymize_string, Anonymizer};
pub use checkpoint::{Checkpointer, FileCheckpointStore, SqliteCheckpointStore};
pub use config::{AnonymizerConfig, CheckpointBackend, OverflowPolicy};
pub use connection::RetryConfig;
pub use coordinator::{
    AnonymizerEngine, EngineState, LiveRunner, LiveSettings, LiveSummary, ReindexRunner,
    ReindexSummary,
};
pub use error::{AnonymizerError, Result};
pub use feed::{ChangeFeedReader, RedisChangeFeed};
pub use pipeline::{DrainReport, Pipeline};
pub use position::Position;
pub use queue::BatchQueue;
pub use record::{Address, Customer};
pub use snapshot::RedisSnapshot;
pub use store::{
    ChangeEvent, ChangeFeed, ChangeSource, CheckpointStore, OperationKind, SnapshotSource,
    TargetStore,
};
pub use target::{RedisTargetStore, TargetWriter, UpsertOp};

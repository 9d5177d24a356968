// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Anonymization engine coordinator.
//!
//! Wires the Redis bindings, the checkpoint store and the anonymizer into
//! one of the two run modes:
//!
//! - **Live** ([`AnonymizerEngine::run_live`]): tail the change stream from
//!   the checkpoint until shutdown, via [`LiveRunner`]
//! - **Reindex** ([`AnonymizerEngine::run_reindex`]): copy the whole source
//!   collection once, via [`ReindexRunner`]
//!
//! The runners are generic over the storage traits in [`crate::store`]; the
//! engine only decides which concrete bindings to hand them.

mod live;
mod reindex;
mod types;

pub use live::LiveRunner;
pub use reindex::ReindexRunner;
pub use types::{EngineState, LiveSettings, LiveSummary, ReindexSummary};

use crate::anonymize::Anonymizer;
use crate::checkpoint::{self, Checkpointer};
use crate::config::AnonymizerConfig;
use crate::connection::{connect, RetryConfig};
use crate::error::{AnonymizerError, Result};
use crate::feed::ChangeFeedReader;
use crate::metrics;
use crate::snapshot::RedisSnapshot;
use crate::target::RedisTargetStore;
use redis::aio::ConnectionManager;
use tokio::sync::watch;
use tracing::{error, info};

/// The anonymization engine.
///
/// Holds the source and target connections. Each engine runs one mode once.
///
/// Live mode opens one more source connection for the change feed. A pending
/// `XREAD BLOCK` holds its connection until it returns, so nothing else may
/// be queued behind it.
pub struct AnonymizerEngine {
    config: AnonymizerConfig,
    retry: RetryConfig,
    source: ConnectionManager,
    target: ConnectionManager,
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,
}

impl AnonymizerEngine {
    /// Validate `config` and connect to the source and target Redis.
    ///
    /// Source and target share one connection when their URLs match.
    pub async fn connect(config: AnonymizerConfig, retry: &RetryConfig) -> Result<Self> {
        config.validate()?;

        let source = connect("source", &config.source.redis_url, retry).await?;
        let target = if config.target.redis_url == config.source.redis_url {
            source.clone()
        } else {
            connect("target", &config.target.redis_url, retry).await?
        };

        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        Ok(Self {
            config,
            retry: retry.clone(),
            source,
            target,
            state_tx,
            state_rx,
        })
    }

    pub fn config(&self) -> &AnonymizerConfig {
        &self.config
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    fn begin(&self, next: EngineState) -> Result<()> {
        let current = self.state();
        if current != EngineState::Created {
            return Err(AnonymizerError::InvalidState {
                expected: "Created".to_string(),
                actual: current.to_string(),
            });
        }
        let _ = self.state_tx.send(next);
        Ok(())
    }

    fn finish<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                let _ = self.state_tx.send(EngineState::Stopped);
            }
            Err(e) => {
                error!(error = %e, kind = e.kind(), "Engine run failed");
                metrics::record_error(e.kind());
                let _ = self.state_tx.send(EngineState::Failed);
            }
        }
        result
    }

    /// Run live sync until `shutdown` becomes `true`.
    pub async fn run_live(&self, shutdown: watch::Receiver<bool>) -> Result<LiveSummary> {
        self.begin(EngineState::Live)?;
        let result = self.live_inner(shutdown).await;
        self.finish(result)
    }

    async fn live_inner(&self, shutdown: watch::Receiver<bool>) -> Result<LiveSummary> {
        let settings = LiveSettings::from_config(&self.config)?;
        let anonymizer = Anonymizer::new(self.config.anonymize.length)?;

        let store = checkpoint::open_store(&self.config.checkpoint).await?;
        let checkpointer = Checkpointer::new(store);

        let feed_conn = connect("feed", &self.config.source.redis_url, &self.retry).await?;
        let source = ChangeFeedReader::new(
            feed_conn,
            &self.config.source.stream_key,
            &self.config.source.document_prefix,
            self.config.live.block_timeout_duration()?,
            self.config.live.read_count,
        );
        let target = RedisTargetStore::new(self.target.clone(), &self.config.target.document_prefix);

        info!(
            stream = %self.config.source.stream_key,
            source_prefix = %self.config.source.document_prefix,
            target_prefix = %self.config.target.document_prefix,
            "Engine entering live mode"
        );
        LiveRunner::new(source, target, checkpointer, anonymizer, settings)
            .run(shutdown)
            .await
    }

    /// Copy every source document to the target, then return.
    pub async fn run_reindex(&self) -> Result<ReindexSummary> {
        self.begin(EngineState::Reindexing)?;
        let result = self.reindex_inner().await;
        self.finish(result)
    }

    async fn reindex_inner(&self) -> Result<ReindexSummary> {
        let anonymizer = Anonymizer::new(self.config.anonymize.length)?;
        let snapshot = RedisSnapshot::new(
            self.source.clone(),
            &self.config.source.document_prefix,
            self.config.reindex.scan_count,
        );
        let target = RedisTargetStore::new(self.target.clone(), &self.config.target.document_prefix);

        info!(
            source_prefix = %self.config.source.document_prefix,
            target_prefix = %self.config.target.document_prefix,
            batch_size = self.config.reindex.batch_size,
            "Engine entering reindex mode"
        );
        ReindexRunner::new(snapshot, target, anonymizer, self.config.reindex.batch_size)
            .run()
            .await
    }
}

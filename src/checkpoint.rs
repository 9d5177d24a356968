// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Checkpoint persistence for the change stream position.
//!
//! The checkpoint holds the position of the last change event whose batch has
//! been written to the target. It survives restarts of this process and of
//! Redis alike, so it lives outside Redis: in SQLite (default) or in a single
//! JSON file.
//!
//! ## Checkpoint Semantics
//!
//! ```text
//! drain batch (.., 1234) → bulk upsert to target → persist checkpoint 1234
//!                          (crash here = batch re-applied on restart, idempotent)
//! ```
//!
//! The checkpoint write is not transactional with the target write. A crash
//! between the two replays the batch on the next start; the upsert makes the
//! replay harmless.
//!
//! ## Degraded Reads
//!
//! A missing checkpoint, or one that cannot be read or parsed, means the feed
//! starts at the stream tail and every event between the lost checkpoint and
//! the tail is skipped. [`Checkpointer::read`] reports this at WARN level and
//! through `anonymizer_checkpoint_degraded_total`; it is never corrected
//! automatically. Run a reindex to close the gap.
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended. Writes are retried with exponential backoff, up to
//! [`SQLITE_RETRY_MAX_ATTEMPTS`] attempts.

use crate::config::{CheckpointBackend, CheckpointConfig};
use crate::error::{AnonymizerError, Result};
use crate::metrics;
use crate::position::Position;
use crate::store::{BoxFuture, CheckpointStore};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Configuration for SQLite busy retry behavior
pub const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(operation_name: &str, mut f: F) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts,
                        "SQLite operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                metrics::checkpoint_retries_total(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => return Err(e),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SQLite backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Checkpoint slot stored in a SQLite table row.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
    /// Row key, so several pipelines can share one database file.
    name: String,
    path: String,
}

impl SqliteCheckpointStore {
    /// Open (or create) the database at `path` and ensure the table exists.
    pub async fn open(path: impl AsRef<Path>, name: &str) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!(path = %path_str, name, "Opening SQLite checkpoint store");

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path_str))
            .map_err(|e| AnonymizerError::Config(format!("Invalid SQLite path: {}", e)))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
            .create_if_missing(true);

        // One writer, one slot
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                name TEXT PRIMARY KEY,
                position TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            name: name.to_string(),
            path: path_str,
        })
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn read(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT position FROM checkpoints WHERE name = ?")
                    .bind(&self.name)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.map(|(position,)| position))
        })
    }

    fn write(&self, token: String) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let now = chrono::Utc::now().timestamp_millis();
            let pool = &self.pool;
            let name = &self.name;
            let token = &token;

            execute_with_retry("checkpoint_write", || async move {
                sqlx::query(
                    r#"
                    INSERT INTO checkpoints (name, position, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(name) DO UPDATE SET
                        position = excluded.position,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(name)
                .bind(token)
                .bind(now)
                .execute(pool)
                .await
            })
            .await?;
            Ok(())
        })
    }

    /// Checkpoint the WAL and close the pool.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let pool = &self.pool;
            let result = execute_with_retry("checkpoint_wal", || async {
                sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(pool).await
            })
            .await;
            if let Err(e) = result {
                warn!(error = %e, "Failed to checkpoint WAL on close");
            }
            self.pool.close().await;
            debug!("Checkpoint store closed");
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// File backend
// ═══════════════════════════════════════════════════════════════════════════════

/// On-disk format of the file checkpoint.
#[derive(Debug, Serialize, Deserialize)]
struct FileCheckpoint {
    position: String,
    updated_at: i64,
}

/// Checkpoint slot stored as a small JSON file.
///
/// Writes go to a sibling temp file which is fsynced and renamed over the
/// checkpoint, so a crash mid-write leaves the previous checkpoint intact.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn read(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            let raw = match tokio::fs::read_to_string(&self.path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let parsed: FileCheckpoint = serde_json::from_str(&raw).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e)
            })?;
            Ok(Some(parsed.position))
        })
    }

    fn write(&self, token: String) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let body = serde_json::to_vec(&FileCheckpoint {
                position: token,
                updated_at: chrono::Utc::now().timestamp_millis(),
            })
            .map_err(|e| AnonymizerError::Internal(format!("encode checkpoint: {}", e)))?;

            let tmp = self.temp_path();
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &self.path).await?;

            // The rename is only durable once the directory entry is flushed
            tokio::fs::File::open(self.parent_dir()).await?.sync_all().await?;
            Ok(())
        })
    }
}

/// Open the backend selected in the config.
pub async fn open_store(config: &CheckpointConfig) -> Result<Arc<dyn CheckpointStore>> {
    match config.backend {
        CheckpointBackend::Sqlite => {
            let store = SqliteCheckpointStore::open(&config.path, &config.name).await?;
            Ok(Arc::new(store))
        }
        CheckpointBackend::File => {
            info!(path = %config.path, "Using file checkpoint store");
            Ok(Arc::new(FileCheckpointStore::new(&config.path)))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Checkpointer
// ═══════════════════════════════════════════════════════════════════════════════

/// Reads and writes the resume position through a [`CheckpointStore`].
///
/// Owned by the pipeline; writes happen strictly after a batch reached the
/// target, one at a time.
pub struct Checkpointer {
    store: Arc<dyn CheckpointStore>,
    last_written: Option<Position>,
}

impl Checkpointer {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            last_written: None,
        }
    }

    /// Last position this process read or persisted.
    pub fn last_written(&self) -> Option<Position> {
        self.last_written
    }

    /// Read the resume position. Called once at startup.
    ///
    /// Never fails: a missing, unreadable or corrupt checkpoint degrades to `None`
    /// ("start at the tail") and is reported as a potential data gap.
    pub async fn read(&mut self) -> Option<Position> {
        let token = match self.store.read().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                warn!(
                    "No checkpoint found - starting at the stream tail. Changes made while no checkpoint existed are skipped; run a full reindex to recover them"
                );
                metrics::record_checkpoint_degraded("missing");
                return None;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Checkpoint unreadable - starting at the stream tail. Changes since the last run are skipped; run a full reindex to recover them"
                );
                metrics::record_checkpoint_degraded("unreadable");
                return None;
            }
        };

        match token.parse::<Position>() {
            Ok(position) => {
                info!(position = %position, "Resuming from checkpoint");
                self.last_written = Some(position);
                Some(position)
            }
            Err(e) => {
                warn!(
                    token = %token,
                    error = %e,
                    "Checkpoint corrupt - starting at the stream tail. Changes since the last run are skipped; run a full reindex to recover them"
                );
                metrics::record_checkpoint_degraded("corrupt");
                None
            }
        }
    }

    /// Close the underlying store. Failures are logged, not returned.
    pub async fn close(&self) {
        if let Err(e) = self.store.close().await {
            warn!(error = %e, "Failed to close checkpoint store");
        }
    }

    /// Persist `position`. Must only be called after the batch containing the
    /// event at `position` has been written to the target.
    pub async fn write(&mut self, position: Position) -> Result<()> {
        if let Some(last) = self.last_written {
            if position < last {
                return Err(AnonymizerError::InvalidState {
                    expected: format!("checkpoint >= {}", last),
                    actual: position.to_string(),
                });
            }
        }

        match self.store.write(position.to_string()).await {
            Ok(()) => {
                metrics::record_checkpoint_write(true);
                self.last_written = Some(position);
                debug!(position = %position, "Checkpoint saved");
                Ok(())
            }
            Err(e) => {
                metrics::record_checkpoint_write(false);
                Err(e)
            }
        }
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Target collection writes.
//!
//! Each drained batch becomes one bulk request: one replace-or-insert per
//! record, keyed by the record's identity. Upserts make the write idempotent,
//! which is what makes replaying a batch after a crash (see
//! [`checkpoint`](crate::checkpoint)) safe.
//!
//! The Redis binding sends the whole batch as a single `MULTI`/`EXEC`
//! pipeline, so it either lands completely or the call fails.

use crate::error::{AnonymizerError, Result};
use crate::metrics;
use crate::record::Customer;
use crate::store::{BoxFuture, TargetStore};
use redis::aio::ConnectionManager;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Replace the document with identity `id` by `replacement`, inserting it if
/// absent.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOp {
    pub id: String,
    pub replacement: Customer,
}

impl UpsertOp {
    /// Upsert keyed by the record's own identity.
    pub fn replace_one(record: Customer) -> Self {
        Self {
            id: record.id.clone(),
            replacement: record,
        }
    }
}

/// Redis target: anonymized documents as JSON strings under a key prefix.
#[derive(Clone)]
pub struct RedisTargetStore {
    conn: ConnectionManager,
    document_prefix: String,
}

impl RedisTargetStore {
    pub fn new(conn: ConnectionManager, document_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            document_prefix: document_prefix.into(),
        }
    }

    fn document_key(&self, id: &str) -> String {
        format!("{}{}", self.document_prefix, id)
    }
}

impl TargetStore for RedisTargetStore {
    fn bulk_upsert(&self, ops: Vec<UpsertOp>) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            let count = ops.len();
            let mut pipe = redis::pipe();
            pipe.atomic();
            for op in &ops {
                let body = op.replacement.to_json()?;
                pipe.set(self.document_key(&op.id), body).ignore();
            }

            let mut conn = self.conn.clone();
            let _: () = pipe
                .query_async(&mut conn)
                .await
                .map_err(|e| AnonymizerError::BulkWrite {
                    attempted: count,
                    message: e.to_string(),
                })?;
            Ok(count)
        })
    }
}

/// Applies transformed batches to a [`TargetStore`].
pub struct TargetWriter<T> {
    store: T,
}

impl<T: TargetStore> TargetWriter<T> {
    pub fn new(store: T) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &T {
        &self.store
    }

    /// Upsert every record in one bulk operation.
    ///
    /// Only non-empty batches reach the target; an empty batch here means the
    /// caller skipped its own emptiness check.
    pub async fn write(&self, records: Vec<Customer>) -> Result<usize> {
        if records.is_empty() {
            return Err(AnonymizerError::InvalidState {
                expected: "non-empty batch".to_string(),
                actual: "0 records".to_string(),
            });
        }

        let attempted = records.len();
        let ops: Vec<UpsertOp> = records.into_iter().map(UpsertOp::replace_one).collect();

        let start = Instant::now();
        let result = self.store.bulk_upsert(ops).await;
        metrics::record_bulk_write_latency(start.elapsed());

        match result {
            Ok(written) if written == attempted => {
                metrics::record_records_written(written);
                info!(count = written, "{} docs processed", written);
                Ok(written)
            }
            Ok(written) => {
                warn!(attempted, written, "Bulk write applied a partial batch");
                Err(AnonymizerError::BulkWrite {
                    attempted,
                    message: format!("only {} of {} upserts applied", written, attempted),
                })
            }
            Err(e @ AnonymizerError::BulkWrite { .. }) => Err(e),
            Err(e) => {
                debug!(error = %e, "Bulk write failed");
                Err(AnonymizerError::BulkWrite {
                    attempted,
                    message: e.to_string(),
                })
            }
        }
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The pipeline state: pending queue, transformer, writer, checkpointer.
//!
//! A [`Pipeline`] is owned by exactly one task (the live actor or the reindex
//! runner) and driven through two inputs:
//!
//! - [`append`](Pipeline::append): enqueue a record, draining synchronously
//!   once the queue reaches its threshold
//! - [`drain`](Pipeline::drain): take one batch off the front, anonymize it,
//!   write it, then checkpoint it
//!
//! Because both take `&mut self`, drains are strictly sequential and a
//! checkpoint write for position P always follows the target write of the
//! batch holding P.
//!
//! ```text
//! drain():  take_batch ──▶ anonymize_all ──▶ TargetWriter::write ──▶ Checkpointer::write(last)
//!              │ empty                            │ error                 │ error
//!              ▼                                  ▼                       ▼
//!            no-op                           BulkWrite (fatal)     checkpoint error (fatal)
//! ```

use crate::anonymize::Anonymizer;
use crate::checkpoint::Checkpointer;
use crate::error::Result;
use crate::metrics;
use crate::position::Position;
use crate::queue::BatchQueue;
use crate::record::Customer;
use crate::store::TargetStore;
use crate::target::TargetWriter;
use std::time::Instant;
use tracing::{debug, instrument};

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Records written to the target.
    pub written: usize,
    /// Position persisted after the write, if any.
    pub checkpoint: Option<Position>,
}

impl DrainReport {
    pub fn is_noop(&self) -> bool {
        self.written == 0
    }
}

/// Single-owner pipeline state.
pub struct Pipeline<T: TargetStore> {
    queue: BatchQueue,
    anonymizer: Anonymizer,
    writer: TargetWriter<T>,
    checkpointer: Option<Checkpointer>,
    /// "live" or "reindex" (metrics label)
    mode: &'static str,
}

impl<T: TargetStore> Pipeline<T> {
    /// Live pipeline: every drain ends with a checkpoint write.
    pub fn live(
        batch_size: usize,
        anonymizer: Anonymizer,
        target: T,
        checkpointer: Checkpointer,
    ) -> Self {
        Self {
            queue: BatchQueue::new(batch_size),
            anonymizer,
            writer: TargetWriter::new(target),
            checkpointer: Some(checkpointer),
            mode: "live",
        }
    }

    /// Reindex pipeline: no checkpoint.
    pub fn reindex(batch_size: usize, anonymizer: Anonymizer, target: T) -> Self {
        Self {
            queue: BatchQueue::new(batch_size),
            anonymizer,
            writer: TargetWriter::new(target),
            checkpointer: None,
            mode: "reindex",
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn target(&self) -> &T {
        self.writer.store()
    }

    pub fn checkpointer(&self) -> Option<&Checkpointer> {
        self.checkpointer.as_ref()
    }

    /// Enqueue a record and drain if the size threshold is reached.
    ///
    /// Returns the drain report when a drain happened.
    pub async fn append(
        &mut self,
        record: Customer,
        position: Option<Position>,
    ) -> Result<Option<DrainReport>> {
        self.queue.push(record, position);
        metrics::set_queue_depth(self.queue.len());

        if self.queue.should_drain() {
            debug!(queue_len = self.queue.len(), "Size threshold reached");
            return self.drain().await.map(Some);
        }
        Ok(None)
    }

    /// Transform and write one batch, then checkpoint it.
    ///
    /// Draining an empty queue makes no transformer, writer or checkpoint
    /// calls.
    #[instrument(skip(self), fields(mode = self.mode))]
    pub async fn drain(&mut self) -> Result<DrainReport> {
        if self.queue.is_empty() {
            return Ok(DrainReport::default());
        }

        let start = Instant::now();
        let batch = self.queue.take_batch();
        metrics::set_queue_depth(self.queue.len());

        let count = batch.len();
        let anonymized = self.anonymizer.anonymize_all(&batch.records);
        let written = self.writer.write(anonymized).await?;

        let mut checkpoint = None;
        if let (Some(checkpointer), Some(position)) = (self.checkpointer.as_mut(), batch.last_position) {
            checkpointer.write(position).await?;
            checkpoint = Some(position);
            metrics::record_lag_ms(position.lag_ms(&now_position()));
        }

        metrics::record_drain(self.mode, count, start.elapsed());
        debug!(
            written,
            checkpoint = ?checkpoint.map(|p| p.to_string()),
            duration_ms = start.elapsed().as_millis() as u64,
            "Drain complete"
        );

        Ok(DrainReport { written, checkpoint })
    }

    /// Drain until the queue is empty. Returns the total written.
    pub async fn drain_all(&mut self) -> Result<usize> {
        let mut total = 0;
        while !self.queue.is_empty() {
            total += self.drain().await?.written;
        }
        Ok(total)
    }
}

/// Wall-clock time as a stream position, for lag reporting.
fn now_position() -> Position {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    Position::new(millis, 0)
}

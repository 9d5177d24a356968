// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Full reindex: snapshot → pipeline, no checkpoint.
//!
//! Every source document goes through the same queue, transformer and
//! writer as live changes, with a much larger batch size. The run is not
//! resumable: a crash part-way means starting the reindex again, which the
//! upserting writer makes safe.
//!
//! The live checkpoint is left untouched, so a live run after a reindex
//! resumes where the previous live run stopped.

use super::types::ReindexSummary;
use crate::anonymize::Anonymizer;
use crate::error::Result;
use crate::metrics;
use crate::pipeline::Pipeline;
use crate::store::{SnapshotSource, TargetStore};
use std::time::Instant;
use tracing::{info, info_span, Instrument};

/// One-shot backfill of the target from a source snapshot.
pub struct ReindexRunner<S: SnapshotSource, T: TargetStore> {
    snapshot: S,
    pipeline: Pipeline<T>,
}

impl<S: SnapshotSource, T: TargetStore> ReindexRunner<S, T> {
    pub fn new(snapshot: S, target: T, anonymizer: Anonymizer, batch_size: usize) -> Self {
        Self {
            snapshot,
            pipeline: Pipeline::reindex(batch_size, anonymizer, target),
        }
    }

    /// Read the whole snapshot, draining at the batch size and once more at
    /// the end. Returns when every document has been written.
    pub async fn run(self) -> Result<ReindexSummary> {
        let span = info_span!("reindex");
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> Result<ReindexSummary> {
        info!("Starting full reindex");
        metrics::set_mode("reindex");
        let start = Instant::now();
        let mut summary = ReindexSummary::default();

        while let Some(page) = self.snapshot.next_page().await? {
            metrics::record_reindex_documents(page.len());
            summary.documents += page.len() as u64;

            for document in page {
                if let Some(report) = self.pipeline.append(document, None).await? {
                    summary.drains += 1;
                    summary.written += report.written as u64;
                }
            }
        }

        // Remainder below the batch size
        if self.pipeline.queue_len() > 0 {
            let written = self.pipeline.drain_all().await?;
            summary.drains += 1;
            summary.written += written as u64;
        }

        metrics::set_mode("stopped");
        info!(
            documents = summary.documents,
            written = summary.written,
            drains = summary.drains,
            duration_ms = start.elapsed().as_millis() as u64,
            "Full reindex complete"
        );
        Ok(summary)
    }
}

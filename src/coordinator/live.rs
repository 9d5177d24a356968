// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Live sync: change feed → pipeline actor.
//!
//! Two tasks cooperate:
//!
//! ```text
//! ┌──────────────┐  bounded mailbox   ┌──────────────────────────────────────┐
//! │ feed task    │ ─────────────────▶ │ pipeline actor (owns BatchQueue)     │
//! │ next_event() │   ChangeEvent      │  select! { shutdown, timer, mailbox } │
//! └──────────────┘                    └──────────────────────────────────────┘
//! ```
//!
//! The actor is the only owner of the pipeline, so appends and drains are
//! serialized without locks. A drain (timer tick or size threshold) runs to
//! completion, checkpoint included, before the actor looks at its inputs
//! again.
//!
//! # Backpressure
//!
//! When the mailbox is full the feed task either waits
//! ([`OverflowPolicy::Block`]) or fails the run with
//! [`QueueOverflow`](AnonymizerError::QueueOverflow) ([`OverflowPolicy::Fail`]).
//! Changes are never dropped.
//!
//! # Graceful Shutdown
//!
//! On the shutdown signal the feed task is aborted and the queued records are
//! drained (and checkpointed) once. Events still sitting in the mailbox were
//! never checkpointed and are read again on the next start.

use super::types::{LiveSettings, LiveSummary};
use crate::anonymize::Anonymizer;
use crate::checkpoint::Checkpointer;
use crate::config::OverflowPolicy;
use crate::error::{AnonymizerError, Result};
use crate::metrics;
use crate::pipeline::{DrainReport, Pipeline};
use crate::store::{ChangeEvent, ChangeFeed, ChangeSource, TargetStore};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

/// Runs live sync until shutdown or a fatal error.
pub struct LiveRunner<S: ChangeSource, T: TargetStore> {
    source: S,
    target: T,
    checkpointer: Checkpointer,
    anonymizer: Anonymizer,
    settings: LiveSettings,
}

impl<S: ChangeSource, T: TargetStore> LiveRunner<S, T> {
    pub fn new(
        source: S,
        target: T,
        checkpointer: Checkpointer,
        anonymizer: Anonymizer,
        settings: LiveSettings,
    ) -> Self {
        Self {
            source,
            target,
            checkpointer,
            anonymizer,
            settings,
        }
    }

    /// Resume from the checkpoint (or the tail) and sync until `shutdown`
    /// flips to `true` or its sender is dropped.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<LiveSummary> {
        let span = info_span!("live", batch_size = self.settings.batch_size);
        self.run_inner(shutdown).instrument(span).await
    }

    async fn run_inner(self, mut shutdown: watch::Receiver<bool>) -> Result<LiveSummary> {
        let LiveRunner {
            source,
            target,
            mut checkpointer,
            anonymizer,
            settings,
        } = self;

        let resume = checkpointer.read().await;
        let feed = source.subscribe(resume).await?;
        info!(
            resume = ?resume.map(|p| p.to_string()),
            flush_interval_ms = settings.flush_interval.as_millis() as u64,
            mailbox_capacity = settings.mailbox_capacity,
            overflow = ?settings.overflow,
            "Starting live sync"
        );
        metrics::set_mode("live");

        let mut pipeline = Pipeline::live(settings.batch_size, anonymizer, target, checkpointer);
        let mut summary = LiveSummary::default();

        let (tx, mut rx) = mpsc::channel(settings.mailbox_capacity);
        let mut feed_task: JoinHandle<Result<()>> = tokio::spawn(
            pump(feed, tx, settings.overflow, settings.mailbox_capacity).in_current_span(),
        );

        let result = actor_loop(
            &mut pipeline,
            &mut rx,
            &mut feed_task,
            &mut shutdown,
            &settings,
            &mut summary,
        )
        .await;
        feed_task.abort();

        let result = match result {
            Ok(()) => final_drain(&mut pipeline, &mut summary).await,
            Err(e) => Err(e),
        };

        if let Some(checkpointer) = pipeline.checkpointer() {
            checkpointer.close().await;
        }
        metrics::set_mode("stopped");

        result.map(|()| {
            info!(
                events = summary.events,
                drains = summary.drains,
                written = summary.written,
                checkpoint = ?summary.checkpoint.map(|p| p.to_string()),
                "Live sync stopped"
            );
            summary
        })
    }
}

impl LiveSummary {
    fn record(&mut self, report: DrainReport) {
        if report.is_noop() {
            return;
        }
        self.drains += 1;
        self.written += report.written as u64;
        if report.checkpoint.is_some() {
            self.checkpoint = report.checkpoint;
        }
    }
}

/// The pipeline actor. Returns `Ok(())` on shutdown.
async fn actor_loop<T: TargetStore>(
    pipeline: &mut Pipeline<T>,
    rx: &mut mpsc::Receiver<ChangeEvent>,
    feed_task: &mut JoinHandle<Result<()>>,
    shutdown: &mut watch::Receiver<bool>,
    settings: &LiveSettings,
    summary: &mut LiveSummary,
) -> Result<()> {
    let period = settings.flush_interval;
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            info!("Shutdown requested");
            return Ok(());
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    info!("Shutdown sender dropped, stopping");
                    return Ok(());
                }
                // Loop around to re-check the flag
            }

            _ = timer.tick() => {
                let report = pipeline.drain().await?;
                if !report.is_noop() {
                    debug!(written = report.written, "Timer drain");
                }
                summary.record(report);
            }

            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        summary.events += 1;
                        if let Some(report) = pipeline.append(event.document, Some(event.position)).await? {
                            summary.record(report);
                        }
                    }
                    None => return Err(feed_exit(feed_task).await),
                }
            }
        }
    }
}

/// Drain whatever the queue still holds after a shutdown signal.
async fn final_drain<T: TargetStore>(pipeline: &mut Pipeline<T>, summary: &mut LiveSummary) -> Result<()> {
    let pending = pipeline.queue_len();
    while pipeline.queue_len() > 0 {
        summary.record(pipeline.drain().await?);
    }
    info!(pending, "Final drain complete");
    Ok(())
}

/// The mailbox closed, so the feed task ended; surface why.
async fn feed_exit(feed_task: &mut JoinHandle<Result<()>>) -> AnonymizerError {
    match feed_task.await {
        Ok(Err(e)) => e,
        Ok(Ok(())) => AnonymizerError::Internal("change feed ended unexpectedly".to_string()),
        Err(join_err) => AnonymizerError::Internal(format!("change feed task failed: {}", join_err)),
    }
}

/// Move events from the feed into the mailbox, honoring the overflow policy.
async fn pump<F: ChangeFeed>(
    mut feed: F,
    tx: mpsc::Sender<ChangeEvent>,
    overflow: OverflowPolicy,
    capacity: usize,
) -> Result<()> {
    loop {
        let event = feed.next_event().await?;
        match overflow {
            OverflowPolicy::Block => {
                if tx.send(event).await.is_err() {
                    // Actor gone: shutting down
                    return Ok(());
                }
            }
            OverflowPolicy::Fail => match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!(
                        capacity,
                        position = %event.position,
                        "Pipeline mailbox full under fail policy"
                    );
                    return Err(AnonymizerError::QueueOverflow { capacity });
                }
                Err(TrySendError::Closed(_)) => return Ok(()),
            },
        }
    }
}

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics through the `metrics` facade; the
//! embedding process decides which recorder (if any) to install.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `anonymizer_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! Counters are at-least-once, like the pipeline itself: a batch replayed after
//! a crash between target write and checkpoint write is counted twice.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record change events handed to the pipeline by the feed.
pub fn record_events_read(count: usize) {
    counter!("anonymizer_events_read_total").increment(count as u64);
}

/// Record change events the feed filtered out (deletes, unknown kinds,
/// documents gone before lookup).
pub fn record_event_dropped(reason: &str) {
    counter!("anonymizer_events_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// Record XREAD latency.
pub fn record_stream_read_latency(duration: Duration) {
    histogram!("anonymizer_stream_read_duration_seconds").record(duration.as_secs_f64());
}

/// Record a completed drain.
pub fn record_drain(mode: &str, records: usize, duration: Duration) {
    counter!("anonymizer_drains_total", "mode" => mode.to_string()).increment(1);
    histogram!("anonymizer_drain_duration_seconds", "mode" => mode.to_string())
        .record(duration.as_secs_f64());
    histogram!("anonymizer_drain_size", "mode" => mode.to_string()).record(records as f64);
}

/// Record records written to the target.
pub fn record_records_written(count: usize) {
    counter!("anonymizer_records_written_total").increment(count as u64);
}

/// Record bulk write latency.
pub fn record_bulk_write_latency(duration: Duration) {
    histogram!("anonymizer_bulk_write_duration_seconds").record(duration.as_secs_f64());
}

/// Record a checkpoint persistence attempt.
pub fn record_checkpoint_write(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("anonymizer_checkpoint_writes_total", "status" => status).increment(1);
}

/// Record a checkpoint read that fell back to the stream tail.
///
/// Anything non-zero here means events may have been skipped and a reindex
/// should be considered.
pub fn record_checkpoint_degraded(reason: &str) {
    counter!("anonymizer_checkpoint_degraded_total", "reason" => reason.to_string()).increment(1);
}

/// Record checkpoint SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn checkpoint_retries_total(operation: &str) {
    counter!("anonymizer_checkpoint_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Gauge for records waiting in the pending queue.
pub fn set_queue_depth(depth: usize) {
    gauge!("anonymizer_queue_depth").set(depth as f64);
}

/// Record sync lag in milliseconds (based on stream ID timestamps).
pub fn record_lag_ms(lag_ms: u64) {
    gauge!("anonymizer_lag_ms").set(lag_ms as f64);
}

/// Record documents read from the source during a reindex.
pub fn record_reindex_documents(count: usize) {
    counter!("anonymizer_reindex_documents_total").increment(count as u64);
}

/// Record a Redis connection outcome.
pub fn record_connection(role: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("anonymizer_connections_total", "role" => role.to_string(), "status" => status)
        .increment(1);
}

/// Record errors by type.
pub fn record_error(error_type: &str) {
    counter!("anonymizer_errors_total", "error_type" => error_type.to_string()).increment(1);
}

/// Gauge for the running mode (0=stopped, 1=live, 2=reindex).
pub fn set_mode(mode: &str) {
    let value = match mode {
        "stopped" => 0.0,
        "live" => 1.0,
        "reindex" => 2.0,
        _ => -1.0,
    };
    gauge!("anonymizer_mode").set(value);
}

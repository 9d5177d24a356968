// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change feed over a Redis stream.
//!
//! The source application appends one entry per mutation to the change
//! stream (default `customers:changes`):
//!
//! ```text
//! XADD customers:changes * op update id 64f1c0ffee
//! ```
//!
//! [`ChangeFeedReader::subscribe`] opens a [`RedisChangeFeed`] after a resume
//! position (or at the current tail), and the feed yields one
//! [`ChangeEvent`] per insert/update/replace entry with the *current* full
//! document, looked up at `{document_prefix}{id}`. Deletes and unknown kinds
//! are dropped here and never reach the pipeline.
//!
//! # Stream Trimming
//!
//! Redis streams are trimmed via `MAXLEN` or `MINID`. If the resume position
//! is older than the oldest entry still in the stream, changes may have been
//! trimmed before we saw them. Subscribing then fails with
//! [`FeedSubscription`](AnonymizerError::FeedSubscription): only a full
//! reindex can restore the target, so there is no silent skip-ahead.
//!
//! # Cancel Safety
//!
//! A read resolves the whole XREAD reply (documents included) before the
//! cursor and the buffer move. Dropping a `next_event` future mid-read
//! therefore loses nothing: the next call re-reads from the same cursor.

use crate::error::{AnonymizerError, Result};
use crate::metrics;
use crate::position::Position;
use crate::record::Customer;
use crate::store::{BoxFuture, ChangeEvent, ChangeFeed, ChangeSource, OperationKind};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// A stream entry before document resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub position: Position,
    pub kind: OperationKind,
    /// Identity of the mutated document.
    pub id: String,
}

/// Parse a raw stream entry. Missing or non-string `op`/`id` fields are
/// errors: a malformed entry is never skipped.
pub fn parse_entry(stream_id: &str, fields: &HashMap<String, redis::Value>) -> Result<StreamEntry> {
    let position = stream_id.parse::<Position>().map_err(|e| {
        AnonymizerError::StreamParse(format!("Entry {}: {}", stream_id, e))
    })?;
    let op = get_string_field(fields, "op")
        .map_err(|e| AnonymizerError::StreamParse(format!("Entry {}: {}", stream_id, e)))?;
    let id = get_string_field(fields, "id")
        .map_err(|e| AnonymizerError::StreamParse(format!("Entry {}: {}", stream_id, e)))?;

    if id.is_empty() {
        return Err(AnonymizerError::StreamParse(format!(
            "Entry {}: empty document id",
            stream_id
        )));
    }

    Ok(StreamEntry {
        position,
        kind: OperationKind::parse(&op),
        id,
    })
}

/// Extract a string field from a stream entry.
fn get_string_field(fields: &HashMap<String, redis::Value>, name: &str) -> std::result::Result<String, String> {
    let value = fields
        .get(name)
        .ok_or_else(|| format!("Missing field: {}", name))?;

    match value {
        redis::Value::BulkString(bytes) => String::from_utf8(bytes.clone())
            .map_err(|e| format!("Invalid UTF-8 in {}: {}", name, e)),
        redis::Value::SimpleString(s) => Ok(s.clone()),
        _ => Err(format!("Unexpected type for field {}: {:?}", name, value)),
    }
}

/// Subscribes to the change stream of one source collection.
#[derive(Clone)]
pub struct ChangeFeedReader {
    conn: ConnectionManager,
    stream_key: String,
    document_prefix: String,
    /// Block timeout for XREAD
    block_timeout: Duration,
    /// Max entries per read
    read_count: usize,
}

impl ChangeFeedReader {
    pub fn new(
        conn: ConnectionManager,
        stream_key: impl Into<String>,
        document_prefix: impl Into<String>,
        block_timeout: Duration,
        read_count: usize,
    ) -> Self {
        Self {
            conn,
            stream_key: stream_key.into(),
            document_prefix: document_prefix.into(),
            block_timeout,
            read_count,
        }
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// The oldest entry still retained by the stream, if any.
    pub async fn oldest_position(&self) -> Result<Option<Position>> {
        self.boundary_position("XRANGE", "-", "+").await
    }

    /// The newest entry in the stream, if any.
    pub async fn latest_position(&self) -> Result<Option<Position>> {
        self.boundary_position("XREVRANGE", "+", "-").await
    }

    async fn boundary_position(&self, command: &str, start: &str, end: &str) -> Result<Option<Position>> {
        let mut conn = self.conn.clone();
        let result: Vec<(String, HashMap<String, redis::Value>)> = redis::cmd(command)
            .arg(&self.stream_key)
            .arg(start)
            .arg(end)
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| AnonymizerError::redis(command, e))?;

        match result.first() {
            Some((id, _)) => id
                .parse()
                .map(Some)
                .map_err(|e| AnonymizerError::StreamParse(format!("{} returned {}: {}", command, id, e))),
            None => Ok(None),
        }
    }

    /// Decide where the feed starts, validating a resume position against
    /// the stream's retention window.
    async fn start_position(&self, from: Option<Position>) -> Result<Position> {
        let Some(resume) = from else {
            let tail = self.latest_position().await?.unwrap_or(Position::ZERO);
            info!(stream = %self.stream_key, tail = %tail, "No resume position, starting at stream tail");
            return Ok(tail);
        };

        if resume.is_zero() {
            return Ok(resume);
        }

        match self.oldest_position().await? {
            Some(oldest) if resume < oldest => {
                warn!(
                    stream = %self.stream_key,
                    resume = %resume,
                    oldest = %oldest,
                    "Stream was trimmed past the resume position - potential data gap"
                );
                Err(AnonymizerError::FeedSubscription {
                    position: resume.to_string(),
                    oldest: oldest.to_string(),
                })
            }
            Some(_) => {
                info!(stream = %self.stream_key, resume = %resume, "Resuming change feed");
                Ok(resume)
            }
            None => {
                warn!(
                    stream = %self.stream_key,
                    resume = %resume,
                    "Change stream is empty but a resume position exists; if the stream was recreated, run a full reindex"
                );
                Ok(resume)
            }
        }
    }
}

impl ChangeSource for ChangeFeedReader {
    type Feed = RedisChangeFeed;

    fn subscribe(&self, from: Option<Position>) -> BoxFuture<'_, RedisChangeFeed> {
        Box::pin(async move {
            let cursor = self.start_position(from).await?;
            Ok(RedisChangeFeed {
                reader: self.clone(),
                cursor,
                buffer: VecDeque::new(),
            })
        })
    }
}

/// An open subscription. Yields replicated events in stream order, forever.
pub struct RedisChangeFeed {
    reader: ChangeFeedReader,
    /// Last stream entry consumed (replicated or not).
    cursor: Position,
    /// Resolved events not yet handed out.
    buffer: VecDeque<ChangeEvent>,
}

impl RedisChangeFeed {
    pub fn cursor(&self) -> Position {
        self.cursor
    }

    /// One XREAD round: read entries after the cursor, resolve documents,
    /// then advance the cursor and fill the buffer.
    async fn fill(&mut self) -> Result<()> {
        let reader = &self.reader;
        let mut conn = reader.conn.clone();

        let opts = StreamReadOptions::default()
            .block(reader.block_timeout.as_millis() as usize)
            .count(reader.read_count);
        let cursor = self.cursor.to_string();

        let start = Instant::now();
        let reply: StreamReadReply = conn
            .xread_options(&[&reader.stream_key], &[&cursor], &opts)
            .await
            .map_err(|e| AnonymizerError::redis("XREAD", e))?;
        metrics::record_stream_read_latency(start.elapsed());

        let mut entries = Vec::new();
        for stream in reply.keys {
            for entry in stream.ids {
                entries.push(parse_entry(&entry.id, &entry.map)?);
            }
        }
        let Some(last) = entries.last().map(|e| e.position) else {
            trace!(stream = %reader.stream_key, cursor = %cursor, "No new entries");
            return Ok(());
        };

        let mut replicated = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.kind.is_replicated() {
                replicated.push(entry);
            } else {
                trace!(position = %entry.position, op = entry.kind.as_str(), id = %entry.id, "Dropping non-replicated change");
                metrics::record_event_dropped(entry.kind.as_str());
            }
        }

        let documents = resolve_documents(&mut conn, &reader.document_prefix, &replicated).await?;

        let mut events = Vec::with_capacity(replicated.len());
        for (entry, document) in replicated.into_iter().zip(documents) {
            match document {
                Some(bytes) => events.push(ChangeEvent {
                    kind: entry.kind,
                    position: entry.position,
                    document: Customer::from_json(&entry.id, &bytes)?,
                }),
                None => {
                    // Deleted after the change was recorded; deletes are not propagated
                    warn!(
                        position = %entry.position,
                        id = %entry.id,
                        "Document no longer exists at lookup, dropping change"
                    );
                    metrics::record_event_dropped("missing_document");
                }
            }
        }

        debug!(
            stream = %reader.stream_key,
            first = %cursor,
            last = %last,
            events = events.len(),
            "Read change entries"
        );
        metrics::record_events_read(events.len());

        self.cursor = last;
        self.buffer.extend(events);
        Ok(())
    }
}

/// Fetch the current documents for `entries` in one MGET.
async fn resolve_documents(
    conn: &mut ConnectionManager,
    prefix: &str,
    entries: &[StreamEntry],
) -> Result<Vec<Option<Vec<u8>>>> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }
    let keys: Vec<String> = entries.iter().map(|e| format!("{}{}", prefix, e.id)).collect();
    let documents: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
        .arg(&keys)
        .query_async(conn)
        .await
        .map_err(|e| AnonymizerError::redis("MGET", e))?;

    if documents.len() != keys.len() {
        return Err(AnonymizerError::redis_msg(
            "MGET",
            format!("expected {} values, got {}", keys.len(), documents.len()),
        ));
    }
    Ok(documents)
}

impl ChangeFeed for RedisChangeFeed {
    fn next_event(&mut self) -> BoxFuture<'_, ChangeEvent> {
        Box::pin(async move {
            loop {
                if let Some(event) = self.buffer.pop_front() {
                    return Ok(event);
                }
                self.fill().await?;
            }
        })
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Full scan of the source collection for reindexing.
//!
//! Walks `{document_prefix}*` with `SCAN ... TYPE string` and fetches each
//! page with one `MGET`. SCAN guarantees every key present for the whole scan
//! is returned at least once; it may return a key twice, which the upserting
//! writer absorbs. Keys deleted mid-scan come back as nil and are skipped.

use crate::error::{AnonymizerError, Result};
use crate::record::Customer;
use crate::store::{BoxFuture, SnapshotSource};
use redis::aio::ConnectionManager;
use tracing::{debug, trace};

/// Paged SCAN over the source documents.
pub struct RedisSnapshot {
    conn: ConnectionManager,
    document_prefix: String,
    scan_count: usize,
    cursor: u64,
    done: bool,
}

impl RedisSnapshot {
    pub fn new(conn: ConnectionManager, document_prefix: impl Into<String>, scan_count: usize) -> Self {
        Self {
            conn,
            document_prefix: document_prefix.into(),
            scan_count,
            cursor: 0,
            done: false,
        }
    }

    fn pattern(&self) -> String {
        format!("{}*", self.document_prefix)
    }
}

impl SnapshotSource for RedisSnapshot {
    fn next_page(&mut self) -> BoxFuture<'_, Option<Vec<Customer>>> {
        Box::pin(async move {
            if self.done {
                return Ok(None);
            }

            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(self.cursor)
                .arg("MATCH")
                .arg(self.pattern())
                .arg("COUNT")
                .arg(self.scan_count)
                .arg("TYPE")
                .arg("string")
                .query_async(&mut self.conn)
                .await
                .map_err(|e| AnonymizerError::redis("SCAN", e))?;

            let mut page = Vec::with_capacity(keys.len());
            if !keys.is_empty() {
                let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
                    .arg(&keys)
                    .query_async(&mut self.conn)
                    .await
                    .map_err(|e| AnonymizerError::redis("MGET", e))?;

                for (key, value) in keys.iter().zip(values) {
                    let Some(bytes) = value else {
                        trace!(key = %key, "Key vanished during scan");
                        continue;
                    };
                    let id = key.strip_prefix(&self.document_prefix).unwrap_or(key);
                    page.push(Customer::from_json(id, &bytes)?);
                }
            }

            debug!(cursor = self.cursor, next, documents = page.len(), "Scanned source page");
            self.cursor = next;
            self.done = next == 0;
            Ok(Some(page))
        })
    }
}

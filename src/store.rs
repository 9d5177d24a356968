// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage seams.
//!
//! The pipeline talks to its three external collaborators only through these
//! traits, so the scheduling and checkpoint logic can be driven by in-memory
//! doubles in tests and by Redis/SQLite in production.
//!
//! | Trait | Production implementation |
//! |-------|---------------------------|
//! | [`ChangeSource`] / [`ChangeFeed`] | [`ChangeFeedReader`](crate::feed::ChangeFeedReader) (Redis stream) |
//! | [`SnapshotSource`] | [`RedisSnapshot`](crate::snapshot::RedisSnapshot) (SCAN + MGET) |
//! | [`TargetStore`] | [`RedisTargetStore`](crate::target::RedisTargetStore) (MULTI/EXEC) |
//! | [`CheckpointStore`] | [`SqliteCheckpointStore`](crate::checkpoint::SqliteCheckpointStore), [`FileCheckpointStore`](crate::checkpoint::FileCheckpointStore) |

use crate::error::Result;
use crate::position::Position;
use crate::record::Customer;
use crate::target::UpsertOp;
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Kind of mutation reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Update,
    Replace,
    Delete,
    Other,
}

impl OperationKind {
    /// Parse the `op` field of a stream entry. Unknown strings map to `Other`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Self::Insert,
            "update" => Self::Update,
            "replace" => Self::Replace,
            "delete" => Self::Delete,
            _ => Self::Other,
        }
    }

    /// Whether events of this kind are replicated to the target.
    ///
    /// Deletes are never propagated.
    pub fn is_replicated(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Replace)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Other => "other",
        }
    }
}

/// A replicated change: the full current document at the time of the read,
/// and where in the feed it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: OperationKind,
    pub position: Position,
    pub document: Customer,
}

/// An open subscription: an infinite sequence of replicated change events.
///
/// `next_event` waits as long as it takes for the next event. Implementations
/// only yield insert/update/replace events, in feed order.
pub trait ChangeFeed: Send + 'static {
    fn next_event(&mut self) -> BoxFuture<'_, ChangeEvent>;
}

/// Something that can be subscribed to.
pub trait ChangeSource: Send + Sync {
    type Feed: ChangeFeed;

    /// Open the feed after `from`, or at the current tail when `from` is `None`.
    ///
    /// Must fail with [`FeedSubscription`](crate::AnonymizerError::FeedSubscription)
    /// when `from` is no longer retained.
    fn subscribe(&self, from: Option<Position>) -> BoxFuture<'_, Self::Feed>;
}

/// Full scan of the source collection, page by page.
pub trait SnapshotSource: Send {
    /// Next page of documents, or `None` when the scan is complete.
    fn next_page(&mut self) -> BoxFuture<'_, Option<Vec<Customer>>>;
}

/// Target collection accepting bulk upserts.
pub trait TargetStore: Send + Sync + 'static {
    /// Apply every operation in one round trip. Any failure fails the whole call.
    ///
    /// Returns the number of operations applied.
    fn bulk_upsert(&self, ops: Vec<UpsertOp>) -> BoxFuture<'_, usize>;
}

/// A durable slot holding one opaque checkpoint token.
pub trait CheckpointStore: Send + Sync + 'static {
    /// Read the stored token, `None` if nothing was ever written.
    fn read(&self) -> BoxFuture<'_, Option<String>>;

    /// Durably replace the stored token.
    fn write(&self, token: String) -> BoxFuture<'_, ()>;

    /// Release resources. Called once when the pipeline stops.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

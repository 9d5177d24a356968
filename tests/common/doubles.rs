// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory doubles for the storage traits.
//!
//! All doubles are cheap `Clone` handles over shared state, so a test can
//! hand one clone to the pipeline and keep another for assertions.
//!
//! Target writes and checkpoint writes are also appended to a shared
//! [`Journal`], which lets tests assert their relative order.
//!
//! # Example
//! ```rust,ignore
//! let journal = Journal::default();
//! let target = MemoryTarget::new(journal.clone());
//! let checkpoint = MemoryCheckpoint::new(journal.clone());
//!
//! // ... run the pipeline ...
//!
//! assert_eq!(journal.effects(), vec![
//!     Effect::Write(vec!["a".into()]),
//!     Effect::Checkpoint("1000-0".into()),
//! ]);
//! ```

use anonymization_engine::store::BoxFuture;
use anonymization_engine::{
    Address, AnonymizerError, ChangeEvent, ChangeFeed, ChangeSource, CheckpointStore, Customer,
    OperationKind, Position, SnapshotSource, TargetStore, UpsertOp,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// =============================================================================
// Fixtures
// =============================================================================

/// The reference customer.
pub fn jane() -> Customer {
    Customer {
        id: "cust-jane".to_string(),
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
        email: "jane.doe@example.com".to_string(),
        address: Address {
            line1: "1 Main St".to_string(),
            line2: String::new(),
            postcode: "90210".to_string(),
            city: "Metropolis".to_string(),
            state: "CA".to_string(),
            country: "US".to_string(),
        },
        created_at: chrono::DateTime::from_timestamp(1_709_294_400, 0).unwrap(),
        extra: BTreeMap::new(),
    }
}

/// A customer with identity `id` and fields derived from it.
pub fn customer(id: &str) -> Customer {
    Customer {
        id: id.to_string(),
        first_name: format!("First{}", id),
        last_name: format!("Last{}", id),
        email: format!("user.{}@example.org", id),
        address: Address {
            line1: format!("{} High Street", id),
            line2: "Flat 2".to_string(),
            postcode: format!("PC{}", id),
            city: "Springfield".to_string(),
            state: "IL".to_string(),
            country: "US".to_string(),
        },
        created_at: chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        extra: BTreeMap::new(),
    }
}

/// True if `s` is an `len`-character alphanumeric token.
pub fn is_token(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

// =============================================================================
// Journal
// =============================================================================

/// An externally visible effect of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A bulk upsert, with the ids in request order.
    Write(Vec<String>),
    /// A checkpoint write.
    Checkpoint(String),
}

/// Ordered record of effects shared between doubles.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Effect>>>);

impl Journal {
    pub fn push(&self, effect: Effect) {
        self.0.lock().unwrap().push(effect);
    }

    pub fn effects(&self) -> Vec<Effect> {
        self.0.lock().unwrap().clone()
    }

    pub fn checkpoints(&self) -> Vec<String> {
        self.effects()
            .into_iter()
            .filter_map(|e| match e {
                Effect::Checkpoint(token) => Some(token),
                Effect::Write(_) => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<Vec<String>> {
        self.effects()
            .into_iter()
            .filter_map(|e| match e {
                Effect::Write(ids) => Some(ids),
                Effect::Checkpoint(_) => None,
            })
            .collect()
    }
}

// =============================================================================
// Target
// =============================================================================

struct TargetInner {
    documents: Mutex<BTreeMap<String, Customer>>,
    calls: AtomicUsize,
    /// 1-based call number that fails, if any
    fail_on_call: Mutex<Option<usize>>,
}

/// Target collection keyed by identity.
#[derive(Clone)]
pub struct MemoryTarget {
    inner: Arc<TargetInner>,
    journal: Journal,
}

impl MemoryTarget {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                documents: Mutex::new(BTreeMap::new()),
                calls: AtomicUsize::new(0),
                fail_on_call: Mutex::new(None),
            }),
            journal,
        }
    }

    /// Make the `n`th bulk call (1-based) fail.
    pub fn fail_on_call(&self, n: usize) {
        *self.inner.fail_on_call.lock().unwrap() = Some(n);
    }

    pub fn documents(&self) -> BTreeMap<String, Customer> {
        self.inner.documents.lock().unwrap().clone()
    }

    pub fn get(&self, id: &str) -> Option<Customer> {
        self.inner.documents.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.documents.lock().unwrap().len()
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

impl TargetStore for MemoryTarget {
    fn bulk_upsert(&self, ops: Vec<UpsertOp>) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            let call = self.inner.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if *self.inner.fail_on_call.lock().unwrap() == Some(call) {
                return Err(AnonymizerError::BulkWrite {
                    attempted: ops.len(),
                    message: format!("injected failure on call {}", call),
                });
            }

            let ids = ops.iter().map(|op| op.id.clone()).collect();
            let count = ops.len();
            let mut documents = self.inner.documents.lock().unwrap();
            for op in ops {
                documents.insert(op.id, op.replacement);
            }
            drop(documents);
            self.journal.push(Effect::Write(ids));
            Ok(count)
        })
    }
}

// =============================================================================
// Checkpoint
// =============================================================================

/// A single checkpoint slot.
#[derive(Clone)]
pub struct MemoryCheckpoint {
    slot: Arc<Mutex<Option<String>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    journal: Journal,
}

impl MemoryCheckpoint {
    pub fn new(journal: Journal) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            fail_reads: Arc::new(AtomicBool::new(false)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            journal,
        }
    }

    /// Pre-populate the slot (e.g. with a corrupt token).
    pub fn with_token(self, token: &str) -> Self {
        *self.slot.lock().unwrap() = Some(token.to_string());
        self
    }

    pub fn token(&self) -> Option<String> {
        self.slot.lock().unwrap().clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn io_error(message: &str) -> AnonymizerError {
    AnonymizerError::CheckpointIo(std::io::Error::new(std::io::ErrorKind::Other, message.to_string()))
}

impl CheckpointStore for MemoryCheckpoint {
    fn read(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(io_error("injected read failure"));
            }
            Ok(self.slot.lock().unwrap().clone())
        })
    }

    fn write(&self, token: String) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(io_error("injected write failure"));
            }
            *self.slot.lock().unwrap() = Some(token.clone());
            self.journal.push(Effect::Checkpoint(token));
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

// =============================================================================
// Change source
// =============================================================================

/// A recorded change, before feed filtering.
#[derive(Debug, Clone)]
struct Change {
    kind: OperationKind,
    position: Position,
    document: Customer,
}

struct SourceInner {
    log: Mutex<Vec<Change>>,
    /// Positions strictly below this have been trimmed.
    oldest_retained: Mutex<Option<Position>>,
    subscriptions: Mutex<Vec<Option<Position>>>,
    next_millis: AtomicUsize,
    fail_next: Mutex<Option<AnonymizerError>>,
    notify: Notify,
}

/// Change stream double. Positions are `{1000 + n}-0`.
#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<SourceInner>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SourceInner {
                log: Mutex::new(Vec::new()),
                oldest_retained: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                next_millis: AtomicUsize::new(1000),
                fail_next: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Append a change and wake any waiting feed.
    pub fn push(&self, kind: OperationKind, document: Customer) -> Position {
        let millis = self.inner.next_millis.fetch_add(1, Ordering::SeqCst) as u64;
        let position = Position::new(millis, 0);
        self.inner.log.lock().unwrap().push(Change {
            kind,
            position,
            document,
        });
        self.inner.notify.notify_waiters();
        position
    }

    pub fn insert(&self, document: Customer) -> Position {
        self.push(OperationKind::Insert, document)
    }

    /// Drop every change before `position` from retention.
    pub fn trim_before(&self, position: Position) {
        self.inner.log.lock().unwrap().retain(|c| c.position >= position);
        *self.inner.oldest_retained.lock().unwrap() = Some(position);
    }

    /// Make the next `next_event` call fail with `error`.
    pub fn fail_next(&self, error: AnonymizerError) {
        *self.inner.fail_next.lock().unwrap() = Some(error);
        self.inner.notify.notify_waiters();
    }

    /// Resume positions passed to `subscribe`, in call order.
    pub fn subscriptions(&self) -> Vec<Option<Position>> {
        self.inner.subscriptions.lock().unwrap().clone()
    }

    fn tail(&self) -> Position {
        self.inner
            .log
            .lock()
            .unwrap()
            .last()
            .map(|c| c.position)
            .unwrap_or(Position::ZERO)
    }
}

impl ChangeSource for MemorySource {
    type Feed = MemoryFeed;

    fn subscribe(&self, from: Option<Position>) -> BoxFuture<'_, MemoryFeed> {
        Box::pin(async move {
            self.inner.subscriptions.lock().unwrap().push(from);

            let cursor = match from {
                None => self.tail(),
                Some(resume) => {
                    let oldest = *self.inner.oldest_retained.lock().unwrap();
                    if let Some(oldest) = oldest {
                        if resume < oldest {
                            return Err(AnonymizerError::FeedSubscription {
                                position: resume.to_string(),
                                oldest: oldest.to_string(),
                            });
                        }
                    }
                    resume
                }
            };

            Ok(MemoryFeed {
                source: self.clone(),
                cursor,
            })
        })
    }
}

/// Subscription over a [`MemorySource`]. Waits for new changes when caught up.
pub struct MemoryFeed {
    source: MemorySource,
    cursor: Position,
}

impl MemoryFeed {
    /// Next replicated change after the cursor, skipping (and consuming)
    /// deletes and other kinds.
    fn poll_log(&mut self) -> Option<ChangeEvent> {
        let from = self.cursor;
        let log = self.source.inner.log.lock().unwrap();
        for change in log.iter().filter(|c| c.position > from) {
            self.cursor = change.position;
            if change.kind.is_replicated() {
                return Some(ChangeEvent {
                    kind: change.kind,
                    position: change.position,
                    document: change.document.clone(),
                });
            }
        }
        None
    }
}

impl ChangeFeed for MemoryFeed {
    fn next_event(&mut self) -> BoxFuture<'_, ChangeEvent> {
        Box::pin(async move {
            let source = self.source.clone();
            loop {
                // Register before checking so a push in between is not missed
                let notified = source.inner.notify.notified();

                let injected = source.inner.fail_next.lock().unwrap().take();
                if let Some(error) = injected {
                    return Err(error);
                }
                if let Some(event) = self.poll_log() {
                    return Ok(event);
                }

                notified.await;
            }
        })
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Snapshot double serving fixed pages.
pub struct MemorySnapshot {
    pages: VecDeque<Vec<Customer>>,
    fail_at_page: Option<usize>,
    served: usize,
}

impl MemorySnapshot {
    pub fn new(documents: Vec<Customer>, page_size: usize) -> Self {
        let pages = documents
            .chunks(page_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();
        Self {
            pages,
            fail_at_page: None,
            served: 0,
        }
    }

    /// Fail when asked for page `n` (0-based).
    pub fn failing_at_page(mut self, n: usize) -> Self {
        self.fail_at_page = Some(n);
        self
    }
}

impl SnapshotSource for MemorySnapshot {
    fn next_page(&mut self) -> BoxFuture<'_, Option<Vec<Customer>>> {
        Box::pin(async move {
            if self.fail_at_page == Some(self.served) {
                return Err(AnonymizerError::redis_msg("SCAN", "injected scan failure"));
            }
            self.served += 1;
            Ok(self.pages.pop_front())
        })
    }
}

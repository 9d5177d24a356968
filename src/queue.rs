// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pending record queue.
//!
//! Records wait here between the feed (or snapshot) and the transform/write
//! step. The queue is plain FIFO: insertion order is source emission order,
//! and batches come off the front.
//!
//! ```text
//! push ──▶ [ r1 r2 r3 ... rN ] ──▶ take_batch(n) ──▶ transform + write
//!                  ▲
//!          should_drain() once len >= threshold
//! ```
//!
//! Each entry may carry the feed position it was read at. Snapshot records
//! have none; a batch's checkpoint is the position of its last positioned
//! entry.

use crate::position::Position;
use crate::record::Customer;
use std::collections::VecDeque;
use std::time::Instant;

/// A queued record and where in the feed it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Pending {
    pub record: Customer,
    pub position: Option<Position>,
}

/// A batch removed from the front of the queue.
#[derive(Debug, Default)]
pub struct Batch {
    pub records: Vec<Customer>,
    /// Position of the last positioned entry in the batch, if any.
    pub last_position: Option<Position>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// FIFO buffer with a size-based drain threshold.
#[derive(Debug)]
pub struct BatchQueue {
    pending: VecDeque<Pending>,
    /// Queue length that triggers a drain, and the maximum batch size.
    threshold: usize,
    /// When the oldest pending record was enqueued.
    oldest_at: Option<Instant>,
}

impl BatchQueue {
    pub fn new(threshold: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            threshold: threshold.max(1),
            oldest_at: None,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Append to the tail.
    pub fn push(&mut self, record: Customer, position: Option<Position>) {
        if self.pending.is_empty() {
            self.oldest_at = Some(Instant::now());
        }
        self.pending.push_back(Pending { record, position });
    }

    /// True once the queue holds at least `threshold` records.
    pub fn should_drain(&self) -> bool {
        self.pending.len() >= self.threshold
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// How long the oldest pending record has been waiting.
    pub fn oldest_age(&self) -> Option<std::time::Duration> {
        self.oldest_at.map(|at| at.elapsed())
    }

    /// Remove up to `threshold` of the oldest records.
    pub fn take_batch(&mut self) -> Batch {
        self.take(self.threshold)
    }

    /// Remove up to `max` of the oldest records.
    pub fn take(&mut self, max: usize) -> Batch {
        let n = max.min(self.pending.len());
        let mut batch = Batch {
            records: Vec::with_capacity(n),
            last_position: None,
        };
        for entry in self.pending.drain(..n) {
            if entry.position.is_some() {
                batch.last_position = entry.position;
            }
            batch.records.push(entry.record);
        }

        self.oldest_at = if self.pending.is_empty() {
            None
        } else {
            // Remaining records were all enqueued after the drained ones
            Some(Instant::now())
        };
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Address;

    fn customer(id: &str) -> Customer {
        Customer {
            id: id.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            address: Address {
                line1: String::new(),
                line2: String::new(),
                postcode: String::new(),
                city: String::new(),
                state: String::new(),
                country: String::new(),
            },
            created_at: chrono::DateTime::from_timestamp(0, 0).unwrap(),
            extra: Default::default(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = BatchQueue::new(10);
        for i in 0..5 {
            queue.push(customer(&i.to_string()), Some(Position::new(i, 0)));
        }
        let batch = queue.take_batch();
        let ids: Vec<_> = batch.records.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["0", "1", "2", "3", "4"]);
        assert_eq!(batch.last_position, Some(Position::new(4, 0)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_threshold_triggers_drain() {
        let mut queue = BatchQueue::new(3);
        queue.push(customer("a"), None);
        queue.push(customer("b"), None);
        assert!(!queue.should_drain());
        queue.push(customer("c"), None);
        assert!(queue.should_drain());
    }

    #[test]
    fn test_take_batch_is_bounded_by_threshold() {
        let mut queue = BatchQueue::new(2);
        for id in ["a", "b", "c"] {
            queue.push(customer(id), None);
        }
        let first = queue.take_batch();
        assert_eq!(first.len(), 2);
        assert_eq!(queue.len(), 1);

        let second = queue.take_batch();
        assert_eq!(second.records[0].id, "c");
        assert!(queue.is_empty());
        assert!(queue.oldest_age().is_none());
    }

    #[test]
    fn test_take_from_empty_queue() {
        let mut queue = BatchQueue::new(5);
        let batch = queue.take_batch();
        assert!(batch.is_empty());
        assert_eq!(batch.last_position, None);
    }

    #[test]
    fn test_snapshot_records_have_no_position() {
        let mut queue = BatchQueue::new(5);
        queue.push(customer("a"), Some(Position::new(7, 1)));
        queue.push(customer("b"), None);
        let batch = queue.take_batch();
        // Last *positioned* entry wins
        assert_eq!(batch.last_position, Some(Position::new(7, 1)));
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let queue = BatchQueue::new(0);
        assert_eq!(queue.threshold(), 1);
    }

    #[test]
    fn test_oldest_age_tracks_first_push() {
        let mut queue = BatchQueue::new(5);
        assert!(queue.oldest_age().is_none());
        queue.push(customer("a"), None);
        assert!(queue.oldest_age().is_some());
    }
}

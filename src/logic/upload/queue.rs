//! Upload Queue - bounded FIFO of results awaiting delivery
//!
//! Entries stay queued until the transport confirms them. `drain` only
//! marks a held-back window at the front; `confirm` removes it and
//! `release` hands it back to the retry path. When full, the oldest
//! unconfirmed entry is evicted to admit the new one.

use std::collections::VecDeque;

use serde::Serialize;

use crate::logic::model::InferenceResult;

#[derive(Debug, Clone)]
struct Queued {
    seq: u64,
    result: InferenceResult,
}

/// Held-back window handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub first_seq: u64,
    pub last_seq: u64,
    pub items: Vec<InferenceResult>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Queue status information
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub capacity: usize,
    pub in_flight: usize,
    pub evicted: u64,
    pub confirmed: u64,
}

pub struct UploadQueue {
    entries: VecDeque<Queued>,
    capacity: usize,
    next_seq: u64,
    /// Last sequence number of the outstanding batch
    in_flight_until: Option<u64>,
    evicted: u64,
    confirmed: u64,
}

impl UploadQueue {
    /// `capacity` of zero is bumped to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 0,
            in_flight_until: None,
            evicted: 0,
            confirmed: 0,
        }
    }

    /// Never blocks. Returns the evicted result when the queue was full.
    pub fn enqueue(&mut self, result: InferenceResult) -> Option<InferenceResult> {
        let evicted = if self.entries.len() == self.capacity {
            self.evicted += 1;
            self.entries.pop_front().map(|q| q.result)
        } else {
            None
        };

        self.entries.push_back(Queued {
            seq: self.next_seq,
            result,
        });
        self.next_seq += 1;

        evicted
    }

    /// Up to `max_items` from the front, oldest first. Nothing is removed;
    /// while a batch is outstanding the same window is offered again.
    pub fn drain(&mut self, max_items: usize) -> Batch {
        // a held window that was evicted entirely falls through to a fresh one
        let take = match self.in_flight() {
            0 => self.entries.len().min(max_items),
            held => held,
        };

        let window: Vec<&Queued> = self.entries.iter().take(take).collect();
        let (first_seq, last_seq) = match (window.first(), window.last()) {
            (Some(first), Some(last)) => (first.seq, last.seq),
            _ => {
                self.in_flight_until = None;
                return Batch {
                    first_seq: self.next_seq,
                    last_seq: self.next_seq,
                    items: Vec::new(),
                };
            }
        };

        let items = window.iter().map(|q| q.result.clone()).collect();
        self.in_flight_until = Some(last_seq);

        Batch {
            first_seq,
            last_seq,
            items,
        }
    }

    /// Delivery confirmed: drop everything up to the batch's last entry
    pub fn confirm(&mut self, batch: &Batch) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let mut removed = 0;
        while self.entries.front().is_some_and(|q| q.seq <= batch.last_seq) {
            self.entries.pop_front();
            removed += 1;
        }

        self.confirmed += removed as u64;
        // a stale batch leaves a newer outstanding window held
        if self.in_flight_until.is_some_and(|held| batch.last_seq >= held) {
            self.in_flight_until = None;
        }
        removed
    }

    /// Delivery gave up: the window goes back to the retry path
    pub fn release(&mut self, _batch: &Batch) {
        self.in_flight_until = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Entries currently held back for an outstanding batch
    pub fn in_flight(&self) -> usize {
        match self.in_flight_until {
            Some(last) => self.entries.iter().take_while(|q| q.seq <= last).count(),
            None => 0,
        }
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            pending: self.entries.len(),
            capacity: self.capacity,
            in_flight: self.in_flight(),
            evicted: self.evicted,
            confirmed: self.confirmed,
        }
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::event::StructuredRecord;

/// Unbounded FIFO of records waiting for the dispatcher.
///
/// Every operation holds the lock only for the duration of a `VecDeque` call, so producers on the
/// journal thread are never held up by delivery. Records handed out by [`drain_up_to`] stay
/// claimed until the dispatcher releases them after a delivery attempt or puts them back, so
/// [`outstanding`] counts every record not yet attempted.
///
/// [`drain_up_to`]: RecordQueue::drain_up_to
/// [`outstanding`]: RecordQueue::outstanding
#[derive(Debug, Default)]
pub struct RecordQueue {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: VecDeque<StructuredRecord>,
    claimed: usize,
}

impl RecordQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes in an individual record.
    pub fn enqueue(&self, record: StructuredRecord) {
        self.lock().records.push_back(record);
    }

    /// Removes and returns up to `max` records, oldest first. They count as claimed until
    /// [`release`](Self::release) or [`requeue_front`](Self::requeue_front).
    pub fn drain_up_to(&self, max: usize) -> Vec<StructuredRecord> {
        let mut inner = self.lock();
        let count = max.min(inner.records.len());
        inner.claimed += count;
        inner.records.drain(..count).collect()
    }

    /// Marks `count` claimed records as done with, delivered or not.
    pub fn release(&self, count: usize) {
        let mut inner = self.lock();
        inner.claimed = inner.claimed.saturating_sub(count);
    }

    /// Puts claimed records back ahead of everything queued, keeping their order.
    pub fn requeue_front(&self, records: Vec<StructuredRecord>) {
        let mut inner = self.lock();
        inner.claimed = inner.claimed.saturating_sub(records.len());
        for record in records.into_iter().rev() {
            inner.records.push_front(record);
        }
    }

    /// Discards everything queued and returns how many records were dropped. Claimed records are
    /// left to their holder.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.records.len();
        inner.records.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Queued plus claimed records.
    pub fn outstanding(&self) -> usize {
        let inner = self.lock();
        inner.records.len() + inner.claimed
    }

    // A panic elsewhere cannot leave the deque half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

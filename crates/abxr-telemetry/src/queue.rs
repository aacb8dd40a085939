// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded per-channel record queue.
//!
//! The queue only holds its lock for the duration of a push, a snapshot or a
//! requeue, never across a network call. A snapshot moves every pending
//! record out at once, so records pushed while a send is in flight land in
//! the fresh queue and are picked up by the next flush.
//!
//! # Capacity
//!
//! Unlike an evicting buffer, a full queue rejects the *new* record: data
//! already waiting for delivery is never displaced by newer data.

use crate::error::DeliveryError;
use crate::record::Record;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct RecordQueue {
    records: Mutex<VecDeque<Record>>,
    capacity: usize,
}

impl RecordQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        RecordQueue {
            records: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Record>> {
        // A panic while holding the lock cannot leave the deque half-mutated
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `record` and returns the new queue length.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::QueueFull`] when the queue already holds `capacity`
    /// records; the record is dropped.
    pub fn push(&self, record: Record) -> Result<usize, DeliveryError> {
        let mut records = self.lock();
        if records.len() >= self.capacity {
            return Err(DeliveryError::QueueFull {
                capacity: self.capacity,
            });
        }
        records.push_back(record);
        Ok(records.len())
    }

    /// Moves every queued record out, oldest first, leaving the queue empty.
    pub fn take_snapshot_and_clear(&self) -> Vec<Record> {
        let mut records = self.lock();
        std::mem::take(&mut *records).into()
    }

    /// Puts a previously taken batch back at the front of the queue, ahead of
    /// anything pushed since, keeping the batch's own order.
    ///
    /// Only as many records as fit under the capacity are reinserted; the
    /// oldest ones win. Returns the number of records dropped.
    pub fn requeue(&self, batch: Vec<Record>) -> usize {
        let mut records = self.lock();
        let room = self.capacity.saturating_sub(records.len());
        let keep = room.min(batch.len());
        let dropped = batch.len() - keep;

        for record in batch.into_iter().take(keep).rev() {
            records.push_front(record);
        }
        dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for one channel.
#[derive(Debug, Default)]
pub struct ChannelStats {
    queued: AtomicU64,
    delivered: AtomicU64,
    dropped_full: AtomicU64,
    dropped_permanent: AtomicU64,
    requeued: AtomicU64,
    send_attempts: AtomicU64,
}

/// Point-in-time copy of [`ChannelStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Records accepted by the queue
    pub queued: u64,
    /// Records acknowledged by the backend
    pub delivered: u64,
    /// Records rejected by a full queue, on push or on requeue
    pub dropped_full: u64,
    /// Records dropped after a 4xx or a serialization failure
    pub dropped_permanent: u64,
    /// Records put back after a retryable failure
    pub requeued: u64,
    /// HTTP requests issued, retries included
    pub send_attempts: u64,
}

impl ChannelStats {
    pub(crate) fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, count: usize) {
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_full(&self, count: usize) {
        self.dropped_full.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_permanent(&self, count: usize) {
        self.dropped_permanent
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_requeued(&self, count: usize) {
        self.requeued.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_send_attempts(&self, count: u32) {
        self.send_attempts
            .fetch_add(u64::from(count), Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            dropped_permanent: self.dropped_permanent.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            send_attempts: self.send_attempts.load(Ordering::Relaxed),
        }
    }
}

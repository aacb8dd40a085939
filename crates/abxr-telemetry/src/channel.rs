// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One telemetry stream: its queue, its flush cadence and its sender.
//!
//! # Flushing
//!
//! ```text
//!   empty? ──yes──> Empty
//!     │
//!   authenticated? ──no──> Deferred (records stay queued)
//!     │
//!   rate limiter ──too soon──> RateLimited (timer brought forward)
//!     │
//!   snapshot ──> batches of `entries_per_send_attempt` ──> Sender
//!                    │
//!                    ├─ ok         ──> rate limiter ──too soon──> Paused
//!                    │                      │               (rest requeued)
//!                    │                      └──> next batch
//!                    ├─ permanent  ──> drop batch, next batch
//!                    └─ retryable  ──> requeue batch + rest at the front,
//!                                      retry timer
//! ```
//!
//! Flushes of the same channel never overlap: a periodic flush that finds
//! another one running returns [`FlushOutcome::InFlight`], while
//! [`Channel::flush_now`] waits its turn.

use crate::auth::AuthProvider;
use crate::config::PipelineConfig;
use crate::error::DeliveryError;
use crate::queue::RecordQueue;
use crate::record::{ChannelKind, Record};
use crate::sender::{Sender, SenderConfig};
use crate::stats::{ChannelStats, StatsSnapshot};
use crate::trigger::{BatchTrigger, SharedRateLimiter};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Notified after each batch the backend acknowledged.
pub trait DeliveryObserver: Send + Sync {
    fn on_delivered(&self, kind: ChannelKind, batch: &[Record]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued
    Empty,
    /// No credentials yet
    Deferred,
    /// Another flush of this channel is running
    InFlight,
    /// The previous network attempt was too recent
    RateLimited,
    /// The rate limiter stopped a flush between two batches; `remaining`
    /// records went back to the front of the queue
    Paused {
        delivered: usize,
        dropped: usize,
        remaining: usize,
    },
    /// Every batch was either delivered or permanently rejected
    Completed { delivered: usize, dropped: usize },
    /// A batch failed with a retryable error and was put back
    Requeued {
        delivered: usize,
        requeued: usize,
        dropped: usize,
    },
}

pub struct Channel {
    kind: ChannelKind,
    queue: RecordQueue,
    trigger: Mutex<BatchTrigger>,
    limiter: SharedRateLimiter,
    sender: Sender,
    auth: Arc<dyn AuthProvider>,
    batch_size: usize,
    in_flight: tokio::sync::Mutex<()>,
    stats: Arc<ChannelStats>,
    observer: Option<Arc<dyn DeliveryObserver>>,
}

impl Channel {
    #[must_use]
    pub fn new(
        kind: ChannelKind,
        config: &PipelineConfig,
        client: reqwest::Client,
        auth: Arc<dyn AuthProvider>,
        observer: Option<Arc<dyn DeliveryObserver>>,
    ) -> Self {
        let stats = Arc::new(ChannelStats::default());
        let limiter = SharedRateLimiter::new(config.minimum_send_gap);
        let sender = Sender::new(SenderConfig {
            kind,
            client,
            url: config.url_for(kind),
            auth: Arc::clone(&auth),
            timeout: config.request_timeout,
            attempts: config.send_retries_on_failure,
            retry_wait: config.send_retry_interval,
            limiter: limiter.clone(),
            stats: Arc::clone(&stats),
        });

        Channel {
            kind,
            queue: RecordQueue::new(config.maximum_cached_items),
            trigger: Mutex::new(BatchTrigger::new(
                config.send_next_batch_wait,
                config.send_retry_interval,
            )),
            limiter,
            sender,
            auth,
            batch_size: config.entries_per_send_attempt(kind).max(1),
            in_flight: tokio::sync::Mutex::new(()),
            stats,
            observer,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Queues `record`. A full queue drops it with a warning; this never
    /// fails towards the producer.
    pub fn push(&self, record: Record) {
        match self.queue.push(record) {
            Ok(len) => {
                self.stats.record_queued();
                if len >= self.batch_size {
                    self.trigger().request_immediate();
                }
            }
            Err(e) => {
                self.stats.record_dropped_full(1);
                warn!("{} | Dropping record: {e}", self.kind);
            }
        }
    }

    /// Advances the batch timer. Returns `true` when a flush is due.
    pub fn tick(&self, elapsed: Duration) -> bool {
        self.trigger().advance(elapsed)
    }

    /// Periodic flush: gives up if another flush is running or the rate
    /// limiter says it is too soon.
    pub async fn flush(&self) -> FlushOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("{} | Flush already in progress, skipping", self.kind);
            return FlushOutcome::InFlight;
        };
        self.flush_locked(false).await
    }

    /// Explicit flush: waits for a running flush and for the rate limiter.
    pub async fn flush_now(&self) -> FlushOutcome {
        let _guard = self.in_flight.lock().await;
        self.flush_locked(true).await
    }

    async fn flush_locked(&self, wait_for_limiter: bool) -> FlushOutcome {
        if self.queue.is_empty() {
            return FlushOutcome::Empty;
        }
        if !self.auth.is_authenticated() {
            debug!("{} | Not authenticated yet, deferring flush", self.kind);
            // keep a crossed threshold armed so the first tick after auth sends
            if self.queue.len() >= self.batch_size {
                self.trigger().request_immediate();
            }
            return FlushOutcome::Deferred;
        }
        if let Err(wait) = self.acquire_slot(wait_for_limiter).await {
            self.rate_limited(wait);
            return FlushOutcome::RateLimited;
        }

        let mut pending: VecDeque<Record> = self.queue.take_snapshot_and_clear().into();
        let mut delivered = 0;
        let mut dropped = 0;
        let mut first = true;

        while !pending.is_empty() {
            if !first {
                if let Err(wait) = self.acquire_slot(wait_for_limiter).await {
                    let (requeued, lost) = self.requeue_unsent(pending.into());
                    self.rate_limited(wait);
                    return FlushOutcome::Paused {
                        delivered,
                        dropped: dropped + lost,
                        remaining: requeued,
                    };
                }
            }
            first = false;

            let take = self.batch_size.min(pending.len());
            let batch: Vec<Record> = pending.drain(..take).collect();

            match self.sender.send(&batch).await {
                Ok(()) => {
                    delivered += batch.len();
                    self.stats.record_delivered(batch.len());
                    if let Some(observer) = &self.observer {
                        observer.on_delivered(self.kind, &batch);
                    }
                }
                Err(e) if e.is_retryable() => {
                    let mut failed = batch;
                    failed.extend(pending.drain(..));
                    let (requeued, lost) = self.requeue(failed, &e);
                    self.trigger().schedule_retry();
                    return FlushOutcome::Requeued {
                        delivered,
                        requeued,
                        dropped: dropped + lost,
                    };
                }
                Err(e) => {
                    dropped += batch.len();
                    self.stats.record_dropped_permanent(batch.len());
                    error!("{} | Dropping {} records: {e}", self.kind, batch.len());
                }
            }
        }

        let backlog = self.queue.len();
        let mut trigger = self.trigger();
        if backlog >= self.batch_size {
            trigger.request_immediate();
        } else {
            trigger.reset();
        }
        FlushOutcome::Completed { delivered, dropped }
    }

    /// Takes the rate limiter slot for one network attempt. Explicit flushes
    /// wait for it; periodic ones get the remaining wait back.
    async fn acquire_slot(&self, wait_for_limiter: bool) -> Result<(), Duration> {
        if wait_for_limiter {
            self.limiter.acquire().await;
            return Ok(());
        }
        self.limiter.try_acquire()
    }

    fn rate_limited(&self, wait: Duration) {
        debug!(
            "{} | Rate limited, next attempt in {} ms",
            self.kind,
            wait.as_millis()
        );
        self.trigger().schedule_within(wait);
    }

    /// Puts back batches a paused flush did not get to.
    fn requeue_unsent(&self, unsent: Vec<Record>) -> (usize, usize) {
        let count = unsent.len();
        let lost = self.queue.requeue(unsent);
        if lost > 0 {
            self.stats.record_dropped_full(lost);
            warn!(
                "{} | Queue full, {lost} records lost while pausing flush",
                self.kind
            );
        }
        (count - lost, lost)
    }

    fn requeue(&self, failed: Vec<Record>, cause: &DeliveryError) -> (usize, usize) {
        let count = failed.len();
        let lost = self.queue.requeue(failed);
        let requeued = count - lost;

        self.stats.record_requeued(requeued);
        if lost > 0 {
            self.stats.record_dropped_full(lost);
            warn!(
                "{} | Queue full, {lost} records lost while requeueing",
                self.kind
            );
        }
        match cause {
            DeliveryError::AuthNotReady => {
                debug!("{} | Credentials went away, {requeued} records requeued", self.kind);
            }
            _ => warn!(
                "{} | Delivery failed, {requeued} records requeued: {cause}",
                self.kind
            ),
        }
        (requeued, lost)
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    #[must_use]
    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    #[cfg(test)]
    pub(crate) fn take_queued(&self) -> Vec<Record> {
        self.queue.take_snapshot_and_clear()
    }

    fn trigger(&self) -> MutexGuard<'_, BatchTrigger> {
        self.trigger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

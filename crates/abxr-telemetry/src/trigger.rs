// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flush cadence for one channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Countdown to the next flush of a channel.
///
/// Fires once the countdown reaches zero, whether or not anything is queued;
/// the channel short-circuits empty flushes before touching the network.
#[derive(Debug, Clone)]
pub struct BatchTrigger {
    interval: Duration,
    retry_interval: Duration,
    remaining: Duration,
}

impl BatchTrigger {
    #[must_use]
    pub fn new(interval: Duration, retry_interval: Duration) -> Self {
        BatchTrigger {
            interval,
            retry_interval,
            remaining: interval,
        }
    }

    /// Counts `elapsed` down. Returns `true` when a flush is due, in which
    /// case the countdown restarts from the full interval.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        self.remaining = self.remaining.saturating_sub(elapsed);
        if self.remaining.is_zero() {
            self.remaining = self.interval;
            return true;
        }
        false
    }

    /// Makes the next [`advance`](Self::advance) fire.
    pub fn request_immediate(&mut self) {
        self.remaining = Duration::ZERO;
    }

    /// Restarts the full interval after a completed send.
    pub fn reset(&mut self) {
        self.remaining = self.interval;
    }

    /// Uses the shorter retry interval after a failed send.
    pub fn schedule_retry(&mut self) {
        self.remaining = self.retry_interval;
    }

    /// Brings the next flush forward to at most `delay` from now.
    pub fn schedule_within(&mut self, delay: Duration) {
        self.remaining = self.remaining.min(delay);
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

/// Enforces a minimum gap between two network attempts of a channel.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_gap: Duration,
    last_attempt: Option<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(min_gap: Duration) -> Self {
        RateLimiter {
            min_gap,
            last_attempt: None,
        }
    }

    /// Records an attempt at `now` if the gap since the previous one is
    /// large enough.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if !self.wait_time(now).is_zero() {
            return false;
        }
        self.last_attempt = Some(now);
        true
    }

    /// How long until an attempt at `now` would be allowed.
    #[must_use]
    pub fn wait_time(&self, now: Instant) -> Duration {
        self.last_attempt.map_or(Duration::ZERO, |last| {
            self.min_gap
                .saturating_sub(now.saturating_duration_since(last))
        })
    }
}

/// [`RateLimiter`] shared by a channel and its sender, so batches and the
/// retries inside a batch all count against the same gap.
#[derive(Debug, Clone)]
pub struct SharedRateLimiter {
    inner: Arc<Mutex<RateLimiter>>,
}

impl SharedRateLimiter {
    #[must_use]
    pub fn new(min_gap: Duration) -> Self {
        SharedRateLimiter {
            inner: Arc::new(Mutex::new(RateLimiter::new(min_gap))),
        }
    }

    /// Takes the slot now, or returns how long until it frees up.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut limiter = self.lock();
        if limiter.try_acquire(now) {
            Ok(())
        } else {
            Err(limiter.wait_time(now))
        }
    }

    /// Sleeps until the slot is free, then takes it.
    pub async fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            tokio::time::sleep(wait).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, RateLimiter> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

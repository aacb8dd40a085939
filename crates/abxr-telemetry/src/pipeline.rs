// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The four channels behind one producer-facing handle.
//!
//! A [`TelemetryPipeline`] is cheap to clone; every clone feeds the same
//! channels. Nothing is global, so independent pipelines can live side by
//! side (one per test, for instance).
//!
//! # Lifecycle
//!
//! 1. Build it with [`TelemetryPipeline::new`] or
//!    [`TelemetryPipeline::with_options`]
//! 2. [`start`](TelemetryPipeline::start) the tick loop
//! 3. Produce records with [`event`](TelemetryPipeline::event),
//!    [`log`](TelemetryPipeline::log),
//!    [`telemetry`](TelemetryPipeline::telemetry) and
//!    [`storage_set`](TelemetryPipeline::storage_set)
//! 4. Call [`shutdown`](TelemetryPipeline::shutdown) when the host is going
//!    away: it stops the loop, flushes everything, and schedules a backup
//!    flush in case the first one is cut short.

use crate::auth::AuthProvider;
use crate::channel::{Channel, DeliveryObserver, FlushOutcome};
use crate::config::PipelineConfig;
use crate::error::{ConfigError, DeliveryError};
use crate::http::get_client;
use crate::payload::decode_storage_response;
use crate::record::{Attributes, ChannelKind, KeepPolicy, LogLevel, Record, StorageScope};
use crate::stats::StatsSnapshot;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Attribute carrying the host's current scene, when a label provider is set.
pub const SCENE_ATTRIBUTE: &str = "scene_name";
/// Attribute added to an event that closes a timed event, in seconds.
pub const DURATION_ATTRIBUTE: &str = "duration";

pub type ContextLabelFn = Arc<dyn Fn() -> Option<String> + Send + Sync>;

pub struct PipelineOptions {
    pub config: PipelineConfig,
    pub auth: Arc<dyn AuthProvider>,
    pub observer: Option<Arc<dyn DeliveryObserver>>,
    pub context_label: Option<ContextLabelFn>,
}

/// Result of flushing every channel once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    pub events: FlushOutcome,
    pub logs: FlushOutcome,
    pub telemetry: FlushOutcome,
    pub storage: FlushOutcome,
}

impl FlushSummary {
    #[must_use]
    pub fn outcome(&self, kind: ChannelKind) -> FlushOutcome {
        match kind {
            ChannelKind::Events => self.events,
            ChannelKind::Logs => self.logs,
            ChannelKind::Telemetry => self.telemetry,
            ChannelKind::Storage => self.storage,
        }
    }

    /// Records acknowledged by the backend across all channels.
    #[must_use]
    pub fn delivered(&self) -> usize {
        ChannelKind::ALL
            .iter()
            .map(|kind| match self.outcome(*kind) {
                FlushOutcome::Completed { delivered, .. }
                | FlushOutcome::Paused { delivered, .. }
                | FlushOutcome::Requeued { delivered, .. } => delivered,
                _ => 0,
            })
            .sum()
    }
}

/// Handles returned by [`TelemetryPipeline::shutdown`].
pub struct Shutdown {
    pub primary: FlushSummary,
    pub backup: JoinHandle<FlushSummary>,
}

#[derive(Clone)]
pub struct TelemetryPipeline {
    inner: Arc<Inner>,
}

struct Inner {
    config: PipelineConfig,
    auth: Arc<dyn AuthProvider>,
    events: Arc<Channel>,
    logs: Arc<Channel>,
    telemetry: Arc<Channel>,
    storage: Arc<Channel>,
    context_label: Option<ContextLabelFn>,
    timed_events: Mutex<HashMap<String, Instant>>,
    send_all_calls: AtomicU64,
    cancel: CancellationToken,
}

impl TelemetryPipeline {
    /// # Errors
    ///
    /// See [`with_options`](Self::with_options).
    pub fn new(
        config: PipelineConfig,
        auth: Arc<dyn AuthProvider>,
    ) -> Result<Self, ConfigError> {
        Self::with_options(PipelineOptions {
            config,
            auth,
            observer: None,
            context_label: None,
        })
    }

    /// # Errors
    ///
    /// When the HTTP client shared by the channels cannot be built.
    pub fn with_options(options: PipelineOptions) -> Result<Self, ConfigError> {
        let PipelineOptions {
            config,
            auth,
            observer,
            context_label,
        } = options;
        let client = get_client(&config)?;
        let channel = |kind| {
            Arc::new(Channel::new(
                kind,
                &config,
                client.clone(),
                Arc::clone(&auth),
                observer.clone(),
            ))
        };

        let events = channel(ChannelKind::Events);
        let logs = channel(ChannelKind::Logs);
        let telemetry = channel(ChannelKind::Telemetry);
        let storage = channel(ChannelKind::Storage);

        Ok(TelemetryPipeline {
            inner: Arc::new(Inner {
                config,
                auth,
                events,
                logs,
                telemetry,
                storage,
                context_label,
                timed_events: Mutex::new(HashMap::new()),
                send_all_calls: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        })
    }

    #[must_use]
    pub fn channel(&self, kind: ChannelKind) -> &Channel {
        match kind {
            ChannelKind::Events => &self.inner.events,
            ChannelKind::Logs => &self.inner.logs,
            ChannelKind::Telemetry => &self.inner.telemetry,
            ChannelKind::Storage => &self.inner.storage,
        }
    }

    fn channel_arc(&self, kind: ChannelKind) -> Arc<Channel> {
        match kind {
            ChannelKind::Events => Arc::clone(&self.inner.events),
            ChannelKind::Logs => Arc::clone(&self.inner.logs),
            ChannelKind::Telemetry => Arc::clone(&self.inner.telemetry),
            ChannelKind::Storage => Arc::clone(&self.inner.storage),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    // Producers

    pub fn event(&self, name: &str, mut attributes: Attributes) {
        if let Some(started) = self.timed_events().remove(name) {
            attributes.insert(
                DURATION_ATTRIBUTE.to_string(),
                format!("{:.3}", started.elapsed().as_secs_f64()),
            );
        }
        self.enrich(&mut attributes);
        self.inner.events.push(Record::event(name, attributes));
    }

    /// Starts a timer closed by the next [`event`](Self::event) with the same
    /// name, which then carries a `duration` attribute. Restarting an
    /// existing timer resets it.
    pub fn start_timed_event(&self, name: &str) {
        self.timed_events()
            .insert(name.to_string(), Instant::now());
    }

    pub fn log(&self, level: LogLevel, message: &str, mut attributes: Attributes) {
        self.enrich(&mut attributes);
        self.inner
            .logs
            .push(Record::log(level, message, attributes));
    }

    pub fn log_debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, Attributes::new());
    }

    pub fn log_info(&self, message: &str) {
        self.log(LogLevel::Info, message, Attributes::new());
    }

    pub fn log_warn(&self, message: &str) {
        self.log(LogLevel::Warn, message, Attributes::new());
    }

    pub fn log_error(&self, message: &str) {
        self.log(LogLevel::Error, message, Attributes::new());
    }

    pub fn log_critical(&self, message: &str) {
        self.log(LogLevel::Critical, message, Attributes::new());
    }

    pub fn telemetry(&self, name: &str, mut attributes: Attributes) {
        self.enrich(&mut attributes);
        self.inner
            .telemetry
            .push(Record::telemetry(name, attributes));
    }

    /// Telemetry sample whose number travels as the `value` attribute.
    pub fn telemetry_value(&self, name: &str, value: f64, mut attributes: Attributes) {
        attributes.insert("value".to_string(), value.to_string());
        self.telemetry(name, attributes);
    }

    pub fn storage_set(
        &self,
        name: &str,
        entry: Attributes,
        scope: StorageScope,
        keep_policy: KeepPolicy,
    ) {
        self.inner
            .storage
            .push(Record::storage(name, entry, scope, keep_policy));
    }

    /// Reads the entries stored under `name`, bypassing the queue.
    pub async fn storage_get(
        &self,
        name: &str,
        scope: StorageScope,
    ) -> Result<Vec<Attributes>, DeliveryError> {
        if !self.inner.auth.is_authenticated() {
            return Err(DeliveryError::AuthNotReady);
        }
        let resp = self
            .inner
            .storage
            .sender()
            .request(
                Method::GET,
                &[("scope", scope.as_str()), ("name", name)],
                None,
            )
            .await?;
        let body = resp.bytes().await.map_err(|e| DeliveryError::Transient {
            status: None,
            message: format!("failed to read storage response: {e}"),
        })?;
        decode_storage_response(&body)
    }

    /// Deletes the entry `name`, or every entry of `scope` when `name` is
    /// `None`.
    pub async fn storage_remove(
        &self,
        name: Option<&str>,
        scope: StorageScope,
    ) -> Result<(), DeliveryError> {
        if !self.inner.auth.is_authenticated() {
            return Err(DeliveryError::AuthNotReady);
        }
        let mut query = vec![("scope", scope.as_str())];
        if let Some(name) = name {
            query.push(("name", name));
        }
        self.inner
            .storage
            .sender()
            .request(Method::DELETE, &query, None)
            .await?;
        Ok(())
    }

    fn enrich(&self, attributes: &mut Attributes) {
        let Some(label) = self.inner.context_label.as_ref().and_then(|f| f()) else {
            return;
        };
        attributes
            .entry(SCENE_ATTRIBUTE.to_string())
            .or_insert(label);
    }

    // Scheduling

    /// Advances every batch timer by `elapsed` and spawns a flush for each
    /// channel whose timer fired.
    pub fn tick(&self, elapsed: Duration) -> Vec<(ChannelKind, JoinHandle<FlushOutcome>)> {
        ChannelKind::ALL
            .iter()
            .filter(|kind| self.channel(**kind).tick(elapsed))
            .map(|kind| {
                let channel = self.channel_arc(*kind);
                (*kind, tokio::spawn(async move { channel.flush().await }))
            })
            .collect()
    }

    /// Drives [`tick`](Self::tick) every `tick_interval` until
    /// [`stop`](Self::stop) or [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        let mut ticker = interval(self.inner.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();
        debug!("Telemetry pipeline started");

        loop {
            tokio::select! {
                () = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let now = Instant::now();
                    self.tick(now.saturating_duration_since(last));
                    last = now;
                }
            }
        }

        debug!("Telemetry pipeline stopped");
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn start(&self) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.run().await })
    }

    /// Stops the tick loop. Queued records stay where they are.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }

    /// Flushes all four channels now, concurrently.
    pub async fn send_all(&self) -> FlushSummary {
        self.inner.send_all_calls.fetch_add(1, Ordering::Relaxed);
        let (events, logs, telemetry, storage) = tokio::join!(
            self.inner.events.flush_now(),
            self.inner.logs.flush_now(),
            self.inner.telemetry.flush_now(),
            self.inner.storage.flush_now(),
        );
        FlushSummary {
            events,
            logs,
            telemetry,
            storage,
        }
    }

    /// Process-exit hook: stops ticking, flushes everything, and schedules a
    /// backup flush after `shutdown_backup_delay`.
    pub async fn shutdown(&self) -> Shutdown {
        self.stop();
        let primary = self.send_all().await;
        info!(
            "Shutdown flush delivered {} records, backup flush in {} ms",
            primary.delivered(),
            self.inner.config.shutdown_backup_delay.as_millis()
        );

        let pipeline = self.clone();
        let delay = self.inner.config.shutdown_backup_delay;
        let backup = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pipeline.send_all().await
        });

        Shutdown { primary, backup }
    }

    /// Number of [`send_all`](Self::send_all) runs started so far.
    #[must_use]
    pub fn send_all_calls(&self) -> u64 {
        self.inner.send_all_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn pending(&self, kind: ChannelKind) -> usize {
        self.channel(kind).pending()
    }

    #[must_use]
    pub fn stats(&self, kind: ChannelKind) -> StatsSnapshot {
        self.channel(kind).stats()
    }

    fn timed_events(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.inner
            .timed_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

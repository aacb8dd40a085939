// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batched telemetry upload client.
//!
//! Records produced by an XR application (events, logs, telemetry samples and
//! storage entries) are queued per channel, flushed on a count threshold or a
//! timer, and POSTed as JSON to the collection backend with retries.
//!
//! ```text
//!   producer ──> RecordQueue ──(threshold | timer)──> Sender ──> HTTP POST
//!                    ^                                   │
//!                    └────────── requeue on failure ─────┘
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod payload;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod sender;
pub mod stats;
pub mod trigger;

pub use auth::{AuthProvider, SessionAuth};
pub use channel::{Channel, DeliveryObserver, FlushOutcome};
pub use config::PipelineConfig;
pub use error::{ConfigError, DeliveryError};
pub use pipeline::{ContextLabelFn, FlushSummary, PipelineOptions, Shutdown, TelemetryPipeline};
pub use record::{Attributes, ChannelKind, KeepPolicy, LogLevel, Record, StorageScope};
pub use stats::StatsSnapshot;

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod input;
mod logger;

use std::{env, sync::Arc};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use abxr_telemetry::{ChannelKind, PipelineConfig, SessionAuth, TelemetryPipeline};
use input::RecordLine;

const DEFAULT_LOG_LEVEL: &str = "info";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("ABXR_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or(DEFAULT_LOG_LEVEL.to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");
    let env_filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Invalid ABXR_LOG_LEVEL {log_level:?} ({e}), using {DEFAULT_LOG_LEVEL}");
            EnvFilter::new(format!("h2=off,hyper=off,rustls=off,{DEFAULT_LOG_LEVEL}"))
        }
    };

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .event_format(logger::Formatter::default())
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {e}");
    }

    debug!("Logging subsystem enabled");

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}. Shutting down relay.");
            return;
        }
    };

    let auth = Arc::new(SessionAuth::new());
    match (env::var("ABXR_TOKEN"), env::var("ABXR_SECRET")) {
        (Ok(token), Ok(secret)) => auth.set_credentials(&token, &secret),
        _ => warn!("ABXR_TOKEN or ABXR_SECRET not set, records will stay queued"),
    }

    info!("Relaying records to {}", config.rest_url);
    let pipeline = match TelemetryPipeline::new(config, auth) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("{e}. Shutting down relay.");
            return;
        }
    };
    let run = pipeline.start();

    relay_stdin(&pipeline).await;

    let shutdown = pipeline.shutdown().await;
    if let Err(e) = run.await {
        error!("Tick loop ended abnormally: {e}");
    }
    match shutdown.backup.await {
        Ok(summary) => debug!("Backup flush delivered {} records", summary.delivered()),
        Err(e) => error!("Backup flush failed: {e}"),
    }

    for kind in ChannelKind::ALL {
        let pending = pipeline.pending(kind);
        if pending > 0 {
            warn!("{kind} | {pending} records were not delivered");
        }
    }
}

/// Feeds stdin into `pipeline` until EOF or Ctrl-C.
async fn relay_stdin(pipeline: &TelemetryPipeline) {
    let mut lines = BufReader::new(stdin()).lines();
    let mut line_number: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, flushing");
                return;
            }
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    line_number += 1;
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match RecordLine::parse(line) {
                        Ok(record) => record.dispatch(pipeline),
                        Err(e) => warn!("Skipping line {line_number}: {e}"),
                    }
                }
                Ok(None) => {
                    debug!("End of input after {line_number} lines");
                    return;
                }
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    return;
                }
            }
        }
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Common test utilities for integration tests

#![allow(dead_code)]

pub mod backend;

use abxr_telemetry::PipelineConfig;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Pipeline settings tuned for fast tests against a local backend.
pub fn test_config(rest_url: &str) -> PipelineConfig {
    PipelineConfig {
        rest_url: rest_url.to_string(),
        data_entries_per_send_attempt: 2,
        storage_entries_per_send_attempt: 2,
        send_next_batch_wait: Duration::from_secs(30),
        send_retry_interval: Duration::from_millis(20),
        send_retries_on_failure: 3,
        request_timeout: Duration::from_secs(5),
        minimum_send_gap: Duration::ZERO,
        tick_interval: Duration::from_millis(10),
        shutdown_backup_delay: Duration::from_millis(50),
        ..Default::default()
    }
}

/// Polls `condition` until it holds, failing the test after `limit`.
pub async fn wait_until<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let result = timeout(limit, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not met after {limit:?}");
}

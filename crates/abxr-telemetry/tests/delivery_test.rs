// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end delivery tests against a local collection backend.

mod common;

use abxr_telemetry::{
    Attributes, ChannelKind, FlushOutcome, LogLevel, SessionAuth, TelemetryPipeline,
};
use axum::http::{Method, StatusCode};
use common::backend::MockBackend;
use common::{test_config, wait_until};
use std::sync::Arc;
use std::time::Duration;

fn attrs(pairs: &[(&str, &str)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn authenticated() -> Arc<SessionAuth> {
    Arc::new(SessionAuth::with_credentials("session-token", "session-secret"))
}

#[tokio::test]
async fn test_threshold_triggers_one_ordered_request() {
    let backend = MockBackend::new(0);
    let url = backend.start().await;

    let pipeline = TelemetryPipeline::new(test_config(&url), authenticated()).unwrap();
    let run = pipeline.start();

    pipeline.event("click", attrs(&[("x", "1")]));
    pipeline.event("click", attrs(&[("x", "2")]));

    wait_until(Duration::from_secs(5), || !backend.captured().is_empty()).await;
    // no second request sneaks in
    tokio::time::sleep(Duration::from_millis(100)).await;

    let requests = backend.captured();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.path, "/v1/collect/event");

    let json = request.json();
    let data = json["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["name"], "click");
    assert_eq!(data[0]["attributes"]["x"], "1");
    assert_eq!(data[1]["attributes"]["x"], "2");

    let first = data[0]["timestamp"].as_str().unwrap();
    let second = data[1]["timestamp"].as_str().unwrap();
    assert!(first.ends_with('Z'));
    assert!(first <= second, "timestamps out of order: {first} > {second}");

    assert_eq!(pipeline.pending(ChannelKind::Events), 0);
    pipeline.stop();
    run.await.unwrap();
}

#[tokio::test]
async fn test_below_threshold_waits_for_timer() {
    let backend = MockBackend::new(0);
    let url = backend.start().await;

    let mut config = test_config(&url);
    config.send_next_batch_wait = Duration::from_millis(200);
    let pipeline = TelemetryPipeline::new(config, authenticated()).unwrap();
    let run = pipeline.start();

    pipeline.log(LogLevel::Info, "scene loaded", Attributes::new());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.call_count(), 0);

    wait_until(Duration::from_secs(5), || backend.call_count() == 1).await;
    let requests = backend.captured();
    assert_eq!(requests[0].path, "/v1/collect/log");
    assert_eq!(requests[0].json()["data"][0]["level"], "info");

    pipeline.stop();
    run.await.unwrap();
}

#[tokio::test]
async fn test_transient_failures_deliver_exactly_once() {
    // 500, 500, then 200
    let backend = MockBackend::new(2);
    let url = backend.start().await;

    let pipeline = TelemetryPipeline::new(test_config(&url), authenticated()).unwrap();
    pipeline.event("click", Attributes::new());

    let summary = pipeline.send_all().await;
    assert_eq!(
        summary.events,
        FlushOutcome::Completed {
            delivered: 1,
            dropped: 0
        }
    );
    assert_eq!(backend.call_count(), 3);
    assert_eq!(backend.captured().len(), 1);
    assert_eq!(pipeline.pending(ChannelKind::Events), 0);

    let stats = pipeline.stats(ChannelKind::Events);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.send_attempts, 3);
}

#[tokio::test]
async fn test_failed_batch_is_retried_before_newer_records() {
    let backend = MockBackend::new(1);
    let url = backend.start().await;

    let mut config = test_config(&url);
    config.send_retries_on_failure = 1;
    let pipeline = TelemetryPipeline::new(config, authenticated()).unwrap();

    pipeline.event("a", Attributes::new());
    pipeline.event("b", Attributes::new());
    let summary = pipeline.send_all().await;
    assert!(matches!(
        summary.events,
        FlushOutcome::Requeued { requeued: 2, .. }
    ));
    assert_eq!(pipeline.pending(ChannelKind::Events), 2);

    pipeline.event("c", Attributes::new());
    pipeline.send_all().await;

    let names: Vec<Vec<String>> = backend
        .captured()
        .iter()
        .map(|request| request.record_names())
        .collect();
    assert_eq!(names, vec![vec!["a", "b"], vec!["c"]]);
    assert_eq!(pipeline.pending(ChannelKind::Events), 0);
}

#[tokio::test]
async fn test_client_errors_drop_batch_without_retry() {
    for status in [StatusCode::BAD_REQUEST, StatusCode::UNAUTHORIZED] {
        let backend = MockBackend::always(status);
        let url = backend.start().await;

        let pipeline = TelemetryPipeline::new(test_config(&url), authenticated()).unwrap();
        pipeline.telemetry("fps", attrs(&[("value", "72")]));

        let summary = pipeline.send_all().await;
        assert_eq!(
            summary.telemetry,
            FlushOutcome::Completed {
                delivered: 0,
                dropped: 1
            },
            "status {status}"
        );
        assert_eq!(backend.call_count(), 1, "status {status} was retried");
        assert_eq!(pipeline.pending(ChannelKind::Telemetry), 0);
        assert_eq!(pipeline.stats(ChannelKind::Telemetry).dropped_permanent, 1);
    }
}

#[tokio::test]
async fn test_records_wait_for_credentials() {
    let backend = MockBackend::new(0);
    let url = backend.start().await;

    let auth = Arc::new(SessionAuth::new());
    let pipeline = TelemetryPipeline::new(test_config(&url), auth.clone()).unwrap();
    pipeline.event("boot", Attributes::new());

    assert_eq!(pipeline.send_all().await.events, FlushOutcome::Deferred);
    assert_eq!(backend.call_count(), 0);
    assert_eq!(pipeline.pending(ChannelKind::Events), 1);

    auth.set_credentials("late-token", "late-secret");
    assert_eq!(pipeline.send_all().await.delivered(), 1);

    let request = &backend.captured()[0];
    assert_eq!(request.headers["authorization"], "Bearer late-token");
    assert!(request.headers.contains_key("x-abxrlib-timestamp"));
    assert!(request.headers.contains_key("x-abxrlib-hash"));
}

#[tokio::test]
async fn test_threshold_crossed_before_auth_sends_once_authenticated() {
    let backend = MockBackend::new(0);
    let url = backend.start().await;

    let auth = Arc::new(SessionAuth::new());
    let pipeline = TelemetryPipeline::new(test_config(&url), auth.clone()).unwrap();
    let run = pipeline.start();

    pipeline.event("click", attrs(&[("x", "1")]));
    pipeline.event("click", attrs(&[("x", "2")]));
    // a few ticks go by without credentials
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.call_count(), 0);

    auth.set_credentials("late-token", "late-secret");
    // well before the 30 s batch timer
    wait_until(Duration::from_secs(2), || backend.captured().len() == 1).await;
    assert_eq!(backend.captured()[0].record_names(), vec!["click", "click"]);

    pipeline.stop();
    run.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_flushes_every_channel_and_runs_backup() {
    let backend = MockBackend::new(0);
    let url = backend.start().await;

    let pipeline = TelemetryPipeline::new(test_config(&url), authenticated()).unwrap();
    let run = pipeline.start();

    pipeline.event("quit", Attributes::new());
    pipeline.log_error("crash reporter armed");
    pipeline.telemetry_value("battery", 0.5, Attributes::new());

    let shutdown = pipeline.shutdown().await;
    assert_eq!(shutdown.primary.delivered(), 3);
    for kind in ChannelKind::ALL {
        assert_eq!(pipeline.pending(kind), 0, "{kind} still has records");
    }
    run.await.unwrap();

    let backup = shutdown.backup.await.unwrap();
    assert_eq!(backup.delivered(), 0);
    assert_eq!(pipeline.send_all_calls(), 2);

    let mut paths: Vec<String> = backend.captured().into_iter().map(|r| r.path).collect();
    paths.sort();
    assert_eq!(
        paths,
        vec!["/v1/collect/event", "/v1/collect/log", "/v1/collect/telemetry"]
    );
}

#[tokio::test]
async fn test_storage_writes_use_their_own_batch_size() {
    let backend = MockBackend::new(0);
    let url = backend.start().await;

    let mut config = test_config(&url);
    config.data_entries_per_send_attempt = 10;
    config.storage_entries_per_send_attempt = 1;
    let pipeline = TelemetryPipeline::new(config, authenticated()).unwrap();

    for level in ["1", "2", "3"] {
        pipeline.storage_set(
            "progress",
            attrs(&[("level", level)]),
            abxr_telemetry::StorageScope::User,
            abxr_telemetry::KeepPolicy::AppendHistory,
        );
    }
    pipeline.send_all().await;

    let requests = backend.captured();
    assert_eq!(requests.len(), 3);
    for (request, level) in requests.iter().zip(["1", "2", "3"]) {
        assert_eq!(request.path, "/v1/storage");
        let record = &request.json()["data"][0];
        assert_eq!(record["scope"], "user");
        assert_eq!(record["keepPolicy"], "appendHistory");
        assert_eq!(record["attributes"]["level"], level);
    }
}

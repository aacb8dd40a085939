// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collection backend that can simulate failures

use axum::{
    body::Bytes,
    http::{HeaderMap, Method, StatusCode, Uri},
    Router,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }

    /// Names of the records in the `data` array, in wire order.
    pub fn record_names(&self) -> Vec<String> {
        self.json()["data"]
            .as_array()
            .expect("data should be an array")
            .iter()
            .map(|record| record["name"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

/// Answers 500 to the first `fail_count` requests, then `success_status`.
#[derive(Clone)]
pub struct MockBackend {
    /// Requests that were answered successfully
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    /// Every request, failed or not
    call_count: Arc<AtomicUsize>,
    fail_count: usize,
    fail_status: StatusCode,
    success_status: StatusCode,
}

impl MockBackend {
    pub fn new(fail_count: usize) -> Self {
        Self {
            captured: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(AtomicUsize::new(0)),
            fail_count,
            fail_status: StatusCode::INTERNAL_SERVER_ERROR,
            success_status: StatusCode::OK,
        }
    }

    /// Fails every request with `status`.
    pub fn always(status: StatusCode) -> Self {
        Self {
            fail_count: usize::MAX,
            fail_status: status,
            ..Self::new(0)
        }
    }

    async fn handler(
        self,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> (StatusCode, &'static str) {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst);
        eprintln!(
            "Backend call #{} {} {} (fail_count={})",
            count + 1,
            method,
            uri.path(),
            self.fail_count
        );

        if count < self.fail_count {
            return (self.fail_status, "backend failure");
        }

        let headers = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        self.captured.lock().unwrap().push(CapturedRequest {
            method,
            path: uri.path().to_string(),
            headers,
            body: body.to_vec(),
        });

        (self.success_status, "{}")
    }

    /// Serves on an ephemeral loopback port; returns the base URL.
    pub async fn start(&self) -> String {
        let backend = self.clone();
        let app = Router::new().fallback(move |method, uri, headers, body| {
            let backend = backend.clone();
            async move { backend.handler(method, uri, headers, body).await }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock backend");
        let addr = listener.local_addr().expect("listener has an address");

        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Mock backend server failed");
        });

        format!("http://{addr}")
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn captured(&self) -> Vec<CapturedRequest> {
        self.captured.lock().unwrap().clone()
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of one batch to a channel endpoint.
//!
//! Each attempt rebuilds the request, so the auth provider signs it again
//! with a fresh timestamp. Responses are classified as:
//!
//! - **2xx**: delivered
//! - **4xx**: permanent, the batch is dropped and never retried
//! - **anything else, transport errors and timeouts**: transient, retried
//!   after `send_retry_interval` until the attempt budget is spent
//!
//! The caller takes the rate limiter slot for the first attempt. Retries take
//! their own, so they never come closer than `minimum_send_gap` either.

use crate::auth::AuthProvider;
use crate::error::DeliveryError;
use crate::payload::encode_batch;
use crate::record::{ChannelKind, Record};
use crate::stats::ChannelStats;
use crate::trigger::SharedRateLimiter;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Response};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[derive(Clone)]
pub struct Sender {
    kind: ChannelKind,
    client: reqwest::Client,
    url: String,
    auth: Arc<dyn AuthProvider>,
    timeout: Duration,
    attempts: u32,
    retry_wait: Duration,
    limiter: SharedRateLimiter,
    stats: Arc<ChannelStats>,
}

pub struct SenderConfig {
    pub kind: ChannelKind,
    pub client: reqwest::Client,
    pub url: String,
    pub auth: Arc<dyn AuthProvider>,
    pub timeout: Duration,
    /// Total attempts per batch; zero behaves like one
    pub attempts: u32,
    pub retry_wait: Duration,
    pub limiter: SharedRateLimiter,
    pub stats: Arc<ChannelStats>,
}

impl Sender {
    #[must_use]
    pub fn new(config: SenderConfig) -> Self {
        Sender {
            kind: config.kind,
            client: config.client,
            url: config.url,
            auth: config.auth,
            timeout: config.timeout,
            attempts: config.attempts.max(1),
            retry_wait: config.retry_wait,
            limiter: config.limiter,
            stats: config.stats,
        }
    }

    /// Sends `batch`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// The last failure once the batch can't be delivered. Only
    /// [`DeliveryError::is_retryable`] errors should lead to a requeue.
    pub async fn send(&self, batch: &[Record]) -> Result<(), DeliveryError> {
        if batch.is_empty() {
            return Ok(());
        }
        let body = encode_batch(batch)?;
        debug!(
            "{} | Sending {} records ({} bytes)",
            self.kind,
            batch.len(),
            body.len()
        );

        let mut attempts = 0;
        loop {
            if !self.auth.is_authenticated() {
                return Err(DeliveryError::AuthNotReady);
            }
            attempts += 1;
            let time = Instant::now();
            self.stats.record_send_attempts(1);

            let result = self.request(Method::POST, &[], Some(body.clone())).await;
            let elapsed = time.elapsed();

            match result {
                Ok(_) => {
                    debug!(
                        "{} | Delivered {} records in {} ms",
                        self.kind,
                        batch.len(),
                        elapsed.as_millis()
                    );
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempts >= self.attempts => {
                    error!(
                        "{} | Failed to send request after {} ms and {} attempts: {}",
                        self.kind,
                        elapsed.as_millis(),
                        attempts,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    debug!(
                        "{} | Attempt {}/{} failed: {}, retrying in {} ms",
                        self.kind,
                        attempts,
                        self.attempts,
                        e,
                        self.retry_wait.as_millis()
                    );
                    tokio::time::sleep(self.retry_wait).await;
                    self.limiter.acquire().await;
                }
            }
        }
    }

    /// One authenticated request to the channel URL, without retries.
    pub async fn request(
        &self,
        method: Method,
        query: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<Response, DeliveryError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        self.auth
            .build_auth_headers(&mut headers, body.as_deref().unwrap_or_default());

        let mut req = self
            .client
            .request(method, &self.url)
            .timeout(self.timeout)
            .headers(headers);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.body(body);
        }

        classify(req.send().await).await
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

async fn classify(resp: Result<Response, reqwest::Error>) -> Result<Response, DeliveryError> {
    match resp {
        Ok(resp) if resp.status().is_success() => Ok(resp),
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            if status.is_client_error() {
                Err(DeliveryError::Permanent { status, body })
            } else {
                Err(DeliveryError::Transient {
                    status: Some(status),
                    message: body,
                })
            }
        }
        Err(e) if e.is_timeout() => Err(DeliveryError::Transient {
            status: None,
            message: format!("request timed out: {e}"),
        }),
        Err(e) => Err(DeliveryError::Transient {
            status: e.status(),
            message: e.to_string(),
        }),
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client shared by all channels of a pipeline.

use crate::config::PipelineConfig;
use crate::error::ConfigError;
use tracing::error;

/// Builds the reqwest client used for every request of a pipeline.
///
/// A misconfigured proxy is logged and the client falls back to a direct
/// connection, so telemetry keeps flowing where the network allows it.
///
/// # Errors
///
/// When the client cannot be built even without a proxy, e.g. because the
/// TLS backend fails to initialise.
pub fn get_client(config: &PipelineConfig) -> Result<reqwest::Client, ConfigError> {
    let builder = || {
        reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.request_timeout)
    };

    let Some(proxy) = &config.https_proxy else {
        return Ok(builder().build()?);
    };

    match reqwest::Proxy::https(proxy).and_then(|proxy| builder().proxy(proxy).build()) {
        Ok(client) => Ok(client),
        Err(e) => {
            error!("Unable to parse proxy configuration: {e}, no proxy will be used");
            Ok(builder().build()?)
        }
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Ways a record or a batch can fail to reach the backend.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// No credentials yet; the batch stays queued for a later attempt.
    #[error("not authenticated")]
    AuthNotReady,

    #[error("queue full ({capacity} records), record dropped")]
    QueueFull { capacity: usize },

    /// Connection error, timeout or 5xx. Retried, then requeued.
    #[error("transient delivery failure (status {status:?}): {message}")]
    Transient {
        status: Option<StatusCode>,
        message: String,
    },

    /// 4xx response. The batch is dropped.
    #[error("backend rejected request with {status}: {body}")]
    Permanent { status: StatusCode, body: String },

    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Whether the batch should go back into its queue.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::AuthNotReady | DeliveryError::Transient { .. }
        )
    }
}

/// Errors raised while building a configuration or a pipeline from it.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DeliveryError::QueueFull { capacity: 1024 };
        assert_eq!(error.to_string(), "queue full (1024 records), record dropped");

        let error = ConfigError::Invalid("base URL cannot be empty".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: base URL cannot be empty"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(DeliveryError::AuthNotReady.is_retryable());
        assert!(DeliveryError::Transient {
            status: Some(StatusCode::BAD_GATEWAY),
            message: "bad gateway".to_string(),
        }
        .is_retryable());
        assert!(!DeliveryError::Permanent {
            status: StatusCode::UNAUTHORIZED,
            body: String::new(),
        }
        .is_retryable());
        assert!(!DeliveryError::QueueFull { capacity: 1 }.is_retryable());

        let bad_json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!DeliveryError::from(bad_json).is_retryable());
    }
}

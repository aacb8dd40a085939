// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Credentials attached to outgoing requests.
//!
//! The pipeline does not know how credentials are obtained or refreshed. It
//! only asks an [`AuthProvider`] whether it may send, and lets it decorate
//! each request.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use sha2::Sha256;
use std::fmt::Debug;
use std::sync::{PoisonError, RwLock};
use tracing::error;

pub const TIMESTAMP_HEADER: HeaderName = HeaderName::from_static("x-abxrlib-timestamp");
pub const HASH_HEADER: HeaderName = HeaderName::from_static("x-abxrlib-hash");

pub trait AuthProvider: Send + Sync {
    /// Gate checked before any send attempt.
    fn is_authenticated(&self) -> bool;

    /// Adds credential headers for a request carrying `body`. Called once per
    /// attempt, so time-based signatures are always fresh.
    fn build_auth_headers(&self, headers: &mut HeaderMap, body: &[u8]);
}

#[derive(Clone)]
struct Credentials {
    token: String,
    secret: String,
}

/// Bearer token plus an HMAC-SHA256 request signature keyed by the session
/// secret. Credentials are installed by whoever runs the authentication
/// handshake and may be replaced or cleared at any time.
#[derive(Default)]
pub struct SessionAuth {
    credentials: RwLock<Option<Credentials>>,
}

impl SessionAuth {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_credentials(token: &str, secret: &str) -> Self {
        let auth = Self::new();
        auth.set_credentials(token, secret);
        auth
    }

    pub fn set_credentials(&self, token: &str, secret: &str) {
        let mut credentials = self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *credentials = Some(Credentials {
            token: token.to_string(),
            secret: secret.to_string(),
        });
    }

    pub fn clear(&self) {
        let mut credentials = self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *credentials = None;
    }

    fn current(&self) -> Option<Credentials> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuthProvider for SessionAuth {
    fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }

    fn build_auth_headers(&self, headers: &mut HeaderMap, body: &[u8]) {
        let Some(credentials) = self.current() else {
            return;
        };
        let timestamp = Utc::now().timestamp().to_string();

        let Some(signature) = sign(&credentials, &timestamp, body) else {
            return;
        };

        match HeaderValue::try_from(format!("Bearer {}", credentials.token)) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(e) => {
                error!("Session token is not a valid header value: {e}");
                return;
            }
        }
        if let Ok(value) = HeaderValue::try_from(timestamp) {
            headers.insert(TIMESTAMP_HEADER, value);
        }
        if let Ok(value) = HeaderValue::try_from(signature) {
            headers.insert(HASH_HEADER, value);
        }
    }
}

impl Debug for SessionAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionAuth")
    }
}

/// base64(HMAC-SHA256(secret, token || timestamp || body))
fn sign(credentials: &Credentials, timestamp: &str, body: &[u8]) -> Option<String> {
    let mut mac = match Hmac::<Sha256>::new_from_slice(credentials.secret.as_bytes()) {
        Ok(mac) => mac,
        Err(e) => {
            error!("Failed to create request signature: {e}");
            return None;
        }
    };
    mac.update(credentials.token.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    Some(STANDARD.encode(mac.finalize().into_bytes()))
}

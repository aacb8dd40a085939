// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire format of the collection and storage endpoints.
//!
//! Every write channel POSTs its batch wrapped in a `data` field:
//!
//! ```json
//! {"data": [{"timestamp": "2024-05-01T10:00:00.123Z", "name": "click", "attributes": {"x": "1"}}]}
//! ```
//!
//! Storage reads answer with a nested list, of which only the first entry is
//! meaningful:
//!
//! ```json
//! {"data": [{"data": [{"level": "3"}, {"level": "4"}]}]}
//! ```

use crate::error::DeliveryError;
use crate::record::{Attributes, Record};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize)]
struct Envelope<'a> {
    data: &'a [Record],
}

/// Serializes a batch into a request body.
pub fn encode_batch(batch: &[Record]) -> Result<Vec<u8>, DeliveryError> {
    Ok(serde_json::to_vec(&Envelope { data: batch })?)
}

#[derive(Deserialize)]
struct StorageResponse {
    #[serde(default)]
    data: Vec<StorageResponseEntry>,
}

#[derive(Deserialize)]
struct StorageResponseEntry {
    #[serde(default)]
    data: Vec<IndexMap<String, Value>>,
}

/// Extracts the entries of a storage read response. Non-string values are
/// kept as their JSON text.
pub fn decode_storage_response(body: &[u8]) -> Result<Vec<Attributes>, DeliveryError> {
    let response: StorageResponse = serde_json::from_slice(body)?;
    let Some(first) = response.data.into_iter().next() else {
        return Ok(Vec::new());
    };

    Ok(first
        .data
        .into_iter()
        .map(|entry| {
            entry
                .into_iter()
                .map(|(key, value)| match value {
                    Value::String(s) => (key, s),
                    other => (key, other.to_string()),
                })
                .collect()
        })
        .collect())
}

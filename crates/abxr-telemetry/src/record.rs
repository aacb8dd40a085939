// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Telemetry records and the channels they travel on.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record metadata. Keys are unique and serialize in insertion order.
pub type Attributes = IndexMap<String, String>;

/// The four independent telemetry streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Events,
    Logs,
    Telemetry,
    Storage,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Events,
        ChannelKind::Logs,
        ChannelKind::Telemetry,
        ChannelKind::Storage,
    ];

    /// Prefix used in log lines emitted on behalf of this channel.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ChannelKind::Events => "EVENTS",
            ChannelKind::Logs => "LOGS",
            ChannelKind::Telemetry => "TELEMETRY",
            ChannelKind::Storage => "STORAGE",
        }
    }

    /// Collection path relative to the configured REST base URL.
    #[must_use]
    pub fn default_path(&self) -> &'static str {
        match self {
            ChannelKind::Events => "/v1/collect/event",
            ChannelKind::Logs => "/v1/collect/log",
            ChannelKind::Telemetry => "/v1/collect/telemetry",
            ChannelKind::Storage => "/v1/storage",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

/// Whether a storage entry belongs to the device or follows the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageScope {
    #[default]
    Device,
    User,
}

impl StorageScope {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageScope::Device => "device",
            StorageScope::User => "user",
        }
    }
}

/// How the backend treats a storage entry written under an existing name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeepPolicy {
    #[default]
    KeepLatest,
    AppendHistory,
}

/// One unit of telemetry.
///
/// A record is immutable once built: it is either delivered as-is or handed
/// back to its queue verbatim after a failed send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    timestamp: String,
    name: String,
    attributes: Attributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<LogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<StorageScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_policy: Option<KeepPolicy>,
}

impl Record {
    fn new(name: impl Into<String>, attributes: Attributes) -> Self {
        Record {
            timestamp: format_timestamp(Utc::now()),
            name: name.into(),
            attributes,
            level: None,
            scope: None,
            keep_policy: None,
        }
    }

    #[must_use]
    pub fn event(name: impl Into<String>, attributes: Attributes) -> Self {
        Self::new(name, attributes)
    }

    #[must_use]
    pub fn log(level: LogLevel, message: impl Into<String>, attributes: Attributes) -> Self {
        Record {
            level: Some(level),
            ..Self::new(message, attributes)
        }
    }

    #[must_use]
    pub fn telemetry(name: impl Into<String>, attributes: Attributes) -> Self {
        Self::new(name, attributes)
    }

    #[must_use]
    pub fn storage(
        name: impl Into<String>,
        entry: Attributes,
        scope: StorageScope,
        keep_policy: KeepPolicy,
    ) -> Self {
        Record {
            scope: Some(scope),
            keep_policy: Some(keep_policy),
            ..Self::new(name, entry)
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    #[must_use]
    pub fn level(&self) -> Option<LogLevel> {
        self.level
    }

    #[must_use]
    pub fn scope(&self) -> Option<StorageScope> {
        self.scope
    }

    #[must_use]
    pub fn keep_policy(&self) -> Option<KeepPolicy> {
        self.keep_policy
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T10:00:00.123Z`.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_format_timestamp_millis() {
        let at = Utc
            .timestamp_millis_opt(1_714_557_600_123)
            .single()
            .expect("valid timestamp");
        assert_eq!(format_timestamp(at), "2024-05-01T10:00:00.123Z");
    }

    #[test]
    fn test_event_serialization() {
        let record = Record::event("click", attrs(&[("y", "2"), ("x", "1")]));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["name"], "click");
        assert_eq!(json["attributes"]["x"], "1");
        assert!(json.get("level").is_none());
        assert!(json.get("scope").is_none());
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));

        // keys go out in the order the producer added them
        let text = serde_json::to_string(&record).unwrap();
        assert!(text.find("\"y\"").unwrap() < text.find("\"x\"").unwrap());
    }

    #[test]
    fn test_log_carries_level() {
        let record = Record::log(LogLevel::Critical, "boom", Attributes::new());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["level"], "critical");
        assert_eq!(json["name"], "boom");
    }

    #[test]
    fn test_storage_carries_scope_and_policy() {
        let record = Record::storage(
            "progress",
            attrs(&[("level", "3")]),
            StorageScope::User,
            KeepPolicy::AppendHistory,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["scope"], "user");
        assert_eq!(json["keepPolicy"], "appendHistory");
        assert_eq!(json["attributes"]["level"], "3");
    }

    #[test]
    fn test_channel_labels_and_paths() {
        assert_eq!(ChannelKind::Logs.to_string(), "LOGS");
        assert_eq!(ChannelKind::Storage.default_path(), "/v1/storage");
        assert_eq!(ChannelKind::ALL.len(), 4);
    }
}

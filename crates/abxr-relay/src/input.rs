// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Newline-delimited JSON accepted on stdin, one record per line:
//!
//! ```text
//! {"channel": "event", "name": "click", "attributes": {"x": "1"}}
//! {"channel": "log", "level": "warn", "message": "low battery"}
//! {"channel": "telemetry", "name": "fps", "value": 72}
//! {"channel": "storage", "name": "progress", "scope": "user", "entry": {"level": "3"}}
//! {"channel": "timer", "name": "level_one"}
//! ```

use abxr_telemetry::{Attributes, KeepPolicy, LogLevel, StorageScope, TelemetryPipeline};
use serde::Deserialize;

#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum RecordLine {
    Event {
        name: String,
        #[serde(default)]
        attributes: Attributes,
    },
    Log {
        #[serde(default = "default_level")]
        level: LogLevel,
        message: String,
        #[serde(default)]
        attributes: Attributes,
    },
    Telemetry {
        name: String,
        #[serde(default)]
        value: Option<f64>,
        #[serde(default)]
        attributes: Attributes,
    },
    Storage {
        name: String,
        #[serde(default)]
        scope: StorageScope,
        #[serde(default, rename = "keepPolicy")]
        keep_policy: KeepPolicy,
        #[serde(default)]
        entry: Attributes,
    },
    /// Starts a timed event closed by the next event of the same name
    Timer { name: String },
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

impl RecordLine {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn dispatch(self, pipeline: &TelemetryPipeline) {
        match self {
            RecordLine::Event { name, attributes } => pipeline.event(&name, attributes),
            RecordLine::Log {
                level,
                message,
                attributes,
            } => pipeline.log(level, &message, attributes),
            RecordLine::Telemetry {
                name,
                value: Some(value),
                attributes,
            } => pipeline.telemetry_value(&name, value, attributes),
            RecordLine::Telemetry {
                name,
                value: None,
                attributes,
            } => pipeline.telemetry(&name, attributes),
            RecordLine::Storage {
                name,
                scope,
                keep_policy,
                entry,
            } => pipeline.storage_set(&name, entry, scope, keep_policy),
            RecordLine::Timer { name } => pipeline.start_timed_event(&name),
        }
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line format of the relay.
//!
//! ```text
//! [2024-05-01T10:00:00.123Z ]ABXR LEVEL component | [span{fields}: ]message fields
//! ```
//!
//! `component` is the last segment of the event target with the crate prefix
//! removed, so `abxr_telemetry::channel` logs as `channel` and the relay
//! binary itself as `relay`.

use chrono::{SecondsFormat, Utc};
use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

#[derive(Debug, Clone, Copy)]
pub struct Formatter {
    /// Prefix each line with a UTC timestamp
    pub timestamps: bool,
}

impl Default for Formatter {
    fn default() -> Self {
        Formatter { timestamps: true }
    }
}

fn component(target: &str) -> &str {
    let last = target.rsplit("::").next().unwrap_or(target);
    last.strip_prefix("abxr_").unwrap_or(last)
}

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        if self.timestamps {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            write!(writer, "{now} ")?;
        }
        write!(
            writer,
            "ABXR {:<5} {} | ",
            metadata.level().as_str(),
            component(metadata.target())
        )?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                if let Some(fields) = span.extensions().get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace records handed to the writer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Meta key carrying the name of the host which produced the trace.
pub const HOSTNAME_KEY: &str = "_dd.hostname";

/// Checks if the `value` is the default value of its type. Used to skip serializing fields with
/// serde.
fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// A finished span, in the shape of the agent's v0.4 API.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub service: String,
    pub name: String,
    pub resource: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub r#type: String,
    pub trace_id: u64,
    pub span_id: u64,
    #[serde(default, skip_serializing_if = "is_default")]
    pub parent_id: u64,
    pub start: i64,
    pub duration: i64,
    #[serde(default, skip_serializing_if = "is_default")]
    pub error: i32,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metrics: HashMap<String, f64>,
}

/// All the spans of one trace, root first.
pub type TraceChunk = Vec<Span>;

/// Tag the first span of `trace` with `hostname`.
pub fn set_hostname(trace: &mut TraceChunk, hostname: &str) {
    if let Some(span) = trace.first_mut() {
        span.meta
            .insert(HOSTNAME_KEY.to_string(), hostname.to_string());
    }
}

/// Name of the current host, if it can be resolved.
pub fn hostname() -> Option<String> {
    sys_info::hostname().ok().filter(|name| !name.is_empty())
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Trace Writer Health Metrics
//!
//! This module defines all health metrics emitted by the trace writer. They give visibility on
//! how many traces are accepted, dropped and delivered without surfacing any failure to the
//! instrumented application.
//!
//! Health metrics are **disabled by default**: the writer emits into a [`NoopHealthMetrics`] sink
//! unless a sink is configured, e.g. a [`DogStatsDHealthMetrics`] pointing at a DogStatsD server.
//!
//! ## Metric Types
//!
//! - **Count**: Incremental counters that track the number of occurrences
//! - **Distribution**: Value distributions that track sizes or quantities
//! - **Gauge**: Current values, overwritten on each emission
//!
//! ## Naming Convention
//!
//! - `datadog.tracer.queue.*`: Buffer metrics, emitted each time the buffer is drained
//! - `datadog.tracer.transport.*`: Chunking metrics
//! - `datadog.tracer.api.*`: Per-request agent API metrics
//! - `datadog.tracer.writer.*`: Writer-level drops
//!
//! ## Tags
//!
//! All metrics are tagged with `libdatadog_version`. Response metrics additionally carry a
//! `status_code:<code>` tag and writer drops a `cause:<reason>` tag.

use cadence::prelude::*;
use cadence::{Metric, MetricBuilder, QueuingMetricSink, StatsdClient, UdpMetricSink};
use std::fmt::Debug;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::Mutex;
use tracing::{debug, error};

use crate::MutexExt;

// =============================================================================
// Buffer Metrics
// =============================================================================

/// Number of traces accepted by the buffer since the last drain.
///
/// **Type**: Count
pub const QUEUE_ACCEPTED: &str = "datadog.tracer.queue.accepted";

/// Number of spans contained in the traces accepted since the last drain.
///
/// **Type**: Count
pub const QUEUE_ACCEPTED_LENGTHS: &str = "datadog.tracer.queue.accepted_lengths";

/// Number of traces evicted because the buffer was full.
///
/// **Type**: Count
pub const QUEUE_DROPPED: &str = "datadog.tracer.queue.dropped";

/// Configured capacity of the buffer.
///
/// **Type**: Gauge
pub const QUEUE_MAX_LENGTH: &str = "datadog.tracer.queue.max_length";

/// Number of spans held by the buffer when drained.
///
/// **Type**: Gauge
pub const QUEUE_SPANS: &str = "datadog.tracer.queue.spans";

/// Number of traces held by the buffer when drained.
///
/// **Type**: Gauge
pub const QUEUE_LENGTH: &str = "datadog.tracer.queue.length";

// =============================================================================
// Transport Metrics
// =============================================================================

/// Number of chunks a batch of traces was split into.
///
/// **Type**: Distribution
pub const TRANSPORT_CHUNKED: &str = "datadog.tracer.transport.chunked";

/// Number of traces dropped because their encoding alone exceeds the max payload size.
///
/// **Type**: Count
pub const TRANSPORT_TRACE_TOO_LARGE: &str = "datadog.tracer.transport.trace_too_large";

// =============================================================================
// API Metrics
// =============================================================================

/// Number of requests sent to the agent.
///
/// **Type**: Count
pub const API_REQUESTS: &str = "datadog.tracer.api.requests";

/// Number of HTTP responses received from the agent.
///
/// **Type**: Count
/// **Tags**: `status_code:<code>`
pub const API_RESPONSES: &str = "datadog.tracer.api.responses";

/// Number of requests which failed locally before any response was received.
///
/// **Type**: Count
pub const API_ERRORS: &str = "datadog.tracer.api.errors";

// =============================================================================
// Writer Metrics
// =============================================================================

/// Number of traces dropped by the writer because a flush failed unexpectedly.
///
/// **Type**: Count
/// **Tags**: `cause:<reason>`
pub const WRITER_DROPPED: &str = "datadog.tracer.writer.dropped";

const VERSION_TAG: &str = concat!("libdatadog_version:", env!("CARGO_PKG_VERSION"));

/// A single health metric sample.
#[derive(Clone, Debug, PartialEq)]
pub enum HealthMetric {
    Count(&'static str, i64),
    Distribution(&'static str, i64),
    Gauge(&'static str, i64),
}

impl HealthMetric {
    pub fn name(&self) -> &'static str {
        match self {
            HealthMetric::Count(name, _)
            | HealthMetric::Distribution(name, _)
            | HealthMetric::Gauge(name, _) => name,
        }
    }

    pub fn value(&self) -> i64 {
        match self {
            HealthMetric::Count(_, value)
            | HealthMetric::Distribution(_, value)
            | HealthMetric::Gauge(_, value) => *value,
        }
    }
}

/// Destination of health metrics.
///
/// Implementations must never block the caller for long nor fail: metrics are diagnostics and
/// must not affect trace delivery.
pub trait HealthMetricsSink: Send + Sync + Debug {
    /// Emit `metric`, optionally tagged with `tag` (formatted as `key:value`).
    fn emit(&self, metric: HealthMetric, tag: Option<String>);
}

/// Sink discarding every metric. Used when health metrics are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHealthMetrics;

impl HealthMetricsSink for NoopHealthMetrics {
    fn emit(&self, _metric: HealthMetric, _tag: Option<String>) {}
}

/// Sink keeping every metric in memory.
///
/// Useful to assert on emitted metrics or to forward them to a custom backend in bulk.
#[derive(Debug, Default)]
pub struct InMemoryHealthMetrics {
    metrics: Mutex<Vec<(HealthMetric, Option<String>)>>,
}

impl InMemoryHealthMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every metric emitted so far.
    pub fn snapshot(&self) -> Vec<(HealthMetric, Option<String>)> {
        self.metrics.lock_or_panic().clone()
    }

    /// Sum of the values emitted under `name`.
    pub fn total(&self, name: &str) -> i64 {
        self.metrics
            .lock_or_panic()
            .iter()
            .filter(|(metric, _)| metric.name() == name)
            .map(|(metric, _)| metric.value())
            .sum()
    }

    /// Number of samples emitted under `name`.
    pub fn count(&self, name: &str) -> usize {
        self.metrics
            .lock_or_panic()
            .iter()
            .filter(|(metric, _)| metric.name() == name)
            .count()
    }
}

impl HealthMetricsSink for InMemoryHealthMetrics {
    fn emit(&self, metric: HealthMetric, tag: Option<String>) {
        self.metrics.lock_or_panic().push((metric, tag));
    }
}

// Queue with a maximum capacity of 32K elements
const QUEUE_SIZE: usize = 32 * 1024;

/// Sink sending metrics to a DogStatsD server over UDP.
pub struct DogStatsDHealthMetrics {
    client: StatsdClient,
}

impl Debug for DogStatsDHealthMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DogStatsDHealthMetrics").finish_non_exhaustive()
    }
}

impl DogStatsDHealthMetrics {
    /// Create a sink sending to `addr` (e.g. `127.0.0.1:8125`).
    ///
    /// # Errors
    /// Fails if the local socket cannot be bound or `addr` cannot be resolved.
    pub fn new<A: ToSocketAddrs>(addr: A) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        let sink = QueuingMetricSink::with_capacity(UdpMetricSink::from(addr, socket)?, QUEUE_SIZE);
        let client = StatsdClient::builder("", sink)
            .with_error_handler(|err| error!("Error while sending health metric: {err}"))
            .build();
        debug!("Health metrics enabled");
        Ok(Self { client })
    }
}

impl HealthMetricsSink for DogStatsDHealthMetrics {
    fn emit(&self, metric: HealthMetric, tag: Option<String>) {
        let tags = std::iter::once(VERSION_TAG).chain(tag.as_deref());
        let res = match metric {
            HealthMetric::Count(name, value) => {
                do_send(self.client.count_with_tags(name, value), tags)
            }
            HealthMetric::Distribution(name, value) => {
                do_send(self.client.distribution_with_tags(name, value as f64), tags)
            }
            HealthMetric::Gauge(name, value) => {
                do_send(self.client.gauge_with_tags(name, value as f64), tags)
            }
        };
        if let Err(err) = res {
            debug!(error = %err, "Failed to send health metric");
        }
    }
}

fn do_send<'m, T>(
    mut builder: MetricBuilder<'m, '_, T>,
    tags: impl IntoIterator<Item = &'m str>,
) -> anyhow::Result<()>
where
    T: Metric + From<String>,
{
    for tag in tags {
        builder = builder.with_tag_value(tag);
    }
    builder.try_send()?;
    Ok(())
}
